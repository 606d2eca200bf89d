/// Ledger Gateway
///
/// Contract with the external anchoring ledger: operations are submitted and
/// their outcome arrives later as an event on a subscription channel.
/// Confirmation order on the channel is not guaranteed to match chain order.

pub mod memory;

pub use memory::InMemoryLedger;

use crate::operation::SignedOperation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of ledger event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Acknowledgement that the ledger accepted a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub op_hash: String,
    /// Ledger-side reference for the submission
    pub ledger_ref: String,
    pub submitted_at: DateTime<Utc>,
}

/// Submission failure classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// Network trouble or ledger busy; worth retrying
    #[error("Transient ledger failure: {0}")]
    Transient(String),

    /// Invalid signature, insufficient fee, malformed, chain mismatch
    #[error("Ledger rejected the operation: {0}")]
    Permanent(String),
}

/// Asynchronous outcome of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Confirmed {
        op_hash: String,
        did: String,
        ledger_position: u64,
        anchored_at: DateTime<Utc>,
    },
    Rejected {
        op_hash: String,
        did: String,
        reason: String,
    },
}

impl LedgerEvent {
    pub fn op_hash(&self) -> &str {
        match self {
            LedgerEvent::Confirmed { op_hash, .. } | LedgerEvent::Rejected { op_hash, .. } => op_hash,
        }
    }
}

/// Client for the anchoring ledger
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Submit a signed operation for anchoring
    async fn submit(&self, operation: &SignedOperation) -> Result<SubmissionReceipt, SubmissionError>;

    /// Subscribe to confirmation and rejection events
    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;
}
