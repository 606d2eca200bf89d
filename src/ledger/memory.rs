/// In-memory ledger for development and tests
///
/// Assigns a global, strictly increasing position to every accepted
/// submission and emits the confirmation after a configurable delay. Fault
/// injection covers transient failures and permanent rejections; in manual
/// mode events are held until released, which lets tests deliver
/// confirmations out of order.
use crate::{
    ledger::{LedgerEvent, LedgerGateway, SubmissionError, SubmissionReceipt, EVENT_CHANNEL_CAPACITY},
    operation::SignedOperation,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Default)]
struct LedgerState {
    next_position: u64,
    /// Position assigned to each accepted operation
    positions: HashMap<String, (String, u64)>,
    transient_failures: u32,
    permanent_rejection: Option<String>,
    /// Events waiting for `release` in manual mode
    held: Vec<LedgerEvent>,
    submissions: u64,
}

/// In-memory `LedgerGateway`
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    events: broadcast::Sender<LedgerEvent>,
    confirmation_delay: Duration,
    manual: bool,
}

impl InMemoryLedger {
    /// Ledger that confirms every accepted submission after `confirmation_delay`
    pub fn new(confirmation_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(LedgerState {
                next_position: 1,
                ..Default::default()
            }),
            events,
            confirmation_delay,
            manual: false,
        }
    }

    /// Ledger that holds every event until `release` or `reject_held`
    pub fn manual() -> Self {
        Self {
            manual: true,
            ..Self::new(Duration::ZERO)
        }
    }

    /// Bound the event channel to `capacity` undelivered events
    ///
    /// Must be called before anything subscribes.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        self.events = events;
        self
    }

    /// Continue numbering after `position`, e.g. once a journal is replayed
    pub fn resume_after(self, position: u64) -> Self {
        self.lock().next_position = position + 1;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` submissions with a transient error
    pub fn fail_next_transient(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    /// Permanently reject the next submission with `reason`
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().permanent_rejection = Some(reason.into());
    }

    /// Number of submission attempts seen, including failed ones
    pub fn submission_count(&self) -> u64 {
        self.lock().submissions
    }

    /// Hashes of operations whose events are held
    pub fn held(&self) -> Vec<String> {
        self.lock().held.iter().map(|e| e.op_hash().to_string()).collect()
    }

    /// Emit the held event for `op_hash`
    pub fn release(&self, op_hash: &str) -> bool {
        let event = {
            let mut state = self.lock();
            let Some(index) = state.held.iter().position(|e| e.op_hash() == op_hash) else {
                return false;
            };
            state.held.remove(index)
        };
        self.emit(event);
        true
    }

    /// Replace a held confirmation with a rejection carrying `reason`
    pub fn reject_held(&self, op_hash: &str, reason: impl Into<String>) -> bool {
        let event = {
            let mut state = self.lock();
            let Some(index) = state.held.iter().position(|e| e.op_hash() == op_hash) else {
                return false;
            };
            match state.held.remove(index) {
                LedgerEvent::Confirmed { op_hash, did, .. } | LedgerEvent::Rejected { op_hash, did, .. } => {
                    LedgerEvent::Rejected {
                        op_hash,
                        did,
                        reason: reason.into(),
                    }
                }
            }
        };
        self.emit(event);
        true
    }

    fn emit(&self, event: LedgerEvent) {
        if self.events.send(event).is_err() {
            debug!("ledger event dropped, no subscribers");
        }
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn submit(&self, operation: &SignedOperation) -> Result<SubmissionReceipt, SubmissionError> {
        let op_hash = operation
            .hash()
            .map_err(|e| SubmissionError::Permanent(format!("malformed operation: {}", e)))?;
        let did = operation
            .did()
            .map_err(|e| SubmissionError::Permanent(format!("malformed operation: {}", e)))?;

        let ledger_position = {
            let mut state = self.lock();
            state.submissions += 1;

            if state.transient_failures > 0 {
                state.transient_failures -= 1;
                return Err(SubmissionError::Transient("ledger node busy".to_string()));
            }
            if let Some(reason) = state.permanent_rejection.take() {
                return Err(SubmissionError::Permanent(reason));
            }

            // Resubmitting an anchored operation keeps its position
            match state.positions.get(&op_hash) {
                Some((_, position)) => *position,
                None => {
                    let position = state.next_position;
                    state.next_position += 1;
                    state.positions.insert(op_hash.clone(), (did.clone(), position));
                    position
                }
            }
        };

        let event = LedgerEvent::Confirmed {
            op_hash: op_hash.clone(),
            did,
            ledger_position,
            anchored_at: Utc::now(),
        };

        if self.manual {
            self.lock().held.push(event);
        } else {
            let events = self.events.clone();
            let delay = self.confirmation_delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                // Anchor time is the moment the ledger confirms
                let event = match event {
                    LedgerEvent::Confirmed {
                        op_hash,
                        did,
                        ledger_position,
                        ..
                    } => LedgerEvent::Confirmed {
                        op_hash,
                        did,
                        ledger_position,
                        anchored_at: Utc::now(),
                    },
                    other => other,
                };
                if events.send(event).is_err() {
                    debug!("ledger event dropped, no subscribers");
                }
            });
        }

        debug!(op_hash = %op_hash, ledger_position, "operation accepted by in-memory ledger");

        Ok(SubmissionReceipt {
            ledger_ref: format!("mem:{}", ledger_position),
            op_hash,
            submitted_at: Utc::now(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}
