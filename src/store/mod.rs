/// Operation Store
///
/// Append-only log of signed operations per identifier and the source of
/// truth for resolution. Entries live in an in-memory arena keyed by
/// operation hash; each identifier keeps its local append order plus an
/// explicit confirmed head. Mutations go through a single write gate and are
/// journaled to SQLite before they become visible. Readers take a short read
/// lock and clone what they need.

pub mod journal;

pub use journal::OperationJournal;

use crate::{
    error::{RegistrarError, RegistrarResult},
    identifier,
    operation::{OperationKind, SignedOperation},
    resolver::fold,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Lifecycle of a stored operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Confirmed => "CONFIRMED",
            OperationStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = RegistrarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OperationStatus::Pending),
            "CONFIRMED" => Ok(OperationStatus::Confirmed),
            "REJECTED" => Ok(OperationStatus::Rejected),
            other => Err(RegistrarError::Internal(format!(
                "Unknown operation status: {}",
                other
            ))),
        }
    }
}

/// Why an operation was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCause {
    ChainMismatch,
    PublicationTimeout,
    LedgerRejection,
    Deactivated,
    InvalidOperation,
}

impl RejectionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCause::ChainMismatch => "CHAIN_MISMATCH",
            RejectionCause::PublicationTimeout => "PUBLICATION_TIMEOUT",
            RejectionCause::LedgerRejection => "LEDGER_REJECTION",
            RejectionCause::Deactivated => "DEACTIVATED",
            RejectionCause::InvalidOperation => "INVALID_OPERATION",
        }
    }

    /// Classify an error into a rejection cause
    pub fn from_error(err: &RegistrarError) -> Self {
        match err {
            RegistrarError::ChainMismatch { .. } => RejectionCause::ChainMismatch,
            RegistrarError::PublicationTimeout { .. } => RejectionCause::PublicationTimeout,
            RegistrarError::LedgerRejection(_) => RejectionCause::LedgerRejection,
            RegistrarError::Deactivated(_) => RejectionCause::Deactivated,
            _ => RejectionCause::InvalidOperation,
        }
    }
}

impl std::str::FromStr for RejectionCause {
    type Err = RegistrarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHAIN_MISMATCH" => Ok(RejectionCause::ChainMismatch),
            "PUBLICATION_TIMEOUT" => Ok(RejectionCause::PublicationTimeout),
            "LEDGER_REJECTION" => Ok(RejectionCause::LedgerRejection),
            "DEACTIVATED" => Ok(RejectionCause::Deactivated),
            "INVALID_OPERATION" => Ok(RejectionCause::InvalidOperation),
            other => Err(RegistrarError::Internal(format!(
                "Unknown rejection cause: {}",
                other
            ))),
        }
    }
}

/// One entry of the operation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOperation {
    pub hash: String,
    /// Short-form DID
    pub did: String,
    /// Local append sequence number (global across identifiers)
    pub local_seq: u64,
    pub signed: SignedOperation,
    pub status: OperationStatus,
    pub ledger_position: Option<u64>,
    pub anchored_at: Option<DateTime<Utc>>,
    pub rejection_cause: Option<RejectionCause>,
    pub rejection_reason: Option<String>,
    pub appended_at: DateTime<Utc>,
}

impl StoredOperation {
    pub fn kind(&self) -> OperationKind {
        self.signed.kind()
    }
}

/// A rejection produced while applying confirmations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub hash: String,
    pub cause: RejectionCause,
    pub reason: String,
}

/// What a call to `confirm` changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmReport {
    /// Hashes that became CONFIRMED, in chain order
    pub confirmed: Vec<String>,
    /// Entries rejected along the way, including cascaded successors
    pub rejected: Vec<RejectedEntry>,
    /// The confirmation was buffered until its predecessor confirms
    pub buffered: bool,
}

#[derive(Debug, Clone)]
struct BufferedConfirmation {
    op_hash: String,
    ledger_position: u64,
    anchored_at: DateTime<Utc>,
}

/// Per-identifier view into the arena
#[derive(Debug, Default)]
struct IdentifierLog {
    /// Every entry hash, in local append order
    entries: Vec<String>,
    /// Confirmed chain, in ledger order
    confirmed: Vec<String>,
    deactivated: bool,
    /// Set when an invariant violation was detected
    halted: Option<String>,
    /// Out-of-order confirmations keyed by the predecessor they wait on
    buffered: HashMap<String, BufferedConfirmation>,
}

impl IdentifierLog {
    fn head(&self) -> Option<&String> {
        self.confirmed.last()
    }
}

#[derive(Debug, Default)]
struct Arena {
    operations: HashMap<String, StoredOperation>,
    identifiers: BTreeMap<String, IdentifierLog>,
    next_seq: u64,
}

impl Arena {
    fn confirmed_ops(&self, did: &str) -> Vec<StoredOperation> {
        self.identifiers
            .get(did)
            .map(|log| {
                log.confirmed
                    .iter()
                    .filter_map(|h| self.operations.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Decision taken for one confirmation
enum ConfirmDecision {
    Apply,
    Buffer { predecessor: String },
    Reject(RegistrarError),
}

/// The operation store
pub struct OperationStore {
    arena: RwLock<Arena>,
    write_gate: Mutex<()>,
    journal: Option<OperationJournal>,
}

impl OperationStore {
    /// Create a store without durable backing
    pub fn in_memory() -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            write_gate: Mutex::new(()),
            journal: None,
        }
    }

    /// Open a journaled store, replaying existing entries
    pub async fn open(db: SqlitePool) -> RegistrarResult<Self> {
        let journal = OperationJournal::new(db).await?;
        let entries = journal.load_all().await?;
        let count = entries.len();

        let mut arena = Arena::default();
        for entry in entries {
            arena.next_seq = arena.next_seq.max(entry.local_seq + 1);
            let log = arena.identifiers.entry(entry.did.clone()).or_default();
            log.entries.push(entry.hash.clone());
            arena.operations.insert(entry.hash.clone(), entry);
        }

        // Rebuild confirmed chains in ledger order
        let dids: Vec<String> = arena.identifiers.keys().cloned().collect();
        for did in &dids {
            let mut confirmed: Vec<&StoredOperation> = arena.identifiers[did]
                .entries
                .iter()
                .filter_map(|h| arena.operations.get(h))
                .filter(|e| e.status == OperationStatus::Confirmed)
                .collect();
            confirmed.sort_by_key(|e| (e.ledger_position, e.local_seq));
            let chain: Vec<String> = confirmed.iter().map(|e| e.hash.clone()).collect();
            let deactivated = confirmed
                .iter()
                .any(|e| e.kind() == OperationKind::Deactivate);

            if let Some(log) = arena.identifiers.get_mut(did) {
                log.confirmed = chain;
                log.deactivated = deactivated;
            }
        }

        for did in &dids {
            if let Err(detail) = audit_chain(did, &arena.confirmed_ops(did)) {
                error!(did = %did, detail = %detail, "operation log corrupted, halting writes");
                if let Some(log) = arena.identifiers.get_mut(did) {
                    log.halted = Some(detail);
                }
            }
        }

        info!(entries = count, identifiers = dids.len(), "operation store replayed from journal");

        Ok(Self {
            arena: RwLock::new(arena),
            write_gate: Mutex::new(()),
            journal: Some(journal),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the store is journaled
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    /// Check the journal connection
    pub async fn ping(&self) -> RegistrarResult<()> {
        match &self.journal {
            Some(journal) => journal.ping().await,
            None => Ok(()),
        }
    }

    /// Append an operation in PENDING state
    ///
    /// Appending an operation that is already present returns the existing
    /// entry unchanged.
    pub async fn append(&self, signed: SignedOperation) -> RegistrarResult<StoredOperation> {
        let _gate = self.write_gate.lock().await;

        let hash = signed.hash()?;
        let did = signed.did()?;

        let entry = {
            let arena = self.read();
            if let Some(existing) = arena.operations.get(&hash) {
                return Ok(existing.clone());
            }

            match arena.identifiers.get(&did) {
                Some(log) => {
                    if let Some(detail) = &log.halted {
                        return Err(RegistrarError::StoreCorrupted {
                            did,
                            detail: detail.clone(),
                        });
                    }
                    if log.deactivated {
                        return Err(RegistrarError::Deactivated(did));
                    }
                }
                None if signed.kind() != OperationKind::Create => {
                    return Err(RegistrarError::NotFound(format!("Unknown DID: {}", did)));
                }
                None => {}
            }

            StoredOperation {
                hash: hash.clone(),
                did: did.clone(),
                local_seq: arena.next_seq,
                signed,
                status: OperationStatus::Pending,
                ledger_position: None,
                anchored_at: None,
                rejection_cause: None,
                rejection_reason: None,
                appended_at: Utc::now(),
            }
        };

        if let Some(journal) = &self.journal {
            journal.insert(&entry).await?;
        }

        {
            let mut arena = self.write();
            arena.next_seq = entry.local_seq + 1;
            let log = arena.identifiers.entry(did.clone()).or_default();
            log.entries.push(hash.clone());
            arena.operations.insert(hash.clone(), entry.clone());
        }

        debug!(did = %did, op_hash = %hash, kind = entry.kind().as_str(), "operation appended");
        Ok(entry)
    }

    /// Apply a ledger confirmation
    ///
    /// Confirms the operation if it chains onto the confirmed head, buffers it
    /// if its predecessor is still pending, and otherwise rejects it
    /// permanently and returns the cause.
    pub async fn confirm(
        &self,
        op_hash: &str,
        ledger_position: u64,
        anchored_at: DateTime<Utc>,
    ) -> RegistrarResult<ConfirmReport> {
        let _gate = self.write_gate.lock().await;
        let mut report = ConfirmReport::default();

        let did = {
            let arena = self.read();
            let entry = arena
                .operations
                .get(op_hash)
                .ok_or_else(|| RegistrarError::NotFound(format!("Unknown operation: {}", op_hash)))?;

            match entry.status {
                OperationStatus::Confirmed => return Ok(report),
                OperationStatus::Rejected => {
                    return Err(RegistrarError::Conflict(format!(
                        "Operation {} was already rejected",
                        op_hash
                    )))
                }
                OperationStatus::Pending => entry.did.clone(),
            }
        };

        match self.decide(&did, op_hash, ledger_position)? {
            ConfirmDecision::Apply => {
                self.apply_confirmation(&did, op_hash, ledger_position, anchored_at)
                    .await?;
                report.confirmed.push(op_hash.to_string());
            }
            ConfirmDecision::Buffer { predecessor } => {
                let waiting = {
                    let arena = self.read();
                    arena
                        .identifiers
                        .get(&did)
                        .and_then(|log| log.buffered.get(&predecessor))
                        .map(|b| b.op_hash.clone())
                };

                // Only one successor of a given predecessor can ever chain;
                // the one whose confirmation arrived first holds the slot
                if waiting.as_deref() == Some(op_hash) {
                    report.buffered = true;
                    return Ok(report);
                }
                if let Some(waiting) = waiting {
                    let err = RegistrarError::ChainMismatch {
                        expected: waiting,
                        actual: op_hash.to_string(),
                    };
                    self.reject_locked(&did, op_hash, RejectionCause::ChainMismatch, &err.to_string(), &mut report)
                        .await?;
                    return Err(err);
                }

                debug!(did = %did, op_hash = %op_hash, predecessor = %predecessor, "confirmation buffered");
                let mut arena = self.write();
                if let Some(log) = arena.identifiers.get_mut(&did) {
                    log.buffered.insert(
                        predecessor,
                        BufferedConfirmation {
                            op_hash: op_hash.to_string(),
                            ledger_position,
                            anchored_at,
                        },
                    );
                }
                report.buffered = true;
                return Ok(report);
            }
            ConfirmDecision::Reject(err) => {
                let cause = RejectionCause::from_error(&err);
                self.reject_locked(&did, op_hash, cause, &err.to_string(), &mut report)
                    .await?;
                return Err(err);
            }
        }

        self.drain_buffered(&did, &mut report).await?;
        Ok(report)
    }

    /// Apply buffered confirmations that now chain onto the head
    async fn drain_buffered(&self, did: &str, report: &mut ConfirmReport) -> RegistrarResult<()> {
        loop {
            let next = {
                let mut arena = self.write();
                let Some(log) = arena.identifiers.get_mut(did) else {
                    return Ok(());
                };
                let Some(head) = log.head().cloned() else {
                    return Ok(());
                };
                log.buffered.remove(&head)
            };

            let Some(buffered) = next else {
                return Ok(());
            };

            // Rejected while it waited
            let still_pending = self
                .get(&buffered.op_hash)
                .map(|e| e.status == OperationStatus::Pending)
                .unwrap_or(false);
            if !still_pending {
                continue;
            }

            match self.decide(did, &buffered.op_hash, buffered.ledger_position)? {
                ConfirmDecision::Apply => {
                    self.apply_confirmation(
                        did,
                        &buffered.op_hash,
                        buffered.ledger_position,
                        buffered.anchored_at,
                    )
                    .await?;
                    report.confirmed.push(buffered.op_hash);
                }
                ConfirmDecision::Buffer { .. } => {
                    // The head moved onto this entry's predecessor, so a
                    // buffer decision here means the chain is inconsistent
                    let err = RegistrarError::ChainMismatch {
                        expected: "confirmed head".to_string(),
                        actual: buffered.op_hash.clone(),
                    };
                    self.reject_locked(did, &buffered.op_hash, RejectionCause::ChainMismatch, &err.to_string(), report)
                        .await?;
                }
                ConfirmDecision::Reject(err) => {
                    let cause = RejectionCause::from_error(&err);
                    self.reject_locked(did, &buffered.op_hash, cause, &err.to_string(), report)
                        .await?;
                }
            }
        }
    }

    /// Decide what to do with a confirmation, without mutating anything
    fn decide(&self, did: &str, op_hash: &str, ledger_position: u64) -> RegistrarResult<ConfirmDecision> {
        let arena = self.read();
        let log = arena
            .identifiers
            .get(did)
            .ok_or_else(|| RegistrarError::NotFound(format!("Unknown DID: {}", did)))?;

        if let Some(detail) = &log.halted {
            return Err(RegistrarError::StoreCorrupted {
                did: did.to_string(),
                detail: detail.clone(),
            });
        }

        let entry = arena
            .operations
            .get(op_hash)
            .ok_or_else(|| RegistrarError::NotFound(format!("Unknown operation: {}", op_hash)))?;

        if log.deactivated {
            return Ok(ConfirmDecision::Reject(RegistrarError::Deactivated(
                did.to_string(),
            )));
        }

        let head = log.head();
        let previous = entry.signed.previous_operation_hash();

        let chains = match (head, previous) {
            (None, None) => true,
            (Some(head), Some(prev)) => head == prev,
            _ => false,
        };

        if !chains {
            // Predecessor known but not yet confirmed: wait for it
            if let Some(prev) = previous {
                let pending = arena
                    .operations
                    .get(prev)
                    .map(|p| p.did == did && p.status == OperationStatus::Pending)
                    .unwrap_or(false);
                if pending {
                    return Ok(ConfirmDecision::Buffer {
                        predecessor: prev.to_string(),
                    });
                }
            }

            return Ok(ConfirmDecision::Reject(RegistrarError::ChainMismatch {
                expected: head.cloned().unwrap_or_else(|| "none".to_string()),
                actual: previous.unwrap_or("none").to_string(),
            }));
        }

        if let Some(head_position) = head
            .and_then(|h| arena.operations.get(h))
            .and_then(|h| h.ledger_position)
        {
            if ledger_position <= head_position {
                return Ok(ConfirmDecision::Reject(RegistrarError::ChainMismatch {
                    expected: format!("ledger position > {}", head_position),
                    actual: ledger_position.to_string(),
                }));
            }
        }

        // The confirmed log only ever holds operations that fold cleanly
        let chain = arena.confirmed_ops(did);
        let state = match fold::fold(chain.iter()) {
            Ok(state) => state,
            Err(e) => {
                return Err(RegistrarError::StoreCorrupted {
                    did: did.to_string(),
                    detail: format!("confirmed chain no longer folds: {}", e),
                })
            }
        };
        if let Err(e) = fold::apply(state, &entry.signed, &entry.hash, None) {
            return Ok(ConfirmDecision::Reject(e));
        }

        Ok(ConfirmDecision::Apply)
    }

    async fn apply_confirmation(
        &self,
        did: &str,
        op_hash: &str,
        ledger_position: u64,
        anchored_at: DateTime<Utc>,
    ) -> RegistrarResult<()> {
        if let Some(journal) = &self.journal {
            journal
                .mark_confirmed(op_hash, ledger_position, anchored_at)
                .await?;
        }

        let mut arena = self.write();
        let kind = match arena.operations.get_mut(op_hash) {
            Some(entry) => {
                entry.status = OperationStatus::Confirmed;
                entry.ledger_position = Some(ledger_position);
                entry.anchored_at = Some(anchored_at);
                entry.kind()
            }
            None => {
                return Err(RegistrarError::NotFound(format!(
                    "Unknown operation: {}",
                    op_hash
                )))
            }
        };

        if let Some(log) = arena.identifiers.get_mut(did) {
            log.confirmed.push(op_hash.to_string());
            if kind == OperationKind::Deactivate {
                log.deactivated = true;
            }
        }

        info!(did = %did, op_hash = %op_hash, ledger_position, kind = kind.as_str(), "operation confirmed");
        Ok(())
    }

    /// Mark an operation REJECTED
    ///
    /// Rejecting an already rejected operation is a no-op; rejecting a
    /// confirmed one is a conflict.
    pub async fn reject(&self, op_hash: &str, cause: RejectionCause, reason: &str) -> RegistrarResult<()> {
        let _gate = self.write_gate.lock().await;

        let did = {
            let arena = self.read();
            let entry = arena
                .operations
                .get(op_hash)
                .ok_or_else(|| RegistrarError::NotFound(format!("Unknown operation: {}", op_hash)))?;
            match entry.status {
                OperationStatus::Rejected => return Ok(()),
                OperationStatus::Confirmed => {
                    return Err(RegistrarError::Conflict(format!(
                        "Operation {} is already confirmed",
                        op_hash
                    )))
                }
                OperationStatus::Pending => entry.did.clone(),
            }
        };

        let mut report = ConfirmReport::default();
        self.reject_locked(&did, op_hash, cause, reason, &mut report)
            .await
    }

    /// Reject an entry and any buffered successors waiting on it
    async fn reject_locked(
        &self,
        did: &str,
        op_hash: &str,
        cause: RejectionCause,
        reason: &str,
        report: &mut ConfirmReport,
    ) -> RegistrarResult<()> {
        let mut current = Some((op_hash.to_string(), cause, reason.to_string()));

        while let Some((hash, cause, reason)) = current.take() {
            if let Some(journal) = &self.journal {
                journal.mark_rejected(&hash, cause, &reason).await?;
            }

            let mut arena = self.write();
            if let Some(entry) = arena.operations.get_mut(&hash) {
                entry.status = OperationStatus::Rejected;
                entry.rejection_cause = Some(cause);
                entry.rejection_reason = Some(reason.clone());
            }
            warn!(did = %did, op_hash = %hash, cause = cause.as_str(), reason = %reason, "operation rejected");

            report.rejected.push(RejectedEntry {
                hash: hash.clone(),
                cause,
                reason: reason.clone(),
            });

            // A successor buffered on this entry can never chain
            if let Some(log) = arena.identifiers.get_mut(did) {
                log.buffered.retain(|_, b| b.op_hash != hash);
                if let Some(successor) = log.buffered.remove(&hash) {
                    current = Some((
                        successor.op_hash,
                        RejectionCause::ChainMismatch,
                        format!("predecessor {} was rejected", hash),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Look up an entry by hash
    pub fn get(&self, op_hash: &str) -> Option<StoredOperation> {
        self.read().operations.get(op_hash).cloned()
    }

    /// Confirmed chain of an identifier, in ledger order
    pub fn confirmed_chain(&self, did: &str) -> Vec<StoredOperation> {
        self.read().confirmed_ops(did)
    }

    /// Confirmed chain up to and including `version_id`
    pub fn confirmed_chain_until(&self, did: &str, version_id: &str) -> RegistrarResult<Vec<StoredOperation>> {
        let chain = self.confirmed_chain(did);
        let end = chain
            .iter()
            .position(|e| e.hash == version_id)
            .ok_or_else(|| {
                RegistrarError::NotFound(format!("Version {} not found for {}", version_id, did))
            })?;
        Ok(chain.into_iter().take(end + 1).collect())
    }

    /// Hash of the confirmed head
    pub fn head(&self, did: &str) -> Option<String> {
        self.read()
            .identifiers
            .get(did)
            .and_then(|log| log.head().cloned())
    }

    /// All entries of an identifier in local append order
    pub fn operations_for(&self, did: &str) -> Vec<StoredOperation> {
        let arena = self.read();
        arena
            .identifiers
            .get(did)
            .map(|log| {
                log.entries
                    .iter()
                    .filter_map(|h| arena.operations.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All PENDING entries in local append order
    pub fn pending(&self) -> Vec<StoredOperation> {
        let arena = self.read();
        let mut pending: Vec<StoredOperation> = arena
            .operations
            .values()
            .filter(|e| e.status == OperationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.local_seq);
        pending
    }

    /// Every known identifier (short form)
    pub fn identifiers(&self) -> Vec<String> {
        self.read().identifiers.keys().cloned().collect()
    }

    /// Highest ledger position of any confirmed operation
    pub fn max_ledger_position(&self) -> u64 {
        self.read()
            .operations
            .values()
            .filter_map(|e| e.ledger_position)
            .max()
            .unwrap_or(0)
    }

    pub fn is_deactivated(&self, did: &str) -> bool {
        self.read()
            .identifiers
            .get(did)
            .map(|log| log.deactivated)
            .unwrap_or(false)
    }

    /// Halt reason, if the identifier is halted
    pub fn halted(&self, did: &str) -> Option<String> {
        self.read()
            .identifiers
            .get(did)
            .and_then(|log| log.halted.clone())
    }

    /// Re-verify every confirmed chain; halts identifiers that fail
    ///
    /// Returns the identifiers newly halted by this audit.
    pub async fn audit(&self) -> Vec<String> {
        let _gate = self.write_gate.lock().await;
        let mut newly_halted = Vec::new();

        let mut arena = self.write();
        let dids: Vec<String> = arena.identifiers.keys().cloned().collect();
        for did in dids {
            let chain = arena.confirmed_ops(&did);
            let Some(log) = arena.identifiers.get_mut(&did) else {
                continue;
            };
            if log.halted.is_some() {
                continue;
            }
            if let Err(detail) = audit_chain(&did, &chain) {
                error!(did = %did, detail = %detail, "operation log corrupted, halting writes");
                log.halted = Some(detail);
                newly_halted.push(did);
            }
        }

        newly_halted
    }

    /// Lift a halt after manual intervention
    pub async fn clear_halt(&self, did: &str) -> RegistrarResult<()> {
        let _gate = self.write_gate.lock().await;
        let mut arena = self.write();
        let log = arena
            .identifiers
            .get_mut(did)
            .ok_or_else(|| RegistrarError::NotFound(format!("Unknown DID: {}", did)))?;
        if log.halted.take().is_some() {
            warn!(did = %did, "halt cleared by operator");
        }
        Ok(())
    }

    /// Insert a confirmed entry bypassing chain checks
    #[cfg(test)]
    pub(crate) fn force_confirmed(&self, mut entry: StoredOperation, ledger_position: u64) {
        entry.status = OperationStatus::Confirmed;
        entry.ledger_position = Some(ledger_position);
        let mut arena = self.write();
        let log = arena.identifiers.entry(entry.did.clone()).or_default();
        log.entries.push(entry.hash.clone());
        log.confirmed.push(entry.hash.clone());
        arena.operations.insert(entry.hash.clone(), entry);
    }
}

/// Check the structural invariants of a confirmed chain
fn audit_chain(did: &str, chain: &[StoredOperation]) -> Result<(), String> {
    let mut previous: Option<&StoredOperation> = None;

    for entry in chain {
        if entry.did != did {
            return Err(format!("entry {} belongs to {}", entry.hash, entry.did));
        }

        match previous {
            None => {
                if entry.kind() != OperationKind::Create {
                    return Err(format!("chain starts with {} operation", entry.kind().as_str()));
                }
                if identifier::short_form(&entry.hash) != did {
                    return Err(format!("create {} does not derive {}", entry.hash, did));
                }
            }
            Some(prev) => {
                if entry.signed.previous_operation_hash() != Some(prev.hash.as_str()) {
                    return Err(format!(
                        "two confirmed operations chain from the same predecessor or the chain is broken at {}",
                        entry.hash
                    ));
                }
                if prev.kind() == OperationKind::Deactivate {
                    return Err(format!("operation {} confirmed after deactivation", entry.hash));
                }
                if entry.ledger_position <= prev.ledger_position {
                    return Err(format!("ledger position not increasing at {}", entry.hash));
                }
            }
        }

        previous = Some(entry);
    }

    fold::fold(chain.iter())
        .map(|_| ())
        .map_err(|e| format!("confirmed chain does not fold: {}", e))
}
