/// Publication Scheduler
///
/// Tracks every operation handed to the ledger from submission until it is
/// confirmed or rejected. Submissions for one identifier go through a FIFO
/// queue drained by a dedicated worker task, so at most one submission per
/// identifier is in flight; distinct identifiers proceed in parallel.
/// Transient failures are retried with exponential backoff. Ledger events are
/// applied to the operation store by a single dispatcher task.

pub mod retry;

pub use retry::RetryPolicy;

use crate::{
    error::{RegistrarError, RegistrarResult},
    ledger::{LedgerEvent, LedgerGateway, SubmissionError},
    metrics,
    operation::OperationKind,
    store::{OperationStatus, OperationStore, RejectionCause, StoredOperation},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long an idle per-identifier worker lingers before exiting
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A tracked publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOperation {
    pub id: Uuid,
    /// Short-form DID the operation belongs to
    pub did_ref: String,
    pub operation_hash: String,
    pub operation_type: OperationKind,
    pub submitted_at: DateTime<Utc>,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<RejectionCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Ledger submission attempts so far
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

struct SchedulerInner {
    store: Arc<OperationStore>,
    ledger: Arc<dyn LedgerGateway>,
    policy: RetryPolicy,
    operations: RwLock<HashMap<Uuid, Arc<watch::Sender<ScheduledOperation>>>>,
    by_hash: RwLock<HashMap<String, Uuid>>,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Uuid>>>,
}

/// The publication scheduler
pub struct PublicationScheduler {
    inner: Arc<SchedulerInner>,
    dispatcher: JoinHandle<()>,
}

impl PublicationScheduler {
    /// Create the scheduler and start the confirmation dispatcher
    pub fn new(store: Arc<OperationStore>, ledger: Arc<dyn LedgerGateway>, policy: RetryPolicy) -> Self {
        let events = ledger.subscribe();
        let inner = Arc::new(SchedulerInner {
            store,
            ledger,
            policy,
            operations: RwLock::new(HashMap::new()),
            by_hash: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        });

        let dispatcher = tokio::spawn(dispatch_events(inner.clone(), events));

        Self { inner, dispatcher }
    }

    /// Track a stored operation and queue it for submission
    ///
    /// Scheduling an operation that is already tracked returns the existing
    /// scheduled operation.
    pub fn schedule(&self, entry: &StoredOperation) -> ScheduledOperation {
        self.inner.schedule(entry)
    }

    /// Current snapshot of a scheduled operation
    pub fn status(&self, id: &Uuid) -> RegistrarResult<ScheduledOperation> {
        self.inner
            .sender(id)
            .map(|tx| tx.borrow().clone())
            .ok_or_else(|| RegistrarError::NotFound(format!("Scheduled operation not found: {}", id)))
    }

    /// Scheduled operation tracking `op_hash`, if any
    pub fn find_by_hash(&self, op_hash: &str) -> Option<ScheduledOperation> {
        let id = *self
            .inner
            .by_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op_hash)?;
        self.status(&id).ok()
    }

    /// Receiver notified on every status transition
    pub fn subscribe(&self, id: &Uuid) -> RegistrarResult<watch::Receiver<ScheduledOperation>> {
        self.inner
            .sender(id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| RegistrarError::NotFound(format!("Scheduled operation not found: {}", id)))
    }

    /// Wait until the operation is terminal or `timeout` elapses
    ///
    /// Returns the latest snapshot either way; dropping the future has no
    /// effect on the submission.
    pub async fn wait(&self, id: &Uuid, timeout: Duration) -> RegistrarResult<ScheduledOperation> {
        let mut rx = self.subscribe(id)?;
        if !timeout.is_zero() {
            let _ = tokio::time::timeout(timeout, rx.wait_for(|op| op.status.is_terminal())).await;
        }
        let snapshot = rx.borrow().clone();
        Ok(snapshot)
    }

    /// Every tracked operation, oldest first
    pub fn list(&self) -> Vec<ScheduledOperation> {
        let mut all: Vec<ScheduledOperation> = self
            .inner
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|tx| tx.borrow().clone())
            .collect();
        all.sort_by_key(|op| op.submitted_at);
        all
    }

    /// Re-schedule PENDING store entries left over from a previous run
    pub fn recover(&self) -> usize {
        let pending = self.inner.store.pending();
        let mut recovered = 0;
        for entry in &pending {
            if self.find_by_hash(&entry.hash).is_none() {
                self.inner.schedule(entry);
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "rescheduled pending operations");
        }
        recovered
    }

    /// Forget terminal operations that finished more than `ttl` ago
    pub fn prune_finished(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let mut operations = self
            .inner
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut by_hash = self.inner.by_hash.write().unwrap_or_else(PoisonError::into_inner);

        let before = operations.len();
        operations.retain(|_, tx| {
            let op = tx.borrow();
            let expired = matches!(op.finished_at, Some(at) if at < cutoff);
            if expired {
                by_hash.remove(&op.operation_hash);
            }
            !expired
        });
        before - operations.len()
    }
}

impl Drop for PublicationScheduler {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl SchedulerInner {
    fn sender(&self, id: &Uuid) -> Option<Arc<watch::Sender<ScheduledOperation>>> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn sender_for_hash(&self, op_hash: &str) -> Option<Arc<watch::Sender<ScheduledOperation>>> {
        let id = *self
            .by_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op_hash)?;
        self.sender(&id)
    }

    fn schedule(self: &Arc<Self>, entry: &StoredOperation) -> ScheduledOperation {
        let scheduled = {
            let mut operations = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            let mut by_hash = self.by_hash.write().unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = by_hash.get(&entry.hash).and_then(|id| operations.get(id)) {
                return existing.borrow().clone();
            }

            let scheduled = ScheduledOperation {
                id: Uuid::new_v4(),
                did_ref: entry.did.clone(),
                operation_hash: entry.hash.clone(),
                operation_type: entry.kind(),
                submitted_at: Utc::now(),
                status: OperationStatus::Pending,
                cause: None,
                message: None,
                attempts: 0,
                finished_at: None,
            };

            let (tx, _) = watch::channel(scheduled.clone());
            operations.insert(scheduled.id, Arc::new(tx));
            by_hash.insert(entry.hash.clone(), scheduled.id);
            scheduled
        };

        metrics::SCHEDULED_OPERATIONS_IN_FLIGHT.inc();
        info!(
            id = %scheduled.id,
            did = %scheduled.did_ref,
            op_hash = %scheduled.operation_hash,
            kind = scheduled.operation_type.as_str(),
            "operation scheduled for publication"
        );

        if entry.status.is_terminal() {
            self.sync(&entry.hash);
        } else {
            self.enqueue(&scheduled);
        }

        scheduled
    }

    /// Push onto the identifier's queue, spawning its worker if needed
    fn enqueue(self: &Arc<Self>, scheduled: &ScheduledOperation) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(tx) = queues.get(&scheduled.did_ref) {
            if tx.send(scheduled.id).is_ok() {
                return;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below exits
        let _ = tx.send(scheduled.id);
        queues.insert(scheduled.did_ref.clone(), tx);
        tokio::spawn(run_worker(self.clone(), scheduled.did_ref.clone(), rx));
    }

    /// Mirror a terminal store status onto the scheduled operation
    fn sync(&self, op_hash: &str) {
        let Some(entry) = self.store.get(op_hash) else {
            return;
        };
        match entry.status {
            OperationStatus::Pending => {}
            OperationStatus::Confirmed => self.finish(op_hash, OperationStatus::Confirmed, None, None),
            OperationStatus::Rejected => self.finish(
                op_hash,
                OperationStatus::Rejected,
                entry.rejection_cause,
                entry.rejection_reason,
            ),
        }
    }

    fn finish(
        &self,
        op_hash: &str,
        status: OperationStatus,
        cause: Option<RejectionCause>,
        message: Option<String>,
    ) {
        let Some(tx) = self.sender_for_hash(op_hash) else {
            return;
        };

        let changed = tx.send_if_modified(|op| {
            if op.status.is_terminal() {
                return false;
            }
            op.status = status;
            op.cause = cause;
            op.message = message.clone();
            op.finished_at = Some(Utc::now());
            true
        });

        if changed {
            metrics::SCHEDULED_OPERATIONS_IN_FLIGHT.dec();
            match (status, cause) {
                (OperationStatus::Rejected, Some(cause)) => metrics::record_rejection(cause.as_str()),
                (OperationStatus::Rejected, None) => metrics::record_rejection("UNKNOWN"),
                _ => metrics::record_confirmation(),
            }
            let op = tx.borrow();
            info!(
                id = %op.id,
                op_hash = %op_hash,
                status = status.as_str(),
                cause = cause.map(|c| c.as_str()).unwrap_or(""),
                "scheduled operation finished"
            );
        }
    }

    /// Mirror every entry of an identifier, picking up cascaded rejections
    fn sync_did(&self, did: &str) {
        for entry in self.store.operations_for(did) {
            self.sync(&entry.hash);
        }
    }

    /// Reject in the store, then mirror the outcome
    async fn reject(&self, op_hash: &str, cause: RejectionCause, reason: &str) {
        match self.store.reject(op_hash, cause, reason).await {
            Ok(()) | Err(RegistrarError::Conflict(_)) => {}
            Err(e) => error!(op_hash = %op_hash, "failed to record rejection: {}", e),
        }
        match self.store.get(op_hash) {
            Some(entry) => self.sync_did(&entry.did),
            None => self.sync(op_hash),
        }
    }

    /// Submit one operation, retrying transient failures
    async fn publish(self: &Arc<Self>, id: Uuid) {
        let Some(tx) = self.sender(&id) else {
            return;
        };
        let (op_hash, did) = {
            let op = tx.borrow();
            if op.status.is_terminal() {
                return;
            }
            (op.operation_hash.clone(), op.did_ref.clone())
        };

        let entry = match self.store.get(&op_hash) {
            Some(entry) if entry.status == OperationStatus::Pending => entry,
            Some(_) => {
                self.sync(&op_hash);
                return;
            }
            None => {
                self.finish(
                    &op_hash,
                    OperationStatus::Rejected,
                    Some(RejectionCause::InvalidOperation),
                    Some("operation missing from store".to_string()),
                );
                return;
            }
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tx.send_modify(|op| op.attempts = attempt);

            match self.ledger.submit(&entry.signed).await {
                Ok(receipt) => {
                    metrics::record_submission("accepted");
                    debug!(did = %did, op_hash = %op_hash, ledger_ref = %receipt.ledger_ref, attempt, "operation submitted");
                    tokio::spawn(await_outcome(self.clone(), id));
                    return;
                }
                Err(SubmissionError::Permanent(reason)) => {
                    metrics::record_submission("permanent");
                    warn!(did = %did, op_hash = %op_hash, reason = %reason, "ledger rejected submission");
                    self.reject(&op_hash, RejectionCause::LedgerRejection, &reason).await;
                    return;
                }
                Err(SubmissionError::Transient(reason)) => {
                    metrics::record_submission("transient");
                    if attempt >= self.policy.max_attempts {
                        let err = RegistrarError::PublicationTimeout { attempts: attempt };
                        warn!(did = %did, op_hash = %op_hash, reason = %reason, "giving up after {} attempts", attempt);
                        self.reject(&op_hash, RejectionCause::PublicationTimeout, &err.to_string())
                            .await;
                        return;
                    }

                    let delay = self.policy.backoff(attempt);
                    debug!(did = %did, op_hash = %op_hash, reason = %reason, ?delay, "transient failure, retrying");
                    metrics::record_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Drain one identifier's queue; exits after sitting idle
async fn run_worker(inner: Arc<SchedulerInner>, did: String, mut rx: mpsc::UnboundedReceiver<Uuid>) {
    debug!(did = %did, "publication worker started");
    loop {
        let next = match tokio::time::timeout(WORKER_IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => None,
            Err(_) => {
                // Re-check under the queue lock so nothing is enqueued to a dying worker
                let mut queues = inner.queues.lock().unwrap_or_else(PoisonError::into_inner);
                match rx.try_recv() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        queues.remove(&did);
                        None
                    }
                }
            }
        };

        match next {
            Some(id) => inner.publish(id).await,
            None => break,
        }
    }
    debug!(did = %did, "publication worker stopped");
}

/// Wait for the ledger outcome of a submitted operation
async fn await_outcome(inner: Arc<SchedulerInner>, id: Uuid) {
    let Some(tx) = inner.sender(&id) else {
        return;
    };
    let mut rx = tx.subscribe();
    let timeout = inner.policy.confirmation_timeout;

    if tokio::time::timeout(timeout, rx.wait_for(|op| op.status.is_terminal()))
        .await
        .is_err()
    {
        let (op_hash, attempts) = {
            let op = rx.borrow();
            (op.operation_hash.clone(), op.attempts)
        };
        warn!(op_hash = %op_hash, ?timeout, "no confirmation before timeout");
        let err = RegistrarError::PublicationTimeout { attempts };
        inner
            .reject(&op_hash, RejectionCause::PublicationTimeout, &err.to_string())
            .await;
    }
}

/// Resubmit every submitted operation that is still pending
///
/// Used after ledger events were skipped. The ledger keeps the position of an
/// operation it already anchored and emits its event again.
async fn resubmit_in_flight(inner: Arc<SchedulerInner>) {
    let mut in_flight: Vec<StoredOperation> = inner
        .operations
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .filter_map(|tx| {
            let op = tx.borrow();
            (!op.status.is_terminal() && op.attempts > 0).then(|| op.operation_hash.clone())
        })
        .filter_map(|hash| inner.store.get(&hash))
        .filter(|entry| entry.status == OperationStatus::Pending)
        .collect();
    in_flight.sort_by_key(|entry| entry.local_seq);

    info!(count = in_flight.len(), "resubmitting operations after missed ledger events");
    for entry in in_flight {
        match inner.ledger.submit(&entry.signed).await {
            Ok(_) => metrics::record_submission("resubmitted"),
            Err(SubmissionError::Permanent(reason)) => {
                metrics::record_submission("permanent");
                inner
                    .reject(&entry.hash, RejectionCause::LedgerRejection, &reason)
                    .await;
            }
            // The confirmation timeout still bounds this operation
            Err(SubmissionError::Transient(reason)) => {
                metrics::record_submission("transient");
                debug!(op_hash = %entry.hash, reason = %reason, "resubmission failed");
            }
        }
    }
}

/// Apply ledger events to the store, one at a time
async fn dispatch_events(inner: Arc<SchedulerInner>, mut events: broadcast::Receiver<LedgerEvent>) {
    info!("confirmation dispatcher started");
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "confirmation dispatcher lagged behind ledger events");
                tokio::spawn(resubmit_in_flight(inner.clone()));
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            LedgerEvent::Confirmed {
                op_hash,
                did,
                ledger_position,
                anchored_at,
            } => match inner.store.confirm(&op_hash, ledger_position, anchored_at).await {
                Ok(report) => {
                    for hash in &report.confirmed {
                        inner.sync(hash);
                    }
                    for rejected in &report.rejected {
                        inner.sync(&rejected.hash);
                    }
                }
                Err(RegistrarError::NotFound(_)) => {
                    debug!(op_hash = %op_hash, did = %did, "confirmation for unknown operation ignored");
                }
                Err(RegistrarError::StoreCorrupted { did, detail }) => {
                    error!(did = %did, detail = %detail, op_hash = %op_hash, "confirmation refused, identifier halted");
                }
                Err(e) => {
                    debug!(op_hash = %op_hash, "confirmation not applied: {}", e);
                    inner.sync_did(&did);
                }
            },
            LedgerEvent::Rejected {
                op_hash,
                did,
                reason,
            } => {
                warn!(op_hash = %op_hash, did = %did, reason = %reason, "ledger rejected operation");
                inner
                    .reject(&op_hash, RejectionCause::LedgerRejection, &reason)
                    .await;
            }
        }
    }
    info!("confirmation dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ledger::InMemoryLedger, testing::DidFixture};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            confirmation_timeout: Duration::from_secs(5),
        }
    }

    fn setup(ledger: Arc<InMemoryLedger>, policy: RetryPolicy) -> (Arc<OperationStore>, PublicationScheduler) {
        let store = Arc::new(OperationStore::in_memory());
        let scheduler = PublicationScheduler::new(store.clone(), ledger, policy);
        (store, scheduler)
    }

    #[tokio::test]
    async fn test_publish_confirms() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        let (store, scheduler) = setup(ledger, fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        assert_eq!(scheduled.status, OperationStatus::Pending);
        assert_eq!(scheduled.did_ref, fx.create.did);

        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.status, OperationStatus::Confirmed);
        assert_eq!(done.attempts, 1);
        assert_eq!(store.head(&fx.create.did), Some(fx.create.hash.clone()));

        // Scheduling again returns the same tracked operation
        assert_eq!(scheduler.schedule(&entry).id, scheduled.id);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        ledger.fail_next_transient(2);
        let (store, scheduler) = setup(ledger.clone(), fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(done.status, OperationStatus::Confirmed);
        assert_eq!(done.attempts, 3);
        assert_eq!(ledger.submission_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_time_out() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        ledger.fail_next_transient(10);
        let (store, scheduler) = setup(ledger, fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(done.status, OperationStatus::Rejected);
        assert_eq!(done.cause, Some(RejectionCause::PublicationTimeout));
        assert_eq!(done.attempts, 3);
        assert_eq!(store.get(&fx.create.hash).unwrap().status, OperationStatus::Rejected);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_rejected_verbatim() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        ledger.reject_next("insufficient fee");
        let (store, scheduler) = setup(ledger, fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(done.status, OperationStatus::Rejected);
        assert_eq!(done.cause, Some(RejectionCause::LedgerRejection));
        assert_eq!(done.message.as_deref(), Some("insufficient fee"));
        assert_eq!(done.attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_confirmation_times_out() {
        let ledger = Arc::new(InMemoryLedger::manual());
        let policy = RetryPolicy {
            confirmation_timeout: Duration::from_millis(50),
            ..fast_policy()
        };
        let (store, scheduler) = setup(ledger, policy);
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(done.status, OperationStatus::Rejected);
        assert_eq!(done.cause, Some(RejectionCause::PublicationTimeout));
    }

    #[tokio::test]
    async fn test_wait_returns_snapshot_on_timeout() {
        let ledger = Arc::new(InMemoryLedger::manual());
        let (store, scheduler) = setup(ledger, fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        let snapshot = scheduler.wait(&scheduled.id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(snapshot.status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn test_subscription_sees_transition() {
        let ledger = Arc::new(InMemoryLedger::manual());
        let (store, scheduler) = setup(ledger.clone(), fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        let mut rx = scheduler.subscribe(&scheduled.id).unwrap();

        // Wait until the worker has submitted
        while ledger.held().is_empty() {
            tokio::task::yield_now().await;
        }
        ledger.release(&fx.create.hash);

        let op = rx.wait_for(|op| op.status.is_terminal()).await.unwrap().clone();
        assert_eq!(op.status, OperationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_ledger_rejection_event() {
        let ledger = Arc::new(InMemoryLedger::manual());
        let (store, scheduler) = setup(ledger.clone(), fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        while ledger.held().is_empty() {
            tokio::task::yield_now().await;
        }
        ledger.reject_held(&fx.create.hash, "invalid signature");

        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.cause, Some(RejectionCause::LedgerRejection));
        assert_eq!(done.message.as_deref(), Some("invalid signature"));
    }

    #[tokio::test]
    async fn test_recover_schedules_pending_entries() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        let (store, scheduler) = setup(ledger, fast_policy());
        let fx = DidFixture::new();

        store.append(fx.create.signed.clone()).await.unwrap();
        assert_eq!(scheduler.recover(), 1);
        assert_eq!(scheduler.recover(), 0);

        let scheduled = scheduler.find_by_hash(&fx.create.hash).unwrap();
        let done = scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.status, OperationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_prune_finished() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        let (store, scheduler) = setup(ledger, fast_policy());
        let fx = DidFixture::new();

        let entry = store.append(fx.create.signed.clone()).await.unwrap();
        let scheduled = scheduler.schedule(&entry);
        scheduler.wait(&scheduled.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(scheduler.prune_finished(Duration::from_secs(3600)), 0);
        assert_eq!(scheduler.prune_finished(Duration::ZERO), 1);
        assert!(scheduler.status(&scheduled.id).is_err());
    }

    #[tokio::test]
    async fn test_missed_events_are_recovered_by_resubmission() {
        // Room for a single undelivered event, so two back-to-back releases
        // make the dispatcher skip one
        let ledger = Arc::new(InMemoryLedger::manual().with_event_capacity(1));
        let (store, scheduler) = setup(ledger.clone(), fast_policy());
        let (a, b) = (DidFixture::new(), DidFixture::new());

        let mut scheduled = Vec::new();
        for fx in [&a, &b] {
            let entry = store.append(fx.create.signed.clone()).await.unwrap();
            scheduled.push(scheduler.schedule(&entry));
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while ledger.held().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "submissions never reached the ledger");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        ledger.release(&a.create.hash);
        ledger.release(&b.create.hash);

        // Keep delivering whatever the ledger emits again
        loop {
            let done = scheduled
                .iter()
                .all(|op| scheduler.status(&op.id).unwrap().status.is_terminal());
            if done {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "missed confirmation never recovered");
            for hash in ledger.held() {
                ledger.release(&hash);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for op in &scheduled {
            let done = scheduler.status(&op.id).unwrap();
            assert_eq!(done.status, OperationStatus::Confirmed, "{:?}", done);
        }
        assert!(ledger.submission_count() > 2);

        // Resubmission reuses the positions assigned the first time
        let mut positions: Vec<u64> = [&a, &b]
            .iter()
            .filter_map(|fx| store.get(&fx.create.hash).and_then(|e| e.ledger_position))
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        let (_, scheduler) = setup(ledger, fast_policy());
        let err = scheduler.status(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RegistrarError::NotFound(_)));
    }
}
