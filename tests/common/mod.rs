//! Shared helpers for integration tests

#![allow(dead_code)]

use did_registrar::{
    document::{KeyPurpose, Service},
    ledger::InMemoryLedger,
    registrar::{DocumentTemplate, KeyTemplate, Registrar},
    scheduler::{RetryPolicy, ScheduledOperation},
    store::{OperationStatus, OperationStore},
};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        multiplier: 2.0,
        confirmation_timeout: Duration::from_secs(5),
    }
}

pub fn registrar(ledger: Arc<InMemoryLedger>) -> Registrar {
    Registrar::new(Arc::new(OperationStore::in_memory()), ledger, fast_policy())
}

pub fn service(id: &str) -> Service {
    Service {
        id: id.to_string(),
        service_type: "LinkedDomains".to_string(),
        service_endpoint: vec![format!("https://{}.example.com", id)],
    }
}

/// `{authKey: "auth-1", service: "svc-1"}`
pub fn basic_template() -> DocumentTemplate {
    DocumentTemplate {
        public_keys: vec![KeyTemplate::new("auth-1", KeyPurpose::Authentication)],
        services: vec![service("svc-1")],
    }
}

pub async fn wait_terminal(registrar: &Registrar, op: &ScheduledOperation) -> ScheduledOperation {
    let done = registrar.wait_for_operation(&op.id, WAIT).await.unwrap();
    assert!(done.status.is_terminal(), "operation still pending: {:?}", done);
    done
}

pub async fn wait_confirmed(registrar: &Registrar, op: &ScheduledOperation) {
    let done = wait_terminal(registrar, op).await;
    assert_eq!(done.status, OperationStatus::Confirmed, "{:?}", done);
}

/// Create and publish a DID, returning its short form
pub async fn published(registrar: &Registrar, template: DocumentTemplate) -> String {
    let created = registrar.create(template).unwrap();
    let op = registrar.publish(&created.short_form_did).await.unwrap();
    wait_confirmed(registrar, &op).await;
    created.short_form_did
}

/// Poll until the manual ledger holds at least `count` events
pub async fn wait_for_held(ledger: &InMemoryLedger, count: usize) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let held = ledger.held();
        if held.len() >= count {
            return held;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "ledger holds {} events, expected {}",
            held.len(),
            count
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
