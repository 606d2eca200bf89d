/// Registrar
///
/// Facade implementing the registrar contract: creating managed DIDs,
/// scheduling their publication, updates and deactivation, and resolving
/// documents. Lifecycle rules live in the components it wires together; this
/// layer only holds the managed DID registry and the key vault.

pub mod request;
pub mod vault;

pub use request::{
    ActionType, CreatedDid, DocumentTemplate, KeyTemplate, ManagedDid, ManagedDidStatus,
    UpdateActionRequest,
};
pub use vault::KeyVault;

use crate::{
    crypto::OperationSigner,
    document::{DocumentState, KeyPurpose, PublicKey, ResolvedDocument, DEFAULT_MASTER_KEY_ID},
    error::{RegistrarError, RegistrarResult},
    identifier::{self, DidRef},
    ledger::LedgerGateway,
    metrics,
    operation::{OperationBuilder, SignedOperation, SigningKeyHandle, UpdateAction},
    resolver::{fold, Resolver},
    scheduler::{PublicationScheduler, RetryPolicy, ScheduledOperation},
    store::{OperationStatus, OperationStore},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Default cap for long-poll waits
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct ManagedRecord {
    did: String,
    long_form_did: String,
    create_hash: String,
    create: SignedOperation,
    created_at: DateTime<Utc>,
}

/// The DID registrar
pub struct Registrar {
    store: Arc<OperationStore>,
    scheduler: PublicationScheduler,
    resolver: Resolver,
    vault: KeyVault,
    managed: RwLock<HashMap<String, ManagedRecord>>,
    max_wait: Duration,
}

impl Registrar {
    pub fn new(store: Arc<OperationStore>, ledger: Arc<dyn LedgerGateway>, policy: RetryPolicy) -> Self {
        Self {
            scheduler: PublicationScheduler::new(store.clone(), ledger, policy),
            resolver: Resolver::new(store.clone()),
            store,
            vault: KeyVault::new(),
            managed: RwLock::new(HashMap::new()),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Cap long-poll waits at `max_wait`
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn store(&self) -> &Arc<OperationStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &PublicationScheduler {
        &self.scheduler
    }

    /// Create a managed DID without touching the ledger
    ///
    /// A master key and one key pair per template key are generated and kept
    /// in the vault.
    pub fn create(&self, template: DocumentTemplate) -> RegistrarResult<CreatedDid> {
        let mut signers = Vec::with_capacity(template.public_keys.len() + 1);
        let mut builder = OperationBuilder::new();

        let master = OperationSigner::generate();
        builder = builder.public_key(PublicKey {
            id: DEFAULT_MASTER_KEY_ID.to_string(),
            purpose: KeyPurpose::Master,
            public_key_hex: master.public_key_hex(),
        });
        signers.push((DEFAULT_MASTER_KEY_ID.to_string(), master));

        for key in &template.public_keys {
            if key.purpose == KeyPurpose::Master {
                return Err(RegistrarError::Validation(format!(
                    "Master keys are managed by the registrar: {}",
                    key.id
                )));
            }
            let signer = OperationSigner::generate();
            builder = builder.public_key(PublicKey {
                id: key.id.clone(),
                purpose: key.purpose,
                public_key_hex: signer.public_key_hex(),
            });
            signers.push((key.id.clone(), signer));
        }

        for service in template.services {
            builder = builder.service(service);
        }

        let master = SigningKeyHandle::new(DEFAULT_MASTER_KEY_ID, signers[0].1.clone());
        let built = builder.build_create(&[master])?;
        metrics::record_operation_built("create");

        let long_form_did = identifier::long_form(&built.signed)?;
        for (key_id, signer) in signers {
            self.vault.insert(&built.did, &key_id, signer);
        }

        self.managed_mut().insert(
            built.did.clone(),
            ManagedRecord {
                did: built.did.clone(),
                long_form_did: long_form_did.clone(),
                create_hash: built.hash.clone(),
                create: built.signed,
                created_at: Utc::now(),
            },
        );

        info!(did = %built.did, "managed DID created");

        Ok(CreatedDid {
            long_form_did,
            short_form_did: built.did,
        })
    }

    /// Schedule publication of a managed DID's create operation
    pub async fn publish(&self, did: &str) -> RegistrarResult<ScheduledOperation> {
        let record = self.record(did)?;

        if self.store.head(&record.did).is_some() {
            return Err(RegistrarError::Conflict(format!(
                "DID is already published: {}",
                record.did
            )));
        }

        let entry = match self.store.get(&record.create_hash) {
            Some(entry) if entry.status == OperationStatus::Rejected => {
                return Err(RegistrarError::Conflict(format!(
                    "Publication of {} was rejected ({}): {}",
                    record.did,
                    entry.rejection_cause.map(|c| c.as_str()).unwrap_or("UNKNOWN"),
                    entry.rejection_reason.unwrap_or_default()
                )))
            }
            Some(entry) => entry,
            None => self.store.append(record.create.clone()).await?,
        };

        Ok(self.scheduler.schedule(&entry))
    }

    /// Build, append and schedule an update of a published DID
    pub async fn submit_update(
        &self,
        did: &str,
        requests: Vec<UpdateActionRequest>,
    ) -> RegistrarResult<ScheduledOperation> {
        let (record, head, state) = self.published_state(did)?;

        let mut new_keys = Vec::new();
        let mut actions = Vec::with_capacity(requests.len());
        for request in requests {
            actions.push(self.to_action(request, &mut new_keys)?);
        }

        let built = OperationBuilder::new()
            .did(record.did.clone())
            .previous_operation_hash(head)
            .current_state(state)
            .actions(actions)
            .build_update(&self.vault.handles(&record.did))?;
        metrics::record_operation_built("update");

        for (key_id, signer) in new_keys {
            self.vault.insert(&record.did, &key_id, signer);
        }

        let entry = self.store.append(built.signed).await?;
        Ok(self.scheduler.schedule(&entry))
    }

    /// Build, append and schedule a deactivation of a published DID
    pub async fn deactivate(&self, did: &str) -> RegistrarResult<ScheduledOperation> {
        let (record, head, state) = self.published_state(did)?;

        let built = OperationBuilder::new()
            .did(record.did.clone())
            .previous_operation_hash(head)
            .current_state(state)
            .build_deactivate(&self.vault.handles(&record.did))?;
        metrics::record_operation_built("deactivate");

        let entry = self.store.append(built.signed).await?;
        Ok(self.scheduler.schedule(&entry))
    }

    /// Resolve any short- or long-form DID
    pub fn resolve(&self, did: &str, version_id: Option<&str>) -> RegistrarResult<ResolvedDocument> {
        self.resolver.resolve(did, version_id)
    }

    /// Registry entry of a managed DID (short or long form accepted)
    pub fn managed_did(&self, did: &str) -> RegistrarResult<ManagedDid> {
        let record = self.record(did)?;
        Ok(self.view(&record))
    }

    /// All managed DIDs, oldest first
    pub fn list_managed_dids(&self) -> Vec<ManagedDid> {
        let mut records: Vec<ManagedRecord> = self
            .managed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.did.cmp(&b.did)));
        records.iter().map(|r| self.view(r)).collect()
    }

    pub fn scheduled_operation(&self, id: &Uuid) -> RegistrarResult<ScheduledOperation> {
        self.scheduler.status(id)
    }

    /// Long-poll a scheduled operation, capped at the configured maximum
    pub async fn wait_for_operation(&self, id: &Uuid, timeout: Duration) -> RegistrarResult<ScheduledOperation> {
        self.scheduler.wait(id, timeout.min(self.max_wait)).await
    }

    /// Re-schedule operations left PENDING by a previous run
    pub fn recover(&self) -> usize {
        self.scheduler.recover()
    }

    /// Forget scheduled operations that finished more than `ttl` ago
    pub fn prune_finished(&self, ttl: Duration) -> usize {
        self.scheduler.prune_finished(ttl)
    }

    /// Re-validate every confirmed chain, halting identifiers that fail
    pub async fn audit(&self) -> Vec<String> {
        self.store.audit().await
    }

    fn managed_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ManagedRecord>> {
        self.managed.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, did: &str) -> RegistrarResult<ManagedRecord> {
        let short = DidRef::parse(did)?.short_form();
        self.managed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&short)
            .cloned()
            .ok_or_else(|| RegistrarError::NotFound(format!("Managed DID not found: {}", did)))
    }

    fn view(&self, record: &ManagedRecord) -> ManagedDid {
        let status = if self.store.is_deactivated(&record.did) {
            ManagedDidStatus::Deactivated
        } else if self.store.head(&record.did).is_some() {
            ManagedDidStatus::Published
        } else if self
            .store
            .get(&record.create_hash)
            .map(|e| e.status == OperationStatus::Pending)
            .unwrap_or(false)
        {
            ManagedDidStatus::PublicationPending
        } else {
            ManagedDidStatus::Created
        };

        ManagedDid {
            did: record.did.clone(),
            long_form_did: record.long_form_did.clone(),
            status,
        }
    }

    /// Managed record, confirmed head and folded state of a published DID
    fn published_state(&self, did: &str) -> RegistrarResult<(ManagedRecord, String, DocumentState)> {
        let record = self.record(did)?;

        if let Some(detail) = self.store.halted(&record.did) {
            return Err(RegistrarError::StoreCorrupted {
                did: record.did,
                detail,
            });
        }
        if self.store.is_deactivated(&record.did) {
            return Err(RegistrarError::Deactivated(record.did));
        }

        let head = self.store.head(&record.did).ok_or_else(|| {
            RegistrarError::Conflict(format!("DID is not published yet: {}", record.did))
        })?;

        let state = fold::fold(self.store.confirmed_chain(&record.did).iter())?
            .ok_or_else(|| RegistrarError::Internal("confirmed chain is empty".to_string()))?;

        Ok((record, head, state))
    }

    /// Turn a request into an action, generating key pairs for new keys
    fn to_action(
        &self,
        request: UpdateActionRequest,
        new_keys: &mut Vec<(String, OperationSigner)>,
    ) -> RegistrarResult<UpdateAction> {
        let missing = |field: &str| {
            RegistrarError::Validation(format!("{} is required for this action type", field))
        };

        match request.action_type {
            ActionType::AddKey => {
                let key = request.add_key.ok_or_else(|| missing("addKey"))?;
                if key.purpose == KeyPurpose::Master {
                    return Err(RegistrarError::InvalidActionSequence(format!(
                        "Master keys are managed by the registrar: {}",
                        key.id
                    )));
                }
                let signer = OperationSigner::generate();
                let action = UpdateAction::AddKey(PublicKey {
                    id: key.id.clone(),
                    purpose: key.purpose,
                    public_key_hex: signer.public_key_hex(),
                });
                new_keys.push((key.id, signer));
                Ok(action)
            }
            ActionType::RemoveKey => {
                let key = request.remove_key.ok_or_else(|| missing("removeKey"))?;
                Ok(UpdateAction::RemoveKey { id: key.id })
            }
            ActionType::AddService => {
                let service = request.add_service.ok_or_else(|| missing("addService"))?;
                Ok(UpdateAction::AddService(service))
            }
            ActionType::RemoveService => {
                let service = request.remove_service.ok_or_else(|| missing("removeService"))?;
                Ok(UpdateAction::RemoveService { id: service.id })
            }
            ActionType::UpdateService => {
                let patch = request.update_service.ok_or_else(|| missing("updateService"))?;
                Ok(UpdateAction::UpdateService {
                    id: patch.id,
                    service_endpoint: patch.service_endpoint,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{document::Service, ledger::InMemoryLedger, store::RejectionCause};

    fn registrar(ledger: Arc<InMemoryLedger>) -> Registrar {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            confirmation_timeout: Duration::from_secs(5),
        };
        Registrar::new(Arc::new(OperationStore::in_memory()), ledger, policy)
    }

    fn template() -> DocumentTemplate {
        DocumentTemplate {
            public_keys: vec![KeyTemplate::new("auth-1", KeyPurpose::Authentication)],
            services: vec![Service {
                id: "svc-1".to_string(),
                service_type: "LinkedDomains".to_string(),
                service_endpoint: vec!["https://example.com".to_string()],
            }],
        }
    }

    async fn published(registrar: &Registrar) -> String {
        let created = registrar.create(template()).unwrap();
        let scheduled = registrar.publish(&created.short_form_did).await.unwrap();
        let done = registrar
            .wait_for_operation(&scheduled.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.status, OperationStatus::Confirmed);
        created.short_form_did
    }

    #[tokio::test]
    async fn test_create_is_local_only() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        let registrar = registrar(ledger.clone());

        let created = registrar.create(template()).unwrap();
        assert!(created.long_form_did.starts_with(&created.short_form_did));
        assert_eq!(ledger.submission_count(), 0);

        let managed = registrar.managed_did(&created.long_form_did).unwrap();
        assert_eq!(managed.status, ManagedDidStatus::Created);
        assert_eq!(managed.did, created.short_form_did);

        // Unpublished short form does not resolve, long form does
        assert!(registrar.resolve(&created.short_form_did, None).is_err());
        let doc = registrar.resolve(&created.long_form_did, None).unwrap();
        assert!(!doc.metadata.published);
    }

    #[tokio::test]
    async fn test_template_cannot_add_master_keys() {
        let registrar = registrar(Arc::new(InMemoryLedger::new(Duration::ZERO)));
        let mut template = template();
        template.public_keys.push(KeyTemplate::new("master1", KeyPurpose::Master));
        let err = registrar.create(template).unwrap_err();
        assert!(matches!(err, RegistrarError::Validation(_)));
    }

    #[tokio::test]
    async fn test_publish_is_idempotent_then_conflicts() {
        let ledger = Arc::new(InMemoryLedger::manual());
        let registrar = registrar(ledger.clone());
        let created = registrar.create(template()).unwrap();

        let first = registrar.publish(&created.short_form_did).await.unwrap();
        let again = registrar.publish(&created.long_form_did).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(
            registrar.managed_did(&created.short_form_did).unwrap().status,
            ManagedDidStatus::PublicationPending
        );

        while ledger.held().is_empty() {
            tokio::task::yield_now().await;
        }
        for hash in ledger.held() {
            ledger.release(&hash);
        }
        registrar
            .wait_for_operation(&first.id, Duration::from_secs(5))
            .await
            .unwrap();

        let err = registrar.publish(&created.short_form_did).await.unwrap_err();
        assert!(matches!(err, RegistrarError::Conflict(_)));
        assert_eq!(
            registrar.managed_did(&created.short_form_did).unwrap().status,
            ManagedDidStatus::Published
        );
    }

    #[tokio::test]
    async fn test_update_requires_publication() {
        let registrar = registrar(Arc::new(InMemoryLedger::new(Duration::ZERO)));
        let created = registrar.create(template()).unwrap();

        let err = registrar
            .submit_update(&created.short_form_did, vec![UpdateActionRequest::remove_key("auth-1")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Conflict(_)));

        let unknown = identifier::short_form(&"cd".repeat(32));
        let err = registrar
            .submit_update(&unknown, vec![UpdateActionRequest::remove_key("auth-1")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_key_generates_material() {
        let registrar = registrar(Arc::new(InMemoryLedger::new(Duration::ZERO)));
        let did = published(&registrar).await;

        let scheduled = registrar
            .submit_update(&did, vec![UpdateActionRequest::add_key("auth-2", KeyPurpose::Authentication)])
            .await
            .unwrap();
        let done = registrar
            .wait_for_operation(&scheduled.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.status, OperationStatus::Confirmed);

        let doc = registrar.resolve(&did, None).unwrap();
        let uris: Vec<_> = doc.authentication.iter().map(|r| r.uri.clone()).collect();
        assert_eq!(uris, vec![format!("{}#auth-1", did), format!("{}#auth-2", did)]);
        assert!(registrar.vault.public_key_hex(&did, "auth-2").is_some());
    }

    #[tokio::test]
    async fn test_invalid_actions_never_reach_the_store() {
        let registrar = registrar(Arc::new(InMemoryLedger::new(Duration::ZERO)));
        let did = published(&registrar).await;
        let before = registrar.store().operations_for(&did).len();

        let err = registrar
            .submit_update(&did, vec![UpdateActionRequest::remove_service("missing")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::InvalidActionSequence(_)));
        assert_eq!(registrar.store().operations_for(&did).len(), before);
    }

    #[tokio::test]
    async fn test_deactivate_is_terminal() {
        let registrar = registrar(Arc::new(InMemoryLedger::new(Duration::ZERO)));
        let did = published(&registrar).await;

        let scheduled = registrar.deactivate(&did).await.unwrap();
        let done = registrar
            .wait_for_operation(&scheduled.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.status, OperationStatus::Confirmed);
        assert_eq!(
            registrar.managed_did(&did).unwrap().status,
            ManagedDidStatus::Deactivated
        );

        let err = registrar
            .submit_update(&did, vec![UpdateActionRequest::remove_key("auth-1")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Deactivated(_)));
        assert!(matches!(
            registrar.deactivate(&did).await.unwrap_err(),
            RegistrarError::Deactivated(_)
        ));
    }

    #[tokio::test]
    async fn test_rejected_publication_cannot_be_republished() {
        let ledger = Arc::new(InMemoryLedger::new(Duration::ZERO));
        ledger.reject_next("insufficient fee");
        let registrar = registrar(ledger);
        let created = registrar.create(template()).unwrap();

        let scheduled = registrar.publish(&created.short_form_did).await.unwrap();
        let done = registrar
            .wait_for_operation(&scheduled.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.cause, Some(RejectionCause::LedgerRejection));

        let err = registrar.publish(&created.short_form_did).await.unwrap_err();
        assert!(matches!(err, RegistrarError::Conflict(_)));
        assert_eq!(
            registrar.managed_did(&created.short_form_did).unwrap().status,
            ManagedDidStatus::Created
        );
    }

    #[tokio::test]
    async fn test_list_managed_dids() {
        let registrar = registrar(Arc::new(InMemoryLedger::new(Duration::ZERO)));
        let a = registrar.create(template()).unwrap();
        let b = registrar.create(template()).unwrap();

        let listed: Vec<String> = registrar
            .list_managed_dids()
            .into_iter()
            .map(|m| m.did)
            .collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a.short_form_did));
        assert!(listed.contains(&b.short_form_did));
    }
}
