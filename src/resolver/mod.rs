/// Resolver
///
/// Projects the confirmed operation log of an identifier into its canonical
/// document. Resolution is synchronous over a cloned snapshot of the
/// confirmed chain and has no side effects, so resolving the same version
/// twice yields identical output.

pub mod fold;

use crate::{
    document::{DocumentState, ResolvedDocument},
    error::{RegistrarError, RegistrarResult},
    identifier::DidRef,
    metrics,
    store::OperationStore,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// DID resolver over the operation store
#[derive(Clone)]
pub struct Resolver {
    store: Arc<OperationStore>,
}

impl Resolver {
    pub fn new(store: Arc<OperationStore>) -> Self {
        Self { store }
    }

    /// Resolve a short- or long-form DID, optionally at a past version
    ///
    /// `version_id` is the hash of the last operation to fold.
    pub fn resolve(&self, did: &str, version_id: Option<&str>) -> RegistrarResult<ResolvedDocument> {
        let start = Instant::now();
        let result = self.resolve_inner(did, version_id);
        metrics::record_resolution(result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    fn resolve_inner(&self, did: &str, version_id: Option<&str>) -> RegistrarResult<ResolvedDocument> {
        let parsed = DidRef::parse(did)?;
        let canonical_id = parsed.short_form();

        let chain = match version_id {
            Some(version) if self.store.head(&canonical_id).is_some() => {
                self.store.confirmed_chain_until(&canonical_id, version)?
            }
            _ => self.store.confirmed_chain(&canonical_id),
        };

        if !chain.is_empty() {
            let state = fold::fold(chain.iter())
                .map_err(|e| RegistrarError::StoreCorrupted {
                    did: canonical_id.clone(),
                    detail: format!("confirmed chain does not fold: {}", e),
                })?
                .ok_or_else(|| RegistrarError::Internal("empty fold".to_string()))?;

            debug!(did = %canonical_id, version = ?state.last_operation_hash, "resolved from confirmed log");
            return ResolvedDocument::project(&canonical_id, &canonical_id, &state, true);
        }

        // Unpublished: only a long form carries enough to resolve
        let DidRef::Long { create, suffix } = parsed else {
            return Err(RegistrarError::NotFound(format!("DID not found: {}", did)));
        };

        if let Some(version) = version_id {
            if version != suffix {
                return Err(RegistrarError::NotFound(format!(
                    "Version {} not found for {}",
                    version, canonical_id
                )));
            }
        }

        let state: DocumentState = fold::apply(None, &create, &suffix, None)?;
        debug!(did = %canonical_id, "resolved unpublished long form");
        ResolvedDocument::project(did, &canonical_id, &state, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{identifier, operation::UpdateAction, testing::DidFixture};
    use chrono::Utc;

    async fn published(store: &OperationStore, fx: &DidFixture) {
        store.append(fx.create.signed.clone()).await.unwrap();
        store.confirm(&fx.create.hash, 1, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_short_form_requires_confirmed_create() {
        let store = Arc::new(OperationStore::in_memory());
        let resolver = Resolver::new(store.clone());
        let fx = DidFixture::new();

        store.append(fx.create.signed.clone()).await.unwrap();
        let err = resolver.resolve(&fx.create.did, None).unwrap_err();
        assert!(matches!(err, RegistrarError::NotFound(_)));

        store.confirm(&fx.create.hash, 1, Utc::now()).await.unwrap();
        let doc = resolver.resolve(&fx.create.did, None).unwrap();
        assert_eq!(doc.id, fx.create.did);
        assert_eq!(doc.authentication[0].uri, format!("{}#auth-1", fx.create.did));
        assert!(doc.metadata.published);
        assert!(!doc.metadata.deactivated);
        assert_eq!(doc.metadata.version_id, fx.create.hash);
    }

    #[tokio::test]
    async fn test_long_form_resolves_before_publication() {
        let store = Arc::new(OperationStore::in_memory());
        let resolver = Resolver::new(store.clone());
        let fx = DidFixture::new();
        let long = identifier::long_form(&fx.create.signed).unwrap();

        let doc = resolver.resolve(&long, None).unwrap();
        assert_eq!(doc.id, long);
        assert_eq!(doc.metadata.canonical_id, fx.create.did);
        assert!(!doc.metadata.published);
        assert_eq!(doc.metadata.version_id, fx.create.hash);
    }

    #[tokio::test]
    async fn test_long_form_after_publication_matches_short_form() {
        let store = Arc::new(OperationStore::in_memory());
        let resolver = Resolver::new(store.clone());
        let fx = DidFixture::new();
        published(&store, &fx).await;

        let long = identifier::long_form(&fx.create.signed).unwrap();
        let from_long = resolver.resolve(&long, None).unwrap();
        let from_short = resolver.resolve(&fx.create.did, None).unwrap();
        assert_eq!(from_long, from_short);
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let store = Arc::new(OperationStore::in_memory());
        let resolver = Resolver::new(store.clone());
        let fx = DidFixture::new();
        published(&store, &fx).await;

        let a = serde_json::to_vec(&resolver.resolve(&fx.create.did, None).unwrap()).unwrap();
        let b = serde_json::to_vec(&resolver.resolve(&fx.create.did, None).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_resolve_at_version() {
        let store = Arc::new(OperationStore::in_memory());
        let resolver = Resolver::new(store.clone());
        let fx = DidFixture::new();
        published(&store, &fx).await;

        let update = fx.update(
            &fx.create.hash,
            vec![UpdateAction::UpdateService {
                id: "svc-1".to_string(),
                service_endpoint: vec!["https://moved.example.com".to_string()],
            }],
        );
        store.append(update.signed.clone()).await.unwrap();
        store.confirm(&update.hash, 2, Utc::now()).await.unwrap();

        let latest = resolver.resolve(&fx.create.did, None).unwrap();
        assert_eq!(latest.service[0].service_endpoint, vec!["https://moved.example.com".to_string()]);
        assert_eq!(latest.service[0].service_type, "LinkedDomains");
        assert!(latest.metadata.updated.is_some());

        let original = resolver
            .resolve(&fx.create.did, Some(&fx.create.hash))
            .unwrap();
        assert_eq!(original.service[0].service_endpoint, vec!["https://svc-1.example.com".to_string()]);
        assert_eq!(original.metadata.version_id, fx.create.hash);

        assert!(resolver.resolve(&fx.create.did, Some("ff")).is_err());
    }

    #[tokio::test]
    async fn test_deactivated_document_is_empty() {
        let store = Arc::new(OperationStore::in_memory());
        let resolver = Resolver::new(store.clone());
        let fx = DidFixture::new();
        published(&store, &fx).await;

        let deactivate = fx.deactivate(&fx.create.hash);
        store.append(deactivate.signed.clone()).await.unwrap();
        store.confirm(&deactivate.hash, 2, Utc::now()).await.unwrap();

        let doc = resolver.resolve(&fx.create.did, None).unwrap();
        assert!(doc.metadata.deactivated);
        assert!(doc.verification_method.is_empty());
        assert!(doc.authentication.is_empty());
        assert!(doc.service.is_empty());
    }

    #[test]
    fn test_unknown_did_is_not_found() {
        let resolver = Resolver::new(Arc::new(OperationStore::in_memory()));
        let did = identifier::short_form(&"ab".repeat(32));
        assert!(matches!(
            resolver.resolve(&did, None).unwrap_err(),
            RegistrarError::NotFound(_)
        ));
        assert!(matches!(
            resolver.resolve("did:web:example.com", None).unwrap_err(),
            RegistrarError::Validation(_)
        ));
    }
}
