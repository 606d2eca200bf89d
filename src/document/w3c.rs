/// W3C DID document projection
///
/// Turns a folded `DocumentState` into the canonical resolved document. The
/// output only depends on its inputs, so serializing the same state twice is
/// byte-identical.
use crate::{
    crypto::{public_key_jwk, PublicKeyJwk},
    document::{DocumentState, KeyPurpose},
    error::RegistrarResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
pub const JWK_2020_CONTEXT: &str = "https://w3id.org/security/suites/jws-2020/v1";
pub const VERIFICATION_METHOD_TYPE: &str = "JsonWebKey2020";

/// Resolved verification method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_jwk: PublicKeyJwk,
}

/// Reference from a verification relationship to a method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRelationship {
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub uri: String,
}

impl VerificationRelationship {
    fn referenced(uri: String) -> Self {
        Self {
            relationship_type: "REFERENCED".to_string(),
            uri,
        }
    }
}

/// Resolved service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedService {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: Vec<String>,
}

/// Document metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionMetadata {
    pub deactivated: bool,
    /// Always the short form
    pub canonical_id: String,
    /// Hash of the last folded operation
    pub version_id: String,
    /// Whether the create operation is confirmed on the ledger
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// Canonical DID document plus resolution metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    pub controller: String,
    pub verification_method: Vec<ResolvedVerificationMethod>,
    pub authentication: Vec<VerificationRelationship>,
    pub assertion_method: Vec<VerificationRelationship>,
    pub key_agreement: Vec<VerificationRelationship>,
    pub capability_invocation: Vec<VerificationRelationship>,
    pub capability_delegation: Vec<VerificationRelationship>,
    pub service: Vec<ResolvedService>,
    pub metadata: ResolutionMetadata,
}

impl ResolvedDocument {
    /// Project a folded state into a document for `did`
    ///
    /// `did` is the identifier the caller asked for; metadata always carries
    /// the short form as canonical id.
    pub fn project(
        did: &str,
        canonical_id: &str,
        state: &DocumentState,
        published: bool,
    ) -> RegistrarResult<Self> {
        let mut doc = ResolvedDocument {
            context: vec![DID_CONTEXT.to_string(), JWK_2020_CONTEXT.to_string()],
            id: did.to_string(),
            controller: did.to_string(),
            verification_method: Vec::new(),
            authentication: Vec::new(),
            assertion_method: Vec::new(),
            key_agreement: Vec::new(),
            capability_invocation: Vec::new(),
            capability_delegation: Vec::new(),
            service: Vec::new(),
            metadata: ResolutionMetadata {
                deactivated: state.deactivated,
                canonical_id: canonical_id.to_string(),
                version_id: state.last_operation_hash.clone().unwrap_or_default(),
                published,
                created: state.created,
                updated: state.updated,
            },
        };

        for key in &state.keys {
            let relationship = match key.purpose {
                KeyPurpose::Master => continue,
                KeyPurpose::Authentication => &mut doc.authentication,
                KeyPurpose::AssertionMethod => &mut doc.assertion_method,
                KeyPurpose::KeyAgreement => &mut doc.key_agreement,
                KeyPurpose::CapabilityInvocation => &mut doc.capability_invocation,
                KeyPurpose::CapabilityDelegation => &mut doc.capability_delegation,
            };

            let uri = format!("{}#{}", did, key.id);
            relationship.push(VerificationRelationship::referenced(uri.clone()));
            doc.verification_method.push(ResolvedVerificationMethod {
                id: uri,
                method_type: VERIFICATION_METHOD_TYPE.to_string(),
                controller: did.to_string(),
                public_key_jwk: public_key_jwk(&key.public_key_hex)?,
            });
        }

        doc.service = state
            .services
            .iter()
            .map(|s| ResolvedService {
                id: format!("{}#{}", did, s.id),
                service_type: s.service_type.clone(),
                service_endpoint: s.service_endpoint.clone(),
            })
            .collect();

        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::OperationSigner,
        document::{PublicKey, Service},
    };

    fn state() -> DocumentState {
        let pk = |id: &str, purpose| PublicKey {
            id: id.to_string(),
            purpose,
            public_key_hex: OperationSigner::generate().public_key_hex(),
        };
        DocumentState::from_create(
            &[
                pk("master0", KeyPurpose::Master),
                pk("auth-1", KeyPurpose::Authentication),
                pk("assert-1", KeyPurpose::AssertionMethod),
            ],
            &[Service {
                id: "svc-1".to_string(),
                service_type: "LinkedDomains".to_string(),
                service_endpoint: vec!["https://example.com".to_string()],
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_projection_hides_master_keys() {
        let doc = ResolvedDocument::project("did:prism:abc", "did:prism:abc", &state(), true).unwrap();

        assert_eq!(doc.verification_method.len(), 2);
        assert!(doc
            .verification_method
            .iter()
            .all(|vm| !vm.id.ends_with("#master0")));
        assert_eq!(doc.authentication[0].uri, "did:prism:abc#auth-1");
        assert_eq!(doc.authentication[0].relationship_type, "REFERENCED");
        assert_eq!(doc.assertion_method[0].uri, "did:prism:abc#assert-1");
        assert_eq!(doc.verification_method[0].controller, "did:prism:abc");
    }

    #[test]
    fn test_projection_services_are_fragment_ids() {
        let doc = ResolvedDocument::project("did:prism:abc", "did:prism:abc", &state(), true).unwrap();
        assert_eq!(doc.service[0].id, "did:prism:abc#svc-1");
        assert_eq!(doc.service[0].service_endpoint, vec!["https://example.com".to_string()]);
    }

    #[test]
    fn test_projection_serializes_w3c_field_names() {
        let doc = ResolvedDocument::project("did:prism:abc", "did:prism:abc", &state(), false).unwrap();
        let json = serde_json::to_value(&doc).unwrap();

        for field in [
            "@context",
            "id",
            "controller",
            "verificationMethod",
            "authentication",
            "assertionMethod",
            "keyAgreement",
            "capabilityInvocation",
            "service",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["metadata"]["deactivated"], false);
        assert_eq!(json["metadata"]["canonicalId"], "did:prism:abc");
        assert!(json["verificationMethod"][0]["publicKeyJwk"].is_object());
        assert!(json["service"][0]["serviceEndpoint"].is_array());
    }
}
