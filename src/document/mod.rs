/// Document Model
///
/// Keys, services and the live fold state of a DID document. The state is
/// only ever derived by folding operations; nothing mutates it directly
/// outside of `apply_*`.

pub mod w3c;

pub use w3c::{
    ResolutionMetadata, ResolvedDocument, ResolvedService, ResolvedVerificationMethod,
    VerificationRelationship,
};

use crate::{
    error::{RegistrarError, RegistrarResult},
    operation::UpdateAction,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum length of a key or service id
pub const MAX_ID_LENGTH: usize = 50;

/// Key id reserved for the registrar-managed master key
pub const DEFAULT_MASTER_KEY_ID: &str = "master0";

/// What a key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyPurpose {
    /// Signs DID operations; never projected into the resolved document
    Master,
    Authentication,
    AssertionMethod,
    KeyAgreement,
    CapabilityInvocation,
    CapabilityDelegation,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Master => "MASTER",
            KeyPurpose::Authentication => "AUTHENTICATION",
            KeyPurpose::AssertionMethod => "ASSERTION_METHOD",
            KeyPurpose::KeyAgreement => "KEY_AGREEMENT",
            KeyPurpose::CapabilityInvocation => "CAPABILITY_INVOCATION",
            KeyPurpose::CapabilityDelegation => "CAPABILITY_DELEGATION",
        }
    }
}

impl std::str::FromStr for KeyPurpose {
    type Err = RegistrarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "MASTER" => Ok(KeyPurpose::Master),
            "AUTHENTICATION" => Ok(KeyPurpose::Authentication),
            "ASSERTION_METHOD" | "ASSERTIONMETHOD" => Ok(KeyPurpose::AssertionMethod),
            "KEY_AGREEMENT" | "KEYAGREEMENT" => Ok(KeyPurpose::KeyAgreement),
            "CAPABILITY_INVOCATION" | "CAPABILITYINVOCATION" => {
                Ok(KeyPurpose::CapabilityInvocation)
            }
            "CAPABILITY_DELEGATION" | "CAPABILITYDELEGATION" => {
                Ok(KeyPurpose::CapabilityDelegation)
            }
            other => Err(RegistrarError::Validation(format!(
                "Unknown key purpose: {}",
                other
            ))),
        }
    }
}

/// Public key entry of a DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    pub purpose: KeyPurpose,
    /// Compressed secp256k1 point, hex-encoded
    pub public_key_hex: String,
}

/// Service entry of a DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: Vec<String>,
}

impl Service {
    /// Check id, type and endpoint well-formedness
    pub fn validate(&self) -> RegistrarResult<()> {
        validate_id(&self.id)?;
        if self.service_type.trim().is_empty() {
            return Err(RegistrarError::Validation(format!(
                "Service {} has an empty type",
                self.id
            )));
        }
        validate_endpoints(&self.id, &self.service_endpoint)
    }
}

/// Validate a key or service id fragment
pub fn validate_id(id: &str) -> RegistrarResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(RegistrarError::Validation(format!(
            "Id must be 1-{} characters: {:?}",
            MAX_ID_LENGTH, id
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RegistrarError::Validation(format!(
            "Id contains invalid characters: {:?}",
            id
        )));
    }
    Ok(())
}

/// Validate a service endpoint list (non-empty, absolute URIs)
pub fn validate_endpoints(service_id: &str, endpoints: &[String]) -> RegistrarResult<()> {
    if endpoints.is_empty() {
        return Err(RegistrarError::Validation(format!(
            "Service {} must have at least one endpoint",
            service_id
        )));
    }
    for endpoint in endpoints {
        // The parser trims and strips whitespace, so check the raw value first
        let parsed = if endpoint.chars().any(char::is_whitespace) {
            None
        } else {
            Url::parse(endpoint).ok()
        };
        if parsed.is_none() {
            return Err(RegistrarError::Validation(format!(
                "Service {} endpoint is not an absolute URI: {}",
                service_id, endpoint
            )));
        }
    }
    Ok(())
}

/// Live state of a DID document, produced by folding confirmed operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentState {
    /// Keys in insertion order
    pub keys: Vec<PublicKey>,
    /// Services in insertion order
    pub services: Vec<Service>,
    pub deactivated: bool,
    /// Hash of the last folded operation
    pub last_operation_hash: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl DocumentState {
    /// Seed a state from the keys and services of a create operation
    pub fn from_create(keys: &[PublicKey], services: &[Service]) -> RegistrarResult<Self> {
        let mut state = DocumentState::default();

        for key in keys {
            validate_id(&key.id)?;
            if state.key(&key.id).is_some() {
                return Err(RegistrarError::InvalidActionSequence(format!(
                    "Duplicate key id in create operation: {}",
                    key.id
                )));
            }
            state.keys.push(key.clone());
        }

        for service in services {
            service.validate()?;
            if state.service(&service.id).is_some() {
                return Err(RegistrarError::InvalidActionSequence(format!(
                    "Duplicate service id in create operation: {}",
                    service.id
                )));
            }
            state.services.push(service.clone());
        }

        if state.master_keys().next().is_none() {
            return Err(RegistrarError::InvalidActionSequence(
                "Create operation must contain at least one master key".to_string(),
            ));
        }

        Ok(state)
    }

    pub fn key(&self, id: &str) -> Option<&PublicKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Keys authorized to sign operations
    pub fn master_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.keys.iter().filter(|k| k.purpose == KeyPurpose::Master)
    }

    /// Look up a live master key by id
    pub fn master_key(&self, id: &str) -> Option<&PublicKey> {
        self.master_keys().find(|k| k.id == id)
    }

    /// Apply one update action in place
    ///
    /// Adding an id that already exists is a conflict, never an overwrite.
    pub fn apply_action(&mut self, action: &UpdateAction) -> RegistrarResult<()> {
        if self.deactivated {
            return Err(RegistrarError::Deactivated(
                "cannot apply actions to a deactivated document".to_string(),
            ));
        }

        match action {
            UpdateAction::AddKey(key) => {
                validate_id(&key.id)?;
                if key.purpose == KeyPurpose::Master {
                    return Err(RegistrarError::InvalidActionSequence(format!(
                        "Master keys are managed by the registrar: {}",
                        key.id
                    )));
                }
                if self.key(&key.id).is_some() {
                    return Err(RegistrarError::InvalidActionSequence(format!(
                        "Key already exists: {}",
                        key.id
                    )));
                }
                self.keys.push(key.clone());
            }
            UpdateAction::RemoveKey { id } => {
                match self.key(id) {
                    None => {
                        return Err(RegistrarError::InvalidActionSequence(format!(
                            "Key does not exist: {}",
                            id
                        )))
                    }
                    Some(key) if key.purpose == KeyPurpose::Master => {
                        return Err(RegistrarError::InvalidActionSequence(format!(
                            "Master keys are managed by the registrar: {}",
                            id
                        )))
                    }
                    Some(_) => {}
                }
                self.keys.retain(|k| &k.id != id);
            }
            UpdateAction::AddService(service) => {
                service.validate()?;
                if self.service(&service.id).is_some() {
                    return Err(RegistrarError::InvalidActionSequence(format!(
                        "Service already exists: {}",
                        service.id
                    )));
                }
                self.services.push(service.clone());
            }
            UpdateAction::RemoveService { id } => {
                if self.service(id).is_none() {
                    return Err(RegistrarError::InvalidActionSequence(format!(
                        "Service does not exist: {}",
                        id
                    )));
                }
                self.services.retain(|s| &s.id != id);
            }
            UpdateAction::UpdateService { id, service_endpoint } => {
                validate_endpoints(id, service_endpoint)?;
                let service = self
                    .services
                    .iter_mut()
                    .find(|s| &s.id == id)
                    .ok_or_else(|| {
                        RegistrarError::InvalidActionSequence(format!(
                            "Service does not exist: {}",
                            id
                        ))
                    })?;
                service.service_endpoint = service_endpoint.clone();
            }
        }

        Ok(())
    }

    /// Apply an ordered action list atomically
    pub fn apply_actions(&mut self, actions: &[UpdateAction]) -> RegistrarResult<()> {
        if actions.is_empty() {
            return Err(RegistrarError::InvalidActionSequence(
                "Update must contain at least one action".to_string(),
            ));
        }

        let mut next = self.clone();
        for action in actions {
            next.apply_action(action)?;
        }
        *self = next;
        Ok(())
    }

    /// Mark the document deactivated; keys and services are dropped
    pub fn deactivate(&mut self) {
        self.deactivated = true;
        self.keys.clear();
        self.services.clear();
    }
}
