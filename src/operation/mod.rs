/// DID operations
///
/// Create, update and deactivate operations, their canonical encoding and
/// content hash, and the signed envelope that is appended to the store and
/// submitted to the ledger.

pub mod builder;

pub use builder::{BuiltOperation, OperationBuilder, SigningKeyHandle};

use crate::{
    crypto::verify_signature,
    document::{DocumentState, PublicKey, Service},
    error::{RegistrarError, RegistrarResult},
    identifier,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One change to a document, applied in order within an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateAction {
    AddKey(PublicKey),
    RemoveKey {
        id: String,
    },
    AddService(Service),
    RemoveService {
        id: String,
    },
    UpdateService {
        id: String,
        #[serde(rename = "serviceEndpoint")]
        service_endpoint: Vec<String>,
    },
}

/// Unsigned DID operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operationType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create {
        #[serde(rename = "publicKeys")]
        public_keys: Vec<PublicKey>,
        services: Vec<Service>,
    },
    Update {
        did: String,
        #[serde(rename = "previousOperationHash")]
        previous_operation_hash: String,
        actions: Vec<UpdateAction>,
    },
    Deactivate {
        did: String,
        #[serde(rename = "previousOperationHash")]
        previous_operation_hash: String,
    },
}

/// Operation discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Deactivate,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Deactivate => "deactivate",
        }
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create { .. } => OperationKind::Create,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Deactivate { .. } => OperationKind::Deactivate,
        }
    }

    /// Canonical byte encoding, the input to both hashing and signing
    pub fn canonical_bytes(&self) -> RegistrarResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RegistrarError::Internal(format!("Failed to encode operation: {}", e)))
    }

    /// SHA-256 of the canonical encoding, hex-encoded
    pub fn hash(&self) -> RegistrarResult<String> {
        let bytes = self.canonical_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Predecessor reference (None for create)
    pub fn previous_operation_hash(&self) -> Option<&str> {
        match self {
            Operation::Create { .. } => None,
            Operation::Update {
                previous_operation_hash,
                ..
            }
            | Operation::Deactivate {
                previous_operation_hash,
                ..
            } => Some(previous_operation_hash),
        }
    }
}

/// Operation plus the signature of an authorized master key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOperation {
    pub operation: Operation,
    /// Id of the master key that produced `signature`
    pub signed_with: String,
    /// Hex-encoded ECDSA secp256k1 signature over the canonical encoding
    pub signature: String,
}

impl SignedOperation {
    pub fn hash(&self) -> RegistrarResult<String> {
        self.operation.hash()
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn previous_operation_hash(&self) -> Option<&str> {
        self.operation.previous_operation_hash()
    }

    /// Short-form DID this operation belongs to
    pub fn did(&self) -> RegistrarResult<String> {
        match &self.operation {
            Operation::Create { .. } => Ok(identifier::short_form(&self.hash()?)),
            Operation::Update { did, .. } | Operation::Deactivate { did, .. } => Ok(did.clone()),
        }
    }

    /// Verify the signature against the master keys of `state`
    ///
    /// For create operations `state` is the state seeded by the operation
    /// itself.
    pub fn verify(&self, state: &DocumentState) -> RegistrarResult<()> {
        let key = state.master_key(&self.signed_with).ok_or_else(|| {
            RegistrarError::UnauthorizedKey(format!(
                "{} is not an authorized master key",
                self.signed_with
            ))
        })?;

        verify_signature(
            &key.public_key_hex,
            &self.operation.canonical_bytes()?,
            &self.signature,
        )
    }
}
