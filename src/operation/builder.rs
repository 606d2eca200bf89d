/// Builder for signed DID operations
///
/// Validates the requested change against the current document state and
/// signs it with the first supplied key that is a live master key. Building
/// has no side effects; nothing is appended or submitted here.
use crate::{
    crypto::OperationSigner,
    document::{DocumentState, PublicKey, Service},
    error::{RegistrarError, RegistrarResult},
    identifier::DidRef,
    operation::{Operation, SignedOperation, UpdateAction},
};

/// A private key the caller offers for signing
#[derive(Debug, Clone)]
pub struct SigningKeyHandle {
    pub key_id: String,
    pub signer: OperationSigner,
}

impl SigningKeyHandle {
    pub fn new(key_id: impl Into<String>, signer: OperationSigner) -> Self {
        Self {
            key_id: key_id.into(),
            signer,
        }
    }
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuiltOperation {
    pub signed: SignedOperation,
    /// Content hash of the operation
    pub hash: String,
    /// Short-form DID the operation belongs to
    pub did: String,
}

/// Builder for create, update and deactivate operations
#[derive(Debug, Default)]
pub struct OperationBuilder {
    did: Option<String>,
    previous_operation_hash: Option<String>,
    state: Option<DocumentState>,
    public_keys: Vec<PublicKey>,
    services: Vec<Service>,
    actions: Vec<UpdateAction>,
}

impl OperationBuilder {
    /// Create a new operation builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target DID (short form)
    pub fn did(mut self, did: impl Into<String>) -> Self {
        self.did = Some(did.into());
        self
    }

    /// Set the hash of the confirmed head this operation chains onto
    pub fn previous_operation_hash(mut self, hash: impl Into<String>) -> Self {
        self.previous_operation_hash = Some(hash.into());
        self
    }

    /// Set the current confirmed document state
    pub fn current_state(mut self, state: DocumentState) -> Self {
        self.state = Some(state);
        self
    }

    /// Add an initial key (create only)
    pub fn public_key(mut self, key: PublicKey) -> Self {
        self.public_keys.push(key);
        self
    }

    /// Add an initial service (create only)
    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Append an update action
    pub fn action(mut self, action: UpdateAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Append several update actions
    pub fn actions(mut self, actions: impl IntoIterator<Item = UpdateAction>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Build a signed create operation
    pub fn build_create(self, signing_keys: &[SigningKeyHandle]) -> RegistrarResult<BuiltOperation> {
        if self.did.is_some() || self.previous_operation_hash.is_some() {
            return Err(RegistrarError::Validation(
                "Create operations have no target DID or predecessor".to_string(),
            ));
        }
        if !self.actions.is_empty() {
            return Err(RegistrarError::Validation(
                "Create operations carry initial keys and services, not actions".to_string(),
            ));
        }

        // Validates ids, duplicates and the presence of a master key
        let seeded = DocumentState::from_create(&self.public_keys, &self.services)?;

        let operation = Operation::Create {
            public_keys: self.public_keys,
            services: self.services,
        };

        sign(operation, &seeded, signing_keys)
    }

    /// Build a signed update operation
    pub fn build_update(self, signing_keys: &[SigningKeyHandle]) -> RegistrarResult<BuiltOperation> {
        let (did, previous_operation_hash, state) = self.target()?;

        // Actions are checked cumulatively, in order, on a scratch copy
        let mut next = state.clone();
        next.apply_actions(&self.actions)?;

        let operation = Operation::Update {
            did,
            previous_operation_hash,
            actions: self.actions,
        };

        sign(operation, &state, signing_keys)
    }

    /// Build a signed deactivate operation
    pub fn build_deactivate(self, signing_keys: &[SigningKeyHandle]) -> RegistrarResult<BuiltOperation> {
        if !self.actions.is_empty() {
            return Err(RegistrarError::Validation(
                "Deactivate operations carry no actions".to_string(),
            ));
        }

        let (did, previous_operation_hash, state) = self.target()?;

        let operation = Operation::Deactivate {
            did,
            previous_operation_hash,
        };

        sign(operation, &state, signing_keys)
    }

    fn target(&self) -> RegistrarResult<(String, String, DocumentState)> {
        let did = self.did.clone().ok_or_else(|| {
            RegistrarError::Validation("DID is required for update operations".to_string())
        })?;

        let parsed = DidRef::parse(&did)?;
        if parsed.is_long_form() {
            return Err(RegistrarError::Validation(
                "Operations must target the short-form DID".to_string(),
            ));
        }

        let previous = self.previous_operation_hash.clone().ok_or_else(|| {
            RegistrarError::Validation("Previous operation hash is required".to_string())
        })?;

        let state = self.state.clone().ok_or_else(|| {
            RegistrarError::Validation("Current document state is required".to_string())
        })?;

        if state.deactivated {
            return Err(RegistrarError::Deactivated(did));
        }

        Ok((did, previous, state))
    }
}

/// Sign with the first handle that is a live master key of `authorizing_state`
fn sign(
    operation: Operation,
    authorizing_state: &DocumentState,
    signing_keys: &[SigningKeyHandle],
) -> RegistrarResult<BuiltOperation> {
    let handle = signing_keys
        .iter()
        .find(|h| {
            authorizing_state
                .master_key(&h.key_id)
                .map(|k| k.public_key_hex == h.signer.public_key_hex())
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            RegistrarError::UnauthorizedKey(
                "None of the supplied keys is an authorized master key".to_string(),
            )
        })?;

    let bytes = operation.canonical_bytes()?;
    let signed = SignedOperation {
        signature: handle.signer.sign(&bytes),
        signed_with: handle.key_id.clone(),
        operation,
    };

    let hash = signed.hash()?;
    let did = signed.did()?;

    Ok(BuiltOperation { signed, hash, did })
}
