/// In-process key vault
///
/// Holds the private keys the registrar generated for its managed DIDs.
/// Keys never leave the vault except as signing handles.
use crate::{crypto::OperationSigner, operation::SigningKeyHandle};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
pub struct KeyVault {
    keys: RwLock<HashMap<String, Vec<SigningKeyHandle>>>,
}

impl KeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key for `did`, replacing any key with the same id
    pub fn insert(&self, did: &str, key_id: &str, signer: OperationSigner) {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let entry = keys.entry(did.to_string()).or_default();
        entry.retain(|h| h.key_id != key_id);
        entry.push(SigningKeyHandle::new(key_id, signer));
    }

    /// Every key held for `did`
    pub fn handles(&self, did: &str) -> Vec<SigningKeyHandle> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(did)
            .cloned()
            .unwrap_or_default()
    }

    /// Public key of a held key, hex-encoded
    pub fn public_key_hex(&self, did: &str, key_id: &str) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(did)?
            .iter()
            .find(|h| h.key_id == key_id)
            .map(|h| h.signer.public_key_hex())
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum();
        f.debug_struct("KeyVault").field("keys", &count).finish()
    }
}
