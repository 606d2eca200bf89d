/// secp256k1 signing for DID operations
///
/// Operations are signed over their canonical JSON encoding. Public keys are
/// carried as compressed SEC1 points (33 bytes, hex-encoded) and projected into
/// resolved documents as JWKs.
use crate::error::{RegistrarError, RegistrarResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use serde::{Deserialize, Serialize};

/// Operation signer - holds one secp256k1 private key
#[derive(Clone)]
pub struct OperationSigner {
    signing_key: SigningKey,
}

impl std::fmt::Debug for OperationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSigner")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl OperationSigner {
    /// Create a new signer from a private key (32 bytes)
    pub fn new(private_key: &[u8]) -> RegistrarResult<Self> {
        if private_key.len() != 32 {
            return Err(RegistrarError::Validation(
                "Private key must be exactly 32 bytes".to_string(),
            ));
        }

        let signing_key = SigningKey::from_slice(private_key)
            .map_err(|e| RegistrarError::Validation(format!("Invalid private key: {}", e)))?;

        Ok(Self { signing_key })
    }

    /// Create a signer from hex-encoded private key
    pub fn from_hex(hex_key: &str) -> RegistrarResult<Self> {
        let key_bytes = hex::decode(hex_key).map_err(|e| {
            RegistrarError::Validation(format!("Invalid hex private key: {}", e))
        })?;

        Self::new(&key_bytes)
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Sign raw bytes, returning the 64-byte signature hex-encoded
    ///
    /// Signatures are deterministic (RFC 6979), so identical input always
    /// yields the identical signature.
    pub fn sign(&self, data: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(data);
        hex::encode(signature.to_bytes())
    }

    /// Get the public key in compressed form (33 bytes, hex-encoded)
    pub fn public_key_hex(&self) -> String {
        let public_key = self.signing_key.verifying_key().to_encoded_point(true);
        hex::encode(public_key.as_bytes())
    }

    /// Private key bytes, hex-encoded
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

fn decode_verifying_key(public_key_hex: &str) -> RegistrarResult<VerifyingKey> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| RegistrarError::Validation(format!("Invalid hex public key: {}", e)))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| RegistrarError::Validation(format!("Invalid secp256k1 public key: {}", e)))
}

/// Verify a hex signature over `data` with a compressed hex public key
pub fn verify_signature(public_key_hex: &str, data: &[u8], signature_hex: &str) -> RegistrarResult<()> {
    let verifying_key = decode_verifying_key(public_key_hex)?;

    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| RegistrarError::Validation(format!("Signature must be valid hex: {}", e)))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| RegistrarError::Validation(format!("Malformed signature: {}", e)))?;

    verifying_key
        .verify(data, &signature)
        .map_err(|_| RegistrarError::UnauthorizedKey("Signature verification failed".to_string()))
}

/// JSON Web Key for a secp256k1 public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

/// Project a compressed hex public key into its JWK form
pub fn public_key_jwk(public_key_hex: &str) -> RegistrarResult<PublicKeyJwk> {
    let verifying_key = decode_verifying_key(public_key_hex)?;
    let point = verifying_key.to_encoded_point(false);

    let (x, y) = match (point.x(), point.y()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(RegistrarError::Internal(
                "Public key has no affine coordinates".to_string(),
            ))
        }
    };

    Ok(PublicKeyJwk {
        kty: "EC".to_string(),
        crv: "secp256k1".to_string(),
        x: URL_SAFE_NO_PAD.encode(x),
        y: URL_SAFE_NO_PAD.encode(y),
    })
}
