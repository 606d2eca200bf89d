/// Cryptography module for operation signing and key material
///
/// Handles secp256k1 signing and verification of DID operations

pub mod signer;

pub use signer::{public_key_jwk, verify_signature, OperationSigner, PublicKeyJwk};
