/// DID identifiers
///
/// Short form: `did:prism:<hash>` where `<hash>` is the hex SHA-256 of the
/// create operation. Long form appends the base64url-encoded signed create
/// operation, making the identifier self-certifying.
use crate::{
    error::{RegistrarError, RegistrarResult},
    operation::{Operation, SignedOperation},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

pub const DID_PREFIX: &str = "did:prism:";

/// A parsed DID reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DidRef {
    Short { suffix: String },
    Long { suffix: String, create: SignedOperation },
}

impl DidRef {
    /// Parse and, for the long form, verify the embedded create operation
    pub fn parse(did: &str) -> RegistrarResult<Self> {
        let rest = did.strip_prefix(DID_PREFIX).ok_or_else(|| {
            RegistrarError::Validation(format!("Not a did:prism identifier: {}", did))
        })?;

        let (suffix, encoded) = match rest.split_once(':') {
            Some((suffix, encoded)) => (suffix, Some(encoded)),
            None => (rest, None),
        };

        if suffix.len() != 64 || !suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(RegistrarError::Validation(format!(
                "DID suffix must be a lowercase hex SHA-256: {}",
                did
            )));
        }

        let Some(encoded) = encoded else {
            return Ok(DidRef::Short {
                suffix: suffix.to_string(),
            });
        };

        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
            RegistrarError::Validation(format!("Long-form DID payload is not base64url: {}", e))
        })?;
        let create: SignedOperation = serde_json::from_slice(&bytes).map_err(|e| {
            RegistrarError::Validation(format!("Long-form DID payload is malformed: {}", e))
        })?;

        if !matches!(create.operation, Operation::Create { .. }) {
            return Err(RegistrarError::Validation(
                "Long-form DID must embed a create operation".to_string(),
            ));
        }
        if create.hash()? != suffix {
            return Err(RegistrarError::Validation(
                "Long-form DID payload does not match its suffix".to_string(),
            ));
        }

        Ok(DidRef::Long {
            suffix: suffix.to_string(),
            create,
        })
    }

    pub fn suffix(&self) -> &str {
        match self {
            DidRef::Short { suffix } | DidRef::Long { suffix, .. } => suffix,
        }
    }

    /// Canonical short form of this reference
    pub fn short_form(&self) -> String {
        short_form(self.suffix())
    }

    pub fn is_long_form(&self) -> bool {
        matches!(self, DidRef::Long { .. })
    }
}

/// Build the short form from a create operation hash
pub fn short_form(create_hash: &str) -> String {
    format!("{}{}", DID_PREFIX, create_hash)
}

/// Build the long form from a signed create operation
pub fn long_form(create: &SignedOperation) -> RegistrarResult<String> {
    if !matches!(create.operation, Operation::Create { .. }) {
        return Err(RegistrarError::Validation(
            "Long-form DID requires a create operation".to_string(),
        ));
    }

    let encoded = serde_json::to_vec(create)
        .map_err(|e| RegistrarError::Internal(format!("Failed to encode create operation: {}", e)))?;

    Ok(format!(
        "{}{}:{}",
        DID_PREFIX,
        create.hash()?,
        URL_SAFE_NO_PAD.encode(encoded)
    ))
}
