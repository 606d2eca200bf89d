/// Unified error types for the DID registrar
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the registrar
#[derive(Error, Debug)]
pub enum RegistrarError {
    /// Malformed request or operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Signing key is not an authorized master key of the document
    #[error("Unauthorized key: {0}")]
    UnauthorizedKey(String),

    /// Actions reference missing ids or add ids that already exist
    #[error("Invalid action sequence: {0}")]
    InvalidActionSequence(String),

    /// Operation predecessor is not the confirmed head
    #[error("Chain mismatch: expected previous operation {expected}, got {actual}")]
    ChainMismatch { expected: String, actual: String },

    /// Ledger did not confirm within the retry budget
    #[error("Publication timed out after {attempts} attempt(s)")]
    PublicationTimeout { attempts: u32 },

    /// Ledger refused the operation
    #[error("Ledger rejected operation: {0}")]
    LedgerRejection(String),

    /// Identifier has a confirmed deactivate operation
    #[error("DID is deactivated: {0}")]
    Deactivated(String),

    /// Local store invariant violation; writes for the identifier are halted
    #[error("Operation store corrupted for {did}: {detail}")]
    StoreCorrupted { did: String, detail: String },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., publishing an already published DID)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistrarError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistrarError::PublicationTimeout { .. } | RegistrarError::ChainMismatch { .. }
        )
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// The same request may succeed if sent again later
    pub retryable: bool,
}

/// Convert RegistrarError to HTTP response
impl IntoResponse for RegistrarError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, error_code, message) = match &self {
            RegistrarError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "ValidationError", self.to_string())
            }
            RegistrarError::UnauthorizedKey(_) => {
                (StatusCode::FORBIDDEN, "UnauthorizedKey", self.to_string())
            }
            RegistrarError::InvalidActionSequence(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "InvalidActionSequence",
                self.to_string(),
            ),
            RegistrarError::ChainMismatch { .. } => {
                (StatusCode::CONFLICT, "ChainMismatch", self.to_string())
            }
            RegistrarError::PublicationTimeout { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PublicationTimeout",
                self.to_string(),
            ),
            RegistrarError::LedgerRejection(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "LedgerRejection",
                self.to_string(),
            ),
            RegistrarError::Deactivated(_) => {
                (StatusCode::CONFLICT, "Deactivated", self.to_string())
            }
            RegistrarError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            RegistrarError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            RegistrarError::StoreCorrupted { did, detail } => {
                tracing::error!(did = %did, detail = %detail, "refusing request on corrupted identifier");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "StoreCorrupted",
                    "Identifier is halted pending manual intervention".to_string(),
                )
            }
            RegistrarError::Database(_) | RegistrarError::Internal(_) | RegistrarError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            retryable,
        });

        (status, body).into_response()
    }
}

/// Result type alias for registrar operations
pub type RegistrarResult<T> = Result<T, RegistrarError>;
