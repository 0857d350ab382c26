//! Error types for pulse-core.

use thiserror::Error;

/// Result type alias for pulse-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in pulse-core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A response body matched none of the recognized envelopes.
    #[error("unexpected shape: {0}")]
    UnexpectedShape(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed selection key.
    #[error("invalid selection key: {0}")]
    InvalidKey(String),
}
