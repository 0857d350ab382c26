//! Error types for the synchronization engine.

use pulse_core::CoreError;
use thiserror::Error;

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while talking to the remote service or syncing state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure (connection refused, timeout, ...). Never retried.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// Some requests of a batch failed; the successful subset was committed.
    #[error("{failed} of {attempted} removals failed (e.g. {example})")]
    PartialBatch {
        failed: usize,
        attempted: usize,
        example: String,
    },

    /// A response matched none of the recognized envelopes.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    /// Both the primary and the fallback selection paths failed.
    #[error("could not load selections (primary: {primary}; fallback: {fallback})")]
    LoadFailed {
        primary: Box<SyncError>,
        fallback: Box<SyncError>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(CoreError),
}

impl SyncError {
    /// HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnexpectedShape(msg) => Self::UnexpectedShape(msg),
            other => Self::Core(other),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
