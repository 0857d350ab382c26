//! In-flight mutation bookkeeping.

use crate::selection::SelectionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of mutation issued against the remote selections collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    /// Selection create request.
    Add,
    /// Selection delete request.
    Remove,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Remove => write!(f, "REMOVE"),
        }
    }
}

/// A request that has been dispatched but whose outcome has not arrived yet.
///
/// Never persisted. Presentation layers use it for in-flight indication; the
/// authoritative state only changes once the outcome is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMutation {
    pub operation: MutationKind,
    pub key: SelectionKey,

    /// Per-key monotonic version; only the newest request for a key may apply its outcome.
    pub version: u64,

    pub started_at: DateTime<Utc>,
}

impl PendingMutation {
    #[must_use]
    pub fn new(operation: MutationKind, key: SelectionKey, version: u64) -> Self {
        Self {
            operation,
            key,
            version,
            started_at: Utc::now(),
        }
    }
}
