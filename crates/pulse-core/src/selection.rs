//! Selection model.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record of a user choosing to include one item from a dataset in their workspace.
///
/// The remote service owns these records; the client only caches them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selection {
    /// Owning user.
    pub user_id: String,

    /// Dataset the selected item belongs to.
    pub dataset_id: String,

    /// Item identifier within the dataset.
    pub question_id: String,

    /// Creation timestamp as reported by the service (may be empty).
    #[serde(default)]
    pub created_at: String,
}

impl Selection {
    /// Create a selection with an empty creation timestamp.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        dataset_id: impl Into<String>,
        question_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            dataset_id: dataset_id.into(),
            question_id: question_id.into(),
            created_at: String::new(),
        }
    }

    /// Set the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self
    }

    /// The `(dataset_id, question_id)` pair identifying this selection for one user.
    #[must_use]
    pub fn key(&self) -> SelectionKey {
        SelectionKey::new(&self.dataset_id, &self.question_id)
    }

    /// Check whether this selection refers to the given key.
    #[must_use]
    pub fn matches(&self, key: &SelectionKey) -> bool {
        self.dataset_id == key.dataset_id && self.question_id == key.question_id
    }
}

/// A selection as returned by the dataset-scoped listing, which does not echo
/// the dataset id back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopedSelection {
    pub question_id: String,
    #[serde(default)]
    pub created_at: String,
}

impl ScopedSelection {
    /// Attach the dataset id the listing was requested for.
    #[must_use]
    pub fn into_selection(self, user_id: &str, dataset_id: &str) -> Selection {
        Selection::new(user_id, dataset_id, self.question_id).with_created_at(self.created_at)
    }
}

/// `(dataset_id, question_id)`: identifies a selection within one user's workspace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SelectionKey {
    pub dataset_id: String,
    pub question_id: String,
}

impl SelectionKey {
    #[must_use]
    pub fn new(dataset_id: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            question_id: question_id.into(),
        }
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dataset_id, self.question_id)
    }
}

impl FromStr for SelectionKey {
    type Err = CoreError;

    /// Parse `dataset_id:question_id`, splitting on the first colon.
    fn from_str(s: &str) -> Result<Self> {
        let (dataset_id, question_id) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidKey(s.to_string()))?;

        let dataset_id = dataset_id.trim();
        let question_id = question_id.trim();
        if dataset_id.is_empty() || question_id.is_empty() {
            return Err(CoreError::InvalidKey(s.to_string()));
        }

        Ok(Self::new(dataset_id, question_id))
    }
}
