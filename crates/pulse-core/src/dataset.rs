//! Dataset listing and page types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A dataset entry from the paged datasets listing. Only `id` is relied upon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSummary {
    pub id: String,

    /// Remaining descriptive fields (filename, upload time, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DatasetSummary {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// One page of a paged listing.
///
/// `total` is whatever the service declared; a missing or zero total means the
/// caller has to detect the end of the listing from a short page instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    #[serde(default)]
    pub total: Option<u64>,
    pub items: Vec<T>,

    /// Number of raw entries the service returned, including ones dropped
    /// during normalization. End-of-listing detection uses this, not `items.len()`.
    #[serde(skip)]
    pub fetched: usize,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(total: Option<u64>, items: Vec<T>) -> Self {
        let fetched = items.len();
        Self {
            total,
            items,
            fetched,
        }
    }

    /// Record how many raw entries the page carried before normalization.
    #[must_use]
    pub fn with_fetched(mut self, fetched: usize) -> Self {
        self.fetched = fetched;
        self
    }

    /// An empty page with no declared total.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            total: None,
            items: Vec::new(),
            fetched: 0,
        }
    }

    /// The declared total if it is usable for termination (present and non-zero).
    #[must_use]
    pub fn reliable_total(&self) -> Option<u64> {
        self.total.filter(|t| *t > 0)
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}
