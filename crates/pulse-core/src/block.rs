//! Content block model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A self-contained content unit: question text, descriptive metadata, and an
/// ordered response distribution. Blocks are snapshots; nothing in the client mutates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    /// Dataset this block belongs to.
    pub dataset_id: String,

    /// Item identifier within the dataset.
    pub question_id: String,

    /// Question text (may be empty).
    #[serde(default)]
    pub question_text: String,

    /// Optional descriptive fields (release date, organization, country, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    /// Response rows in display order.
    #[serde(default)]
    pub responses: Vec<ResponseRow>,
}

impl Block {
    /// Create a block with no metadata and no responses.
    #[must_use]
    pub fn new(
        dataset_id: impl Into<String>,
        question_id: impl Into<String>,
        question_text: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            question_id: question_id.into(),
            question_text: question_text.into(),
            metadata: BTreeMap::new(),
            responses: Vec::new(),
        }
    }

    /// Append a response row.
    #[must_use]
    pub fn with_response(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.responses.push(ResponseRow {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    /// Set a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata field as a string, skipping nulls and empty strings.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// One `(label, value)` pair of a block's response distribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseRow {
    pub label: String,
    pub value: String,
}
