//! In-memory tables behind the development server, plus injectable faults.

use crate::fixture::Fixture;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use pulse_core::{Block, DatasetSummary, Selection, SelectionKey};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use uuid::Uuid;

/// Failure modes the server can be told to exhibit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Faults {
    /// `GET /selections/all` answers 404.
    pub fast_path_disabled: bool,

    /// Scoped selections and block listings of these datasets answer 500.
    pub failing_datasets: HashSet<String>,

    /// Deleting these selections answers 500.
    pub failing_deletes: HashSet<SelectionKey>,

    /// Paged listings leave out `total`.
    pub omit_totals: bool,

    /// Records use camelCase keys and `RespTxt`/`RespPct` response rows.
    pub camel_case: bool,
}

/// Filters of the block listing.
#[derive(Debug, Clone, Default)]
pub struct BlockFilter {
    pub dataset_id: Option<String>,
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
struct StoredSelection {
    id: Uuid,
    selection: Selection,
}

#[derive(Debug, Default)]
struct Tables {
    datasets: Vec<DatasetSummary>,
    blocks: Vec<Block>,
    selections: Vec<StoredSelection>,
}

/// Shared server state.
#[derive(Debug, Default)]
pub struct DevState {
    tables: RwLock<Tables>,
    faults: RwLock<Faults>,
}

impl DevState {
    /// Seed the tables from a fixture. Datasets referenced only by blocks are
    /// added to the datasets listing; duplicate selections are collapsed.
    #[must_use]
    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut tables = Tables {
            datasets: fixture.datasets,
            blocks: fixture.blocks,
            selections: Vec::new(),
        };

        let mut known: HashSet<String> = tables.datasets.iter().map(|d| d.id.clone()).collect();
        for block in &tables.blocks {
            if known.insert(block.dataset_id.clone()) {
                tables
                    .datasets
                    .push(DatasetSummary::new(block.dataset_id.clone()));
            }
        }

        for selection in fixture.selections {
            let exists = tables
                .selections
                .iter()
                .any(|s| s.selection.user_id == selection.user_id && s.selection.matches(&selection.key()));
            if !exists {
                tables.selections.push(StoredSelection {
                    id: Uuid::new_v4(),
                    selection,
                });
            }
        }

        Self {
            tables: RwLock::new(tables),
            faults: RwLock::new(Faults::default()),
        }
    }

    #[must_use]
    pub fn faults(&self) -> Faults {
        self.faults.read().clone()
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.write() = faults;
    }

    pub fn update_faults(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut self.faults.write());
    }

    /// Number of stored selections across all users.
    #[must_use]
    pub fn selection_count(&self) -> usize {
        self.tables.read().selections.len()
    }

    /// Every selection of `user_id`, newest first.
    #[must_use]
    pub fn all_selections(&self, user_id: &str) -> Vec<Value> {
        let camel = self.faults.read().camel_case;
        self.user_selections(user_id, None)
            .iter()
            .map(|s| selection_row(s, camel))
            .collect()
    }

    /// Selections of `user_id` in one dataset, newest first. Rows carry only
    /// the question id and creation time.
    #[must_use]
    pub fn scoped_selections(&self, user_id: &str, dataset_id: &str) -> Vec<Value> {
        let camel = self.faults.read().camel_case;
        self.user_selections(user_id, Some(dataset_id))
            .iter()
            .map(|s| {
                if camel {
                    json!({"questionId": s.selection.question_id, "createdAt": s.selection.created_at})
                } else {
                    json!({"question_id": s.selection.question_id, "created_at": s.selection.created_at})
                }
            })
            .collect()
    }

    /// Insert a selection unless it already exists. Returns whether a row was
    /// inserted, and the stored row.
    pub fn create_selection(&self, user_id: &str, key: &SelectionKey) -> (bool, Value) {
        let camel = self.faults.read().camel_case;
        let mut tables = self.tables.write();

        if let Some(existing) = tables
            .selections
            .iter()
            .find(|s| s.selection.user_id == user_id && s.selection.matches(key))
        {
            return (false, selection_row(existing, camel));
        }

        let stored = StoredSelection {
            id: Uuid::new_v4(),
            selection: Selection::new(user_id, &key.dataset_id, &key.question_id)
                .with_created_at(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        };
        let row = selection_row(&stored, camel);
        tables.selections.push(stored);
        (true, row)
    }

    /// Delete a selection. Returns whether it existed.
    pub fn delete_selection(&self, user_id: &str, key: &SelectionKey) -> bool {
        let mut tables = self.tables.write();
        let before = tables.selections.len();
        tables
            .selections
            .retain(|s| !(s.selection.user_id == user_id && s.selection.matches(key)));
        tables.selections.len() != before
    }

    /// One page of the datasets listing, wrapped in `{total, items}`.
    #[must_use]
    pub fn datasets(&self, limit: usize, offset: usize) -> Value {
        let faults = self.faults.read().clone();
        let tables = self.tables.read();
        let items: Vec<Value> = tables
            .datasets
            .iter()
            .skip(offset)
            .take(limit)
            .map(|d| {
                let mut row = serde_json::Map::new();
                row.insert("id".to_string(), Value::from(d.id.clone()));
                row.extend(d.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::Object(row)
            })
            .collect();
        envelope(tables.datasets.len(), items, &faults)
    }

    /// One page of the block listing, wrapped in `{total, items}`. The search
    /// term matches question text or id, case-insensitively.
    ///
    /// # Errors
    /// Returns error if a block cannot be serialized.
    pub fn blocks(&self, filter: &BlockFilter) -> Result<Value> {
        let faults = self.faults.read().clone();
        let tables = self.tables.read();
        let needle = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let matching: Vec<&Block> = tables
            .blocks
            .iter()
            .filter(|b| filter.dataset_id.as_ref().is_none_or(|id| &b.dataset_id == id))
            .filter(|b| {
                needle.as_ref().is_none_or(|n| {
                    b.question_text.to_lowercase().contains(n)
                        || b.question_id.to_lowercase().contains(n)
                })
            })
            .collect();

        let items = matching
            .iter()
            .skip(filter.offset)
            .take(filter.limit)
            .map(|b| block_row(b, faults.camel_case))
            .collect::<Result<Vec<_>>>()?;
        Ok(envelope(matching.len(), items, &faults))
    }

    fn user_selections(&self, user_id: &str, dataset_id: Option<&str>) -> Vec<StoredSelection> {
        let tables = self.tables.read();
        let mut rows: Vec<StoredSelection> = tables
            .selections
            .iter()
            .filter(|s| s.selection.user_id == user_id)
            .filter(|s| dataset_id.is_none_or(|id| s.selection.dataset_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.selection.created_at.cmp(&a.selection.created_at));
        rows
    }
}

fn envelope(total: usize, items: Vec<Value>, faults: &Faults) -> Value {
    if faults.omit_totals {
        json!({ "items": items })
    } else {
        json!({ "total": total, "items": items })
    }
}

fn selection_row(stored: &StoredSelection, camel: bool) -> Value {
    let s = &stored.selection;
    if camel {
        json!({
            "id": stored.id,
            "userId": s.user_id,
            "datasetId": s.dataset_id,
            "questionId": s.question_id,
            "createdAt": s.created_at,
        })
    } else {
        json!({
            "id": stored.id,
            "user_id": s.user_id,
            "dataset_id": s.dataset_id,
            "question_id": s.question_id,
            "created_at": s.created_at,
        })
    }
}

fn block_row(block: &Block, camel: bool) -> Result<Value> {
    if !camel {
        return Ok(serde_json::to_value(block)?);
    }

    let responses: Vec<Value> = block
        .responses
        .iter()
        .map(|r| json!({ "RespTxt": r.label, "RespPct": r.value }))
        .collect();
    Ok(json!({
        "datasetId": block.dataset_id,
        "questionId": block.question_id,
        "questionText": block.question_text,
        "metadata": block.metadata,
        "responses": responses,
    }))
}
