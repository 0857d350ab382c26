//! Normalization of the remote service's response envelopes.
//!
//! The service is inconsistent about shapes: listings come back either as a
//! bare JSON array or as an object carrying an `items` array (plus `total`),
//! and records use either snake_case or camelCase field names. Everything in
//! this module maps those variants onto one canonical shape so code past the
//! HTTP boundary never has to care.
//!
//! A body that matches no known envelope is an [`CoreError::UnexpectedShape`].
//! Individual records that lack required identifiers are dropped and counted.

use crate::block::{Block, ResponseRow};
use crate::dataset::{DatasetSummary, Page};
use crate::error::{CoreError, Result};
use crate::selection::{ScopedSelection, Selection};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const DATASET_ID: &[&str] = &["dataset_id", "datasetId"];
const QUESTION_ID: &[&str] = &["question_id", "questionId"];
const USER_ID: &[&str] = &["user_id", "userId"];
const CREATED_AT: &[&str] = &["created_at", "createdAt"];
const QUESTION_TEXT: &[&str] = &["question_text", "questionText"];
const RESPONSE_LABEL: &[&str] = &["label", "RespTxt", "resp_txt", "respTxt"];
const RESPONSE_VALUE: &[&str] = &["value", "RespPct", "resp_pct", "respPct"];

/// Records that survived normalization, plus how many were discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub dropped: usize,
}

/// Normalize the "all selections for user" response.
///
/// Records without a dataset id or question id are dropped. A missing user id
/// falls back to `user_id`, the user the request was made for.
pub fn selections(body: &Value, user_id: &str) -> Result<Normalized<Selection>> {
    let raw = items(body)?;
    let mut out = Vec::with_capacity(raw.len());

    for entry in raw {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let (Some(dataset_id), Some(question_id)) =
            (text_field(obj, DATASET_ID), text_field(obj, QUESTION_ID))
        else {
            continue;
        };

        let user = text_field(obj, USER_ID).unwrap_or_else(|| user_id.to_string());
        let created_at = text_field(obj, CREATED_AT).unwrap_or_default();
        out.push(Selection::new(user, dataset_id, question_id).with_created_at(created_at));
    }

    Ok(Normalized {
        dropped: raw.len() - out.len(),
        items: out,
    })
}

/// Normalize the dataset-scoped selections response.
pub fn scoped_selections(body: &Value) -> Result<Normalized<ScopedSelection>> {
    let raw = items(body)?;
    let out: Vec<ScopedSelection> = raw
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            Some(ScopedSelection {
                question_id: text_field(obj, QUESTION_ID)?,
                created_at: text_field(obj, CREATED_AT).unwrap_or_default(),
            })
        })
        .collect();

    Ok(Normalized {
        dropped: raw.len() - out.len(),
        items: out,
    })
}

/// Normalize one page of the datasets listing.
pub fn datasets(body: &Value) -> Result<Page<DatasetSummary>> {
    let raw = items(body)?;
    let out = raw
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let id = text_field(obj, &["id", "dataset_id", "datasetId"])?;
            let extra = obj
                .iter()
                .filter(|(k, _)| k.as_str() != "id")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Some(DatasetSummary { id, extra })
        })
        .collect();

    Ok(Page::new(total(body), out).with_fetched(raw.len()))
}

/// Normalize one page of the content blocks listing.
///
/// When a block omits its dataset id, `dataset_id` (the dataset the page was
/// requested for) is used instead. Blocks with no resolvable dataset or
/// question id are dropped.
pub fn blocks(body: &Value, dataset_id: Option<&str>) -> Result<Page<Block>> {
    let raw = items(body)?;
    let out = raw
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| block(obj, dataset_id))
        .collect();

    Ok(Page::new(total(body), out).with_fetched(raw.len()))
}

fn block(obj: &Map<String, Value>, fallback_dataset: Option<&str>) -> Option<Block> {
    let dataset_id = text_field(obj, DATASET_ID).or_else(|| fallback_dataset.map(String::from))?;
    let question_id = text_field(obj, QUESTION_ID)?;

    let metadata: BTreeMap<String, Value> = obj
        .get("metadata")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let responses = obj
        .get("responses")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(response_row).collect())
        .unwrap_or_default();

    Some(Block {
        dataset_id,
        question_id,
        question_text: text_field(obj, QUESTION_TEXT).unwrap_or_default(),
        metadata,
        responses,
    })
}

/// A response row is either `{label, value}` (under any known alias) or a
/// two-element `[label, value]` array.
fn response_row(row: &Value) -> Option<ResponseRow> {
    match row {
        Value::Object(obj) => Some(ResponseRow {
            label: text_field(obj, RESPONSE_LABEL).unwrap_or_default(),
            value: text_field(obj, RESPONSE_VALUE).unwrap_or_default(),
        }),
        Value::Array(pair) if pair.len() == 2 => Some(ResponseRow {
            label: scalar_text(&pair[0]).unwrap_or_default(),
            value: scalar_text(&pair[1]).unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Locate the record array: a bare array, or an object's `items` array.
fn items(body: &Value) -> Result<&Vec<Value>> {
    match body {
        Value::Array(arr) => Ok(arr),
        Value::Object(obj) => match obj.get("items") {
            Some(Value::Array(arr)) => Ok(arr),
            Some(Value::Null) | None => Err(CoreError::UnexpectedShape(
                "object envelope without an items array".to_string(),
            )),
            Some(other) => Err(CoreError::UnexpectedShape(format!(
                "items is {}, expected an array",
                kind(other)
            ))),
        },
        other => Err(CoreError::UnexpectedShape(format!(
            "body is {}, expected an array or an object",
            kind(other)
        ))),
    }
}

/// Declared total of a wrapped envelope. Numeric strings are accepted.
fn total(body: &Value) -> Option<u64> {
    match body.get("total")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First present, non-empty field among `names`, rendered as text.
fn text_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find_map(scalar_text)
}

/// Render a scalar as trimmed text. Ids sometimes arrive as numbers, and
/// integral floats (`31119218.0`) must compare equal to their integer form.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            let s = n.to_string();
            s.strip_suffix(".0").map_or_else(|| s.clone(), str::to_string)
        }
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
