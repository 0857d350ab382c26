//! Concurrent batch removal with per-key outcomes.
//!
//! Every delete of a batch is dispatched at once and awaited together; one
//! failure never cancels the others. Keys whose delete succeeded are committed
//! to the store in a single step, failed keys stay selected, and the caller
//! gets a [`BatchReport`] describing both.

use crate::error::{Result, SyncError};
use crate::store::{WorkspaceStore, confirm_delete};
use futures::future::join_all;
use pulse_core::{MutationKind, SelectionKey};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// One key of a batch that the service refused or never answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub key: SelectionKey,
    /// HTTP status when the service answered.
    pub status: Option<u16>,
    pub message: String,
}

/// Outcome of a batch removal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: BTreeSet<SelectionKey>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Human-readable one-liner, e.g. `removed 1 of 2 (1 failed: ds1:q3 http 500: boom)`.
    #[must_use]
    pub fn summary(&self) -> String {
        let base = format!("removed {} of {}", self.succeeded.len(), self.attempted());
        match self.failed.first() {
            None => base,
            Some(first) => format!(
                "{base} ({} failed: {} {})",
                self.failed.len(),
                first.key,
                first.message
            ),
        }
    }

    /// Turn a report with failures into `SyncError::PartialBatch`.
    ///
    /// # Errors
    /// Returns `SyncError::PartialBatch` when at least one removal failed.
    pub fn into_result(self) -> Result<BTreeSet<SelectionKey>> {
        match self.failed.first() {
            None => Ok(self.succeeded),
            Some(first) => Err(SyncError::PartialBatch {
                failed: self.failed.len(),
                attempted: self.attempted(),
                example: format!("{} {}", first.key, first.message),
            }),
        }
    }
}

/// Runs batch removals against a [`WorkspaceStore`].
pub struct MutationCoordinator<'a> {
    store: &'a WorkspaceStore,
}

impl<'a> MutationCoordinator<'a> {
    #[must_use]
    pub const fn new(store: &'a WorkspaceStore) -> Self {
        Self { store }
    }

    /// Delete every key concurrently and commit the ones the service confirmed.
    ///
    /// Duplicate keys are removed once. A key that gets a newer request while
    /// its delete is in flight is reported as succeeded but left to that
    /// newer request.
    pub async fn batch_remove(&self, keys: impl IntoIterator<Item = SelectionKey>) -> BatchReport {
        let keys: BTreeSet<SelectionKey> = keys.into_iter().collect();
        if keys.is_empty() {
            return BatchReport::default();
        }

        let user_id = self.store.user_id();
        let service = self.store.service();
        let versions: Vec<(SelectionKey, u64)> = keys
            .into_iter()
            .map(|key| {
                let version = self.store.begin(MutationKind::Remove, &key);
                (key, version)
            })
            .collect();

        info!(count = versions.len(), "Dispatching batch removal");

        let results = join_all(versions.iter().map(|(key, _)| async move {
            confirm_delete(service.delete_selection(user_id, key).await)
        }))
        .await;

        let mut report = BatchReport::default();
        let mut commit = BTreeSet::new();
        for ((key, version), result) in versions.into_iter().zip(results) {
            let current = self.store.finish(&key, version);
            match result {
                Ok(()) => {
                    if current {
                        commit.insert(key.clone());
                    }
                    report.succeeded.insert(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Removal failed");
                    report.failed.push(BatchFailure {
                        status: e.status(),
                        message: e.to_string(),
                        key,
                    });
                }
            }
        }

        self.store.commit_removals(&commit);

        if report.is_complete() {
            info!(removed = report.succeeded.len(), "Batch removal complete");
        } else {
            warn!(summary = %report.summary(), "Batch removal partially failed");
        }

        report
    }
}
