//! Discovery of every selection a user holds.
//!
//! The fast path asks the service for all of a user's selections at once.
//! That endpoint is optional, so when it fails the directory walks the
//! datasets listing and asks for each dataset's selections in turn, strictly
//! one request at a time with a cooperative yield in between. A dataset that
//! fails on that walk is skipped; the result is then flagged as partial.

use crate::error::{Result, SyncError};
use crate::service::RemoteService;
use pulse_core::Selection;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which path produced a directory result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorySource {
    Primary,
    Fallback,
}

/// Selections discovered for one user.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryOutcome {
    /// Unordered; may contain duplicate keys.
    pub selections: Vec<Selection>,
    pub source: DirectorySource,
    /// Datasets whose scoped request failed on the fallback walk.
    pub skipped_datasets: Vec<String>,
    /// Set when some part of the fallback walk was lost.
    pub partial: bool,
}

/// Resolves a user's complete selection set.
#[derive(Clone)]
pub struct SelectionDirectory {
    service: Arc<dyn RemoteService>,
    dataset_page_size: usize,
}

impl SelectionDirectory {
    #[must_use]
    pub fn new(service: Arc<dyn RemoteService>, dataset_page_size: usize) -> Self {
        Self {
            service,
            dataset_page_size: dataset_page_size.max(1),
        }
    }

    /// Resolve every selection of `user_id`.
    ///
    /// # Errors
    /// Returns `SyncError::LoadFailed` when the fast path failed and the walk
    /// got nothing back: the datasets listing could not be read at all, or
    /// every dataset's scoped request failed.
    pub async fn resolve_all(&self, user_id: &str) -> Result<DirectoryOutcome> {
        let primary = match self.service.all_selections(user_id).await {
            Ok(selections) => {
                debug!(count = selections.len(), "Resolved selections via fast path");
                return Ok(DirectoryOutcome {
                    selections,
                    source: DirectorySource::Primary,
                    skipped_datasets: Vec::new(),
                    partial: false,
                });
            }
            Err(e) => e,
        };

        info!(error = %primary, "All-selections endpoint unavailable, walking datasets");

        self.fallback(user_id)
            .await
            .map_err(|fallback| SyncError::LoadFailed {
                primary: Box::new(primary),
                fallback: Box::new(fallback),
            })
    }

    async fn fallback(&self, user_id: &str) -> Result<DirectoryOutcome> {
        let (datasets, mut partial) = self.enumerate_datasets().await?;
        let mut selections = Vec::new();
        let mut skipped_datasets = Vec::new();
        let mut answered = 0;
        let mut last_error = None;

        for dataset_id in datasets {
            match self.service.scoped_selections(user_id, &dataset_id).await {
                Ok(scoped) => {
                    answered += 1;
                    selections.extend(
                        scoped
                            .into_iter()
                            .map(|s| s.into_selection(user_id, &dataset_id)),
                    );
                }
                Err(SyncError::UnexpectedShape(msg)) => {
                    answered += 1;
                    warn!(dataset_id = %dataset_id, reason = %msg, "Ignoring unrecognized selections response");
                }
                Err(e) => {
                    warn!(dataset_id = %dataset_id, error = %e, "Skipping dataset");
                    skipped_datasets.push(dataset_id);
                    last_error = Some(e);
                    partial = true;
                }
            }

            tokio::task::yield_now().await;
        }

        // Every dataset failed: an empty result would wipe the workspace.
        if let Some(e) = last_error.filter(|_| answered == 0) {
            return Err(e);
        }

        info!(
            count = selections.len(),
            skipped = skipped_datasets.len(),
            "Resolved selections via dataset walk"
        );

        Ok(DirectoryOutcome {
            selections,
            source: DirectorySource::Fallback,
            skipped_datasets,
            partial,
        })
    }

    /// Walk the paged datasets listing. Failing on the first page is fatal;
    /// failing later truncates the walk and marks the result partial.
    async fn enumerate_datasets(&self) -> Result<(Vec<String>, bool)> {
        let limit = self.dataset_page_size;
        let mut offset = 0;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut partial = false;

        loop {
            let page = match self.service.list_datasets(limit, offset).await {
                Ok(page) => page,
                Err(SyncError::UnexpectedShape(msg)) => {
                    warn!(offset, reason = %msg, "Ignoring unrecognized datasets page");
                    break;
                }
                Err(e) if offset == 0 => return Err(e),
                Err(e) => {
                    warn!(offset, error = %e, "Datasets listing failed mid-walk");
                    partial = true;
                    break;
                }
            };

            for dataset in &page.items {
                if seen.insert(dataset.id.clone()) {
                    ids.push(dataset.id.clone());
                }
            }

            offset += limit;
            if page.fetched < limit {
                break;
            }
            if page.reliable_total().is_some_and(|total| offset as u64 >= total) {
                break;
            }

            tokio::task::yield_now().await;
        }

        Ok((ids, partial))
    }
}
