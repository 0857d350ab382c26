//! Resolution of selection references into content blocks.

use crate::error::{Result, SyncError};
use crate::service::{BlockQuery, RemoteService};
use pulse_core::Block;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Blocks found for one dataset.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// question id -> block. Ids that were needed but are absent were not found.
    pub blocks: HashMap<String, Block>,
    pub pages_fetched: usize,
}

impl Resolution {
    /// The resolved blocks ordered by question id.
    #[must_use]
    pub fn into_sorted(self) -> Vec<Block> {
        let mut blocks: Vec<Block> = self.blocks.into_values().collect();
        blocks.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        blocks
    }
}

/// Pages through a dataset's block listing looking for specific ids.
#[derive(Clone)]
pub struct BlockResolver {
    service: Arc<dyn RemoteService>,
    page_size: usize,
}

impl BlockResolver {
    #[must_use]
    pub fn new(service: Arc<dyn RemoteService>, page_size: usize) -> Self {
        Self {
            service,
            page_size: page_size.max(1),
        }
    }

    /// Find the blocks of `dataset_id` whose question ids are in `needed`.
    ///
    /// Walks the listing from offset 0 and stops as soon as every id is found,
    /// the offset reaches the declared total, or (when the total is missing or
    /// zero) a page comes back short.
    ///
    /// # Errors
    /// Returns the first transport or HTTP error. An unrecognized page shape
    /// ends the walk with whatever was found so far.
    pub async fn resolve(&self, dataset_id: &str, needed: &BTreeSet<String>) -> Result<Resolution> {
        let mut remaining = needed.clone();
        let mut resolution = Resolution::default();
        let mut offset = 0;

        while !remaining.is_empty() {
            let query = BlockQuery::dataset(dataset_id, self.page_size).at_offset(offset);
            let page = match self.service.list_blocks(&query).await {
                Ok(page) => page,
                Err(SyncError::UnexpectedShape(msg)) => {
                    warn!(dataset_id = %dataset_id, offset, reason = %msg, "Ignoring unrecognized blocks page");
                    break;
                }
                Err(e) => return Err(e),
            };
            resolution.pages_fetched += 1;
            let fetched = page.fetched;
            let total = page.reliable_total();

            for block in page.items {
                if block.dataset_id != dataset_id {
                    continue;
                }
                if remaining.remove(&block.question_id) {
                    resolution.blocks.insert(block.question_id.clone(), block);
                }
            }

            offset += self.page_size;
            if fetched < self.page_size {
                break;
            }
            if total.is_some_and(|total| offset as u64 >= total) {
                break;
            }

            tokio::task::yield_now().await;
        }

        debug!(
            dataset_id = %dataset_id,
            found = resolution.blocks.len(),
            missing = remaining.len(),
            pages = resolution.pages_fetched,
            "Resolved blocks"
        );

        Ok(resolution)
    }
}
