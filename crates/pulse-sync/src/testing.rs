//! Scripted in-memory `RemoteService` for unit tests.

use crate::error::{Result, SyncError};
use crate::service::{BlockQuery, RemoteService};
use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{Block, DatasetSummary, Page, ScopedSelection, Selection, SelectionKey};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How the fast-path endpoint behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPath {
    Available,
    Status(u16),
    Unreachable,
}

/// How a datasets listing page fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFault {
    Unreachable,
    Malformed,
}

#[derive(Debug)]
struct Data {
    /// dataset id -> selected question ids (insertion order).
    selections: BTreeMap<String, Vec<String>>,
    /// dataset id -> every block in listing order.
    blocks: BTreeMap<String, Vec<Block>>,
}

#[derive(Debug)]
pub struct FakeService {
    data: Mutex<Data>,
    pub fast_path: Mutex<FastPath>,
    pub failing_scoped: Mutex<HashSet<String>>,
    pub failing_blocks: Mutex<HashSet<String>>,
    /// Datasets pages at or past this offset fail.
    pub datasets_fault: Mutex<Option<(usize, PageFault)>>,
    pub failing_deletes: Mutex<HashMap<SelectionKey, u16>>,
    pub failing_creates: Mutex<HashMap<SelectionKey, u16>>,
    pub omit_totals: Mutex<bool>,
    /// Delays applied to successive fast-path calls, front first.
    pub all_delays: Mutex<VecDeque<Duration>>,
    pub delete_delay: Mutex<Option<Duration>>,
    pub block_calls: AtomicUsize,
    pub scoped_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    in_flight_deletes: AtomicUsize,
    pub max_parallel_deletes: AtomicUsize,
}

pub const USER: &str = "tester";

impl FakeService {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Data {
                selections: BTreeMap::new(),
                blocks: BTreeMap::new(),
            }),
            fast_path: Mutex::new(FastPath::Available),
            failing_scoped: Mutex::new(HashSet::new()),
            failing_blocks: Mutex::new(HashSet::new()),
            datasets_fault: Mutex::new(None),
            failing_deletes: Mutex::new(HashMap::new()),
            failing_creates: Mutex::new(HashMap::new()),
            omit_totals: Mutex::new(false),
            all_delays: Mutex::new(VecDeque::new()),
            delete_delay: Mutex::new(None),
            block_calls: AtomicUsize::new(0),
            scoped_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            in_flight_deletes: AtomicUsize::new(0),
            max_parallel_deletes: AtomicUsize::new(0),
        }
    }

    /// Add `count` blocks `q0001..` to a dataset's listing.
    pub fn with_blocks(self, dataset_id: &str, count: usize) -> Self {
        {
            let mut data = self.data.lock();
            let list = data.blocks.entry(dataset_id.to_string()).or_default();
            for i in 1..=count {
                list.push(Block::new(dataset_id, format!("q{i:04}"), format!("Question {i}")));
            }
        }
        self
    }

    /// Add explicitly named blocks to a dataset's listing.
    pub fn with_named_blocks(self, dataset_id: &str, ids: &[&str]) -> Self {
        {
            let mut data = self.data.lock();
            let list = data.blocks.entry(dataset_id.to_string()).or_default();
            for id in ids {
                list.push(Block::new(dataset_id, *id, format!("Text of {id}")));
            }
        }
        self
    }

    pub fn with_selected(self, dataset_id: &str, ids: &[&str]) -> Self {
        self.select(dataset_id, ids);
        self
    }

    pub fn select(&self, dataset_id: &str, ids: &[&str]) {
        let mut data = self.data.lock();
        let list = data.selections.entry(dataset_id.to_string()).or_default();
        for id in ids {
            if !list.iter().any(|q| q == id) {
                list.push((*id).to_string());
            }
        }
    }

    pub fn is_selected(&self, key: &SelectionKey) -> bool {
        self.data
            .lock()
            .selections
            .get(&key.dataset_id)
            .is_some_and(|ids| ids.contains(&key.question_id))
    }

    fn snapshot_all(&self, user_id: &str) -> Vec<Selection> {
        let data = self.data.lock();
        data.selections
            .iter()
            .flat_map(|(ds, ids)| ids.iter().map(move |q| Selection::new(user_id, ds, q)))
            .collect()
    }

    fn total(&self, len: usize) -> Option<u64> {
        if *self.omit_totals.lock() {
            None
        } else {
            Some(len as u64)
        }
    }
}

#[async_trait]
impl RemoteService for FakeService {
    async fn all_selections(&self, user_id: &str) -> Result<Vec<Selection>> {
        let snapshot = self.snapshot_all(user_id);
        let delay = self.all_delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mode = *self.fast_path.lock();
        match mode {
            FastPath::Available => Ok(snapshot),
            FastPath::Status(status) => Err(SyncError::Http {
                status,
                body: "not here".to_string(),
            }),
            FastPath::Unreachable => Err(SyncError::Network("connection refused".to_string())),
        }
    }

    async fn scoped_selections(
        &self,
        _user_id: &str,
        dataset_id: &str,
    ) -> Result<Vec<ScopedSelection>> {
        self.scoped_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_scoped.lock().contains(dataset_id) {
            return Err(SyncError::Network("operation timed out".to_string()));
        }

        let data = self.data.lock();
        Ok(data
            .selections
            .get(dataset_id)
            .map(|ids| {
                ids.iter()
                    .map(|q| ScopedSelection {
                        question_id: q.clone(),
                        created_at: String::new(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_selection(&self, _user_id: &str, key: &SelectionKey) -> Result<()> {
        if let Some(status) = self.failing_creates.lock().get(key) {
            return Err(SyncError::Http {
                status: *status,
                body: "create failed".to_string(),
            });
        }
        self.select(&key.dataset_id, &[key.question_id.as_str()]);
        Ok(())
    }

    async fn delete_selection(&self, _user_id: &str, key: &SelectionKey) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight_deletes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel_deletes.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight_deletes.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failing_deletes.lock().get(key).copied();
        if let Some(status) = failure {
            return Err(SyncError::Http {
                status,
                body: "delete failed".to_string(),
            });
        }

        let mut data = self.data.lock();
        let existed = data.selections.get_mut(&key.dataset_id).is_some_and(|ids| {
            let before = ids.len();
            ids.retain(|q| q != &key.question_id);
            ids.len() != before
        });
        if existed {
            Ok(())
        } else {
            Err(SyncError::Http {
                status: 404,
                body: "no such selection".to_string(),
            })
        }
    }

    async fn list_datasets(&self, limit: usize, offset: usize) -> Result<Page<DatasetSummary>> {
        let fault = *self.datasets_fault.lock();
        match fault {
            Some((from, PageFault::Unreachable)) if offset >= from => {
                return Err(SyncError::Network("connection reset".to_string()));
            }
            Some((from, PageFault::Malformed)) if offset >= from => {
                return Err(SyncError::UnexpectedShape("expected items".to_string()));
            }
            _ => {}
        }

        let data = self.data.lock();
        let ids: Vec<&String> = data.selections.keys().chain(data.blocks.keys()).collect();
        let mut unique: Vec<&String> = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let items = unique
            .iter()
            .skip(offset)
            .take(limit)
            .map(|id| DatasetSummary::new(id.as_str()))
            .collect();
        Ok(Page::new(self.total(unique.len()), items))
    }

    async fn list_blocks(&self, query: &BlockQuery) -> Result<Page<Block>> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let failing = query
            .dataset_id
            .as_ref()
            .is_some_and(|id| self.failing_blocks.lock().contains(id));
        if failing {
            return Err(SyncError::Http {
                status: 500,
                body: "listing failed".to_string(),
            });
        }

        let data = self.data.lock();
        let search = query.search.as_deref().map(str::to_lowercase);
        let all: Vec<&Block> = data
            .blocks
            .iter()
            .filter(|(ds, _)| query.dataset_id.as_ref().is_none_or(|id| id == *ds))
            .flat_map(|(_, blocks)| blocks)
            .filter(|b| {
                search
                    .as_ref()
                    .is_none_or(|needle| b.question_text.to_lowercase().contains(needle))
            })
            .collect();
        let items = all
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|b| (*b).clone())
            .collect();
        Ok(Page::new(self.total(all.len()), items))
    }
}
