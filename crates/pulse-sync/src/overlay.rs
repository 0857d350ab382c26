//! Custom per-dataset ordering, persisted locally and applied at read time.
//!
//! The overlay never touches the authoritative state: it only permutes the
//! blocks handed to [`ReorderOverlay::apply_order`]. A stored order is
//! reconciled with the currently resolved ids on every read (stale ids are
//! dropped, new ids are appended in natural order).

use crate::error::Result;
use parking_lot::Mutex;
use pulse_core::{Block, SelectionKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable, dataset-keyed slots holding an ordered list of question ids.
pub trait OrderStore: Send + Sync {
    /// Read a dataset's stored order, if any.
    ///
    /// # Errors
    /// Returns error if the backing storage cannot be read.
    fn load(&self, dataset_id: &str) -> Result<Option<Vec<String>>>;

    /// Replace a dataset's stored order.
    ///
    /// # Errors
    /// Returns error if the backing storage cannot be written.
    fn save(&self, dataset_id: &str, order: &[String]) -> Result<()>;

    /// Drop a dataset's stored order.
    ///
    /// # Errors
    /// Returns error if the backing storage cannot be written.
    fn clear(&self, dataset_id: &str) -> Result<()>;
}

/// All orders in one JSON file, `{dataset_id: [question_id, ...]}`. Last write wins.
#[derive(Debug)]
pub struct FileOrderStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileOrderStore {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Vec<String>>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, orders: &BTreeMap<String, Vec<String>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Readers never observe a partially written file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(orders)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl OrderStore for FileOrderStore {
    fn load(&self, dataset_id: &str) -> Result<Option<Vec<String>>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(dataset_id))
    }

    fn save(&self, dataset_id: &str, order: &[String]) -> Result<()> {
        let _guard = self.lock.lock();
        let mut orders = self.read_all()?;
        orders.insert(dataset_id.to_string(), order.to_vec());
        self.write_all(&orders)?;
        debug!(dataset_id = %dataset_id, len = order.len(), "Saved custom order");
        Ok(())
    }

    fn clear(&self, dataset_id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut orders = self.read_all()?;
        if orders.remove(dataset_id).is_some() {
            self.write_all(&orders)?;
        }
        Ok(())
    }
}

/// Process-local order store.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    slots: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryOrderStore {
    fn load(&self, dataset_id: &str) -> Result<Option<Vec<String>>> {
        Ok(self.slots.lock().get(dataset_id).cloned())
    }

    fn save(&self, dataset_id: &str, order: &[String]) -> Result<()> {
        self.slots
            .lock()
            .insert(dataset_id.to_string(), order.to_vec());
        Ok(())
    }

    fn clear(&self, dataset_id: &str) -> Result<()> {
        self.slots.lock().remove(dataset_id);
        Ok(())
    }
}

/// Where a dragged block lands relative to the drop target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropSide {
    Before,
    After,
}

impl DropSide {
    /// Pick the side from the release point: the first half of the target's
    /// extent means before, the second half means after.
    #[must_use]
    pub fn from_release_point(release: f64, target_start: f64, target_extent: f64) -> Self {
        if release < target_start + target_extent / 2.0 {
            Self::Before
        } else {
            Self::After
        }
    }
}

/// Display-layer ordering on top of the authoritative, lexicographic order.
pub struct ReorderOverlay {
    store: Box<dyn OrderStore>,
}

impl ReorderOverlay {
    #[must_use]
    pub fn new(store: Box<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Overlay backed by [`MemoryOrderStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryOrderStore::new()))
    }

    /// Reorder `natural` by the dataset's stored order, if there is one.
    ///
    /// An unreadable store degrades to the natural order.
    #[must_use]
    pub fn apply_order(&self, dataset_id: &str, natural: &[Block]) -> Vec<Block> {
        let natural_ids: Vec<String> = natural.iter().map(|b| b.question_id.clone()).collect();
        let order = self.current_order(dataset_id, &natural_ids);

        let mut by_id: HashMap<&str, &Block> = natural
            .iter()
            .map(|b| (b.question_id.as_str(), b))
            .collect();
        order
            .iter()
            .filter_map(|id| by_id.remove(id.as_str()))
            .cloned()
            .collect()
    }

    /// Move `moved` immediately before or after `target` and persist the result.
    ///
    /// `natural` is the dataset's current authoritative block sequence. Returns
    /// `Ok(false)` without writing anything when the move is a no-op: the two
    /// keys belong to different datasets, are the same key, or either is not
    /// part of the current order.
    ///
    /// # Errors
    /// Returns error if the new order cannot be persisted.
    pub fn record_move(
        &self,
        moved: &SelectionKey,
        target: &SelectionKey,
        side: DropSide,
        natural: &[Block],
    ) -> Result<bool> {
        if moved.dataset_id != target.dataset_id {
            debug!(moved = %moved, target = %target, "Rejecting cross-dataset move");
            return Ok(false);
        }
        if moved.question_id == target.question_id {
            return Ok(false);
        }

        let dataset_id = moved.dataset_id.as_str();
        let natural_ids: Vec<String> = natural
            .iter()
            .filter(|b| b.dataset_id == dataset_id)
            .map(|b| b.question_id.clone())
            .collect();
        let mut order = self.current_order(dataset_id, &natural_ids);

        let Some(from) = order.iter().position(|id| *id == moved.question_id) else {
            return Ok(false);
        };
        if !order.contains(&target.question_id) {
            return Ok(false);
        }

        let id = order.remove(from);
        let Some(target_at) = order.iter().position(|q| *q == target.question_id) else {
            return Ok(false);
        };
        let insert_at = match side {
            DropSide::Before => target_at,
            DropSide::After => target_at + 1,
        };
        order.insert(insert_at, id);

        self.store.save(dataset_id, &order)?;
        Ok(true)
    }

    /// Remove ids that are no longer selected from a dataset's stored order.
    /// An order that becomes empty is dropped entirely.
    ///
    /// # Errors
    /// Returns error if the store cannot be read or written.
    pub fn prune(&self, dataset_id: &str, removed: &HashSet<String>) -> Result<()> {
        let Some(mut order) = self.store.load(dataset_id)? else {
            return Ok(());
        };

        let before = order.len();
        order.retain(|id| !removed.contains(id));
        if order.len() == before {
            return Ok(());
        }

        if order.is_empty() {
            self.store.clear(dataset_id)
        } else {
            self.store.save(dataset_id, &order)
        }
    }

    /// Drop a dataset's stored order.
    ///
    /// # Errors
    /// Returns error if the store cannot be written.
    pub fn reset(&self, dataset_id: &str) -> Result<()> {
        self.store.clear(dataset_id)
    }

    /// Stored order intersected with `natural_ids`, followed by the natural ids
    /// the stored order does not mention.
    fn current_order(&self, dataset_id: &str, natural_ids: &[String]) -> Vec<String> {
        let stored = match self.store.load(dataset_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => return natural_ids.to_vec(),
            Err(e) => {
                warn!(dataset_id = %dataset_id, error = %e, "Custom order unreadable, using natural order");
                return natural_ids.to_vec();
            }
        };

        let present: HashSet<&str> = natural_ids.iter().map(String::as_str).collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(natural_ids.len());

        for id in &stored {
            if present.contains(id.as_str()) && placed.insert(id.as_str()) {
                order.push(id.clone());
            }
        }
        for id in natural_ids {
            if placed.insert(id.as_str()) {
                order.push(id.clone());
            }
        }
        order
    }
}
