//! Authoritative workspace state and the operations that change it.
//!
//! State only ever changes in response to a confirmed outcome: a completed
//! load whose generation is still current, or a mutation the service
//! acknowledged. Nothing here is optimistic. Presentation layers that want to
//! show in-flight work read [`WorkspaceStore::in_flight`] instead.

use crate::config::SyncConfig;
use crate::coordinator::{BatchReport, MutationCoordinator};
use crate::directory::{DirectorySource, SelectionDirectory};
use crate::error::Result;
use crate::overlay::{DropSide, FileOrderStore, ReorderOverlay};
use crate::resolver::BlockResolver;
use crate::service::{BlockQuery, HttpService, RemoteService};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pulse_core::{Block, MutationKind, PendingMutation, Selection, SelectionKey};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Selections plus the blocks resolved for them, per dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkspaceState {
    pub selections: Vec<Selection>,

    /// dataset id -> resolved blocks ordered by question id. Datasets with no
    /// resolved block have no entry.
    pub blocks_by_dataset: BTreeMap<String, Vec<Block>>,
}

impl WorkspaceState {
    #[must_use]
    pub fn contains(&self, key: &SelectionKey) -> bool {
        self.selections.iter().any(|s| s.matches(key))
    }

    #[must_use]
    pub fn block(&self, key: &SelectionKey) -> Option<&Block> {
        self.blocks_by_dataset
            .get(&key.dataset_id)?
            .iter()
            .find(|b| b.question_id == key.question_id)
    }

    /// Every selection key, deduplicated.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<SelectionKey> {
        self.selections.iter().map(Selection::key).collect()
    }

    /// Selections whose block has not been resolved.
    #[must_use]
    pub fn pending(&self) -> Vec<SelectionKey> {
        self.keys()
            .into_iter()
            .filter(|key| self.block(key).is_none())
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> WorkspaceSummary {
        let keys = self.keys();
        let datasets: BTreeSet<&str> = keys.iter().map(|k| k.dataset_id.as_str()).collect();
        let resolved = self.blocks_by_dataset.values().map(Vec::len).sum();
        WorkspaceSummary {
            selected: keys.len(),
            datasets: datasets.len(),
            resolved,
            pending: keys.len().saturating_sub(resolved),
        }
    }

    fn insert_selection(&mut self, selection: Selection) -> bool {
        if self.contains(&selection.key()) {
            return false;
        }
        self.selections.push(selection);
        true
    }

    /// Insert a block for a live selection, keeping question-id order.
    fn insert_block(&mut self, block: Block) -> bool {
        let key = SelectionKey::new(&block.dataset_id, &block.question_id);
        if !self.contains(&key) {
            return false;
        }

        let list = self
            .blocks_by_dataset
            .entry(block.dataset_id.clone())
            .or_default();
        match list.binary_search_by(|b| b.question_id.cmp(&block.question_id)) {
            Ok(at) => list[at] = block,
            Err(at) => list.insert(at, block),
        }
        true
    }

    /// Remove selections and, as a consequence, their blocks. Datasets left
    /// without blocks are dropped. Returns removed question ids per dataset.
    fn remove(&mut self, keys: &BTreeSet<SelectionKey>) -> BTreeMap<String, HashSet<String>> {
        let mut removed: BTreeMap<String, HashSet<String>> = BTreeMap::new();

        self.selections.retain(|s| {
            let key = s.key();
            if keys.contains(&key) {
                removed
                    .entry(key.dataset_id)
                    .or_default()
                    .insert(key.question_id);
                false
            } else {
                true
            }
        });

        for (dataset_id, ids) in &removed {
            if let Some(list) = self.blocks_by_dataset.get_mut(dataset_id) {
                list.retain(|b| !ids.contains(&b.question_id));
                if list.is_empty() {
                    self.blocks_by_dataset.remove(dataset_id);
                }
            }
        }

        removed
    }
}

/// Counts for a one-line workspace description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkspaceSummary {
    pub selected: usize,
    /// Datasets holding at least one selection.
    pub datasets: usize,
    pub resolved: usize,
    pub pending: usize,
}

impl WorkspaceSummary {
    /// Selections exist but none of them resolved to a block.
    #[must_use]
    pub const fn blocks_missing(&self) -> bool {
        self.selected > 0 && self.resolved == 0
    }
}

impl fmt::Display for WorkspaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} item(s) selected across {} dataset(s)",
            self.selected, self.datasets
        )?;
        if self.blocks_missing() {
            write!(f, "; selections exist but their blocks weren't found")?;
        } else if self.pending > 0 {
            write!(f, " ({} pending)", self.pending)?;
        }
        Ok(())
    }
}

/// One dataset's blocks in display order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceView {
    pub dataset_id: String,
    pub blocks: Vec<Block>,
}

/// A listed block, marked when the user has selected it.
#[derive(Debug, Clone, Serialize)]
pub struct BrowseEntry {
    pub selected: bool,
    #[serde(flatten)]
    pub block: Block,
}

/// One page of the content blocks listing.
#[derive(Debug, Clone, Serialize)]
pub struct BrowsePage {
    /// `None` for the listing across every dataset.
    pub dataset_id: Option<String>,
    pub search: Option<String>,
    pub offset: usize,
    pub limit: usize,
    pub total: Option<u64>,
    pub entries: Vec<BrowseEntry>,
}

impl BrowsePage {
    /// Whether a page follows this one.
    #[must_use]
    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => ((self.offset + self.limit) as u64) < total,
            None => self.entries.len() >= self.limit,
        }
    }
}

/// What a completed load found.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub generation: u64,
    pub source: DirectorySource,
    /// Some datasets could not be enumerated or queried.
    pub partial: bool,
    pub skipped_datasets: Vec<String>,
    /// Datasets whose block listing failed; their selections stay pending.
    pub unresolved_datasets: Vec<String>,
    pub summary: WorkspaceSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// The load was current when it finished and replaced the state.
    Applied(LoadReport),
    /// A newer load started meanwhile; these results were discarded.
    Superseded { generation: u64 },
}

/// Result of a confirmed single-key mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    /// The service confirmed the request and the state was updated.
    Applied,
    /// The service confirmed the request, but a newer request for the same
    /// key was issued meanwhile; the newer one decides the state.
    Superseded,
}

/// Owns the authoritative workspace state for one user.
pub struct WorkspaceStore {
    config: SyncConfig,
    service: Arc<dyn RemoteService>,
    directory: SelectionDirectory,
    resolver: BlockResolver,
    overlay: ReorderOverlay,
    state: RwLock<WorkspaceState>,
    generation: AtomicU64,
    in_flight: Mutex<HashMap<SelectionKey, PendingMutation>>,
    next_version: AtomicU64,
    /// Removals confirmed since the last applied load, tagged with the load
    /// generation current at commit time. Lock only while holding `state`.
    confirmed_removals: Mutex<HashMap<SelectionKey, u64>>,
}

impl WorkspaceStore {
    /// Create a store over an arbitrary service.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new(
        config: SyncConfig,
        service: Arc<dyn RemoteService>,
        overlay: ReorderOverlay,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            directory: SelectionDirectory::new(service.clone(), config.dataset_page_size),
            resolver: BlockResolver::new(service.clone(), config.block_page_size),
            config,
            service,
            overlay,
            state: RwLock::new(WorkspaceState::default()),
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(0),
            confirmed_removals: Mutex::new(HashMap::new()),
        })
    }

    /// Create a store talking HTTP to `config.base_url`, persisting custom
    /// orders to `config.order_store` (in memory when unset).
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the client cannot be built.
    pub fn connect(config: SyncConfig) -> Result<Self> {
        let service = Arc::new(HttpService::new(&config)?);
        let overlay = config.order_store.as_ref().map_or_else(ReorderOverlay::in_memory, |path| {
            ReorderOverlay::new(Box::new(FileOrderStore::new(path)))
        });
        Self::new(config, service, overlay)
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    /// Generation of the most recently started load.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// A copy of the current authoritative state.
    #[must_use]
    pub fn snapshot(&self) -> WorkspaceState {
        self.state.read().clone()
    }

    #[must_use]
    pub fn summary(&self) -> WorkspaceSummary {
        self.state.read().summary()
    }

    /// Mutations dispatched but not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> Vec<PendingMutation> {
        let mut pending: Vec<PendingMutation> = self.in_flight.lock().values().cloned().collect();
        pending.sort_by(|a, b| a.key.cmp(&b.key));
        pending
    }

    /// Load every selection and its block, replacing the state wholesale.
    ///
    /// Each call takes a new generation. If another load starts before this
    /// one finishes, this one's results are discarded and
    /// [`LoadOutcome::Superseded`] is returned.
    ///
    /// # Errors
    /// Returns `SyncError::LoadFailed` when neither selection path worked. The
    /// previous state is kept and the call can simply be retried.
    pub async fn load(&self) -> Result<LoadOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, user_id = %self.config.user_id, "Loading workspace");

        let directory = self.directory.resolve_all(&self.config.user_id).await?;

        let mut selections = Vec::with_capacity(directory.selections.len());
        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for selection in directory.selections {
            if seen.insert(selection.key()) {
                grouped
                    .entry(selection.dataset_id.clone())
                    .or_default()
                    .insert(selection.question_id.clone());
                selections.push(selection);
            }
        }

        let mut blocks_by_dataset = BTreeMap::new();
        let mut unresolved_datasets = Vec::new();
        for (dataset_id, needed) in grouped {
            if self.is_stale(generation) {
                return Ok(self.superseded(generation));
            }

            match self.resolver.resolve(&dataset_id, &needed).await {
                Ok(resolution) => {
                    let blocks = resolution.into_sorted();
                    if !blocks.is_empty() {
                        blocks_by_dataset.insert(dataset_id, blocks);
                    }
                }
                Err(e) => {
                    warn!(dataset_id = %dataset_id, error = %e, "Block resolution failed, selections stay pending");
                    unresolved_datasets.push(dataset_id);
                }
            }
        }

        let mut state = self.state.write();
        if self.is_stale(generation) {
            return Ok(self.superseded(generation));
        }
        let mut loaded = WorkspaceState {
            selections,
            blocks_by_dataset,
        };

        // Removals confirmed after this load started are newer than what it read.
        let mut confirmed_removals = self.confirmed_removals.lock();
        let removed_meanwhile: BTreeSet<SelectionKey> = confirmed_removals
            .iter()
            .filter(|&(_, &tagged)| tagged >= generation)
            .map(|(key, _)| key.clone())
            .collect();
        confirmed_removals.clear();
        drop(confirmed_removals);
        if !removed_meanwhile.is_empty() {
            debug!(generation, count = removed_meanwhile.len(), "Dropping selections removed during load");
            loaded.remove(&removed_meanwhile);
        }

        *state = loaded;
        let summary = state.summary();
        drop(state);

        info!(
            generation,
            selected = summary.selected,
            datasets = summary.datasets,
            pending = summary.pending,
            "Workspace loaded"
        );

        Ok(LoadOutcome::Applied(LoadReport {
            generation,
            source: directory.source,
            partial: directory.partial,
            skipped_datasets: directory.skipped_datasets,
            unresolved_datasets,
            summary,
        }))
    }

    /// Select an item. The state changes only after the service confirms;
    /// the new selection's block is then resolved (it stays pending if that fails).
    ///
    /// # Errors
    /// Returns the service error (status and body for HTTP failures); the
    /// state is untouched in that case.
    pub async fn add_selection(
        &self,
        dataset_id: &str,
        question_id: &str,
    ) -> Result<MutationOutcome> {
        let key = SelectionKey::new(dataset_id.trim(), question_id.trim());
        let version = self.begin(MutationKind::Add, &key);
        let result = self.service.create_selection(&self.config.user_id, &key).await;
        let current = self.finish(&key, version);

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Add failed");
            return Err(e);
        }
        if !current {
            debug!(key = %key, "Add confirmed but superseded");
            return Ok(MutationOutcome::Superseded);
        }

        let selection = Selection::new(&self.config.user_id, &key.dataset_id, &key.question_id)
            .with_created_at(Utc::now().to_rfc3339());
        {
            let mut state = self.state.write();
            state.insert_selection(selection);
            self.confirmed_removals.lock().remove(&key);
        }
        info!(key = %key, "Added selection");

        let needed = BTreeSet::from([key.question_id.clone()]);
        match self.resolver.resolve(&key.dataset_id, &needed).await {
            Ok(mut resolution) => match resolution.blocks.remove(&key.question_id) {
                Some(block) => {
                    self.state.write().insert_block(block);
                }
                None => debug!(key = %key, "Block not found, selection stays pending"),
            },
            Err(e) => warn!(key = %key, error = %e, "Block resolution failed, selection stays pending"),
        }

        Ok(MutationOutcome::Applied)
    }

    /// Deselect an item. On confirmation the selection and its block are
    /// removed and the id is pruned from the dataset's custom order.
    ///
    /// # Errors
    /// Returns the service error; the state is untouched in that case.
    pub async fn remove_selection(
        &self,
        dataset_id: &str,
        question_id: &str,
    ) -> Result<MutationOutcome> {
        let key = SelectionKey::new(dataset_id.trim(), question_id.trim());
        let version = self.begin(MutationKind::Remove, &key);
        let result = confirm_delete(
            self.service.delete_selection(&self.config.user_id, &key).await,
        );
        let current = self.finish(&key, version);

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Remove failed");
            return Err(e);
        }
        if !current {
            debug!(key = %key, "Remove confirmed but superseded");
            return Ok(MutationOutcome::Superseded);
        }

        self.commit_removals(&BTreeSet::from([key.clone()]));
        info!(key = %key, "Removed selection");
        Ok(MutationOutcome::Applied)
    }

    /// Remove several selections concurrently, committing whatever succeeds.
    pub async fn remove_many(&self, keys: impl IntoIterator<Item = SelectionKey>) -> BatchReport {
        MutationCoordinator::new(self).batch_remove(keys).await
    }

    /// Remove every selection currently in the workspace.
    pub async fn clear_all(&self) -> BatchReport {
        let keys = self.state.read().keys();
        self.remove_many(keys).await
    }

    /// One page of the block listing with each block marked when selected.
    ///
    /// For a single dataset the marks come from the service's scoped
    /// selections; across datasets they come from the current state, so load
    /// first. Browsing never changes the state.
    ///
    /// # Errors
    /// Returns the service error of either request.
    pub async fn browse(&self, query: &BlockQuery) -> Result<BrowsePage> {
        let page = self.service.list_blocks(query).await?;

        let selected: HashSet<SelectionKey> = match &query.dataset_id {
            Some(dataset_id) => self
                .service
                .scoped_selections(&self.config.user_id, dataset_id)
                .await?
                .into_iter()
                .map(|s| SelectionKey::new(dataset_id, s.question_id))
                .collect(),
            None => self.state.read().keys().into_iter().collect(),
        };

        let total = page.reliable_total();
        let entries = page
            .items
            .into_iter()
            .map(|block| BrowseEntry {
                selected: selected.contains(&SelectionKey::new(&block.dataset_id, &block.question_id)),
                block,
            })
            .collect();

        Ok(BrowsePage {
            dataset_id: query.dataset_id.clone(),
            search: query.search.clone(),
            offset: query.offset,
            limit: query.limit,
            total,
            entries,
        })
    }

    /// One dataset's blocks in display order.
    #[must_use]
    pub fn view(&self, dataset_id: &str) -> Vec<Block> {
        let natural = self
            .state
            .read()
            .blocks_by_dataset
            .get(dataset_id)
            .cloned()
            .unwrap_or_default();
        self.overlay.apply_order(dataset_id, &natural)
    }

    /// Every dataset with resolved blocks, ordered by dataset id, with each
    /// dataset's blocks in display order.
    #[must_use]
    pub fn views(&self) -> Vec<WorkspaceView> {
        let datasets: Vec<(String, Vec<Block>)> = self
            .state
            .read()
            .blocks_by_dataset
            .iter()
            .map(|(id, blocks)| (id.clone(), blocks.clone()))
            .collect();

        datasets
            .into_iter()
            .map(|(dataset_id, natural)| WorkspaceView {
                blocks: self.overlay.apply_order(&dataset_id, &natural),
                dataset_id,
            })
            .collect()
    }

    /// Move a block before or after another block of the same dataset in
    /// the custom order. Returns `false` for rejected (no-op) moves.
    ///
    /// # Errors
    /// Returns error if the new order cannot be persisted.
    pub fn move_block(
        &self,
        moved: &SelectionKey,
        target: &SelectionKey,
        side: DropSide,
    ) -> Result<bool> {
        let natural = self
            .state
            .read()
            .blocks_by_dataset
            .get(&moved.dataset_id)
            .cloned()
            .unwrap_or_default();
        self.overlay.record_move(moved, target, side, &natural)
    }

    /// Forget a dataset's custom order.
    ///
    /// # Errors
    /// Returns error if the order store cannot be written.
    pub fn reset_order(&self, dataset_id: &str) -> Result<()> {
        self.overlay.reset(dataset_id)
    }

    pub(crate) fn service(&self) -> &Arc<dyn RemoteService> {
        &self.service
    }

    /// Register an in-flight mutation and return its version.
    pub(crate) fn begin(&self, operation: MutationKind, key: &SelectionKey) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight
            .lock()
            .insert(key.clone(), PendingMutation::new(operation, key.clone(), version));
        version
    }

    /// Settle an in-flight mutation. Returns whether it was still the newest
    /// request for its key (and may therefore apply its outcome).
    pub(crate) fn finish(&self, key: &SelectionKey, version: u64) -> bool {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(key) {
            Some(pending) if pending.version == version => {
                in_flight.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Apply confirmed removals to the state and prune custom orders.
    pub(crate) fn commit_removals(&self, keys: &BTreeSet<SelectionKey>) {
        if keys.is_empty() {
            return;
        }

        let removed = {
            let mut state = self.state.write();
            let generation = self.generation();
            self.confirmed_removals
                .lock()
                .extend(keys.iter().map(|key| (key.clone(), generation)));
            state.remove(keys)
        };
        for (dataset_id, ids) in &removed {
            if let Err(e) = self.overlay.prune(dataset_id, ids) {
                warn!(dataset_id = %dataset_id, error = %e, "Failed to prune custom order");
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn superseded(&self, generation: u64) -> LoadOutcome {
        debug!(
            generation,
            current = self.generation(),
            "Discarding superseded load"
        );
        LoadOutcome::Superseded { generation }
    }
}

/// Deleting a selection that does not exist is treated as success.
pub(crate) fn confirm_delete(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("Selection already absent");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::testing::{FakeService, FastPath, USER};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn store_with(fake: &Arc<FakeService>) -> WorkspaceStore {
        let config = SyncConfig::new("http://unused.test", USER);
        WorkspaceStore::new(config, fake.clone(), ReorderOverlay::in_memory()).unwrap()
    }

    fn ids(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.question_id.as_str()).collect()
    }

    fn applied(outcome: LoadOutcome) -> LoadReport {
        match outcome {
            LoadOutcome::Applied(report) => report,
            LoadOutcome::Superseded { generation } => panic!("load {generation} was superseded"),
        }
    }

    struct Down;
    #[async_trait::async_trait]
    impl RemoteService for Down {
        async fn all_selections(&self, _: &str) -> Result<Vec<Selection>> {
            Err(SyncError::Network("down".into()))
        }
        async fn scoped_selections(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Vec<pulse_core::ScopedSelection>> {
            Err(SyncError::Network("down".into()))
        }
        async fn create_selection(&self, _: &str, _: &SelectionKey) -> Result<()> {
            Err(SyncError::Network("down".into()))
        }
        async fn delete_selection(&self, _: &str, _: &SelectionKey) -> Result<()> {
            Err(SyncError::Network("down".into()))
        }
        async fn list_datasets(
            &self,
            _: usize,
            _: usize,
        ) -> Result<pulse_core::Page<pulse_core::DatasetSummary>> {
            Err(SyncError::Network("down".into()))
        }
        async fn list_blocks(
            &self,
            _: &crate::service::BlockQuery,
        ) -> Result<pulse_core::Page<Block>> {
            Err(SyncError::Network("down".into()))
        }
    }

    fn assert_no_orphans(state: &WorkspaceState) {
        for (dataset_id, blocks) in &state.blocks_by_dataset {
            for block in blocks {
                assert!(
                    state.contains(&SelectionKey::new(dataset_id, &block.question_id)),
                    "orphaned block {dataset_id}:{}",
                    block.question_id
                );
            }
        }
    }

    #[tokio::test]
    async fn test_load_single_page_dataset() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q3", "q2", "q1", "q4"])
                .with_selected("ds1", &["q2", "q3", "q1"]),
        );
        let store = store_with(&fake);

        let report = applied(store.load().await.unwrap());
        assert_eq!(report.generation, 1);
        assert_eq!(report.source, DirectorySource::Primary);

        let state = store.snapshot();
        assert_eq!(ids(&state.blocks_by_dataset["ds1"]), vec!["q1", "q2", "q3"]);
        assert_no_orphans(&state);
    }

    #[tokio::test]
    async fn test_unresolvable_selection_stays_pending() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_selected("ds1", &["q1", "ghost"])
                .with_selected("ds2", &["q5"]),
        );
        let store = store_with(&fake);

        let report = applied(store.load().await.unwrap());
        assert_eq!(report.summary.selected, 3);
        assert_eq!(report.summary.pending, 2);
        assert_eq!(
            store.snapshot().pending(),
            vec![SelectionKey::new("ds1", "ghost"), SelectionKey::new("ds2", "q5")]
        );
        assert!(!store.snapshot().blocks_by_dataset.contains_key("ds2"));
    }

    #[test]
    fn test_summary_line() {
        let mut state = WorkspaceState::default();
        assert_eq!(
            state.summary().to_string(),
            "0 item(s) selected across 0 dataset(s)"
        );

        state.insert_selection(Selection::new(USER, "ds1", "q1"));
        state.insert_selection(Selection::new(USER, "ds2", "q1"));
        assert_eq!(
            state.summary().to_string(),
            "2 item(s) selected across 2 dataset(s); selections exist but their blocks weren't found"
        );

        state.insert_block(Block::new("ds1", "q1", "Text"));
        state.insert_block(Block::new("ds9", "q1", "No selection"));
        assert_eq!(
            state.summary().to_string(),
            "2 item(s) selected across 2 dataset(s) (1 pending)"
        );
    }

    #[tokio::test]
    async fn test_failed_block_listing_marks_dataset_unresolved() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_named_blocks("ds2", &["q1"])
                .with_selected("ds1", &["q1"])
                .with_selected("ds2", &["q1"]),
        );
        fake.failing_blocks.lock().insert("ds2".to_string());
        let store = store_with(&fake);

        let report = applied(store.load().await.unwrap());
        assert_eq!(report.unresolved_datasets, vec!["ds2".to_string()]);
        assert_eq!(store.snapshot().pending(), vec![SelectionKey::new("ds2", "q1")]);
        assert_eq!(ids(&store.view("ds1")), vec!["q1"]);
    }

    #[tokio::test]
    async fn test_stale_load_is_discarded() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1", "q2"])
                .with_selected("ds1", &["q1"]),
        );
        fake.all_delays
            .lock()
            .extend([Duration::from_millis(100), Duration::ZERO]);
        let store = store_with(&fake);

        let slow = store.load();
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fake.select("ds1", &["q2"]);
            store.load().await
        };
        let (slow, fast) = tokio::join!(slow, fast);

        assert!(matches!(
            slow.unwrap(),
            LoadOutcome::Superseded { generation: 1 }
        ));
        assert_eq!(applied(fast.unwrap()).generation, 2);
        assert_eq!(ids(&store.view("ds1")), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_state_and_can_be_retried() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_named_blocks("ds2", &["q7"])
                .with_selected("ds1", &["q1"])
                .with_selected("ds2", &["q7"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        let down = WorkspaceStore::new(
            SyncConfig::new("http://unused.test", USER),
            Arc::new(Down),
            ReorderOverlay::in_memory(),
        )
        .unwrap();
        let err = down.load().await.unwrap_err();
        assert!(matches!(err, SyncError::LoadFailed { .. }));
        assert_eq!(down.summary().selected, 0);

        // Fast path gone and every dataset failing: nothing usable came back.
        *fake.fast_path.lock() = FastPath::Unreachable;
        fake.failing_scoped
            .lock()
            .extend(["ds1".to_string(), "ds2".to_string()]);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::LoadFailed { .. }));
        assert_eq!(store.summary().selected, 2);
        assert_eq!(ids(&store.view("ds1")), vec!["q1"]);

        // One answering dataset gives a partial result that replaces the state.
        fake.failing_scoped.lock().remove("ds2");
        let report = applied(store.load().await.unwrap());
        assert!(report.partial);
        assert_eq!(report.source, DirectorySource::Fallback);
        assert_eq!(report.skipped_datasets, vec!["ds1".to_string()]);
        assert_eq!(report.summary.selected, 1);

        fake.failing_scoped.lock().clear();
        applied(store.load().await.unwrap());
        assert_eq!(ids(&store.view("ds1")), vec!["q1"]);
        assert_eq!(store.summary().selected, 2);
    }

    #[tokio::test]
    async fn test_load_in_flight_does_not_restore_confirmed_removal() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1", "q2"])
                .with_selected("ds1", &["q1", "q2"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        fake.all_delays.lock().push_back(Duration::from_millis(100));
        let reload = store.load();
        let remove = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.remove_many([SelectionKey::new("ds1", "q1")]).await
        };
        let (reload, report) = tokio::join!(reload, remove);

        assert!(report.is_complete());
        applied(reload.unwrap());
        assert!(!fake.is_selected(&SelectionKey::new("ds1", "q1")));
        assert_eq!(ids(&store.view("ds1")), vec!["q2"]);
        assert!(!store.snapshot().contains(&SelectionKey::new("ds1", "q1")));

        // Once a load has applied, the next one trusts the server again.
        fake.select("ds1", &["q1"]);
        applied(store.load().await.unwrap());
        assert_eq!(ids(&store.view("ds1")), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn test_readd_during_load_is_not_hidden() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1", "q2"])
                .with_selected("ds1", &["q1", "q2"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        fake.all_delays.lock().push_back(Duration::from_millis(100));
        let reload = store.load();
        let toggle = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.remove_selection("ds1", "q1").await.unwrap();
            store.add_selection("ds1", "q1").await.unwrap();
        };
        let (reload, ()) = tokio::join!(reload, toggle);

        applied(reload.unwrap());
        assert_eq!(ids(&store.view("ds1")), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn test_add_selection_resolves_block() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1", "q2"])
                .with_selected("ds1", &["q1"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        let outcome = store.add_selection("ds1", " q2 ").await.unwrap();
        assert_eq!(outcome, MutationOutcome::Applied);
        assert!(fake.is_selected(&SelectionKey::new("ds1", "q2")));
        assert_eq!(ids(&store.view("ds1")), vec!["q1", "q2"]);
        assert!(store.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_add_of_unknown_block_is_pending() {
        let fake = Arc::new(FakeService::new().with_named_blocks("ds1", &["q1"]));
        let store = store_with(&fake);

        store.add_selection("ds1", "q404").await.unwrap();
        let state = store.snapshot();
        assert!(state.contains(&SelectionKey::new("ds1", "q404")));
        assert_eq!(state.pending(), vec![SelectionKey::new("ds1", "q404")]);
        assert!(state.blocks_by_dataset.is_empty());
    }

    #[tokio::test]
    async fn test_failed_add_leaves_state_untouched() {
        let fake = Arc::new(FakeService::new().with_named_blocks("ds1", &["q1"]));
        fake.failing_creates
            .lock()
            .insert(SelectionKey::new("ds1", "q1"), 422);
        let store = store_with(&fake);

        let err = store.add_selection("ds1", "q1").await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert!(err.to_string().contains("create failed"));
        assert_eq!(store.summary().selected, 0);
        assert!(store.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_remove_selection_drops_block_and_empty_dataset() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1", "q2"])
                .with_named_blocks("ds2", &["q9"])
                .with_selected("ds1", &["q1", "q2"])
                .with_selected("ds2", &["q9"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        store.remove_selection("ds1", "q1").await.unwrap();
        assert_eq!(ids(&store.view("ds1")), vec!["q2"]);

        store.remove_selection("ds2", "q9").await.unwrap();
        let state = store.snapshot();
        assert!(!state.blocks_by_dataset.contains_key("ds2"));
        assert!(!state.contains(&SelectionKey::new("ds2", "q9")));
        assert_no_orphans(&state);
    }

    #[tokio::test]
    async fn test_remove_of_missing_selection_is_idempotent() {
        let fake = Arc::new(FakeService::new());
        let store = store_with(&fake);

        let outcome = store.remove_selection("ds1", "never").await.unwrap();
        assert_eq!(outcome, MutationOutcome::Applied);
    }

    #[tokio::test]
    async fn test_failed_remove_leaves_state_untouched() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_selected("ds1", &["q1"]),
        );
        fake.failing_deletes
            .lock()
            .insert(SelectionKey::new("ds1", "q1"), 500);
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        let err = store.remove_selection("ds1", "q1").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(ids(&store.view("ds1")), vec!["q1"]);
    }

    #[tokio::test]
    async fn test_newer_request_for_same_key_wins() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_selected("ds1", &["q1"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());
        *fake.delete_delay.lock() = Some(Duration::from_millis(50));

        let remove = store.remove_selection("ds1", "q1");
        let add = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            store.add_selection("ds1", "q1").await
        };
        let (remove, add) = tokio::join!(remove, add);

        assert_eq!(remove.unwrap(), MutationOutcome::Superseded);
        assert_eq!(add.unwrap(), MutationOutcome::Applied);
        assert_eq!(ids(&store.view("ds1")), vec!["q1"]);
    }

    #[tokio::test]
    async fn test_custom_order_survives_reload_and_is_pruned() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1", "q2", "q3", "q4"])
                .with_selected("ds1", &["q1", "q2", "q3"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        let moved = store
            .move_block(
                &SelectionKey::new("ds1", "q3"),
                &SelectionKey::new("ds1", "q1"),
                DropSide::Before,
            )
            .unwrap();
        assert!(moved);
        assert_eq!(ids(&store.view("ds1")), vec!["q3", "q1", "q2"]);

        fake.select("ds1", &["q4"]);
        applied(store.load().await.unwrap());
        assert_eq!(ids(&store.view("ds1")), vec!["q3", "q1", "q2", "q4"]);

        store.remove_selection("ds1", "q3").await.unwrap();
        assert_eq!(ids(&store.view("ds1")), vec!["q1", "q2", "q4"]);

        // Authoritative order is untouched by the overlay.
        assert_eq!(
            ids(&store.snapshot().blocks_by_dataset["ds1"]),
            vec!["q1", "q2", "q4"]
        );
    }

    #[tokio::test]
    async fn test_cross_dataset_move_is_rejected() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_named_blocks("ds2", &["q1"])
                .with_selected("ds1", &["q1"])
                .with_selected("ds2", &["q1"]),
        );
        let store = store_with(&fake);
        applied(store.load().await.unwrap());

        let moved = store
            .move_block(
                &SelectionKey::new("ds1", "q1"),
                &SelectionKey::new("ds2", "q1"),
                DropSide::After,
            )
            .unwrap();
        assert!(!moved);
    }

    fn marked(page: &BrowsePage) -> Vec<&str> {
        page.entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.block.question_id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_browse_pages_and_marks_selected_blocks() {
        let fake = Arc::new(
            FakeService::new()
                .with_blocks("ds1", 30)
                .with_selected("ds1", &["q0002", "q0027"]),
        );
        let store = store_with(&fake);

        let first = store.browse(&BlockQuery::dataset("ds1", 25)).await.unwrap();
        assert_eq!(first.entries.len(), 25);
        assert_eq!(first.total, Some(30));
        assert_eq!(marked(&first), vec!["q0002"]);
        assert!(first.has_more());

        let second = store
            .browse(&BlockQuery::dataset("ds1", 25).at_offset(25))
            .await
            .unwrap();
        assert_eq!(second.entries.len(), 5);
        assert_eq!(marked(&second), vec!["q0027"]);
        assert!(!second.has_more());

        // Browsing leaves the workspace alone.
        assert_eq!(store.summary().selected, 0);
    }

    #[tokio::test]
    async fn test_browse_search_is_case_insensitive() {
        let fake = Arc::new(FakeService::new().with_blocks("ds1", 30));
        let store = store_with(&fake);

        let page = store
            .browse(&BlockQuery::dataset("ds1", 25).with_search("  QUESTION 2 "))
            .await
            .unwrap();
        assert_eq!(page.search.as_deref(), Some("QUESTION 2"));
        assert_eq!(page.entries.len(), 11);
        assert_eq!(page.entries[0].block.question_id, "q0002");

        let blank = BlockQuery::dataset("ds1", 25).with_search("   ");
        assert_eq!(blank.search, None);
    }

    #[tokio::test]
    async fn test_browse_across_datasets_marks_from_loaded_state() {
        let fake = Arc::new(
            FakeService::new()
                .with_named_blocks("ds1", &["q1"])
                .with_named_blocks("ds2", &["q1", "q2"])
                .with_selected("ds2", &["q2"]),
        );
        let store = store_with(&fake);

        let before = store.browse(&BlockQuery::all(10)).await.unwrap();
        assert_eq!(before.entries.len(), 3);
        assert!(marked(&before).is_empty());

        applied(store.load().await.unwrap());
        let after = store.browse(&BlockQuery::all(10)).await.unwrap();
        let selected: Vec<(&str, &str)> = after
            .entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| (e.block.dataset_id.as_str(), e.block.question_id.as_str()))
            .collect();
        assert_eq!(selected, vec![("ds2", "q2")]);
    }
}
