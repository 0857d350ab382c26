//! CLI command implementations.

use crate::interactive;
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result, bail};
use console::style;
use pulse_core::SelectionKey;
use pulse_devserver::{DevState, Faults, Fixture};
use pulse_sync::{
    BlockQuery, BrowsePage, DropSide, LoadOutcome, LoadReport, SyncConfig, WorkspaceStore,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Settings shared by every command.
pub struct Context {
    pub root: PathBuf,
    pub api_url: Option<String>,
    pub user: Option<String>,
    pub format: OutputFormat,
}

impl Context {
    fn config(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::load(&self.root).context("Failed to load config")?;
        if let Some(url) = &self.api_url {
            config.base_url.clone_from(url);
        }
        if let Some(user) = &self.user {
            config.user_id.clone_from(user);
        }
        config.validate().context("Invalid configuration")?;
        debug!("Using {} as {}", config.base_url, config.user_id);
        Ok(config)
    }

    fn store(&self) -> Result<WorkspaceStore> {
        WorkspaceStore::connect(self.config()?).context("Failed to set up workspace")
    }
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    Ok(rt.block_on(future))
}

/// Load the workspace, warning about anything the load could not reach.
async fn load(store: &WorkspaceStore) -> Result<LoadReport> {
    match store.load().await.context("Failed to load workspace")? {
        LoadOutcome::Applied(report) => {
            if report.partial {
                eprintln!(
                    "{}",
                    style(format!(
                        "  ! Partial result, skipped datasets: {}",
                        report.skipped_datasets.join(", ")
                    ))
                    .yellow()
                );
            }
            if !report.unresolved_datasets.is_empty() {
                eprintln!(
                    "{}",
                    style(format!(
                        "  ! Could not list blocks of: {}",
                        report.unresolved_datasets.join(", ")
                    ))
                    .yellow()
                );
            }
            Ok(report)
        }
        LoadOutcome::Superseded { generation } => {
            bail!("Load {generation} was superseded by a newer load")
        }
    }
}

/// Write `.pulse/config.yml`.
pub fn init(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let path = config.save(&ctx.root).context("Failed to write config")?;
    output::print_success(&format!("Wrote {}", path.display()), ctx.format)
}

/// Show the workspace.
pub fn show(ctx: &Context, dataset: Option<&str>) -> Result<()> {
    let store = ctx.store()?;
    block_on(load(&store))??;

    let views: Vec<_> = store
        .views()
        .into_iter()
        .filter(|v| dataset.is_none_or(|id| v.dataset_id == id))
        .collect();

    if matches!(ctx.format, OutputFormat::Human) {
        println!("{}", style(store.summary()).bold());
        println!();
    }
    output::print_list(&views, ctx.format)
}

/// List selections without a resolved block.
pub fn pending(ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    block_on(load(&store))??;

    let pending = store.snapshot().pending();
    if pending.is_empty() {
        return output::print_success("Every selection is resolved", ctx.format);
    }
    output::print_list(&pending, ctx.format)
}

/// Options of the `blocks` command.
pub struct BrowseArgs {
    pub dataset: Option<String>,
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub pick: bool,
}

/// Page through the block listing, marking selected blocks. With `pick`,
/// tick and untick blocks of the page and apply the difference.
pub fn blocks(ctx: &Context, args: BrowseArgs) -> Result<()> {
    if args.limit == 0 {
        bail!("--limit must be at least 1");
    }

    let store = ctx.store()?;
    let mut query = match &args.dataset {
        Some(dataset) => BlockQuery::dataset(dataset, args.limit),
        None => BlockQuery::all(args.limit),
    }
    .at_offset(args.offset);
    if let Some(search) = args.search {
        query = query.with_search(search);
    }

    let page = block_on(async {
        if query.dataset_id.is_none() {
            load(&store).await?;
        }
        store.browse(&query).await.context("Failed to list blocks")
    })??;

    if !args.pick {
        return output::print(&page, ctx.format);
    }
    if page.entries.is_empty() {
        return output::print_success("No blocks on this page", ctx.format);
    }
    apply_picks(ctx, &store, &page)
}

fn apply_picks(ctx: &Context, store: &WorkspaceStore, page: &BrowsePage) -> Result<()> {
    let items: Vec<String> = page
        .entries
        .iter()
        .map(|e| {
            let block = &e.block;
            format!("{}:{}  {}", block.dataset_id, block.question_id, block.question_text)
        })
        .collect();
    let before: Vec<bool> = page.entries.iter().map(|e| e.selected).collect();

    let Some(ticked) = interactive::toggle(&items, &before)? else {
        println!("{}", style("  Cancelled.").dim());
        return Ok(());
    };
    let ticked: BTreeSet<usize> = ticked.into_iter().collect();

    let mut to_add = Vec::new();
    let mut to_remove = BTreeSet::new();
    for (i, entry) in page.entries.iter().enumerate() {
        let key = SelectionKey::new(&entry.block.dataset_id, &entry.block.question_id);
        match (entry.selected, ticked.contains(&i)) {
            (false, true) => to_add.push(key),
            (true, false) => {
                to_remove.insert(key);
            }
            _ => {}
        }
    }

    if to_add.is_empty() && to_remove.is_empty() {
        return output::print_success("Nothing changed", ctx.format);
    }
    debug!("Applying picks: {} to add, {} to remove", to_add.len(), to_remove.len());

    let report = block_on(async {
        for key in &to_add {
            store
                .add_selection(&key.dataset_id, &key.question_id)
                .await
                .with_context(|| format!("Failed to add {key}"))?;
        }
        anyhow::Ok(store.remove_many(to_remove).await)
    })??;

    if !to_add.is_empty() {
        output::print_success(&format!("Added {} selection(s)", to_add.len()), ctx.format)?;
    }
    if report.attempted() > 0 {
        return finish_batch(ctx, store, report);
    }
    Ok(())
}

/// Select one item.
pub fn add(ctx: &Context, key: &SelectionKey) -> Result<()> {
    let store = ctx.store()?;
    block_on(async {
        store
            .add_selection(&key.dataset_id, &key.question_id)
            .await
            .with_context(|| format!("Failed to add {key}"))
    })??;

    match store.snapshot().block(key) {
        Some(block) => output::print(block, ctx.format),
        None => output::print_success(
            &format!("Added {key} (block not found yet, pending)"),
            ctx.format,
        ),
    }
}

/// Deselect one item after confirmation.
pub fn remove(ctx: &Context, key: &SelectionKey, yes: bool) -> Result<()> {
    let store = ctx.store()?;
    block_on(load(&store))??;

    let snapshot = store.snapshot();
    if !snapshot.contains(key) {
        return output::print_success(&format!("{key} is not selected"), ctx.format);
    }

    let label = snapshot
        .block(key)
        .map_or_else(|| key.to_string(), |b| format!("{key} {}", b.question_text));
    if !yes && !interactive::confirm(&format!("Remove {label}?"))? {
        println!("{}", style("  Cancelled.").dim());
        return Ok(());
    }

    block_on(async {
        store
            .remove_selection(&key.dataset_id, &key.question_id)
            .await
            .with_context(|| format!("Failed to remove {key}"))
    })??;

    output::print_success(&format!("Removed {key}. {}", store.summary()), ctx.format)
}

/// Deselect several items.
pub fn remove_many(ctx: &Context, keys: Vec<SelectionKey>, yes: bool) -> Result<()> {
    let store = ctx.store()?;
    block_on(load(&store))??;

    let keys: BTreeSet<SelectionKey> = if keys.is_empty() {
        let snapshot = store.snapshot();
        let candidates: Vec<SelectionKey> = snapshot.keys().into_iter().collect();
        if candidates.is_empty() {
            return output::print_success("Nothing is selected", ctx.format);
        }
        match interactive::pick_keys(&candidates, |key| {
            snapshot
                .block(key)
                .map_or_else(|| key.to_string(), |b| format!("{key}  {}", b.question_text))
        })? {
            Some(picked) => picked.into_iter().collect(),
            None => {
                println!("{}", style("  Cancelled.").dim());
                return Ok(());
            }
        }
    } else {
        keys.into_iter().collect()
    };

    if keys.is_empty() {
        return output::print_success("Nothing to remove", ctx.format);
    }
    if !yes && !interactive::confirm(&format!("Remove {} selection(s)?", keys.len()))? {
        println!("{}", style("  Cancelled.").dim());
        return Ok(());
    }

    finish_batch(ctx, &store, block_on(store.remove_many(keys))?)
}

/// Deselect everything.
pub fn clear(ctx: &Context, yes: bool) -> Result<()> {
    let store = ctx.store()?;
    block_on(load(&store))??;

    let summary = store.summary();
    if summary.selected == 0 {
        return output::print_success("Nothing is selected", ctx.format);
    }
    if !yes && !interactive::confirm(&format!("Clear all {summary}?"))? {
        println!("{}", style("  Cancelled.").dim());
        return Ok(());
    }

    finish_batch(ctx, &store, block_on(store.clear_all())?)
}

fn finish_batch(
    ctx: &Context,
    store: &WorkspaceStore,
    report: pulse_sync::BatchReport,
) -> Result<()> {
    output::print(&report, ctx.format)?;
    if matches!(ctx.format, OutputFormat::Human) {
        println!("{}", style(store.summary()).dim());
    }
    report
        .into_result()
        .map(|_| ())
        .context("Some selections could not be removed")
}

/// Reorder one block relative to another.
pub fn move_block(
    ctx: &Context,
    moved: &SelectionKey,
    target: &SelectionKey,
    after: bool,
) -> Result<()> {
    let store = ctx.store()?;
    block_on(load(&store))??;

    let side = if after {
        DropSide::After
    } else {
        DropSide::Before
    };
    let changed = store
        .move_block(moved, target, side)
        .context("Failed to save custom order")?;
    if !changed {
        bail!("Cannot move {moved} relative to {target}: both must be resolved blocks of one dataset");
    }

    let view = store
        .views()
        .into_iter()
        .filter(|v| v.dataset_id == moved.dataset_id)
        .collect::<Vec<_>>();
    output::print_list(&view, ctx.format)
}

/// Forget a dataset's custom order.
pub fn reset_order(ctx: &Context, dataset: &str) -> Result<()> {
    let store = ctx.store()?;
    store
        .reset_order(dataset)
        .context("Failed to reset custom order")?;
    output::print_success(&format!("Reset order of {dataset}"), ctx.format)
}

/// Run the development service until interrupted.
pub fn dev_server(fixture: Option<&Path>, faults: Faults, host: &str, port: u16) -> Result<()> {
    let fixture = match fixture {
        Some(path) => Fixture::load(path)?,
        None => Fixture::demo(),
    };
    let state = Arc::new(DevState::from_fixture(fixture));
    info!("Seeded development service with {} selection(s)", state.selection_count());
    state.set_faults(faults);

    block_on(pulse_devserver::serve(state, host, port))?
}
