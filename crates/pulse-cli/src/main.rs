//! pulse CLI - Browse and edit a selection workspace from the command line.

mod commands;
mod interactive;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_core::SelectionKey;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "pulse")]
#[command(author, version, about = "Selection workspace CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "human")]
    format: output::OutputFormat,

    /// Directory holding `.pulse/` (defaults to current directory)
    #[arg(long, short = 'C', global = true)]
    path: Option<PathBuf>,

    /// Remote service address (overrides the config file)
    #[arg(long, global = true, env = "PULSE_API_URL")]
    api_url: Option<String>,

    /// User whose workspace is used (overrides the config file)
    #[arg(long, short = 'u', global = true, env = "PULSE_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write `.pulse/config.yml` with the current settings
    Init,

    /// Show the workspace, dataset by dataset
    #[command(alias = "ls")]
    Show {
        /// Only this dataset
        dataset: Option<String>,
    },

    /// List selections whose blocks could not be resolved
    Pending,

    /// Page through content blocks, marking the selected ones
    Blocks {
        /// Only this dataset (every dataset otherwise)
        dataset: Option<String>,

        /// Free-text filter on the question text
        #[arg(long, short = 's')]
        search: Option<String>,

        /// Blocks per page
        #[arg(long, default_value = "25")]
        limit: usize,

        /// Position of the first block
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Tick and untick blocks of the page to select and deselect them
        #[arg(long)]
        pick: bool,
    },

    /// Select an item (`dataset:question`)
    Add {
        key: SelectionKey,
    },

    /// Deselect an item (`dataset:question`)
    #[command(alias = "rm")]
    Remove {
        key: SelectionKey,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Deselect several items at once (pick interactively when none are given)
    RemoveMany {
        keys: Vec<SelectionKey>,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Deselect everything
    Clear {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Move a block before (or after) another block of the same dataset
    Move {
        moved: SelectionKey,
        target: SelectionKey,

        /// Drop after the target instead of before it
        #[arg(long)]
        after: bool,
    },

    /// Forget a dataset's custom order
    ResetOrder {
        dataset: String,
    },

    /// Run the in-memory development service
    DevServer {
        /// Port to listen on
        #[arg(long, short = 'p', default_value = "8000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// YAML or JSON fixture to seed from (built-in demo data otherwise)
        #[arg(long)]
        fixture: Option<PathBuf>,

        /// Answer 404 on the all-selections endpoint
        #[arg(long)]
        no_fast_path: bool,

        /// Fail scoped selections and block listings of this dataset (repeatable)
        #[arg(long = "fail-dataset")]
        fail_datasets: Vec<String>,

        /// Fail deletes of this selection (repeatable)
        #[arg(long = "fail-delete")]
        fail_deletes: Vec<SelectionKey>,

        /// Leave `total` out of paged listings
        #[arg(long)]
        omit_totals: bool,

        /// Emit camelCase records
        #[arg(long)]
        camel_case: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let root = match cli.path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let ctx = commands::Context {
        root,
        api_url: cli.api_url,
        user: cli.user,
        format: cli.format,
    };

    match cli.command {
        Commands::Init => commands::init(&ctx),
        Commands::Show { dataset } => commands::show(&ctx, dataset.as_deref()),
        Commands::Pending => commands::pending(&ctx),
        Commands::Blocks {
            dataset,
            search,
            limit,
            offset,
            pick,
        } => commands::blocks(
            &ctx,
            commands::BrowseArgs {
                dataset,
                search,
                limit,
                offset,
                pick,
            },
        ),
        Commands::Add { key } => commands::add(&ctx, &key),
        Commands::Remove { key, yes } => commands::remove(&ctx, &key, yes),
        Commands::RemoveMany { keys, yes } => commands::remove_many(&ctx, keys, yes),
        Commands::Clear { yes } => commands::clear(&ctx, yes),
        Commands::Move {
            moved,
            target,
            after,
        } => commands::move_block(&ctx, &moved, &target, after),
        Commands::ResetOrder { dataset } => commands::reset_order(&ctx, &dataset),
        Commands::DevServer {
            port,
            host,
            fixture,
            no_fast_path,
            fail_datasets,
            fail_deletes,
            omit_totals,
            camel_case,
        } => {
            let faults = pulse_devserver::Faults {
                fast_path_disabled: no_fast_path,
                failing_datasets: fail_datasets.into_iter().collect(),
                failing_deletes: fail_deletes.into_iter().collect(),
                omit_totals,
                camel_case,
            };
            commands::dev_server(fixture.as_deref(), faults, &host, port)
        }
    }
}
