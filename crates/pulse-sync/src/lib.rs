//! Selection and workspace synchronization engine.
//!
//! Keeps a user's workspace (selected content blocks spread over many paged
//! datasets) in sync with the remote service:
//! - `directory`: discovers every selection, falling back to a per-dataset walk
//! - `resolver`: pages through a dataset's blocks until the needed ids are found
//! - `store`: authoritative in-memory state, full loads, single mutations
//! - `coordinator`: concurrent batch removal with partial-commit reporting
//! - `overlay`: locally persisted custom ordering applied at read time

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod overlay;
pub mod resolver;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use coordinator::{BatchFailure, BatchReport, MutationCoordinator};
pub use directory::{DirectoryOutcome, DirectorySource, SelectionDirectory};
pub use error::{Result, SyncError};
pub use overlay::{DropSide, FileOrderStore, MemoryOrderStore, OrderStore, ReorderOverlay};
pub use resolver::{BlockResolver, Resolution};
pub use service::{BlockQuery, HttpService, RemoteService};
pub use store::{
    BrowseEntry, BrowsePage, LoadOutcome, LoadReport, MutationOutcome, WorkspaceState,
    WorkspaceStore, WorkspaceSummary, WorkspaceView,
};
