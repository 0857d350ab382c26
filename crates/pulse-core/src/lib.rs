//! pulse-core: Domain models and envelope normalization for pulse workspaces.
//!
//! This crate provides:
//! - `Selection` / `SelectionKey`: A user's choice of one item in one dataset
//! - `Block`: The immutable content snapshot a selection resolves to
//! - `PendingMutation`: In-flight add/remove bookkeeping for presentation layers
//! - `envelope`: Normalization of the remote service's heterogeneous JSON shapes

pub mod block;
pub mod dataset;
pub mod envelope;
pub mod error;
pub mod mutation;
pub mod selection;

pub use block::{Block, ResponseRow};
pub use dataset::{DatasetSummary, Page};
pub use error::{CoreError, Result};
pub use mutation::{MutationKind, PendingMutation};
pub use selection::{ScopedSelection, Selection, SelectionKey};
