//! Engine configuration.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name for pulse configuration.
const PULSE_DIR: &str = ".pulse";
/// Configuration file name.
const CONFIG_FILE: &str = "config.yml";
/// Default custom-order file name, relative to the pulse directory.
const ORDERS_FILE: &str = "orders.json";

/// Configuration injected into the engine at construction, stored in `.pulse/config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base address of the remote service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// The user whose workspace is synchronized.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Page size used when walking a dataset's block listing.
    #[serde(default = "default_block_page_size")]
    pub block_page_size: usize,

    /// Page size used when enumerating datasets on the fallback path.
    #[serde(default = "default_dataset_page_size")]
    pub dataset_page_size: usize,

    /// Per-request timeout. Unset means the transport default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Where custom orderings are persisted. Unset means `.pulse/orders.json`;
    /// relative paths are resolved against the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_store: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_user_id() -> String {
    "dev@local".to_string()
}

const fn default_block_page_size() -> usize {
    500
}

const fn default_dataset_page_size() -> usize {
    1000
}

fn default_order_store(root: &Path) -> PathBuf {
    root.join(PULSE_DIR).join(ORDERS_FILE)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_id: default_user_id(),
            block_page_size: default_block_page_size(),
            dataset_page_size: default_dataset_page_size(),
            request_timeout_secs: None,
            order_store: None,
        }
    }
}

impl SyncConfig {
    /// Create a config for the given service address and user.
    #[must_use]
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Load `.pulse/config.yml` under `root`, or defaults if it does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let config_path = root.join(PULSE_DIR).join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            debug!(path = %config_path.display(), "Loaded config");
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        config.order_store = Some(match config.order_store.take() {
            Some(path) if path.is_relative() => root.join(path),
            Some(path) => path,
            None => default_order_store(root),
        });

        Ok(config)
    }

    /// Write this config to `.pulse/config.yml` under `root`.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be written.
    ///
    /// An order store inside `root` is written relative to it (and left out
    /// entirely when it is the default), so the workspace can be moved.
    pub fn save(&self, root: impl AsRef<Path>) -> Result<PathBuf> {
        let root = root.as_ref();
        let mut stored = self.clone();
        stored.order_store = match self.order_store.as_deref() {
            Some(path) if path == default_order_store(root) => None,
            Some(path) => Some(path.strip_prefix(root).unwrap_or(path).to_path_buf()),
            None => None,
        };

        let dir = root.join(PULSE_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_yaml::to_string(&stored)?)?;
        Ok(path)
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    /// Returns `SyncError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url is empty".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(SyncError::Config("user_id is empty".to_string()));
        }
        if self.block_page_size == 0 {
            return Err(SyncError::Config("block_page_size must be positive".to_string()));
        }
        if self.dataset_page_size == 0 {
            return Err(SyncError::Config(
                "dataset_page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
