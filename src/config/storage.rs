//! StorageConfig and path resolution for the artifact table and layout.

use crate::config::xdg;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_STORE_PATH: &str = ".embedsync/embeddings.csv";
const DEFAULT_LAYOUT_PATH: &str = ".embedsync/layout.json";

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_layout_path() -> PathBuf {
    PathBuf::from(DEFAULT_LAYOUT_PATH)
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Artifact table path (relative to workspace root unless absolute)
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Layout path (relative to workspace root unless absolute)
    #[serde(default = "default_layout_path")]
    pub layout_path: PathBuf,
}

/// Concrete file locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub store_path: PathBuf,
    pub layout_path: PathBuf,
}

impl StorageConfig {
    /// Resolve storage paths. Default paths live in the per-workspace XDG data
    /// directory; configured paths are joined onto the workspace root.
    pub fn resolve_paths(&self, workspace_root: &Path) -> Result<ResolvedPaths, ApiError> {
        let store_path = if self.store_path == Path::new(DEFAULT_STORE_PATH) {
            xdg::workspace_data_dir(workspace_root)?.join("embeddings.csv")
        } else {
            workspace_root.join(&self.store_path)
        };

        let layout_path = if self.layout_path == Path::new(DEFAULT_LAYOUT_PATH) {
            xdg::workspace_data_dir(workspace_root)?.join("layout.json")
        } else {
            workspace_root.join(&self.layout_path)
        };

        Ok(ResolvedPaths {
            store_path,
            layout_path,
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            layout_path: default_layout_path(),
        }
    }
}
