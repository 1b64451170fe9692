//! Configuration
//!
//! Layered configuration: built-in defaults, global file, workspace file, then
//! `EMBEDSYNC_*` environment variables (highest precedence).

mod facade;
mod merge;
mod sources;
mod storage;
pub mod xdg;

pub use facade::ConfigLoader;
pub use storage::{ResolvedPaths, StorageConfig};

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Name of the workspace-level config file
pub const WORKSPACE_CONFIG_FILE: &str = ".embedsync.toml";

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which files under the workspace are documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// File extensions (without dot) treated as documents
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Ignore patterns (glob-like, `**` and `*` supported)
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "**/.obsidian/**".to_string(),
        "**/.git/**".to_string(),
        "**/.trash/**".to_string(),
        "**/.embedsync/**".to_string(),
        "**/*.swp".to_string(),
        "**/*.tmp".to_string(),
    ]
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

/// Update scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Quiet period between the first change to a document and its recomputation
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Run a full rebuild when the watch daemon starts without a table
    #[serde(default = "default_true")]
    pub rebuild_on_start: bool,
}

fn default_debounce_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            rebuild_on_start: default_true(),
        }
    }
}

/// External computation commands (argv, run with the workspace as working dir)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Embedding command. Invoked as `<cmd> <corpus_root>` for the full table and
    /// `<cmd> <corpus_root> <document>` for one document.
    #[serde(default = "default_embed_command")]
    pub embed_command: Vec<String>,
    /// Layout command. Invoked as `<cmd> <table_path>`; prints layout JSON.
    #[serde(default = "default_layout_command")]
    pub layout_command: Vec<String>,
}

fn default_embed_command() -> Vec<String> {
    vec!["python3".to_string(), "tokenizer.py".to_string()]
}

fn default_layout_command() -> Vec<String> {
    vec!["python3".to_string(), "sne-to-data.py".to_string()]
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            embed_command: default_embed_command(),
            layout_command: default_layout_command(),
        }
    }
}
