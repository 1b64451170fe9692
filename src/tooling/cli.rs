//! CLI Tooling
//!
//! Command-line interface for the embedding index. Every command is scoped to
//! one workspace, which is also the corpus root.

use super::format::{format_rebuild_report_text, format_status_text, IndexStatus};
use crate::config::{ConfigLoader, ResolvedPaths, SyncConfig, WORKSPACE_CONFIG_FILE};
use crate::coordinator::{Coordinator, CoordinatorSettings, MergeOutcome};
use crate::corpus::Corpus;
use crate::error::{ApiError, StorageError};
use crate::job::ProcessJobRunner;
use crate::layout::{JsonLinesSink, LayoutSink, LayoutStore, TracingSink};
use crate::logging::LoggingOverrides;
use crate::store::KeyedStore;
use crate::types::DocumentKey;
use crate::watch::{WatchConfig, WatchDaemon};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Embedsync CLI - keeps an embedding index in sync with a document corpus
#[derive(Parser)]
#[command(name = "embedsync")]
#[command(about = "Keep a per-document embedding index in sync with a changing corpus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace (corpus root) directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn logging_overrides(&self) -> LoggingOverrides {
        LoggingOverrides {
            level: self.log_level.clone(),
            format: self.log_format.clone(),
            output: self.log_output.clone(),
            file: self.log_file.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recompute the whole table and layout
    Rebuild,
    /// Recompute one document now (falls back to a rebuild if no table exists)
    Update {
        /// Document path, absolute or relative to the workspace
        path: PathBuf,
    },
    /// Drop a document's record
    Remove {
        /// Document path, absolute or relative to the workspace
        path: PathBuf,
    },
    /// Watch the workspace and keep the index current until Ctrl-C
    Watch {
        /// Debounce window in milliseconds (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,
        /// Batch window for raw filesystem events in milliseconds
        #[arg(long, default_value = "50")]
        batch_window_ms: u64,
    },
    /// Show index status
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Push the persisted layout to a renderer
    Render {
        /// Sink (tracing or json)
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a workspace config file with the default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// CLI context for command execution
pub struct CliContext {
    workspace_root: PathBuf,
    config: SyncConfig,
    paths: ResolvedPaths,
    corpus: Corpus,
}

impl CliContext {
    /// Create a new CLI context
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = if let Some(cfg_path) = &config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        Self::with_config(workspace_root, config)
    }

    /// Create a context from an already loaded configuration.
    pub fn with_config(workspace_root: PathBuf, config: SyncConfig) -> Result<Self, ApiError> {
        let corpus = Corpus::new(&workspace_root, &config.corpus)?;
        let workspace_root = corpus.root().to_path_buf();
        let paths = config.storage.resolve_paths(&workspace_root)?;
        Ok(Self {
            workspace_root,
            config,
            paths,
            corpus,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    /// Build a coordinator over the workspace's table, layout, and job commands.
    pub fn coordinator(
        &self,
        debounce: Duration,
        sink: Arc<dyn LayoutSink>,
    ) -> Result<Coordinator, ApiError> {
        let store = KeyedStore::open(&self.paths.store_path)?;
        let runner = ProcessJobRunner::new(self.corpus.clone(), &self.config.jobs)
            .with_working_dir(&self.workspace_root);
        Ok(Coordinator::new(
            store,
            LayoutStore::new(&self.paths.layout_path),
            Arc::new(runner),
            sink,
            CoordinatorSettings {
                corpus_root: self.workspace_root.clone(),
                debounce,
            },
        ))
    }

    fn configured_debounce(&self) -> Duration {
        Duration::from_millis(self.config.scheduler.debounce_ms)
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Rebuild => self.handle_rebuild().await,
            Commands::Update { path } => self.handle_update(path).await,
            Commands::Remove { path } => self.handle_remove(path).await,
            Commands::Watch {
                debounce_ms,
                batch_window_ms,
            } => self.handle_watch(*debounce_ms, *batch_window_ms).await,
            Commands::Status { format } => self.handle_status(format),
            Commands::Render { format } => self.handle_render(format),
            Commands::Config { command } => self.handle_config_command(command),
        }
    }

    async fn handle_rebuild(&self) -> Result<String, ApiError> {
        let coordinator = self.coordinator(self.configured_debounce(), Arc::new(TracingSink))?;
        let report = coordinator.run_full_rebuild().await?;
        Ok(format_rebuild_report_text(&report))
    }

    async fn handle_update(&self, path: &Path) -> Result<String, ApiError> {
        let key = self.corpus.key_for(path)?;
        let coordinator = self.coordinator(self.configured_debounce(), Arc::new(TracingSink))?;
        match coordinator.run_and_merge(&key).await? {
            MergeOutcome::Upserted => Ok(format!("Updated {}", key)),
            MergeOutcome::Skipped => Ok(format!("{} is not a tracked document, nothing to update", key)),
            MergeOutcome::StoreMissing => {
                info!(key = %key, "No artifact table yet, running full rebuild");
                let report = coordinator.run_full_rebuild().await?;
                Ok(format_rebuild_report_text(&report))
            }
        }
    }

    async fn handle_remove(&self, path: &Path) -> Result<String, ApiError> {
        let key = self.corpus.key_for(path)?;
        let coordinator = self.coordinator(self.configured_debounce(), Arc::new(TracingSink))?;
        let had_record = coordinator
            .records()
            .await
            .iter()
            .any(|r| r.key == key);
        coordinator.on_remove(key.clone()).await?;
        if had_record {
            Ok(format!("Removed {}", key))
        } else {
            Ok(format!("{} has no record", key))
        }
    }

    async fn handle_watch(
        &self,
        debounce_ms: Option<u64>,
        batch_window_ms: u64,
    ) -> Result<String, ApiError> {
        let debounce = debounce_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.configured_debounce());
        let coordinator = self.coordinator(debounce, Arc::new(TracingSink))?;
        let config = WatchConfig {
            batch_window_ms,
            ..WatchConfig::from_config(self.workspace_root.clone(), &self.config)
        };
        let daemon = WatchDaemon::new(coordinator, self.corpus.clone(), config);
        daemon
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            })
            .await?;
        Ok("Watch stopped".to_string())
    }

    /// Gather status without taking any lock or starting jobs.
    pub fn index_status(&self) -> Result<IndexStatus, ApiError> {
        let store = KeyedStore::open(&self.paths.store_path)?;
        let layout_positions = LayoutStore::new(&self.paths.layout_path)
            .load()?
            .map(|layout| layout.len());

        let documents = self.corpus.documents();
        let document_set: HashSet<&DocumentKey> = documents.iter().collect();
        let missing = documents
            .iter()
            .filter(|key| !store.contains(key.as_str()))
            .cloned()
            .collect();
        let mut orphaned: Vec<DocumentKey> = store
            .records()
            .iter()
            .filter(|r| !document_set.contains(&r.key))
            .map(|r| r.key.clone())
            .collect();
        orphaned.sort();

        Ok(IndexStatus {
            workspace: self.workspace_root.clone(),
            store_path: self.paths.store_path.clone(),
            store_exists: store.is_created(),
            records: store.len(),
            layout_path: self.paths.layout_path.clone(),
            layout_positions,
            documents: documents.len(),
            missing,
            orphaned,
        })
    }

    fn handle_status(&self, format: &str) -> Result<String, ApiError> {
        let status = self.index_status()?;
        match format {
            "json" => serde_json::to_string_pretty(&status).map_err(|e| ApiError::Output(e.to_string())),
            "text" => Ok(format_status_text(&status)),
            other => Err(ApiError::ConfigError(format!(
                "Invalid format: {} (must be 'text' or 'json')",
                other
            ))),
        }
    }

    fn handle_render(&self, format: &str) -> Result<String, ApiError> {
        let layout = LayoutStore::new(&self.paths.layout_path)
            .load()?
            .ok_or_else(|| StorageError::NotFound(self.paths.layout_path.clone()))?;
        match format {
            "json" => {
                let sink = JsonLinesSink::new(Vec::new());
                sink.render(&layout);
                let bytes = sink.into_inner();
                Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
            }
            "tracing" => {
                TracingSink.render(&layout);
                Ok(format!("Rendered {} layout nodes", layout.len()))
            }
            other => Err(ApiError::ConfigError(format!(
                "Invalid sink: {} (must be 'json' or 'tracing')",
                other
            ))),
        }
    }

    fn handle_config_command(&self, command: &ConfigCommands) -> Result<String, ApiError> {
        match command {
            ConfigCommands::Init { force } => {
                let path = self.workspace_root.join(WORKSPACE_CONFIG_FILE);
                if path.exists() && !force {
                    return Ok(format!(
                        "{} already exists. Use --force to overwrite.",
                        path.display()
                    ));
                }
                let body = toml::to_string_pretty(&SyncConfig::default())
                    .map_err(|e| ApiError::Output(e.to_string()))?;
                std::fs::write(&path, body).map_err(|e| StorageError::io(&path, e))?;
                Ok(format!("Wrote {}", path.display()))
            }
            ConfigCommands::Show { format } => match format.as_str() {
                "toml" => toml::to_string_pretty(&self.config)
                    .map_err(|e| ApiError::Output(e.to_string())),
                "json" => serde_json::to_string_pretty(&self.config)
                    .map_err(|e| ApiError::Output(e.to_string())),
                other => Err(ApiError::ConfigError(format!(
                    "Invalid format: {} (must be 'toml' or 'json')",
                    other
                ))),
            },
        }
    }
}
