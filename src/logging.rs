//! Logging System
//!
//! Structured logging with `tracing`. Settings are layered, highest first: CLI
//! flags (`LoggingOverrides`), `EMBEDSYNC_LOG*` environment variables
//! (`LoggingConfig::with_env`), the `[logging]` config section, then defaults.
//!
//! | Variable                | Field     | Example                          |
//! |-------------------------|-----------|----------------------------------|
//! | `EMBEDSYNC_LOG`         | `level`   | `info,embedsync::coordinator=debug` |
//! | `EMBEDSYNC_LOG_MODULES` | `modules` | `embedsync::watch=trace`         |
//! | `EMBEDSYNC_LOG_FORMAT`  | `format`  | `json`                           |
//! | `EMBEDSYNC_LOG_OUTPUT`  | `output`  | `file+stderr`                    |
//! | `EMBEDSYNC_LOG_FILE`    | `file`    | `/tmp/embedsync.log`             |

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration (`[logging]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Level or full filter directive (`warn`, `info,embedsync::store=debug`)
    #[serde(default = "default_level")]
    pub level: String,

    /// `text` or `json`
    #[serde(default = "default_format")]
    pub format: String,

    /// `stdout`, `stderr`, `file`, `file+stderr`, or `both`
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file when output includes a file; defaults to the platform state dir
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// ANSI colors for text output on a terminal stream
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module levels, e.g. `embedsync::coordinator = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: true,
            modules: HashMap::new(),
        }
    }
}

/// Per-invocation overrides from CLI flags
#[derive(Debug, Clone, Default)]
pub struct LoggingOverrides {
    pub level: Option<String>,
    pub format: Option<String>,
    pub output: Option<String>,
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Layer `EMBEDSYNC_LOG*` variables over this config. Empty values are ignored.
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        if let Some(level) = var("EMBEDSYNC_LOG") {
            self.level = level;
        }
        if let Some(modules) = var("EMBEDSYNC_LOG_MODULES") {
            for spec in modules.split(',') {
                if let Some((module, level)) = spec.split_once('=') {
                    self.modules
                        .insert(module.trim().to_string(), level.trim().to_string());
                }
            }
        }
        if let Some(format) = var("EMBEDSYNC_LOG_FORMAT") {
            self.format = format;
        }
        if let Some(output) = var("EMBEDSYNC_LOG_OUTPUT") {
            self.output = output;
        }
        if let Some(file) = var("EMBEDSYNC_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Apply CLI overrides on top of this config.
    pub fn with_overrides(mut self, overrides: &LoggingOverrides) -> Self {
        if let Some(level) = &overrides.level {
            self.level = level.clone();
        }
        if let Some(format) = &overrides.format {
            self.format = format.clone();
        }
        if let Some(output) = &overrides.output {
            self.output = output.clone();
        }
        if let Some(file) = overrides.file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            self.file = Some(file.clone());
        }
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, ApiError> {
        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| {
            ApiError::ConfigError(format!("Invalid log level '{}': {}", self.level, e))
        })?;
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        for (module, level) in modules {
            let directive = format!("{}={}", module, level).parse().map_err(|e| {
                ApiError::ConfigError(format!("Invalid log directive for {}: {}", module, e))
            })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Destinations {
    stdout: bool,
    stderr: bool,
    file: bool,
}

impl FromStr for Destinations {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stdout, stderr, file) = match s {
            "stdout" => (true, false, false),
            "stderr" => (false, true, false),
            "file" => (false, false, true),
            "file+stderr" => (false, true, true),
            "both" => (true, true, false),
            other => {
                return Err(ApiError::ConfigError(format!(
                    "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                    other
                )))
            }
        };
        Ok(Self {
            stdout,
            stderr,
            file,
        })
    }
}

/// Log file to use: the configured one, else `<state dir>/<workspace path>/embedsync.log`.
pub fn resolve_log_file_path(
    configured: Option<&Path>,
    workspace: Option<&Path>,
) -> Result<PathBuf, ApiError> {
    if let Some(path) = configured.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }
    let dirs = directories::ProjectDirs::from("", "embedsync", "embedsync").ok_or_else(|| {
        ApiError::ConfigError("Could not determine platform state directory for log file".to_string())
    })?;
    let mut dir = dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir()).to_path_buf();
    if let Some(ws) = workspace {
        let canonical = dunce::canonicalize(ws).map_err(|e| {
            ApiError::ConfigError(format!("Failed to canonicalize workspace path: {}", e))
        })?;
        dir.extend(canonical.components().filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        }));
    }
    Ok(dir.join("embedsync.log"))
}

fn open_log_file(path: &Path) -> Result<Arc<File>, ApiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::ConfigError(format!("Failed to create log directory: {}", e)))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Arc::new)
        .map_err(|e| ApiError::ConfigError(format!("Failed to open log file {}: {}", path.display(), e)))
}

fn make_writer(
    config: &LoggingConfig,
    to: Destinations,
    workspace: Option<&Path>,
) -> Result<BoxMakeWriter, ApiError> {
    if to.file {
        let file = open_log_file(&resolve_log_file_path(config.file.as_deref(), workspace)?)?;
        return Ok(if to.stderr {
            BoxMakeWriter::new(file.and(std::io::stderr))
        } else {
            BoxMakeWriter::new(file)
        });
    }
    Ok(match (to.stdout, to.stderr) {
        (true, true) => BoxMakeWriter::new(std::io::stdout.and(std::io::stderr)),
        (true, false) => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    })
}

/// Install the global subscriber for an already layered config. Installing
/// twice (tests, embedding hosts) leaves the first subscriber in place.
pub fn init_logging(config: &LoggingConfig, workspace: Option<&Path>) -> Result<(), ApiError> {
    if !config.enabled {
        let _ = Registry::default().with(EnvFilter::new("off")).try_init();
        return Ok(());
    }

    let filter = config.env_filter()?;
    let format: LogFormat = config.format.parse()?;
    let destinations: Destinations = config.output.parse()?;
    let writer = make_writer(config, destinations, workspace)?;

    let registry = Registry::default().with(filter);
    let _ = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.color && !destinations.file)
                    .with_writer(writer),
            )
            .try_init(),
    };
    Ok(())
}
