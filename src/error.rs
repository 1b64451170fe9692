//! Error types
//!
//! Storage failures, external job failures, and the umbrella `ApiError` returned by
//! coordinator and CLI entry points.

use std::path::PathBuf;
use thiserror::Error;

/// Persisted table and layout file errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("Invalid layout file {path}: {reason}")]
    InvalidLayout { path: PathBuf, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// External computation failures
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Job exited with {}: {stderr}", code.map(|c| format!("code {}", c)).unwrap_or_else(|| "signal".to_string()))]
    Failed { code: Option<i32>, stderr: String },

    #[error("Invalid job output: {0}")]
    InvalidOutput(String),

    #[error("Failed to stage table for layout job: {0}")]
    Staging(#[source] std::io::Error),

    #[error("No command configured for {0} job")]
    NotConfigured(&'static str),
}

/// Top-level error for coordinator, daemon, and CLI operations
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("A full rebuild is already in progress")]
    RebuildInProgress,

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Invalid document key: {0}")]
    InvalidKey(String),

    #[error("Failed to format output: {0}")]
    Output(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<notify::Error> for ApiError {
    fn from(err: notify::Error) -> Self {
        ApiError::Watch(err.to_string())
    }
}
