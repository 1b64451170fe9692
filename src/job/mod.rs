//! External computation jobs
//!
//! The embedding and layout computations are black boxes behind `JobRunner`. The
//! process-backed runner spawns one external command per call; tests substitute
//! an in-memory runner.

mod process;

pub use process::ProcessJobRunner;

use crate::error::JobError;
use crate::types::{ArtifactRecord, DocumentKey, LayoutResult};
use async_trait::async_trait;
use std::path::Path;

/// Output of a full-corpus job
#[derive(Debug, Clone, Default)]
pub struct RebuildOutput {
    /// Full artifact table in job output order
    pub records: Vec<ArtifactRecord>,
    /// Layout derived from `records`
    pub layout: LayoutResult,
}

/// Runs embedding computations. Implementations hold no state between calls and
/// may be called concurrently.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Compute the artifact for one document. `Ok(None)` when the document is not
    /// eligible (deleted, filtered out); no computation is started then.
    async fn run_single(&self, key: &DocumentKey) -> Result<Option<String>, JobError>;

    /// Compute the whole table and its layout.
    async fn run_full(&self, corpus_root: &Path) -> Result<RebuildOutput, JobError>;
}
