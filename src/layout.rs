//! Layout persistence and rendering sinks.
//!
//! The layout is written separately from the artifact table and pushed to a sink
//! after each successful rebuild. Sinks are fire-and-forget: a failing sink is
//! logged and never fails the rebuild.

use crate::error::StorageError;
use crate::store::persistence::atomic_write;
use crate::types::LayoutResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Initial alpha for the renderer's relayout after positions are forced.
const RELAYOUT_ALPHA: f64 = 0.1;

#[derive(Debug, Serialize, Deserialize)]
struct LayoutFile {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    layout: LayoutResult,
}

/// Persisted layout at a fixed path
#[derive(Debug, Clone)]
pub struct LayoutStore {
    path: PathBuf,
}

impl LayoutStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, layout: &LayoutResult) -> Result<(), StorageError> {
        let file = LayoutFile {
            generated_at: Utc::now(),
            layout: layout.clone(),
        };
        let content =
            serde_json::to_vec_pretty(&file).map_err(|e| StorageError::InvalidLayout {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        atomic_write(&self.path, &content)?;
        debug!(path = %self.path.display(), positions = layout.len(), "Saved layout");
        Ok(())
    }

    /// Load the persisted layout; `None` when none has been written yet.
    pub fn load(&self) -> Result<Option<LayoutResult>, StorageError> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        let file: LayoutFile =
            serde_json::from_slice(&content).map_err(|e| StorageError::InvalidLayout {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(file.layout))
    }
}

/// Consumer of layout positions (graph renderer)
pub trait LayoutSink: Send + Sync {
    fn render(&self, layout: &LayoutResult);
}

/// Sink that only logs positions
#[derive(Debug, Default)]
pub struct TracingSink;

impl LayoutSink for TracingSink {
    fn render(&self, layout: &LayoutResult) {
        for pos in &layout.positions {
            debug!(key = %pos.id, x = pos.x, y = pos.y, "Layout position");
        }
        info!(positions = layout.len(), "Layout rendered");
    }
}

/// Sink writing renderer messages as JSON lines: one `forceNode` message per
/// position, then a single `run` message to start the relayout.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_all(&self, layout: &LayoutResult) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        for pos in &layout.positions {
            let msg = json!({ "forceNode": { "id": pos.id, "x": pos.x, "y": pos.y } });
            writeln!(writer, "{}", msg)?;
        }
        writeln!(writer, "{}", json!({ "run": true, "alpha": RELAYOUT_ALPHA }))?;
        writer.flush()
    }
}

impl<W: Write + Send> LayoutSink for JsonLinesSink<W> {
    fn render(&self, layout: &LayoutResult) {
        if layout.is_empty() {
            debug!("No layout positions to render");
            return;
        }
        if let Err(e) = self.write_all(layout) {
            warn!(error = %e, "Failed to write layout to sink");
        }
    }
}
