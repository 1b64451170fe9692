//! Update Coordinator
//!
//! Turns document change events into recomputations and merges their results into
//! the keyed store. Owns every piece of scheduler state for one corpus:
//!
//! - per key: `Idle -> Pending (timer) -> Running (job) -> Idle`
//! - rebuild: `Idle -> Rebuilding -> Draining -> Idle`
//!
//! All store mutations happen under one async mutex, so a single-document merge
//! and the final write of a full rebuild never interleave. A full rebuild runs
//! its external job without the lock and takes it only for `replace_all`.
//! Failures are reported and dropped; nothing is retried automatically.

use crate::error::ApiError;
use crate::job::JobRunner;
use crate::layout::{LayoutSink, LayoutStore};
use crate::schedule::{DebounceTimers, DirtyTracker};
use crate::store::KeyedStore;
use crate::types::DocumentKey;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Global rebuild state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildState {
    Idle,
    Rebuilding,
    Draining,
}

/// Result of a single-document merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record was computed and upserted
    Upserted,
    /// The document was not eligible; nothing ran
    Skipped,
    /// No table exists yet; a full rebuild is needed instead of a point update
    StoreMissing,
}

/// Summary of a completed full rebuild
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub records: usize,
    pub positions: usize,
    /// Keys changed during the rebuild and re-scheduled afterwards
    pub requeued: Vec<DocumentKey>,
    pub duration_ms: u64,
}

/// Point-in-time view of scheduler state
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub rebuild: RebuildState,
    pub pending: Vec<DocumentKey>,
    pub running: Vec<DocumentKey>,
    pub dirty: Vec<DocumentKey>,
    pub store_path: PathBuf,
    pub store_exists: bool,
    /// `None` while a mutation holds the store lock
    pub records: Option<usize>,
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Root passed to the full-corpus job
    pub corpus_root: PathBuf,
    /// Quiet period between the first change and the recomputation
    pub debounce: Duration,
}

struct Inner {
    store: tokio::sync::Mutex<KeyedStore>,
    store_path: PathBuf,
    layout: LayoutStore,
    runner: Arc<dyn JobRunner>,
    sink: Arc<dyn LayoutSink>,
    settings: CoordinatorSettings,
    timers: DebounceTimers,
    dirty: Mutex<DirtyTracker>,
    running: Mutex<HashSet<DocumentKey>>,
    rebuild: Mutex<RebuildState>,
}

/// Update coordinator; cheap to clone, all clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

/// Removes a key from the running set when the merge finishes or is dropped.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<DocumentKey>>,
    key: DocumentKey,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a Mutex<HashSet<DocumentKey>>, key: &DocumentKey) -> Self {
        running.lock().insert(key.clone());
        Self {
            running,
            key: key.clone(),
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.key);
    }
}

/// Returns the rebuild state to `Idle` however the rebuild ends.
struct RebuildGuard<'a> {
    state: &'a Mutex<RebuildState>,
}

impl<'a> RebuildGuard<'a> {
    fn begin(state: &'a Mutex<RebuildState>) -> Result<Self, ApiError> {
        let mut current = state.lock();
        if *current != RebuildState::Idle {
            return Err(ApiError::RebuildInProgress);
        }
        *current = RebuildState::Rebuilding;
        Ok(Self { state })
    }

    fn set(&self, next: RebuildState) {
        *self.state.lock() = next;
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = RebuildState::Idle;
    }
}

impl Coordinator {
    pub fn new(
        store: KeyedStore,
        layout: LayoutStore,
        runner: Arc<dyn JobRunner>,
        sink: Arc<dyn LayoutSink>,
        settings: CoordinatorSettings,
    ) -> Self {
        let store_path = store.path().to_path_buf();
        Self {
            inner: Arc::new(Inner {
                store: tokio::sync::Mutex::new(store),
                store_path,
                layout,
                runner,
                sink,
                settings,
                timers: DebounceTimers::new(),
                dirty: Mutex::new(DirtyTracker::new()),
                running: Mutex::new(HashSet::new()),
                rebuild: Mutex::new(RebuildState::Idle),
            }),
        }
    }

    /// A document changed. Marks it dirty and starts its debounce timer unless
    /// one is already pending. Returns whether a timer was started.
    pub fn on_change(&self, key: DocumentKey) -> bool {
        self.inner.dirty.lock().mark_dirty(key.clone());
        self.schedule(key)
    }

    /// A document moved. The old record is dropped before the new key is
    /// scheduled.
    pub async fn on_rename(&self, old: DocumentKey, new: DocumentKey) -> Result<(), ApiError> {
        self.retire(&old).await?;
        info!(from = %old, to = %new, "Document renamed");
        self.on_change(new);
        Ok(())
    }

    /// A document was deleted.
    pub async fn on_remove(&self, key: DocumentKey) -> Result<(), ApiError> {
        let removed = self.retire(&key).await?;
        info!(key = %key, removed, "Document removed");
        Ok(())
    }

    async fn retire(&self, key: &DocumentKey) -> Result<bool, ApiError> {
        if self.inner.timers.cancel(key.as_str()) {
            debug!(key = %key, "Cancelled pending update");
        }
        self.inner.dirty.lock().forget(key.as_str());
        let mut store = self.inner.store.lock().await;
        Ok(store.remove_key(key.as_str())?)
    }

    fn schedule(&self, key: DocumentKey) -> bool {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let started = self
            .inner
            .timers
            .schedule(key.clone(), self.inner.settings.debounce, move |key| async move {
                if let Some(inner) = weak.upgrade() {
                    Coordinator { inner }.fire(key).await;
                }
            });
        if started {
            debug!(key = %key, delay_ms = self.inner.settings.debounce.as_millis() as u64, "Scheduled update");
        }
        started
    }

    /// Timer callback: merge, and fall back to a full rebuild when there is no
    /// table yet.
    async fn fire(&self, key: DocumentKey) {
        match self.run_and_merge(&key).await {
            Ok(MergeOutcome::StoreMissing) => {
                info!(key = %key, "No artifact table yet, starting full rebuild");
                match self.run_full_rebuild().await {
                    Ok(_) | Err(ApiError::RebuildInProgress) => {}
                    Err(e) => error!(error = %e, "Full rebuild failed"),
                }
            }
            Ok(_) => {}
            // Already reported by run_and_merge.
            Err(_) => {}
        }
    }

    /// Compute one document and upsert its record, holding the store lock for
    /// the whole job. A failure is reported and the key stays stale until its
    /// next change.
    pub async fn run_and_merge(&self, key: &DocumentKey) -> Result<MergeOutcome, ApiError> {
        let mut store = self.inner.store.lock().await;
        if !store.is_created() {
            return Ok(MergeOutcome::StoreMissing);
        }

        let _running = RunningGuard::enter(&self.inner.running, key);
        let started = Instant::now();
        let payload = match self.inner.runner.run_single(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(key = %key, "Document not eligible, nothing merged");
                return Ok(MergeOutcome::Skipped);
            }
            Err(e) => {
                error!(key = %key, error = %e, "Embedding job failed, result dropped");
                return Err(e.into());
            }
        };

        if let Err(e) = store.upsert(key.clone(), payload) {
            error!(key = %key, error = %e, "Failed to persist record");
            return Err(e.into());
        }
        info!(
            key = %key,
            records = store.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Updated embedding"
        );
        Ok(MergeOutcome::Upserted)
    }

    /// Recompute the whole table and layout. Only one rebuild runs at a time; a
    /// second call fails with `ApiError::RebuildInProgress`.
    ///
    /// Keys changed while the external job runs are re-scheduled through the
    /// debounce path after the table is replaced, even when the rebuild output
    /// already reflects them.
    pub async fn run_full_rebuild(&self) -> Result<RebuildReport, ApiError> {
        let guard = RebuildGuard::begin(&self.inner.rebuild)?;
        let started = Instant::now();

        let stale = self.inner.dirty.lock().drain_all();
        if !stale.is_empty() {
            debug!(keys = stale.len(), "Cleared dirty keys covered by this rebuild");
        }

        info!(root = %self.inner.settings.corpus_root.display(), "Full rebuild started");
        let output = match self.inner.runner.run_full(&self.inner.settings.corpus_root).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Full rebuild job failed, table left unchanged");
                return Err(e.into());
            }
        };

        let records = {
            let mut store = self.inner.store.lock().await;
            match store.replace_all(output.records) {
                Ok(count) => count,
                Err(e) => {
                    error!(error = %e, "Failed to persist rebuilt table");
                    return Err(e.into());
                }
            }
        };

        let layout_saved = self.inner.layout.save(&output.layout);
        match &layout_saved {
            Ok(()) => self.inner.sink.render(&output.layout),
            Err(e) => error!(error = %e, "Failed to persist layout"),
        }

        guard.set(RebuildState::Draining);
        let requeued: Vec<DocumentKey> = self.inner.dirty.lock().drain_all().into_iter().collect();
        for key in &requeued {
            self.schedule(key.clone());
        }
        drop(guard);

        layout_saved?;

        let report = RebuildReport {
            records,
            positions: output.layout.len(),
            requeued,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            records = report.records,
            positions = report.positions,
            requeued = report.requeued.len(),
            duration_ms = report.duration_ms,
            "Full rebuild completed"
        );
        Ok(report)
    }

    pub fn rebuild_state(&self) -> RebuildState {
        *self.inner.rebuild.lock()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.timers.is_pending(key)
    }

    /// Whether the table file exists. Lock-free.
    pub fn store_exists(&self) -> bool {
        KeyedStore::exists_at(&self.inner.store_path)
    }

    /// Snapshot of the persisted records, re-read under the store lock.
    pub async fn records(&self) -> Vec<crate::types::ArtifactRecord> {
        let mut store = self.inner.store.lock().await;
        if let Err(e) = store.refresh() {
            warn!(error = %e, "Failed to re-read artifact table, using last known records");
        }
        store.records().to_vec()
    }

    /// Indexed or pending keys below directory `dir`, sorted.
    pub async fn keys_within(&self, dir: &DocumentKey) -> Vec<DocumentKey> {
        let mut keys: BTreeSet<DocumentKey> = self
            .records()
            .await
            .into_iter()
            .map(|r| r.key)
            .filter(|k| k.is_within(dir))
            .collect();
        keys.extend(
            self.inner
                .timers
                .pending()
                .into_iter()
                .filter(|k| k.is_within(dir)),
        );
        keys.into_iter().collect()
    }

    pub fn status(&self) -> CoordinatorStatus {
        let mut running: Vec<DocumentKey> = self.inner.running.lock().iter().cloned().collect();
        running.sort();
        CoordinatorStatus {
            rebuild: self.rebuild_state(),
            pending: self.inner.timers.pending(),
            running,
            dirty: self.inner.dirty.lock().snapshot(),
            store_path: self.inner.store_path.clone(),
            store_exists: self.store_exists(),
            records: self.inner.store.try_lock().ok().map(|s| s.len()),
        }
    }

    /// Cancel all pending timers. In-flight jobs run to completion.
    pub fn shutdown(&self) {
        let cancelled = self.inner.timers.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "Shutting down with pending updates");
        }
    }
}
