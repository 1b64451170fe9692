//! Shared fixtures: an in-memory job runner whose jobs can be held open, and
//! coordinator construction over a scratch directory.

use async_trait::async_trait;
use embedsync::coordinator::{Coordinator, CoordinatorSettings};
use embedsync::error::JobError;
use embedsync::job::{JobRunner, RebuildOutput};
use embedsync::layout::{LayoutStore, TracingSink};
use embedsync::store::KeyedStore;
use embedsync::types::{ArtifactRecord, DocumentKey, LayoutResult, NodePosition};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub const DELAY: Duration = Duration::from_millis(1000);

/// A job that can be held at its start until the test releases it.
pub struct Gate {
    enabled: AtomicBool,
    started: Notify,
    release: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            started: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

impl Gate {
    pub fn hold(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Wait until a held job has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        if self.enabled.load(Ordering::SeqCst) {
            self.started.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
    }
}

/// In-memory runner over a document map. A full job snapshots the documents
/// when it starts, like a process reading the corpus.
#[derive(Default)]
pub struct ScriptedRunner {
    docs: Mutex<BTreeMap<String, String>>,
    single_calls: Mutex<Vec<String>>,
    full_calls: AtomicUsize,
    pub fail_full: AtomicBool,
    pub full_gate: Gate,
    pub single_gate: Gate,
}

impl ScriptedRunner {
    pub fn with_docs(docs: &[(&str, &str)]) -> Arc<Self> {
        let runner = Self::default();
        for (key, payload) in docs {
            runner.set_doc(key, payload);
        }
        Arc::new(runner)
    }

    pub fn set_doc(&self, key: &str, payload: &str) {
        self.docs.lock().insert(key.to_string(), payload.to_string());
    }

    pub fn delete_doc(&self, key: &str) {
        self.docs.lock().remove(key);
    }

    pub fn single_calls_for(&self, key: &str) -> usize {
        self.single_calls.lock().iter().filter(|k| *k == key).count()
    }

    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run_single(&self, key: &DocumentKey) -> Result<Option<String>, JobError> {
        self.single_calls.lock().push(key.to_string());
        let payload = self.docs.lock().get(key.as_str()).cloned();
        self.single_gate.pass().await;
        Ok(payload)
    }

    async fn run_full(&self, _corpus_root: &Path) -> Result<RebuildOutput, JobError> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.docs.lock().clone();
        self.full_gate.pass().await;
        if self.fail_full.load(Ordering::SeqCst) {
            return Err(JobError::Failed {
                code: Some(1),
                stderr: "embedding model unavailable".to_string(),
            });
        }

        let records = snapshot
            .iter()
            .map(|(k, v)| ArtifactRecord::new(k.as_str(), v.as_str()))
            .collect();
        let positions = snapshot
            .keys()
            .enumerate()
            .map(|(i, k)| NodePosition {
                id: DocumentKey::from(k.as_str()),
                x: i as f64,
                y: -(i as f64),
            })
            .collect();
        Ok(RebuildOutput {
            records,
            layout: LayoutResult { positions },
        })
    }
}

pub fn coordinator(dir: &Path, runner: Arc<ScriptedRunner>) -> Coordinator {
    let store = KeyedStore::open(dir.join("embeddings.csv")).unwrap();
    Coordinator::new(
        store,
        LayoutStore::new(dir.join("layout.json")),
        runner,
        Arc::new(TracingSink),
        CoordinatorSettings {
            corpus_root: dir.to_path_buf(),
            debounce: DELAY,
        },
    )
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn keys(records: &[ArtifactRecord]) -> Vec<String> {
    records.iter().map(|r| r.key.to_string()).collect()
}
