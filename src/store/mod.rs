//! Keyed Artifact Store
//!
//! Ordered table of (key, payload) records with unique keys. Every mutation
//! builds the next table, persists it atomically, and only then swaps it in, so a
//! failed write leaves both the file and the in-memory table at the last
//! persisted state.
//!
//! Within a process callers serialize mutations (see `Coordinator`). Across
//! processes each mutation holds an exclusive lock on `<table>.lock` and starts
//! from the table as persisted, so a writer never saves a stale copy over
//! another writer's result.

pub mod persistence;

use crate::error::StorageError;
use crate::types::{ArtifactRecord, DocumentKey};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File-backed keyed store
#[derive(Debug)]
pub struct KeyedStore {
    path: PathBuf,
    records: Vec<ArtifactRecord>,
}

impl KeyedStore {
    /// Open the store at `path`. A missing file yields an empty store that has
    /// not been created yet; it is created by the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let records = read_current(&path)?;
        debug!(path = %path.display(), records = records.len(), "Opened artifact table");
        Ok(Self { path, records })
    }

    /// Read the persisted table without opening a store.
    pub fn load(path: &Path) -> Result<Vec<ArtifactRecord>, StorageError> {
        persistence::read_table(path)
    }

    /// Whether a persisted table exists at `path`. Lock-free; may observe a
    /// table mid-replacement, so use it for existence only.
    pub fn exists_at(path: &Path) -> bool {
        path.is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock file guarding mutations.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Whether the table has been persisted, by this or another process.
    pub fn is_created(&self) -> bool {
        Self::exists_at(&self.path)
    }

    /// Re-read the persisted table, picking up writes from other processes.
    pub fn refresh(&mut self) -> Result<(), StorageError> {
        self.records = read_current(&self.path)?;
        Ok(())
    }

    pub fn records(&self) -> &[ArtifactRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ArtifactRecord> {
        self.records.iter().find(|r| r.key.as_str() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or move-to-end the record for `key`.
    pub fn upsert(
        &mut self,
        key: DocumentKey,
        payload: impl Into<String>,
    ) -> Result<(), StorageError> {
        let payload = payload.into();
        validate_key(&key)?;
        validate_payload(&payload)?;

        let mut replaced = false;
        self.mutate(|current| {
            let mut next: Vec<ArtifactRecord> =
                current.iter().filter(|r| r.key != key).cloned().collect();
            replaced = next.len() != current.len();
            next.push(ArtifactRecord { key, payload });
            Some(next)
        })?;
        debug!(replaced, records = self.records.len(), "Upserted artifact record");
        Ok(())
    }

    /// Replace the whole table. Duplicate keys in `records` collapse to the last
    /// occurrence.
    pub fn replace_all(&mut self, records: Vec<ArtifactRecord>) -> Result<usize, StorageError> {
        for record in &records {
            validate_key(&record.key)?;
            validate_payload(&record.payload)?;
        }
        let next = dedup_last_wins(records);
        let count = next.len();
        self.mutate(|_| Some(next))?;
        debug!(records = count, "Replaced artifact table");
        Ok(count)
    }

    /// Drop the record for `key`. Returns whether a record was removed; nothing is
    /// written when there was none.
    pub fn remove_key(&mut self, key: &str) -> Result<bool, StorageError> {
        let removed = self.mutate(|current| {
            if !current.iter().any(|r| r.key.as_str() == key) {
                return None;
            }
            Some(
                current
                    .iter()
                    .filter(|r| r.key.as_str() != key)
                    .cloned()
                    .collect(),
            )
        })?;
        if removed {
            debug!(key, "Removed artifact record");
        }
        Ok(removed)
    }

    /// Under the table lock: reload, let `apply` derive the next table from
    /// the persisted one, and write it. `None` leaves the file untouched.
    /// Returns whether anything was written.
    fn mutate<F>(&mut self, apply: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&[ArtifactRecord]) -> Option<Vec<ArtifactRecord>>,
    {
        let lock = TableLock::acquire(&self.lock_path())?;
        self.records = read_current(&self.path)?;
        let Some(next) = apply(&self.records) else {
            return Ok(false);
        };
        let content = persistence::render_table(&next);
        persistence::atomic_write(&self.path, content.as_bytes())?;
        self.records = next;
        drop(lock);
        Ok(true)
    }
}

/// Exclusive advisory lock on the table's lock file, released on drop.
struct TableLock {
    file: File,
    path: PathBuf,
}

impl TableLock {
    fn acquire(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;
        file.lock_exclusive().map_err(|e| StorageError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Failed to release table lock");
        }
    }
}

/// Persisted records, deduplicated; empty when there is no table yet.
fn read_current(path: &Path) -> Result<Vec<ArtifactRecord>, StorageError> {
    match persistence::read_table(path) {
        Ok(records) => Ok(dedup_last_wins(records)),
        Err(StorageError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn validate_key(key: &DocumentKey) -> Result<(), StorageError> {
    if key.as_str().contains(['\n', '\r']) {
        return Err(StorageError::InvalidRecord {
            line: 0,
            reason: format!("key {:?} must be a single line", key.as_str()),
        });
    }
    Ok(())
}

fn validate_payload(payload: &str) -> Result<(), StorageError> {
    if payload.contains(['\n', '\r']) {
        return Err(StorageError::InvalidRecord {
            line: 0,
            reason: "payload must be a single line".to_string(),
        });
    }
    Ok(())
}

/// Keep the last record per key, at the position of that last occurrence.
fn dedup_last_wins(records: Vec<ArtifactRecord>) -> Vec<ArtifactRecord> {
    let mut last_index: HashMap<DocumentKey, usize> = HashMap::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        last_index.insert(record.key.clone(), idx);
    }
    if last_index.len() == records.len() {
        return records;
    }
    records
        .into_iter()
        .enumerate()
        .filter(|(idx, record)| last_index.get(&record.key) == Some(idx))
        .map(|(_, record)| record)
        .collect()
}
