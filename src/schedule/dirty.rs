//! Keys changed since the current full rebuild started.

use crate::types::DocumentKey;
use std::collections::{BTreeSet, HashSet};

/// Dirty set. Not synchronized; the coordinator wraps it in a lock.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    keys: HashSet<DocumentKey>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn mark_dirty(&mut self, key: DocumentKey) {
        self.keys.insert(key);
    }

    /// Drop a key that no longer exists (renamed away or deleted).
    pub fn forget(&mut self, key: &str) -> bool {
        self.keys.remove(key)
    }

    /// Take every dirty key, leaving the set empty.
    pub fn drain_all(&mut self) -> BTreeSet<DocumentKey> {
        std::mem::take(&mut self.keys).into_iter().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Dirty keys, sorted, without clearing.
    pub fn snapshot(&self) -> Vec<DocumentKey> {
        let mut keys: Vec<DocumentKey> = self.keys.iter().cloned().collect();
        keys.sort();
        keys
    }
}
