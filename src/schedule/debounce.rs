//! Per-key delayed triggers with collapse-on-repeat semantics.
//!
//! Scheduling a key that already has a pending timer is a no-op: the timer is
//! not reset or extended, so a burst of changes fires once, `delay` after the
//! first change in the burst.

use crate::types::DocumentKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

struct PendingTimer {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    timers: HashMap<DocumentKey, PendingTimer>,
}

/// Set of pending per-key timers. Must be used inside a tokio runtime.
#[derive(Clone, Default)]
pub struct DebounceTimers {
    table: Arc<Mutex<TimerTable>>,
}

impl DebounceTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timer for `key` unless one is already pending. Returns whether a
    /// timer was started. `on_fire` runs once, after `key` has left the pending
    /// set.
    pub fn schedule<F, Fut>(&self, key: DocumentKey, delay: Duration, on_fire: F) -> bool
    where
        F: FnOnce(DocumentKey) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut table = self.table.lock();
        if table.timers.contains_key(&key) {
            trace!(key = %key, "Timer already pending");
            return false;
        }

        table.next_generation += 1;
        let generation = table.next_generation;
        let shared = Arc::clone(&self.table);
        let task_key = key.clone();

        // The table lock is held until the entry is inserted, so the task can
        // never observe its own key missing for the wrong reason.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fire = {
                let mut table = shared.lock();
                match table.timers.get(&task_key) {
                    Some(timer) if timer.generation == generation => {
                        table.timers.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if fire {
                trace!(key = %task_key, "Timer fired");
                on_fire(task_key).await;
            }
        });

        table.timers.insert(
            key,
            PendingTimer {
                generation,
                handle: handle.abort_handle(),
            },
        );
        true
    }

    /// Remove a pending timer without firing it. Returns whether one was pending.
    /// A timer that has already fired is unaffected.
    pub fn cancel(&self, key: &str) -> bool {
        match self.table.lock().timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let timers = std::mem::take(&mut self.table.lock().timers);
        let count = timers.len();
        for timer in timers.into_values() {
            timer.handle.abort();
        }
        count
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.table.lock().timers.contains_key(key)
    }

    /// Keys with a pending timer, sorted.
    pub fn pending(&self) -> Vec<DocumentKey> {
        let mut keys: Vec<DocumentKey> = self.table.lock().timers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.table.lock().timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
