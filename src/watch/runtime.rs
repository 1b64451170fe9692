//! Watch daemon: feeds filesystem notifications to the coordinator.

use super::events::{ChangeEvent, EventBatcher, KeyedChange, WatchConfig};
use crate::coordinator::Coordinator;
use crate::corpus::Corpus;
use crate::error::ApiError;
use notify::{RecursiveMode, Watcher};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Watch mode daemon
pub struct WatchDaemon {
    coordinator: Coordinator,
    corpus: Corpus,
    config: WatchConfig,
}

impl WatchDaemon {
    pub fn new(coordinator: Coordinator, corpus: Corpus, config: WatchConfig) -> Self {
        Self {
            coordinator,
            corpus,
            config,
        }
    }

    /// Watch until `shutdown` resolves, then cancel pending updates. In-flight
    /// jobs are left to finish.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), ApiError>
    where
        F: Future<Output = ()>,
    {
        self.initial_rebuild().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // Receiver gone means the daemon is stopping.
            let _ = tx.send(res);
        })?;
        watcher.watch(&self.config.corpus_root, RecursiveMode::Recursive)?;
        info!(root = %self.config.corpus_root.display(), "Watching corpus");

        let batch_window = Duration::from_millis(self.config.batch_window_ms);
        let mut batcher = EventBatcher::new(&self.config);
        let mut flush_at: Option<Instant> = None;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                received = rx.recv() => match received {
                    Some(Ok(event)) => {
                        let Some(change) = ChangeEvent::from_notify(event) else {
                            continue;
                        };
                        if batcher.add_event(change) {
                            self.process_events(batcher.take_batch()).await;
                            flush_at = None;
                        } else if flush_at.is_none() {
                            flush_at = Some(Instant::now() + batch_window);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Watch error"),
                    None => {
                        error!("Watcher channel disconnected");
                        break;
                    }
                },
                _ = async move {
                    match flush_at {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.process_events(batcher.take_batch()).await;
                    flush_at = None;
                }
            }
        }

        drop(watcher);
        if !batcher.is_empty() {
            debug!("Discarding unprocessed events on shutdown");
        }
        self.coordinator.shutdown();
        Ok(())
    }

    async fn initial_rebuild(&self) {
        if !self.config.rebuild_on_start || self.coordinator.store_exists() {
            return;
        }
        info!("No artifact table found, running initial rebuild");
        if let Err(e) = self.coordinator.run_full_rebuild().await {
            error!(error = %e, "Initial rebuild failed, continuing to watch");
        }
    }

    /// Dispatch one batch of events in arrival order.
    pub async fn process_events(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        debug!(event_count = events.len(), "Processing change events");
        for event in events {
            let vacated = match event.vacated_dir(&self.corpus) {
                Some(dir) => self.coordinator.keys_within(&dir).await,
                None => Vec::new(),
            };
            for change in event.resolve(&self.corpus, &vacated) {
                self.dispatch(change).await;
            }
        }
    }

    async fn dispatch(&self, change: KeyedChange) {
        let result = match change {
            KeyedChange::Changed(key) => {
                self.coordinator.on_change(key);
                Ok(())
            }
            KeyedChange::Removed(key) => self.coordinator.on_remove(key).await,
            KeyedChange::Renamed { from, to } => self.coordinator.on_rename(from, to).await,
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to apply change event");
        }
    }
}
