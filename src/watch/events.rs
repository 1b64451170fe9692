//! Watch events, batching, and configuration.

use crate::config::SyncConfig;
use crate::corpus::Corpus;
use crate::types::DocumentKey;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Watch mode configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Corpus root to watch (recursively)
    pub corpus_root: PathBuf,
    /// Window for grouping raw filesystem events before dispatch
    pub batch_window_ms: u64,
    /// Maximum events per batch; a full batch is dispatched immediately
    pub max_batch_size: usize,
    /// Run a full rebuild first when no artifact table exists
    pub rebuild_on_start: bool,
}

impl WatchConfig {
    pub fn from_config(corpus_root: PathBuf, config: &SyncConfig) -> Self {
        Self {
            corpus_root,
            rebuild_on_start: config.scheduler.rebuild_on_start,
            ..Self::default()
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            corpus_root: PathBuf::from("."),
            batch_window_ms: 50,
            max_batch_size: 100,
            rebuild_on_start: true,
        }
    }
}

/// Filesystem change event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl ChangeEvent {
    /// Convert a raw notify event. Access and metadata-only events are dropped.
    pub fn from_notify(event: Event) -> Option<Self> {
        let mut paths = event.paths.into_iter();
        match event.kind {
            EventKind::Create(_) => paths.next().map(ChangeEvent::Created),
            EventKind::Modify(ModifyKind::Name(mode)) => {
                let first = paths.next()?;
                match (mode, paths.next()) {
                    (_, Some(to)) => Some(ChangeEvent::Renamed { from: first, to }),
                    (RenameMode::From, None) => Some(ChangeEvent::Removed(first)),
                    (RenameMode::To, None) => Some(ChangeEvent::Created(first)),
                    // Backend could not tell which side this is.
                    (_, None) if first.exists() => Some(ChangeEvent::Created(first)),
                    (_, None) => Some(ChangeEvent::Removed(first)),
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => paths.next().map(ChangeEvent::Modified),
            EventKind::Remove(_) => paths.next().map(ChangeEvent::Removed),
            _ => None,
        }
    }

    fn paths(&self) -> [&Path; 2] {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Removed(p) => {
                [p.as_path(), p.as_path()]
            }
            ChangeEvent::Renamed { from, to } => [from.as_path(), to.as_path()],
        }
    }

    fn shares_path(&self, other: &ChangeEvent) -> bool {
        let theirs = other.paths();
        self.paths().iter().any(|p| theirs.contains(p))
    }

    /// Key of a non-document path this event empties: a removed or moved-away
    /// directory. The keys indexed below it are passed to `resolve`.
    pub fn vacated_dir(&self, corpus: &Corpus) -> Option<DocumentKey> {
        let path = match self {
            ChangeEvent::Removed(p) => p,
            ChangeEvent::Renamed { from, .. } => from,
            _ => return None,
        };
        corpus.key_for(path).ok().filter(|key| !corpus.accepts(key))
    }

    /// Map to coordinator calls. Paths outside the corpus or not naming a
    /// tracked document kind are dropped; a rename across that boundary becomes
    /// a change or a removal. Directory events fan out to the documents below
    /// them: arrivals are found on disk, departures in `vacated` (the keys known
    /// below `vacated_dir`).
    pub fn resolve(&self, corpus: &Corpus, vacated: &[DocumentKey]) -> Vec<KeyedChange> {
        let tracked = |path: &PathBuf| corpus.key_for(path).ok().filter(|key| corpus.accepts(key));
        match self {
            ChangeEvent::Created(p) if p.is_dir() => corpus
                .documents_under(p)
                .into_iter()
                .map(KeyedChange::Changed)
                .collect(),
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) => {
                tracked(p).map(KeyedChange::Changed).into_iter().collect()
            }
            ChangeEvent::Removed(p) => match tracked(p) {
                Some(key) => vec![KeyedChange::Removed(key)],
                None => vacated.iter().cloned().map(KeyedChange::Removed).collect(),
            },
            ChangeEvent::Renamed { from, to } => match (tracked(from), tracked(to)) {
                (Some(from), Some(to)) => vec![KeyedChange::Renamed { from, to }],
                (Some(from), None) => vec![KeyedChange::Removed(from)],
                (None, Some(to)) => vec![KeyedChange::Changed(to)],
                (None, None) => resolve_directory_move(corpus, from, to, vacated),
            },
        }
    }
}

/// Documents now under `to` that were known under `from` become renames, the
/// rest of the arrivals changes, and known keys that did not arrive removals.
fn resolve_directory_move(
    corpus: &Corpus,
    from: &Path,
    to: &Path,
    vacated: &[DocumentKey],
) -> Vec<KeyedChange> {
    let from_dir = corpus.key_for(from).ok();
    let to_dir = corpus.key_for(to).ok();
    let arrived = if to.is_dir() {
        corpus.documents_under(to)
    } else {
        Vec::new()
    };

    let mut moved: HashSet<DocumentKey> = HashSet::new();
    let mut changes = Vec::with_capacity(arrived.len() + vacated.len());
    for key in arrived {
        let previous = match (&from_dir, &to_dir) {
            (Some(from_dir), Some(to_dir)) => key.rebase(to_dir, from_dir),
            _ => None,
        };
        match previous.filter(|old| vacated.contains(old)) {
            Some(old) => {
                moved.insert(old.clone());
                changes.push(KeyedChange::Renamed { from: old, to: key });
            }
            None => changes.push(KeyedChange::Changed(key)),
        }
    }
    changes.extend(
        vacated
            .iter()
            .filter(|key| !moved.contains(*key))
            .cloned()
            .map(KeyedChange::Removed),
    );
    changes
}

/// A change event resolved to document keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyedChange {
    Changed(DocumentKey),
    Removed(DocumentKey),
    Renamed { from: DocumentKey, to: DocumentKey },
}

/// Groups raw events. An event repeating the latest queued event for its path
/// collapses; anything else is kept in arrival order.
#[derive(Debug)]
pub(crate) struct EventBatcher {
    max_batch_size: usize,
    pending: Vec<ChangeEvent>,
}

impl EventBatcher {
    pub(crate) fn new(config: &WatchConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            pending: Vec::new(),
        }
    }

    /// Queue an event. Returns true when the batch is full.
    pub(crate) fn add_event(&mut self, event: ChangeEvent) -> bool {
        let latest = self.pending.iter().rev().find(|queued| queued.shares_path(&event));
        if latest != Some(&event) {
            self.pending.push(event);
        }
        self.pending.len() >= self.max_batch_size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events in arrival order.
    pub(crate) fn take_batch(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.pending)
    }
}
