//! Corpus: maps filesystem paths to document keys and decides which files are
//! documents.

use crate::config::CorpusConfig;
use crate::error::ApiError;
use crate::types::DocumentKey;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

/// Document set rooted at a directory
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    extensions: Vec<String>,
    ignore_patterns: Vec<String>,
}

impl Corpus {
    pub fn new(root: &Path, config: &CorpusConfig) -> Result<Self, ApiError> {
        let root = dunce::canonicalize(root).map_err(|e| {
            ApiError::ConfigError(format!(
                "Failed to resolve corpus root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore_patterns: config.ignore_patterns.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key for a path inside the corpus: relative, `/`-separated, NFC-normalized.
    /// Relative inputs are taken as relative to the root.
    pub fn key_for(&self, path: &Path) -> Result<DocumentKey, ApiError> {
        let rel = if path.is_absolute() {
            self.strip_root(path).ok_or_else(|| {
                ApiError::InvalidKey(format!("{} is outside the corpus", path.display()))
            })?
        } else {
            path.to_path_buf()
        };

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(name) => {
                    let part: String = name.to_string_lossy().nfc().collect();
                    // Table records are line-delimited.
                    if part.contains(['\n', '\r']) {
                        return Err(ApiError::InvalidKey(format!(
                            "{:?} contains a line break",
                            path
                        )));
                    }
                    parts.push(part);
                }
                Component::CurDir => {}
                _ => {
                    return Err(ApiError::InvalidKey(format!(
                        "{} is not a plain corpus path",
                        path.display()
                    )))
                }
            }
        }
        if parts.is_empty() {
            return Err(ApiError::InvalidKey(format!(
                "{} does not name a document",
                path.display()
            )));
        }
        Ok(DocumentKey::new(parts.join("/")))
    }

    /// Absolute path of a document key.
    pub fn path_for(&self, key: &DocumentKey) -> PathBuf {
        key.as_str()
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Whether the key names a document kind this corpus tracks (extension and
    /// ignore rules only; the file need not exist).
    pub fn accepts(&self, key: &DocumentKey) -> bool {
        let has_extension = Path::new(key.as_str())
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false);
        has_extension && !self.is_ignored(key.as_str())
    }

    /// Whether the key names an existing, tracked document.
    pub fn is_eligible(&self, key: &DocumentKey) -> bool {
        self.accepts(key) && self.path_for(key).is_file()
    }

    /// All tracked documents under the root, sorted by key.
    pub fn documents(&self) -> Vec<DocumentKey> {
        self.documents_under(&self.root)
    }

    /// Tracked documents below `dir` (a path inside the corpus), sorted by key.
    pub fn documents_under(&self, dir: &Path) -> Vec<DocumentKey> {
        let mut keys: Vec<DocumentKey> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.key_for(entry.path()).ok())
            .filter(|key| self.accepts(key))
            .collect();
        keys.sort();
        keys
    }

    fn strip_root(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return Some(rel.to_path_buf());
        }
        // Watchers may report paths through an equivalent but different prefix
        // (symlinked root); resolve the parent, which still exists after a delete.
        let parent = dunce::canonicalize(path.parent()?).ok()?;
        let rel = parent.strip_prefix(&self.root).ok()?;
        Some(rel.join(path.file_name()?))
    }

    fn is_ignored(&self, key: &str) -> bool {
        // Patterns are written against full paths; match on a rooted form.
        let rooted = format!("/{}", key);
        self.ignore_patterns
            .iter()
            .any(|pattern| matches_pattern(&rooted, pattern))
    }
}

/// Glob match where `**` spans separators and `*` stays within one segment.
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.replace('\\', "/");
    let pattern = pattern.replace('\\', "/");
    glob_match(pattern.as_bytes(), path.as_bytes())
}

fn glob_match(pattern: &[u8], path: &[u8]) -> bool {
    match pattern {
        [] => path.is_empty(),
        [b'*', b'*', rest @ ..] => (0..=path.len()).any(|i| glob_match(rest, &path[i..])),
        [b'*', rest @ ..] => {
            let segment_end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
            (0..=segment_end).any(|i| glob_match(rest, &path[i..]))
        }
        [c, rest @ ..] => path.first() == Some(c) && glob_match(rest, &path[1..]),
    }
}
