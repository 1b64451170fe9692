//! Core types shared by the store, job runner, and coordinator.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// DocumentKey: corpus-relative path of a document, `/`-separated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Self {
        DocumentKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key lies below the directory key `dir`.
    pub fn is_within(&self, dir: &DocumentKey) -> bool {
        self.0
            .strip_prefix(dir.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Move this key from directory `from` to directory `to`, keeping the part
    /// below it. `None` when the key is not within `from`.
    pub fn rebase(&self, from: &DocumentKey, to: &DocumentKey) -> Option<DocumentKey> {
        if !self.is_within(from) {
            return None;
        }
        Some(DocumentKey(format!("{}{}", to.0, &self.0[from.0.len()..])))
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DocumentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentKey {
    fn from(s: &str) -> Self {
        DocumentKey(s.to_string())
    }
}

impl From<String> for DocumentKey {
    fn from(s: String) -> Self {
        DocumentKey(s)
    }
}

/// One row of the keyed store: a document key and its opaque computed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub key: DocumentKey,
    pub payload: String,
}

impl ArtifactRecord {
    pub fn new(key: impl Into<DocumentKey>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// 2-D position of one document in the similarity layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub id: DocumentKey,
    pub x: f64,
    pub y: f64,
}

/// Layout computed by a full rebuild, in the order the layout job produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutResult {
    #[serde(rename = "nodePositions")]
    pub positions: Vec<NodePosition>,
}

impl LayoutResult {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&NodePosition> {
        self.positions.iter().find(|p| p.id.as_str() == key)
    }
}
