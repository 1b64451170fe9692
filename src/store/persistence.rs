//! Table file format and atomic persistence.
//!
//! One record per line: the key up to the first `,`, then the opaque payload.
//! Keys containing `,` or starting with `"` are written double-quoted with `""`
//! escapes, the way CSV writers emit them. Blank lines are ignored on read.

use crate::error::StorageError;
use crate::types::{ArtifactRecord, DocumentKey};
use std::io::Write;
use std::path::Path;
use tracing::warn;

const DELIMITER: char = ',';

/// Parse one non-blank table line into a record.
pub fn parse_record(line: &str, line_no: usize) -> Result<ArtifactRecord, StorageError> {
    let invalid = |reason: &str| StorageError::InvalidRecord {
        line: line_no,
        reason: reason.to_string(),
    };

    let line = line.trim_end_matches('\r');
    let (key, payload) = if let Some(rest) = line.strip_prefix('"') {
        let mut key = String::new();
        let mut chars = rest.char_indices().peekable();
        let mut end = None;
        while let Some((idx, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    key.push('"');
                    chars.next();
                } else {
                    end = Some(idx + 1);
                    break;
                }
            } else {
                key.push(c);
            }
        }
        let end = end.ok_or_else(|| invalid("unterminated quoted key"))?;
        let remainder = &rest[end..];
        let payload = remainder
            .strip_prefix(DELIMITER)
            .ok_or_else(|| invalid("missing delimiter after quoted key"))?;
        (key, payload)
    } else {
        let (key, payload) = line
            .split_once(DELIMITER)
            .ok_or_else(|| invalid("missing delimiter"))?;
        (key.to_string(), payload)
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }

    Ok(ArtifactRecord {
        key: DocumentKey::new(key),
        payload: payload.to_string(),
    })
}

/// Render a record as one table line (no trailing newline).
pub fn format_record(record: &ArtifactRecord) -> String {
    let key = record.key.as_str();
    if key.contains(DELIMITER) || key.starts_with('"') {
        format!("\"{}\"{}{}", key.replace('"', "\"\""), DELIMITER, record.payload)
    } else {
        format!("{}{}{}", key, DELIMITER, record.payload)
    }
}

/// Parse a whole table, skipping blank lines and logging unreadable ones.
pub fn parse_table(content: &str) -> Vec<ArtifactRecord> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_record(line, idx + 1) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping unreadable table line"),
        }
    }
    records
}

/// Serialize records into table content.
pub fn render_table(records: &[ArtifactRecord]) -> String {
    records
        .iter()
        .map(format_record)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read the persisted table. A missing file is `StorageError::NotFound`.
pub fn read_table(path: &Path) -> Result<Vec<ArtifactRecord>, StorageError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_table(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Replace the file at `path` with `content` via a temp file in the same
/// directory and a rename. Either the old or the new content is visible, never
/// a prefix of the new one.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".embedsync-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| StorageError::io(parent, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}
