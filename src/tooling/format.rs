//! Format status and rebuild reports as text.

use crate::coordinator::RebuildReport;
use crate::types::DocumentKey;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::PathBuf;

/// Rows beyond this are summarized in text output.
const MAX_LISTED_KEYS: usize = 20;

/// Index status for one workspace
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub workspace: PathBuf,
    pub store_path: PathBuf,
    pub store_exists: bool,
    pub records: usize,
    pub layout_path: PathBuf,
    /// `None` when no layout has been computed
    pub layout_positions: Option<usize>,
    pub documents: usize,
    /// Documents with no record in the table
    pub missing: Vec<DocumentKey>,
    /// Records whose document no longer exists
    pub orphaned: Vec<DocumentKey>,
}

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

pub fn format_status_text(status: &IndexStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Index Status")));
    out.push_str(&format!("  Workspace: {}\n", status.workspace.display()));
    out.push_str(&format!("  Table: {}\n", status.store_path.display()));
    if !status.store_exists {
        out.push_str("  Built: no\n\n");
        out.push_str("Run `embedsync rebuild` to compute the index.\n");
        return out;
    }
    out.push_str("  Built: yes\n\n");

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Documents", "Records", "Layout nodes", "Missing", "Orphaned"]);
    table.add_row(vec![
        status.documents.to_string(),
        status.records.to_string(),
        status
            .layout_positions
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string()),
        status.missing.len().to_string(),
        status.orphaned.len().to_string(),
    ]);
    out.push_str(&format!("{}\n", table));

    if !status.missing.is_empty() {
        out.push('\n');
        out.push_str(&format!("{}\n\n", format_section_heading("Documents without a record")));
        out.push_str(&format_key_list(&status.missing));
    }
    if !status.orphaned.is_empty() {
        out.push('\n');
        out.push_str(&format!("{}\n\n", format_section_heading("Records without a document")));
        out.push_str(&format_key_list(&status.orphaned));
    }
    out
}

fn format_key_list(keys: &[DocumentKey]) -> String {
    let mut out = String::new();
    for key in keys.iter().take(MAX_LISTED_KEYS) {
        out.push_str(&format!("  {}\n", key));
    }
    if keys.len() > MAX_LISTED_KEYS {
        out.push_str(&format!("  ... and {} more\n", keys.len() - MAX_LISTED_KEYS));
    }
    out
}

pub fn format_rebuild_report_text(report: &RebuildReport) -> String {
    let mut out = format!(
        "Rebuilt index: {} records, {} layout nodes in {} ms",
        report.records, report.positions, report.duration_ms
    );
    if !report.requeued.is_empty() {
        out.push_str(&format!(
            "\n{} document(s) changed during the rebuild and were re-queued",
            report.requeued.len()
        ));
    }
    out
}
