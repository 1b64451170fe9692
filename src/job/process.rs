//! Process-backed job runner.

use super::{JobRunner, RebuildOutput};
use crate::config::JobsConfig;
use crate::corpus::Corpus;
use crate::error::JobError;
use crate::store::persistence::{parse_record, render_table};
use crate::types::{ArtifactRecord, DocumentKey, LayoutResult};
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

/// Runs the configured embedding and layout commands
#[derive(Debug, Clone)]
pub struct ProcessJobRunner {
    corpus: Corpus,
    embed_command: Vec<String>,
    layout_command: Vec<String>,
    working_dir: PathBuf,
}

impl ProcessJobRunner {
    pub fn new(corpus: Corpus, jobs: &JobsConfig) -> Self {
        let working_dir = corpus.root().to_path_buf();
        Self {
            corpus,
            embed_command: jobs.embed_command.clone(),
            layout_command: jobs.layout_command.clone(),
            working_dir,
        }
    }

    /// Run relative command paths from `dir` instead of the corpus root.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Spawn `argv + extra`, wait for exit with stdout and stderr fully drained,
    /// and return stdout on success.
    async fn run_command(
        &self,
        kind: &'static str,
        argv: &[String],
        extra: Vec<OsString>,
    ) -> Result<String, JobError> {
        let (program, args) = argv.split_first().ok_or(JobError::NotConfigured(kind))?;

        let started = Instant::now();
        let output = Command::new(program)
            .args(args)
            .args(&extra)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| JobError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(
            job = kind,
            program = %program,
            exit_code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Job process exited"
        );

        if !output.status.success() {
            return Err(JobError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| JobError::InvalidOutput(format!("{} output is not UTF-8: {}", kind, e)))
    }
}

/// Parse embedding output into records, normalizing keys the way `Corpus` does.
fn parse_embedding_output(stdout: &str) -> Result<Vec<ArtifactRecord>, JobError> {
    let mut records = Vec::new();
    for (idx, line) in stdout.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(line, idx + 1).map_err(|e| JobError::InvalidOutput(e.to_string()))?;
        let key: String = record.key.as_str().replace('\\', "/").nfc().collect();
        records.push(ArtifactRecord {
            key: DocumentKey::new(key),
            payload: record.payload,
        });
    }
    Ok(records)
}

fn parse_layout_output(stdout: &str) -> Result<LayoutResult, JobError> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| JobError::InvalidOutput(format!("layout JSON: {}", e)))
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn run_single(&self, key: &DocumentKey) -> Result<Option<String>, JobError> {
        if !self.corpus.is_eligible(key) {
            debug!(key = %key, "Document not eligible, skipping job");
            return Ok(None);
        }

        let document = self.corpus.path_for(key);
        let stdout = self
            .run_command(
                "embed",
                &self.embed_command,
                vec![
                    self.corpus.root().as_os_str().to_owned(),
                    document.into_os_string(),
                ],
            )
            .await?;

        let mut records = parse_embedding_output(&stdout)?;
        if records.len() != 1 {
            return Err(JobError::InvalidOutput(format!(
                "expected one record for {}, got {}",
                key,
                records.len()
            )));
        }
        let record = records.remove(0);
        if record.key != *key {
            return Err(JobError::InvalidOutput(format!(
                "record key {} does not match requested {}",
                record.key, key
            )));
        }
        Ok(Some(record.payload))
    }

    async fn run_full(&self, corpus_root: &Path) -> Result<RebuildOutput, JobError> {
        let started = Instant::now();
        let stdout = self
            .run_command(
                "embed",
                &self.embed_command,
                vec![corpus_root.as_os_str().to_owned()],
            )
            .await?;
        let records = parse_embedding_output(&stdout)?;
        info!(records = records.len(), "Embedding job produced table");

        // Layout reads a table file; the persisted store is not touched here.
        let mut staged = tempfile::Builder::new()
            .prefix("embedsync-table-")
            .suffix(".csv")
            .tempfile()
            .map_err(JobError::Staging)?;
        staged
            .write_all(render_table(&records).as_bytes())
            .and_then(|_| staged.flush())
            .map_err(JobError::Staging)?;

        let layout_stdout = self
            .run_command(
                "layout",
                &self.layout_command,
                vec![staged.path().as_os_str().to_owned()],
            )
            .await?;
        let layout = parse_layout_output(&layout_stdout)?;

        info!(
            records = records.len(),
            positions = layout.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Full job completed"
        );
        Ok(RebuildOutput { records, layout })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CorpusConfig;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "job".to_string()]
    }

    fn runner(root: &Path, embed: &str, layout: &str) -> ProcessJobRunner {
        let corpus = Corpus::new(root, &CorpusConfig::default()).unwrap();
        let jobs = JobsConfig {
            embed_command: sh(embed),
            layout_command: sh(layout),
        };
        ProcessJobRunner::new(corpus, &jobs)
    }

    #[tokio::test]
    async fn test_single_job_returns_payload_for_key() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), "x").unwrap();
        // $2 is the absolute document path; print it relative like an embedder would.
        let r = runner(temp.path(), r#"printf '%s,"[0.5, 1.5]"\n\n' "$(basename "$2")""#, "true");

        let payload = r.run_single(&"a.md".into()).await.unwrap();
        assert_eq!(payload.as_deref(), Some("\"[0.5, 1.5]\""));
    }

    #[tokio::test]
    async fn test_single_job_for_missing_document_is_noop() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("ran");
        let script = format!("touch {}", marker.display());
        let r = runner(temp.path(), &script, "true");

        assert_eq!(r.run_single(&"gone.md".into()).await.unwrap(), None);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_code_and_stderr() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), "x").unwrap();
        let r = runner(temp.path(), "echo 'model missing' >&2; exit 3", "true");

        match r.run_single(&"a.md".into()).await.unwrap_err() {
            JobError::Failed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "model missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_single_job_rejects_mismatched_key() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), "x").unwrap();
        let r = runner(temp.path(), "echo 'b.md,[1]'", "true");

        let err = r.run_single(&"a.md".into()).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_full_job_stages_table_for_layout() {
        let temp = tempfile::tempdir().unwrap();
        let embed = r#"printf 'a.md,[1]\nb.md,[2]\n'"#;
        // Emit one position per staged table line to prove the layout saw the table.
        let layout = r#"printf '{"nodePositions": ['; first=1; while IFS=, read -r k v || [ -n "$k" ]; do [ $first = 1 ] || printf ','; first=0; printf '{"id":"%s","x":1,"y":2}' "$k"; done < "$1"; printf ']}'"#;
        let r = runner(temp.path(), embed, layout);

        let output = r.run_full(temp.path()).await.unwrap();
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[1], ArtifactRecord::new("b.md", "[2]"));
        assert_eq!(output.layout.len(), 2);
        assert!(output.layout.get("a.md").is_some());
    }

    #[tokio::test]
    async fn test_unconfigured_command() {
        let temp = tempfile::tempdir().unwrap();
        let corpus = Corpus::new(temp.path(), &CorpusConfig::default()).unwrap();
        let jobs = JobsConfig {
            embed_command: Vec::new(),
            layout_command: Vec::new(),
        };
        let r = ProcessJobRunner::new(corpus, &jobs);
        let err = r.run_full(temp.path()).await.unwrap_err();
        assert!(matches!(err, JobError::NotConfigured("embed")));
    }
}
