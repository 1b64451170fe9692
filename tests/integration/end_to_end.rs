//! Full pipeline with real job processes: shell scripts stand in for the
//! embedding and layout programs.
#![cfg(unix)]

use crate::integration::support::keys;
use embedsync::config::{SyncConfig, WORKSPACE_CONFIG_FILE};
use embedsync::layout::TracingSink;
use embedsync::store::KeyedStore;
use embedsync::tooling::{CliContext, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Embedder: payload is the document text with commas and newlines removed.
/// Every invocation is appended to `calls.log` next to the workspace.
const EMBED_SCRIPT: &str = r#"root="$1"
target="${2:-$root}"
echo "$#:${target##*/}" >> "$(dirname "$root")/calls.log"
emit() { printf '%s,[%s]\n' "${1#$root/}" "$(tr -d ',\n' < "$1")"; }
if [ $# -ge 2 ]; then
  emit "$2"
else
  for f in "$root"/*.md; do [ -e "$f" ] && emit "$f"; done
fi
"#;

/// Layout: one node per table line, placed on a diagonal.
const LAYOUT_SCRIPT: &str = r#"printf '{"nodePositions": ['
i=0
while IFS=, read -r k v || [ -n "$k" ]; do
  [ -z "$k" ] && continue
  [ $i = 0 ] || printf ','
  printf '{"id":"%s","x":%s,"y":%s}' "$k" "$i" "$i"
  i=$((i+1))
done < "$1"
printf ']}'
"#;

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    scripts: PathBuf,
}

impl Fixture {
    fn new(docs: &[(&str, &str)]) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let base = dunce::canonicalize(temp.path()).unwrap();
        let root = base.join("notes");
        std::fs::create_dir_all(&root).unwrap();
        for (name, text) in docs {
            std::fs::write(root.join(name), text).unwrap();
        }
        std::fs::write(base.join("embed.sh"), EMBED_SCRIPT).unwrap();
        std::fs::write(base.join("layout.sh"), LAYOUT_SCRIPT).unwrap();
        Self {
            _temp: temp,
            root,
            scripts: base,
        }
    }

    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.jobs.embed_command = vec![
            "sh".to_string(),
            self.scripts.join("embed.sh").display().to_string(),
        ];
        config.jobs.layout_command = vec![
            "sh".to_string(),
            self.scripts.join("layout.sh").display().to_string(),
        ];
        config.storage.store_path = PathBuf::from("index/embeddings.csv");
        config.storage.layout_path = PathBuf::from("index/layout.json");
        config.scheduler.debounce_ms = 200;
        config
    }

    fn context(&self) -> CliContext {
        CliContext::with_config(self.root.clone(), self.config()).unwrap()
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.scripts.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn table(&self) -> Vec<embedsync::types::ArtifactRecord> {
        KeyedStore::load(&self.root.join("index/embeddings.csv")).unwrap()
    }
}

fn update(path: &str) -> Commands {
    Commands::Update {
        path: Path::new(path).to_path_buf(),
    }
}

#[tokio::test]
async fn rebuild_then_point_update_touches_only_the_edited_document() {
    let fx = Fixture::new(&[("A.md", "x"), ("B.md", "y")]);
    let ctx = fx.context();

    let out = ctx.execute(&Commands::Rebuild).await.unwrap();
    assert!(out.contains("2 records"), "{out}");
    let table = fx.table();
    assert_eq!(keys(&table), vec!["A.md", "B.md"]);
    assert_eq!(table[0].payload, "[x]");
    assert_eq!(fx.calls(), vec!["1:notes"]);

    std::fs::write(fx.root.join("A.md"), "x2").unwrap();
    let out = ctx.execute(&update("A.md")).await.unwrap();
    assert_eq!(out, "Updated A.md");

    let table = fx.table();
    assert_eq!(keys(&table), vec!["B.md", "A.md"]);
    assert_eq!(table[1].payload, "[x2]");
    assert_eq!(table[0].payload, "[y]");
    assert_eq!(fx.calls(), vec!["1:notes", "2:A.md"]);
}

#[tokio::test]
async fn update_without_table_runs_full_rebuild() {
    let fx = Fixture::new(&[("A.md", "x"), ("B.md", "y")]);
    let ctx = fx.context();

    let out = ctx.execute(&update("A.md")).await.unwrap();
    assert!(out.starts_with("Rebuilt index"), "{out}");
    assert_eq!(keys(&fx.table()), vec!["A.md", "B.md"]);
    assert_eq!(fx.calls(), vec!["1:notes"]);
}

#[tokio::test]
async fn two_edits_within_the_window_run_one_job() {
    let fx = Fixture::new(&[("A.md", "x"), ("B.md", "y")]);
    let ctx = fx.context();
    ctx.execute(&Commands::Rebuild).await.unwrap();

    let coord = ctx
        .coordinator(Duration::from_millis(200), Arc::new(TracingSink))
        .unwrap();
    std::fs::write(fx.root.join("A.md"), "x2").unwrap();
    assert!(coord.on_change("A.md".into()));
    std::fs::write(fx.root.join("A.md"), "x3").unwrap();
    assert!(!coord.on_change("A.md".into()));

    let mut waited = Duration::ZERO;
    while fx.calls().len() < 2 && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    // Give a stray second job time to show up before asserting it did not.
    tokio::time::sleep(Duration::from_millis(400)).await;
    while !coord.status().running.is_empty() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(fx.calls(), vec!["1:notes", "2:A.md"]);
    let table = fx.table();
    assert_eq!(keys(&table), vec!["B.md", "A.md"]);
    assert_eq!(table[1].payload, "[x3]");
}

#[tokio::test]
async fn status_and_render_reflect_the_rebuilt_index() {
    let fx = Fixture::new(&[("A.md", "x"), ("B.md", "y")]);
    let ctx = fx.context();
    ctx.execute(&Commands::Rebuild).await.unwrap();
    std::fs::write(fx.root.join("C.md"), "z").unwrap();

    let out = ctx
        .execute(&Commands::Status {
            format: "json".to_string(),
        })
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(status["store_exists"], true);
    assert_eq!(status["records"], 2);
    assert_eq!(status["layout_positions"], 2);
    assert_eq!(status["documents"], 3);
    assert_eq!(status["missing"], serde_json::json!(["C.md"]));

    let out = ctx
        .execute(&Commands::Render {
            format: "json".to_string(),
        })
        .await
        .unwrap();
    let lines: Vec<serde_json::Value> = out
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["forceNode"]["id"], "A.md");
    assert_eq!(lines[1]["forceNode"]["x"], 1.0);
    assert_eq!(lines[2], serde_json::json!({"run": true, "alpha": 0.1}));
}

#[tokio::test]
async fn remove_drops_record_and_failed_job_keeps_table() {
    let fx = Fixture::new(&[("A.md", "x"), ("B.md", "y")]);
    let ctx = fx.context();
    ctx.execute(&Commands::Rebuild).await.unwrap();

    std::fs::remove_file(fx.root.join("B.md")).unwrap();
    let out = ctx
        .execute(&Commands::Remove {
            path: PathBuf::from("B.md"),
        })
        .await
        .unwrap();
    assert_eq!(out, "Removed B.md");
    assert_eq!(keys(&fx.table()), vec!["A.md"]);

    let mut broken = fx.config();
    broken.jobs.embed_command = vec!["sh".to_string(), "-c".to_string(), "exit 2".to_string()];
    let broken = CliContext::with_config(fx.root.clone(), broken).unwrap();
    let before = std::fs::read(fx.root.join("index/embeddings.csv")).unwrap();
    assert!(broken.execute(&update("A.md")).await.is_err());
    assert!(broken.execute(&Commands::Rebuild).await.is_err());
    let after = std::fs::read(fx.root.join("index/embeddings.csv")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn workspace_config_file_is_loaded() {
    let fx = Fixture::new(&[("A.md", "x")]);
    std::fs::write(
        fx.root.join(WORKSPACE_CONFIG_FILE),
        "[scheduler]\ndebounce_ms = 42\n\n[storage]\nstore_path = \"index.csv\"\n",
    )
    .unwrap();

    let ctx = CliContext::new(fx.root.clone(), None).unwrap();
    assert_eq!(ctx.config().scheduler.debounce_ms, 42);
    assert_eq!(ctx.paths().store_path, fx.root.join("index.csv"));
}
