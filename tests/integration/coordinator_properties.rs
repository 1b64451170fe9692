use crate::integration::support::{coordinator, keys, settle, ScriptedRunner, DELAY};
use embedsync::coordinator::RebuildState;
use embedsync::error::ApiError;
use embedsync::store::KeyedStore;
use embedsync::types::DocumentKey;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;

fn payload_of(records: &[embedsync::types::ArtifactRecord], key: &str) -> Option<String> {
    records
        .iter()
        .find(|r| r.key.as_str() == key)
        .map(|r| r.payload.clone())
}

#[tokio::test(start_paused = true)]
async fn changes_during_rebuild_are_requeued_and_run_once() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]"), ("b.md", "[2]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));

    runner.full_gate.hold();
    let rebuild = tokio::spawn({
        let coord = coord.clone();
        async move { coord.run_full_rebuild().await }
    });
    runner.full_gate.started().await;
    assert_eq!(coord.rebuild_state(), RebuildState::Rebuilding);

    runner.set_doc("a.md", "[10]");
    runner.set_doc("c.md", "[3]");
    coord.on_change("a.md".into());
    coord.on_change("c.md".into());
    runner.full_gate.release();

    let report = rebuild.await.unwrap().unwrap();
    assert_eq!(
        report.requeued,
        vec![DocumentKey::from("a.md"), DocumentKey::from("c.md")]
    );
    let status = coord.status();
    assert!(status.dirty.is_empty());
    assert_eq!(status.rebuild, RebuildState::Idle);
    assert_eq!(
        status.pending,
        vec![DocumentKey::from("a.md"), DocumentKey::from("c.md")]
    );
    // The rebuild saw the corpus as it was when it started.
    assert_eq!(keys(&coord.records().await), vec!["a.md", "b.md"]);

    advance(DELAY + Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(runner.single_calls_for("a.md"), 1);
    assert_eq!(runner.single_calls_for("c.md"), 1);
    assert_eq!(runner.single_calls_for("b.md"), 0);
    let records = coord.records().await;
    assert_eq!(keys(&records), vec!["a.md", "b.md", "c.md"]);
    assert_eq!(payload_of(&records, "a.md").as_deref(), Some("[10]"));
}

#[tokio::test(start_paused = true)]
async fn update_that_fires_during_rebuild_is_repeated_after_it() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]"), ("b.md", "[2]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));
    coord.run_full_rebuild().await.unwrap();

    runner.full_gate.hold();
    let rebuild = tokio::spawn({
        let coord = coord.clone();
        async move { coord.run_full_rebuild().await }
    });
    runner.full_gate.started().await;

    runner.set_doc("a.md", "[10]");
    coord.on_change("a.md".into());
    advance(DELAY + Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(runner.single_calls_for("a.md"), 1);
    assert_eq!(payload_of(&coord.records().await, "a.md").as_deref(), Some("[10]"));

    runner.full_gate.release();
    let report = rebuild.await.unwrap().unwrap();
    assert_eq!(report.requeued, vec![DocumentKey::from("a.md")]);
    // Stale snapshot from the rebuild until the requeued update runs.
    assert_eq!(payload_of(&coord.records().await, "a.md").as_deref(), Some("[1]"));

    advance(DELAY + Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(runner.single_calls_for("a.md"), 2);
    assert_eq!(payload_of(&coord.records().await, "a.md").as_deref(), Some("[10]"));
}

#[tokio::test]
async fn single_update_in_flight_when_rebuild_finishes_never_duplicates() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]"), ("b.md", "[2]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));
    coord.run_full_rebuild().await.unwrap();
    runner.set_doc("a.md", "[10]");

    runner.single_gate.hold();
    let merge = tokio::spawn({
        let coord = coord.clone();
        async move { coord.run_and_merge(&"a.md".into()).await }
    });
    runner.single_gate.started().await;
    assert_eq!(coord.status().running, vec![DocumentKey::from("a.md")]);

    let rebuild = tokio::spawn({
        let coord = coord.clone();
        async move { coord.run_full_rebuild().await }
    });
    settle().await;
    // The rebuild job finished but its write waits for the store lock.
    assert_eq!(coord.rebuild_state(), RebuildState::Rebuilding);
    assert_eq!(coord.status().records, None);

    runner.single_gate.release();
    merge.await.unwrap().unwrap();
    rebuild.await.unwrap().unwrap();

    let persisted = KeyedStore::load(&temp.path().join("embeddings.csv")).unwrap();
    assert_eq!(keys(&persisted), vec!["a.md", "b.md"]);
    assert_eq!(payload_of(&persisted, "a.md").as_deref(), Some("[10]"));
    let text = std::fs::read_to_string(temp.path().join("embeddings.csv")).unwrap();
    assert_eq!(text.lines().count(), 2);
}

#[tokio::test]
async fn remove_during_in_flight_update_wins() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]"), ("b.md", "[2]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));
    coord.run_full_rebuild().await.unwrap();

    runner.single_gate.hold();
    let merge = tokio::spawn({
        let coord = coord.clone();
        async move { coord.run_and_merge(&"a.md".into()).await }
    });
    runner.single_gate.started().await;
    let remove = tokio::spawn({
        let coord = coord.clone();
        async move { coord.on_remove("a.md".into()).await }
    });
    settle().await;

    runner.single_gate.release();
    merge.await.unwrap().unwrap();
    remove.await.unwrap().unwrap();

    assert_eq!(keys(&coord.records().await), vec!["b.md"]);
}

#[tokio::test]
async fn second_rebuild_is_rejected_while_one_runs() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));

    runner.full_gate.hold();
    let first = tokio::spawn({
        let coord = coord.clone();
        async move { coord.run_full_rebuild().await }
    });
    runner.full_gate.started().await;

    let err = coord.run_full_rebuild().await.unwrap_err();
    assert!(matches!(err, ApiError::RebuildInProgress));

    runner.full_gate.release();
    first.await.unwrap().unwrap();
    assert_eq!(runner.full_calls(), 1);

    coord.run_full_rebuild().await.unwrap();
    assert_eq!(runner.full_calls(), 2);
}

#[tokio::test]
async fn failed_rebuild_leaves_table_and_returns_to_idle() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]"), ("b.md", "[2]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));
    coord.run_full_rebuild().await.unwrap();
    let before = std::fs::read(temp.path().join("embeddings.csv")).unwrap();

    runner.set_doc("c.md", "[3]");
    runner.fail_full.store(true, Ordering::SeqCst);
    let err = coord.run_full_rebuild().await.unwrap_err();
    assert!(matches!(err, ApiError::Job(_)));

    assert_eq!(coord.rebuild_state(), RebuildState::Idle);
    let after = std::fs::read(temp.path().join("embeddings.csv")).unwrap();
    assert_eq!(before, after);
    assert_eq!(coord.records().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rename_then_edit_burst_triggers_one_update_for_new_key() {
    let temp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::with_docs(&[("a.md", "[1]")]);
    let coord = coordinator(temp.path(), Arc::clone(&runner));
    coord.run_full_rebuild().await.unwrap();

    runner.delete_doc("a.md");
    runner.set_doc("b.md", "[1]");
    coord.on_rename("a.md".into(), "b.md".into()).await.unwrap();
    coord.on_change("b.md".into());
    coord.on_change("b.md".into());

    advance(DELAY + Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(runner.single_calls_for("a.md"), 0);
    assert_eq!(runner.single_calls_for("b.md"), 1);
    assert_eq!(keys(&coord.records().await), vec!["b.md"]);
}
