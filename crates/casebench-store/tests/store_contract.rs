//! Contract tests for ResultStore.
//!
//! Every conforming store must pass these; they run against both the JSON
//! file store and the in-memory fake.

use casebench_core::{CaseStatus, EvalResult, ResultRecord, RunSummary, Score};
use casebench_store::fakes::MemoryResultStore;
use casebench_store::{JsonFileStore, ResultStore, StoreError};
use serde_json::json;

fn record(name: &str, status: CaseStatus) -> ResultRecord {
    ResultRecord {
        function_name: name.to_string(),
        dataset: "contract".to_string(),
        labels: vec!["nightly".to_string()],
        result: EvalResult::new(json!({"q": name}), "answer")
            .with_score(Score::passed("correctness", status == CaseStatus::Completed))
            .with_latency(0.25),
        status: Some(status),
    }
}

fn live_summary() -> RunSummary {
    RunSummary::from_records(vec![
        record("a", CaseStatus::Completed),
        record("b", CaseStatus::Cancelled),
    ])
    .with_rerun_config(json!({"path": "evals", "concurrency": 2}))
}

fn check_round_trip(store: &dyn ResultStore) {
    let run_id = store.generate_run_id();
    store.save_run(&run_id, &live_summary()).unwrap();
    let loaded = store.load_run(&run_id).unwrap();
    assert_eq!(loaded, live_summary());
    assert_eq!(loaded.results[1].status, Some(CaseStatus::Cancelled));
}

fn check_latest_snapshot_wins(store: &dyn ResultStore) {
    store.save_run("live", &RunSummary::empty()).unwrap();
    store.save_run("live", &live_summary()).unwrap();
    assert_eq!(store.load_run("live").unwrap().total_evaluations, 2);
}

fn check_not_found(store: &dyn ResultStore) {
    let err = store.load_run("missing-run").unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[test]
fn json_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path()).unwrap();
    check_round_trip(&store);
    check_latest_snapshot_wins(&store);
    check_not_found(&store);
}

#[test]
fn memory_store_contract() {
    let store = MemoryResultStore::new();
    check_round_trip(&store);
    check_latest_snapshot_wins(&store);
    check_not_found(&store);
    assert_eq!(store.snapshots("live").len(), 2);
}

#[test]
fn json_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path()).unwrap();
    let err = store.save_run("../escape", &RunSummary::empty()).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRunId { .. }));
}

#[test]
fn persisted_layout_accepts_legacy_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path()).unwrap();
    let legacy = json!({
        "total_evaluations": 1,
        "total_functions": 1,
        "total_errors": 0,
        "total_passed": 1,
        "total_with_scores": 1,
        "average_latency": 0.5,
        "results": [{
            "function": "old_case",
            "dataset": "legacy",
            "labels": [],
            "result": {"input": "i", "output": "o", "scores": [{"key": "correctness", "passed": true}], "latency": 0.5, "error": null}
        }]
    });
    std::fs::write(store.run_path("legacy"), legacy.to_string()).unwrap();

    let loaded = store.load_run("legacy").unwrap();
    assert_eq!(loaded.results[0].function_name, "old_case");
    assert!(loaded.rerun_config.is_none());
}
