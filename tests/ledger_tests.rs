use std::fs;

use pi_coordinator::ledger::{
    ContextMode, HandoffEnvelope, LedgerStore, SharedContext, TaskOutcome,
};
use pi_coordinator::topology::TopologyMode;

fn envelope(run_id: &str, task_id: &str) -> HandoffEnvelope {
    HandoffEnvelope {
        run_id: run_id.into(),
        task_id: task_id.into(),
        parent_task_id: None,
        agent: "scout".into(),
        task: "List files".into(),
        mode: TopologyMode::Single,
        depth: 1,
        created_at_ms: 0,
    }
}

#[test]
fn test_ledger_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let context = SharedContext::open(dir.path(), "run-x", ContextMode::SharedRead, 20);
    context.record_dispatch(&envelope("run-x", "t1"));

    let path = dir.path().join("runs").join("run-x.jsonl");
    let raw = fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.contains("\"type\":\"dispatch\""));
    assert!(raw.contains("\"run_id\":\"run-x\""));
}

#[test]
fn test_isolated_mode_writes_nothing_and_builds_empty_packet() {
    let dir = tempfile::tempdir().unwrap();
    let context = SharedContext::open(dir.path(), "run-x", ContextMode::Isolated, 20);
    context.record_dispatch(&envelope("run-x", "t1"));
    context.record_observation("t1", "scout", TaskOutcome::Success, "done");

    assert!(!dir.path().join("runs").join("run-x.jsonl").exists());
    assert!(context.packet_for(&envelope("run-x", "t2")).is_empty());
}

#[test]
fn test_shared_read_ignores_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let context = SharedContext::open(dir.path(), "run-x", ContextMode::SharedRead, 20);
    context.record_observation("t1", "scout", TaskOutcome::Success, "done");
    context.record_decision("t1", "coordinator", "overall summary");

    let raw = fs::read_to_string(dir.path().join("runs").join("run-x.jsonl")).unwrap();
    assert!(raw.contains("\"type\":\"observation\""));
    assert!(!raw.contains("\"type\":\"decision\""));
}

#[test]
fn test_shared_write_records_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let context = SharedContext::open(dir.path(), "run-x", ContextMode::SharedWrite, 20);
    context.record_decision("t1", "coordinator", "overall summary");

    let raw = fs::read_to_string(dir.path().join("runs").join("run-x.jsonl")).unwrap();
    assert!(raw.contains("\"type\":\"decision\""));
}

#[test]
fn test_packet_reflects_prior_entries() {
    let dir = tempfile::tempdir().unwrap();
    let context = SharedContext::open(dir.path(), "run-x", ContextMode::SharedRead, 20);
    context.record_dispatch(&envelope("run-x", "t1"));
    context.record_observation("t1", "scout", TaskOutcome::Success, "found 3 call sites");

    let packet = context.packet_for(&envelope("run-x", "t2"));
    assert!(packet.starts_with("<shared_context>"));
    assert!(packet.contains("task: t2"));
    assert!(packet.contains("- dispatch scout task:t1"));
    assert!(packet.contains("- success scout task:t1 found 3 call sites"));
}

#[test]
fn test_observation_summary_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let context = SharedContext::open(dir.path(), "run-x", ContextMode::SharedRead, 20);
    let long = "x".repeat(5_000);
    context.record_observation("t1", "scout", TaskOutcome::Success, &long);

    let store = LedgerStore::open(dir.path(), "run-x");
    let entries = store.read_recent(10);
    assert_eq!(entries.len(), 1);
    let line = serde_json::to_string(&entries[0]).unwrap();
    // 800 chars plus the ellipsis marker
    assert!(line.len() < 1_000);
}

#[test]
fn test_unwritable_dir_degrades_to_noop() {
    // A file where the runs directory should be makes create_dir_all fail.
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("runs"), "not a directory").unwrap();

    let context = SharedContext::open(dir.path(), "run-x", ContextMode::SharedRead, 20);
    context.record_observation("t1", "scout", TaskOutcome::Success, "done");
    assert!(context.packet_for(&envelope("run-x", "t2")).contains("run: run-x"));
}
