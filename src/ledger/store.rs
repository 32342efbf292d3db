use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::entry::{EntryKind, HandoffEnvelope, LedgerEntry, TaskOutcome};
use super::ContextMode;

const RECENT_LIMIT_MAX: usize = 100;

/// Per-run ledger store. File-backed when the runs directory is writable,
/// otherwise a no-op that still serves empty reads so callers never branch.
pub enum LedgerStore {
    File(FileLedger),
    Noop { run_id: String },
}

pub struct FileLedger {
    path: PathBuf,
    run_id: String,
}

impl LedgerStore {
    /// Open the ledger for `run_id` under `<memory_dir>/runs/`, degrading to
    /// a no-op store on any I/O failure.
    pub fn open(memory_dir: &std::path::Path, run_id: &str) -> Self {
        let runs_dir = memory_dir.join("runs");
        if let Err(e) = fs::create_dir_all(&runs_dir) {
            debug!(dir = %runs_dir.display(), error = %e, "Ledger unavailable, degrading to no-op");
            return Self::noop(run_id);
        }
        let path = runs_dir.join(format!("{run_id}.jsonl"));
        Self::File(FileLedger {
            path,
            run_id: run_id.to_string(),
        })
    }

    pub fn noop(run_id: &str) -> Self {
        Self::Noop {
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::File(f) => &f.run_id,
            Self::Noop { run_id } => run_id,
        }
    }

    pub fn append_dispatch(&self, envelope: &HandoffEnvelope, context_mode: ContextMode) {
        self.append(EntryKind::Dispatch {
            task_id: envelope.task_id.clone(),
            parent_task_id: envelope.parent_task_id.clone(),
            agent: envelope.agent.clone(),
            task: envelope.task.clone(),
            mode: envelope.mode,
            depth: envelope.depth,
            context_mode,
        });
    }

    pub fn append_observation(&self, task_id: &str, agent: &str, status: TaskOutcome, summary: &str) {
        self.append(EntryKind::Observation {
            task_id: task_id.to_string(),
            agent: agent.to_string(),
            status,
            summary: summary.to_string(),
        });
    }

    pub fn append_decision(&self, task_id: &str, coordinator: &str, summary: &str) {
        self.append(EntryKind::Decision {
            task_id: task_id.to_string(),
            coordinator: coordinator.to_string(),
            summary: summary.to_string(),
        });
    }

    fn append(&self, kind: EntryKind) {
        let Self::File(ledger) = self else {
            return;
        };
        let entry = LedgerEntry {
            entry_id: short_id(),
            run_id: ledger.run_id.clone(),
            created_at_ms: Utc::now().timestamp_millis(),
            kind,
        };
        if let Err(e) = ledger.write_line(&entry) {
            debug!(path = %ledger.path.display(), error = %e, "Ledger append dropped");
        }
    }

    /// The most recent entries for this run, in insertion order.
    /// `limit` is clamped to 1..=100. Entries from other runs and unparsable
    /// lines are skipped.
    pub fn read_recent(&self, limit: usize) -> Vec<LedgerEntry> {
        let Self::File(ledger) = self else {
            return Vec::new();
        };
        let limit = limit.clamp(1, RECENT_LIMIT_MAX);
        let file = match fs::File::open(&ledger.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        let mut entries: Vec<LedgerEntry> = BufReader::new(file)
            .lines()
            .map_while(|l| l.ok())
            .filter_map(|line| serde_json::from_str::<LedgerEntry>(&line).ok())
            .filter(|e| e.run_id == ledger.run_id)
            .collect();
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        entries
    }
}

impl FileLedger {
    fn write_line(&self, entry: &LedgerEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyMode;

    fn envelope(run_id: &str, task_id: &str) -> HandoffEnvelope {
        HandoffEnvelope {
            run_id: run_id.into(),
            task_id: task_id.into(),
            parent_task_id: None,
            agent: "scout".into(),
            task: "List files".into(),
            mode: TopologyMode::Single,
            depth: 0,
            created_at_ms: 0,
        }
    }

    #[test]
    fn test_append_and_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "run-a");
        store.append_dispatch(&envelope("run-a", "t1"), ContextMode::SharedRead);
        store.append_observation("t1", "scout", TaskOutcome::Success, "done");

        let entries = store.read_recent(10);
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].kind, EntryKind::Dispatch { .. }));
        assert!(matches!(entries[1].kind, EntryKind::Observation { .. }));
    }

    #[test]
    fn test_read_filters_other_runs() {
        let dir = tempfile::tempdir().unwrap();
        let a = LedgerStore::open(dir.path(), "run-a");
        let b = LedgerStore::open(dir.path(), "run-b");
        a.append_observation("t1", "scout", TaskOutcome::Success, "a");
        b.append_observation("t9", "worker", TaskOutcome::Error, "b");

        let entries = a.read_recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run_id, "run-a");
    }

    #[test]
    fn test_read_recent_clamps_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "run-a");
        for i in 0..5 {
            store.append_observation(&format!("t{i}"), "scout", TaskOutcome::Success, "ok");
        }
        // limit 0 is clamped up to 1
        assert_eq!(store.read_recent(0).len(), 1);
        assert_eq!(store.read_recent(3).len(), 3);
        // the newest entries win
        let last = store.read_recent(1);
        match &last[0].kind {
            EntryKind::Observation { task_id, .. } => assert_eq!(task_id, "t4"),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn test_noop_store_reads_empty() {
        let store = LedgerStore::noop("run-a");
        store.append_observation("t1", "scout", TaskOutcome::Success, "ok");
        assert!(store.read_recent(10).is_empty());
    }
}
