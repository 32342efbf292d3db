//! Append-only shared-context ledger.
//!
//! One JSONL file per run records dispatches, observations, and coordinator
//! decisions. Children receive a digest of recent entries as a handoff packet
//! appended to their task. Ledger I/O is best-effort: any failure degrades to
//! a no-op store and never fails the call.

mod entry;
mod packet;
mod store;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use entry::{EntryKind, HandoffEnvelope, LedgerEntry, TaskOutcome};
pub use packet::build_packet;
pub use store::LedgerStore;

use crate::utils::string::truncate_chars;

pub const OBSERVATION_SUMMARY_MAX_CHARS: usize = 800;
pub const DECISION_SUMMARY_MAX_CHARS: usize = 1000;
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// How much shared context a child sees and how much the run writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextMode {
    Isolated,
    #[default]
    SharedRead,
    SharedWrite,
}

impl ContextMode {
    pub fn writes_entries(&self) -> bool {
        !matches!(self, Self::Isolated)
    }

    pub fn allows_decisions(&self) -> bool {
        matches!(self, Self::SharedWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::SharedRead => "shared-read",
            Self::SharedWrite => "shared-write",
        }
    }
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "isolated" => Ok(Self::Isolated),
            "shared-read" => Ok(Self::SharedRead),
            "shared-write" => Ok(Self::SharedWrite),
            other => Err(format!("unknown context mode: {other}")),
        }
    }
}

/// Mode-aware facade over the per-run ledger store.
pub struct SharedContext {
    mode: ContextMode,
    limit: usize,
    store: LedgerStore,
}

impl SharedContext {
    pub fn open(memory_dir: &Path, run_id: &str, mode: ContextMode, limit: usize) -> Self {
        let store = if mode.writes_entries() {
            LedgerStore::open(memory_dir, run_id)
        } else {
            LedgerStore::noop(run_id)
        };
        Self { mode, limit, store }
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn record_dispatch(&self, envelope: &HandoffEnvelope) {
        if self.mode.writes_entries() {
            self.store.append_dispatch(envelope, self.mode);
        }
    }

    pub fn record_observation(&self, task_id: &str, agent: &str, outcome: TaskOutcome, summary: &str) {
        if self.mode.writes_entries() {
            let summary = truncate_chars(summary, OBSERVATION_SUMMARY_MAX_CHARS);
            self.store.append_observation(task_id, agent, outcome, &summary);
        }
    }

    pub fn record_decision(&self, task_id: &str, coordinator: &str, summary: &str) {
        if self.mode.allows_decisions() {
            let summary = truncate_chars(summary, DECISION_SUMMARY_MAX_CHARS);
            self.store.append_decision(task_id, coordinator, &summary);
        }
    }

    /// Handoff packet for one child dispatch; empty in isolated mode.
    pub fn packet_for(&self, envelope: &HandoffEnvelope) -> String {
        if !self.mode.writes_entries() {
            return String::new();
        }
        let recent = self.store.read_recent(self.limit);
        build_packet(self.mode, envelope, &recent)
    }
}
