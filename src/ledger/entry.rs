use serde::{Deserialize, Serialize};

use super::ContextMode;
use crate::topology::TopologyMode;

/// Task handoff envelope recorded with every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffEnvelope {
    pub run_id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub agent: String,
    pub task: String,
    pub mode: TopologyMode,
    pub depth: u32,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Error,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One line of the per-run JSONL ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub run_id: String,
    pub created_at_ms: i64,
    #[serde(flatten)]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Dispatch {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_task_id: Option<String>,
        agent: String,
        task: String,
        mode: TopologyMode,
        depth: u32,
        context_mode: ContextMode,
    },
    Observation {
        task_id: String,
        agent: String,
        status: TaskOutcome,
        summary: String,
    },
    Decision {
        task_id: String,
        coordinator: String,
        summary: String,
    },
}

impl LedgerEntry {
    /// One-line digest used in handoff packets.
    pub fn digest(&self) -> String {
        match &self.kind {
            EntryKind::Dispatch { agent, task_id, .. } => {
                format!("dispatch {} task:{}", agent, task_id)
            }
            EntryKind::Observation {
                agent,
                task_id,
                status,
                summary,
            } => format!("{} {} task:{} {}", status.as_str(), agent, task_id, summary),
            EntryKind::Decision {
                coordinator,
                task_id,
                summary,
            } => format!("decision {} task:{} {}", coordinator, task_id, summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind) -> LedgerEntry {
        LedgerEntry {
            entry_id: "e1".into(),
            run_id: "r1".into(),
            created_at_ms: 1,
            kind,
        }
    }

    #[test]
    fn test_roundtrip_dispatch() {
        let e = entry(EntryKind::Dispatch {
            task_id: "t1".into(),
            parent_task_id: None,
            agent: "scout".into(),
            task: "List files".into(),
            mode: TopologyMode::Single,
            depth: 0,
            context_mode: ContextMode::SharedRead,
        });
        let line = serde_json::to_string(&e).unwrap();
        assert!(line.contains("\"type\":\"dispatch\""));
        assert!(line.contains("\"entry_id\":\"e1\""));
        let back: LedgerEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back.run_id, "r1");
        assert!(matches!(back.kind, EntryKind::Dispatch { .. }));
    }

    #[test]
    fn test_digest_observation() {
        let e = entry(EntryKind::Observation {
            task_id: "t2".into(),
            agent: "worker".into(),
            status: TaskOutcome::Error,
            summary: "build broke".into(),
        });
        assert_eq!(e.digest(), "error worker task:t2 build broke");
    }
}
