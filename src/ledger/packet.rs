use super::entry::{HandoffEnvelope, LedgerEntry};
use super::ContextMode;

const GUIDANCE: &str = "Treat this shared context as the source of truth for prior work in this run. \
Build on it instead of repeating completed steps, and do not duplicate long excerpts from it in your output.";

/// Assemble the handoff packet appended to a child's task.
///
/// Isolated mode produces an empty packet; the caller skips injection entirely.
pub fn build_packet(mode: ContextMode, envelope: &HandoffEnvelope, recent: &[LedgerEntry]) -> String {
    if !mode.writes_entries() {
        return String::new();
    }

    let mut out = String::from("<shared_context>\n");
    out.push_str(&format!("run: {}\n", envelope.run_id));
    out.push_str(&format!("task: {}\n", envelope.task_id));
    if let Some(parent) = &envelope.parent_task_id {
        out.push_str(&format!("parent: {}\n", parent));
    }
    out.push_str(&format!("context mode: {}\n", mode));

    if !recent.is_empty() {
        out.push_str("recent:\n");
        for entry in recent {
            out.push_str("- ");
            out.push_str(&entry.digest());
            out.push('\n');
        }
    }

    out.push_str(GUIDANCE);
    out.push_str("\n</shared_context>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{EntryKind, TaskOutcome};
    use crate::topology::TopologyMode;

    fn envelope() -> HandoffEnvelope {
        HandoffEnvelope {
            run_id: "run-1".into(),
            task_id: "t2".into(),
            parent_task_id: Some("t1".into()),
            agent: "worker".into(),
            task: "Implement".into(),
            mode: TopologyMode::Chain,
            depth: 0,
            created_at_ms: 0,
        }
    }

    fn observation() -> LedgerEntry {
        LedgerEntry {
            entry_id: "e1".into(),
            run_id: "run-1".into(),
            created_at_ms: 1,
            kind: EntryKind::Observation {
                task_id: "t1".into(),
                agent: "scout".into(),
                status: TaskOutcome::Success,
                summary: "found 3 call sites".into(),
            },
        }
    }

    #[test]
    fn test_isolated_packet_is_empty() {
        let packet = build_packet(ContextMode::Isolated, &envelope(), &[observation()]);
        assert!(packet.is_empty());
    }

    #[test]
    fn test_packet_shape() {
        let packet = build_packet(ContextMode::SharedRead, &envelope(), &[observation()]);
        assert!(packet.starts_with("<shared_context>"));
        assert!(packet.ends_with("</shared_context>"));
        assert!(packet.contains("run: run-1"));
        assert!(packet.contains("task: t2"));
        assert!(packet.contains("parent: t1"));
        assert!(packet.contains("- success scout task:t1 found 3 call sites"));
        assert!(packet.contains("source of truth"));
    }

    #[test]
    fn test_packet_without_recent_entries() {
        let packet = build_packet(ContextMode::SharedWrite, &envelope(), &[]);
        assert!(!packet.contains("recent:"));
        assert!(packet.contains("context mode: shared-write"));
    }
}
