//! Coordinator monitor: per-run observable state and compact status tokens
//! for a downstream status line.

mod inspect;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use inspect::{reduce, InspectorAction, InspectorState};

/// How long finished runs keep contributing `done`/`err` tokens.
pub const COMPLETION_WINDOW_MS: i64 = 5_000;
/// At most this many runs appear in the status line.
pub const MAX_STATUS_TOKENS: usize = 3;
/// Finished runs older than this are pruned outright.
const STALE_AFTER_MS: i64 = 60_000;
/// Upper bound on retained finished runs.
const MAX_FINISHED_RUNS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Starting,
    Dispatch,
    Running,
    Finalizing,
    Done,
    Error,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Pending,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSlot {
    pub agent: String,
    pub task: String,
    pub status: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mirror of the phase gate surfaced to consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceSnapshot {
    pub gates: String,
    pub smoke_attempts: u32,
    pub smoke_fix_attempts: u32,
    #[serde(default)]
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorRun {
    pub id: u64,
    pub run_id: String,
    pub mode: String,
    pub phase: RunPhase,
    pub agents: Vec<AgentSlot>,
    pub parallel_running: u32,
    #[serde(default)]
    pub governance: GovernanceSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<i64>,
}

#[derive(Default)]
struct MonitorState {
    next_id: u64,
    runs: Vec<CoordinatorRun>,
}

/// Aggregates run state. All methods are called from the orchestrator;
/// the lock only guards against concurrent readers of the status line.
#[derive(Default)]
pub struct CoordinatorMonitor {
    state: Mutex<MonitorState>,
}

impl CoordinatorMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&self, run_id: &str, mode: &str, agents: Vec<AgentSlot>) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.runs.push(CoordinatorRun {
            id,
            run_id: run_id.to_string(),
            mode: mode.to_string(),
            phase: RunPhase::Starting,
            agents,
            parallel_running: 0,
            governance: GovernanceSnapshot::default(),
            error: None,
            finished_at_ms: None,
        });
        id
    }

    pub fn set_phase(&self, id: u64, phase: RunPhase) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == id) {
            run.phase = phase;
        }
    }

    pub fn set_parallel_running(&self, id: u64, running: u32) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == id) {
            run.parallel_running = running;
        }
    }

    pub fn update_agent(&self, id: u64, index: usize, status: AgentState, error: Option<String>) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == id)
            && let Some(slot) = run.agents.get_mut(index)
        {
            slot.status = status;
            slot.error = error;
        }
    }

    pub fn set_governance(&self, id: u64, governance: GovernanceSnapshot) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == id) {
            run.governance = governance;
        }
    }

    /// Finalize a run exactly once; later calls are ignored.
    pub fn finish_run(&self, id: u64, error: Option<String>, now_ms: i64) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == id) {
            if run.phase.is_terminal() {
                return;
            }
            run.phase = if error.is_some() {
                RunPhase::Error
            } else {
                RunPhase::Done
            };
            run.error = error;
            run.finished_at_ms = Some(now_ms);
            run.parallel_running = 0;
        }
    }

    pub fn run(&self, id: u64) -> Option<CoordinatorRun> {
        self.state.lock().runs.iter().find(|r| r.id == id).cloned()
    }

    pub fn runs(&self) -> Vec<CoordinatorRun> {
        self.state.lock().runs.clone()
    }

    /// Compact status line: active runs as `c<id>:a<total>[:p<running>]`,
    /// recently finished runs as `c<id>:done`/`c<id>:err`, nothing once the
    /// completion window has passed.
    pub fn status_token(&self, now_ms: i64) -> Option<String> {
        let mut state = self.state.lock();
        prune(&mut state, now_ms);

        let active: Vec<&CoordinatorRun> = state
            .runs
            .iter()
            .filter(|r| !r.phase.is_terminal())
            .collect();

        let tokens: Vec<String> = if !active.is_empty() {
            let skip = active.len().saturating_sub(MAX_STATUS_TOKENS);
            active
                .iter()
                .skip(skip)
                .map(|r| {
                    let mut token = format!("c{}:a{}", r.id, r.agents.len());
                    if r.parallel_running > 0 {
                        token.push_str(&format!(":p{}", r.parallel_running));
                    }
                    token
                })
                .collect()
        } else {
            let recent: Vec<&CoordinatorRun> = state
                .runs
                .iter()
                .filter(|r| {
                    r.finished_at_ms
                        .is_some_and(|t| now_ms - t <= COMPLETION_WINDOW_MS)
                })
                .collect();
            let skip = recent.len().saturating_sub(MAX_STATUS_TOKENS);
            recent
                .iter()
                .skip(skip)
                .map(|r| match r.phase {
                    RunPhase::Error => format!("c{}:err", r.id),
                    _ => format!("c{}:done", r.id),
                })
                .collect()
        };

        if tokens.is_empty() {
            None
        } else {
            Some(tokens.join(" | "))
        }
    }
}

fn prune(state: &mut MonitorState, now_ms: i64) {
    state.runs.retain(|r| {
        !r.phase.is_terminal()
            || r.finished_at_ms
                .is_some_and(|t| now_ms - t <= STALE_AFTER_MS)
    });

    let finished = state.runs.iter().filter(|r| r.phase.is_terminal()).count();
    if finished > MAX_FINISHED_RUNS {
        let mut to_drop = finished - MAX_FINISHED_RUNS;
        state.runs.retain(|r| {
            if r.phase.is_terminal() && to_drop > 0 {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(agent: &str) -> AgentSlot {
        AgentSlot {
            agent: agent.into(),
            task: "task".into(),
            status: AgentState::Pending,
            step: None,
            error: None,
        }
    }

    #[test]
    fn test_active_token_shape() {
        let monitor = CoordinatorMonitor::new();
        let id = monitor.begin_run("run-1", "parallel", vec![slot("a"), slot("b")]);
        monitor.set_phase(id, RunPhase::Running);
        assert_eq!(monitor.status_token(0).unwrap(), "c1:a2");

        monitor.set_parallel_running(id, 2);
        assert_eq!(monitor.status_token(0).unwrap(), "c1:a2:p2");
    }

    #[test]
    fn test_done_token_within_window() {
        let monitor = CoordinatorMonitor::new();
        let id = monitor.begin_run("run-1", "single", vec![slot("a")]);
        monitor.finish_run(id, None, 1_000);
        assert_eq!(monitor.status_token(2_000).unwrap(), "c1:done");
    }

    #[test]
    fn test_err_token() {
        let monitor = CoordinatorMonitor::new();
        let id = monitor.begin_run("run-1", "single", vec![slot("a")]);
        monitor.finish_run(id, Some("boom".into()), 1_000);
        assert_eq!(monitor.status_token(2_000).unwrap(), "c1:err");
    }

    #[test]
    fn test_token_clears_after_window() {
        let monitor = CoordinatorMonitor::new();
        let id = monitor.begin_run("run-1", "single", vec![slot("a")]);
        monitor.finish_run(id, None, 1_000);
        assert!(monitor.status_token(1_000 + COMPLETION_WINDOW_MS + 1).is_none());
    }

    #[test]
    fn test_at_most_three_tokens_newest_last() {
        let monitor = CoordinatorMonitor::new();
        for i in 0..5 {
            monitor.begin_run(&format!("run-{i}"), "single", vec![slot("a")]);
        }
        let token = monitor.status_token(0).unwrap();
        assert_eq!(token, "c3:a1 | c4:a1 | c5:a1");
    }

    #[test]
    fn test_finish_run_is_idempotent() {
        let monitor = CoordinatorMonitor::new();
        let id = monitor.begin_run("run-1", "single", vec![slot("a")]);
        monitor.finish_run(id, None, 1_000);
        monitor.finish_run(id, Some("late error".into()), 2_000);
        let run = monitor.run(id).unwrap();
        assert_eq!(run.phase, RunPhase::Done);
        assert!(run.error.is_none());
    }

    #[test]
    fn test_stale_runs_pruned() {
        let monitor = CoordinatorMonitor::new();
        let id = monitor.begin_run("run-1", "single", vec![slot("a")]);
        monitor.finish_run(id, None, 0);
        let _ = monitor.status_token(STALE_AFTER_MS + 1);
        assert!(monitor.runs().is_empty());
    }
}
