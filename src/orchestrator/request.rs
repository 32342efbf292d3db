//! Consumer-facing tool-call input and output shapes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::child::ChildResult;
use crate::error::{CoordinatorError, Result};
use crate::gate::{GateParams, PhaseGate};
use crate::topology::{ExecutionPlan, TaskSpec, TopologyDecision};
use crate::worktree::{IntegrationReport, IsolationMode};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorRequest {
    // Exactly one of: {agent, task}, tasks, chain.
    pub agent: Option<String>,
    pub task: Option<String>,
    pub tasks: Option<Vec<TaskRequest>>,
    pub chain: Option<Vec<TaskRequest>>,

    pub agent_scope: Option<String>,
    pub context_mode: Option<String>,
    pub execution_isolation: Option<String>,
    pub topology_policy: Option<String>,
    pub shared_context_limit: Option<usize>,
    pub memory_dir: Option<PathBuf>,
    pub worktree_base_dir: Option<PathBuf>,
    pub phase_name: Option<String>,
    pub require_phase_smoke: Option<bool>,
    pub phase_smoke_commands: Option<Vec<String>>,
    pub phase_smoke_retries: Option<u32>,
    pub phase_max_fix_attempts: Option<u32>,
    pub confirm_project_agents: Option<bool>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub agent: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl From<TaskRequest> for TaskSpec {
    fn from(request: TaskRequest) -> Self {
        TaskSpec {
            agent: request.agent,
            task: request.task,
            cwd: request.cwd,
        }
    }
}

impl CoordinatorRequest {
    /// Validate the mode selection: exactly one of single, tasks, or chain.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        let single = match (&self.agent, &self.task) {
            (Some(agent), Some(task)) => Some(TaskSpec::new(agent.clone(), task.clone())),
            (None, None) => None,
            _ => {
                return Err(CoordinatorError::InvalidInput(
                    "single mode requires both agent and task".into(),
                ));
            }
        };

        let provided = [
            single.is_some(),
            self.tasks.is_some(),
            self.chain.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        if provided != 1 {
            return Err(CoordinatorError::InvalidInput(
                "exactly one of {agent, task}, tasks[], or chain[] must be provided".into(),
            ));
        }

        if let Some(task) = single {
            return Ok(ExecutionPlan::Single(task));
        }
        if let Some(tasks) = &self.tasks {
            if tasks.is_empty() {
                return Err(CoordinatorError::InvalidInput("tasks[] must not be empty".into()));
            }
            return Ok(ExecutionPlan::Parallel(
                tasks.iter().cloned().map(TaskSpec::from).collect(),
            ));
        }
        if let Some(chain) = &self.chain {
            if chain.is_empty() {
                return Err(CoordinatorError::InvalidInput("chain[] must not be empty".into()));
            }
            return Ok(ExecutionPlan::Chain(
                chain.iter().cloned().map(TaskSpec::from).collect(),
            ));
        }
        Err(CoordinatorError::InvalidInput(
            "exactly one of {agent, task}, tasks[], or chain[] must be provided".into(),
        ))
    }

    pub fn gate_params(&self) -> GateParams {
        GateParams {
            phase_name: self.phase_name.clone(),
            require_smoke: self.require_phase_smoke.unwrap_or(false),
            smoke_commands: self.phase_smoke_commands.clone().unwrap_or_default(),
            smoke_retries: self.phase_smoke_retries,
            max_fix_attempts: self.phase_max_fix_attempts,
        }
    }
}

/// Machine-readable state preserved alongside the result text.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetails {
    pub run_id: String,
    pub topology: TopologyDecision,
    pub isolation: IsolationMode,
    pub gate: PhaseGate,
    pub worktrees: Vec<IntegrationReport>,
    pub results: Vec<ChildResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorOutcome {
    pub text: String,
    /// Set when the run failed after dispatching began; the details record
    /// still reflects everything that happened up to the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: RunDetails,
}

impl CoordinatorOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
