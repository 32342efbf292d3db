use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Duplicate delegation detected: {agent} was already dispatched this task in run {run_id}")]
    LoopDetected {
        agent: String,
        run_id: String,
        fingerprint: String,
    },

    #[error("Subagent budget exhausted: need {needed}, have {remaining}")]
    BudgetExhausted { needed: u32, remaining: u32 },

    #[error("Delegation depth limit reached ({depth}/{max_depth})")]
    DepthExceeded { depth: u32, max_depth: u32 },

    #[error("Run deadline reached; refusing to spawn")]
    DeadlineReached,

    #[error("Nested delegation blocked: {agent} is not permitted to spawn children")]
    NestedSpawnBlocked { agent: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Worktree error: {message}")]
    Worktree { message: String, path: PathBuf },

    #[error("Worktree integration failed ({lane}: {message})")]
    Integration { lane: String, message: String },

    #[error("Failed to launch child agent: {0}")]
    ChildLaunch(String),

    #[error("{phase} failed: {message}")]
    Execution { phase: String, message: String },

    #[error("Phase smoke gate failed: {0}")]
    SmokeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Guardrail refusals are rendered as tool output rather than killing the process.
    pub fn is_guardrail(&self) -> bool {
        matches!(
            self,
            Self::LoopDetected { .. }
                | Self::BudgetExhausted { .. }
                | Self::DepthExceeded { .. }
                | Self::DeadlineReached
                | Self::NestedSpawnBlocked { .. }
        )
    }
}
