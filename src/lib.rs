pub mod agents;
pub mod budget;
pub mod child;
pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod git;
pub mod ledger;
pub mod monitor;
pub mod orchestrator;
pub mod topology;
pub mod utils;
pub mod worktree;

pub use agents::{AgentCatalog, AgentDefinition, AgentScope, AgentSource};
pub use budget::ExecutionBudget;
pub use child::{ChildDriver, ChildResult, StopKind};
pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, Result};
pub use gate::{PhaseGate, GateStatus};
pub use ledger::{ContextMode, SharedContext};
pub use monitor::{CoordinatorMonitor, RunPhase};
pub use orchestrator::{
    Coordinator, CoordinatorOutcome, CoordinatorRequest, NullSink, RunUpdate, TaskRequest,
    UpdateSink,
};
pub use topology::{ExecutionPlan, TaskSpec, TopologyDecision, TopologyMode, TopologyPolicy};
pub use worktree::{IsolationMode, IsolationRequest, WorktreeSession};
