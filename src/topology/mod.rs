//! Topology policy engine.
//!
//! Scores a delegation request, recommends a topology, and converts the plan
//! when the policy allows and the conversion is provably safe. The scoring
//! constants are product decisions, kept centralized in [`score`].

mod convert;
mod score;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use convert::apply_policy;
pub use score::{score_plan, RISK_KEYWORDS};

/// Literal placeholder replaced with the prior step's output in a chain.
pub const PREVIOUS_PLACEHOLDER: &str = "{previous}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    Single,
    Parallel,
    Chain,
}

impl TopologyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Parallel => "parallel",
            Self::Chain => "chain",
        }
    }
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "parallel" => Ok(Self::Parallel),
            "chain" => Ok(Self::Chain),
            other => Err(format!("unknown topology mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyPolicy {
    #[default]
    Advisory,
    Auto,
}

impl FromStr for TopologyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown topology policy: {other}")),
        }
    }
}

/// One planned delegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub agent: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl TaskSpec {
    pub fn new(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            cwd: None,
        }
    }

    pub fn depends_on_previous(&self) -> bool {
        self.task.contains(PREVIOUS_PLACEHOLDER)
    }
}

/// The shape of delegation for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPlan {
    Single(TaskSpec),
    Parallel(Vec<TaskSpec>),
    Chain(Vec<TaskSpec>),
}

impl ExecutionPlan {
    pub fn mode(&self) -> TopologyMode {
        match self {
            Self::Single(_) => TopologyMode::Single,
            Self::Parallel(_) => TopologyMode::Parallel,
            Self::Chain(_) => TopologyMode::Chain,
        }
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        match self {
            Self::Single(t) => std::slice::from_ref(t),
            Self::Parallel(ts) | Self::Chain(ts) => ts,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn any_depends_on_previous(&self) -> bool {
        self.tasks().iter().any(TaskSpec::depends_on_previous)
    }
}

/// The scored decision plus the policy's conversion trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyDecision {
    pub complexity: u8,
    pub risk: u8,
    pub coupling: u8,
    pub confidence: u8,
    pub estimated_agents: u32,
    pub requested: TopologyMode,
    pub recommended: TopologyMode,
    pub selected: TopologyMode,
    pub policy: TopologyPolicy,
    pub reasons: Vec<String>,
}

impl TopologyDecision {
    pub fn push_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// Compact summary used as the topology gate detail.
    pub fn summary(&self) -> String {
        format!(
            "{} selected (requested {}, recommended {}; complexity {}, risk {}, coupling {}, confidence {})",
            self.selected,
            self.requested,
            self.recommended,
            self.complexity,
            self.risk,
            self.coupling,
            self.confidence
        )
    }
}
