//! Coordinator settings resolved from call inputs with environment fallbacks.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::agents::AgentScope;
use crate::error::{CoordinatorError, Result};
use crate::ledger::{ContextMode, DEFAULT_RECENT_LIMIT};
use crate::topology::TopologyPolicy;
use crate::worktree::IsolationRequest;

pub const ENV_TOPOLOGY_POLICY: &str = "SUBAGENT_TOPOLOGY_POLICY";
pub const ENV_EXECUTION_ISOLATION: &str = "SUBAGENT_EXECUTION_ISOLATION";
pub const ENV_WORKTREE_BASE_DIR: &str = "SUBAGENT_WORKTREE_BASE_DIR";

/// Program the child driver launches. Tests substitute a stub.
pub const DEFAULT_CHILD_PROGRAM: &str = "pi";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub topology_policy: TopologyPolicy,
    pub isolation: IsolationRequest,
    pub context_mode: ContextMode,
    pub context_limit: usize,
    pub memory_dir: Option<PathBuf>,
    pub worktree_base_dir: Option<PathBuf>,
    pub agent_scope: AgentScope,
    pub confirm_project_agents: bool,
    pub child_program: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            topology_policy: TopologyPolicy::default(),
            isolation: IsolationRequest::default(),
            context_mode: ContextMode::default(),
            context_limit: DEFAULT_RECENT_LIMIT,
            memory_dir: None,
            worktree_base_dir: None,
            agent_scope: AgentScope::default(),
            confirm_project_agents: false,
            child_program: DEFAULT_CHILD_PROGRAM.to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Resolve settings from optional call inputs, falling back to the
    /// process environment, then to defaults. Invalid call inputs are hard
    /// errors; invalid environment values are warnings.
    pub fn resolve(
        topology_policy: Option<&str>,
        isolation: Option<&str>,
        context_mode: Option<&str>,
        context_limit: Option<usize>,
        memory_dir: Option<PathBuf>,
        worktree_base_dir: Option<PathBuf>,
        agent_scope: Option<&str>,
        confirm_project_agents: Option<bool>,
    ) -> Result<Self> {
        let mut config = Self::default();

        config.topology_policy = resolve_field(
            topology_policy,
            ENV_TOPOLOGY_POLICY,
            config.topology_policy,
            "topology policy",
        )?;
        config.isolation = resolve_field(
            isolation,
            ENV_EXECUTION_ISOLATION,
            config.isolation,
            "execution isolation",
        )?;

        if let Some(mode) = context_mode {
            config.context_mode = mode
                .parse()
                .map_err(CoordinatorError::InvalidInput)?;
        }
        if let Some(limit) = context_limit {
            config.context_limit = limit.clamp(1, 100);
        }

        config.memory_dir = memory_dir;
        config.worktree_base_dir = worktree_base_dir.or_else(|| {
            std::env::var(ENV_WORKTREE_BASE_DIR)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        });

        if let Some(scope) = agent_scope {
            config.agent_scope = scope.parse().map_err(CoordinatorError::InvalidInput)?;
        }
        if let Some(confirm) = confirm_project_agents {
            config.confirm_project_agents = confirm;
        }

        Ok(config)
    }
}

fn resolve_field<T: FromStr<Err = String> + Copy>(
    input: Option<&str>,
    env_key: &str,
    default: T,
    what: &str,
) -> Result<T> {
    if let Some(raw) = input {
        return raw
            .parse()
            .map_err(|e: String| CoordinatorError::InvalidInput(e));
    }
    if let Ok(raw) = std::env::var(env_key)
        && !raw.trim().is_empty()
    {
        match raw.parse() {
            Ok(value) => return Ok(value),
            Err(e) => warn!(env = env_key, error = %e, "Ignoring invalid {what} from environment"),
        }
    }
    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.topology_policy, TopologyPolicy::Advisory);
        assert_eq!(config.isolation, IsolationRequest::Auto);
        assert_eq!(config.context_mode, ContextMode::SharedRead);
        assert_eq!(config.child_program, "pi");
    }

    #[test]
    fn test_explicit_inputs_override() {
        let config = CoordinatorConfig::resolve(
            Some("auto"),
            Some("worktree"),
            Some("shared-write"),
            Some(500),
            None,
            None,
            Some("project"),
            Some(true),
        )
        .unwrap();
        assert_eq!(config.topology_policy, TopologyPolicy::Auto);
        assert_eq!(config.isolation, IsolationRequest::Worktree);
        assert_eq!(config.context_mode, ContextMode::SharedWrite);
        // limits are clamped to the ledger's read window
        assert_eq!(config.context_limit, 100);
        assert!(config.confirm_project_agents);
    }

    #[test]
    fn test_invalid_input_is_an_error() {
        let err = CoordinatorConfig::resolve(
            Some("aggressive"),
            None,
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidInput(_)));
    }
}
