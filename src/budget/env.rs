//! Environment encoding of the execution budget.
//!
//! The budget crosses the process boundary as named variables; a child
//! reconstructs the same shape on entry. Readers tolerate missing and
//! malformed values by falling back to root defaults field-by-field.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::ledger::ContextMode;

use super::{ExecutionBudget, DEFAULT_MAX_AGENTS, DEFAULT_MAX_DEPTH, DEFAULT_RUN_WINDOW_MS};

pub const ENV_RUN_ID: &str = "SUBAGENT_RUN_ID";
pub const ENV_DEPTH: &str = "SUBAGENT_DEPTH";
pub const ENV_MAX_DEPTH: &str = "SUBAGENT_MAX_DEPTH";
pub const ENV_ROOT_STARTED_AT_MS: &str = "SUBAGENT_ROOT_STARTED_AT_MS";
pub const ENV_DEADLINE_AT_MS: &str = "SUBAGENT_DEADLINE_AT_MS";
pub const ENV_REMAINING_AGENTS: &str = "SUBAGENT_REMAINING_AGENTS";
pub const ENV_FINGERPRINTS: &str = "SUBAGENT_FINGERPRINTS";
pub const ENV_CAN_SPAWN: &str = "SUBAGENT_CAN_SPAWN";
pub const ENV_CONTEXT_MODE: &str = "SUBAGENT_CONTEXT_MODE";
pub const ENV_CONTEXT_LIMIT: &str = "SUBAGENT_CONTEXT_LIMIT";
pub const ENV_MEMORY_DIR: &str = "SUBAGENT_MEMORY_DIR";

/// Ledger settings carried alongside the budget.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub mode: ContextMode,
    pub limit: usize,
    pub memory_dir: Option<PathBuf>,
}

/// The environment block injected into every child process.
pub fn to_env(budget: &ExecutionBudget, context: &ContextSettings) -> Vec<(String, String)> {
    let fingerprints: Vec<&str> = budget.fingerprints.iter().map(String::as_str).collect();
    let mut vars = vec![
        (ENV_RUN_ID.into(), budget.run_id.clone()),
        (ENV_DEPTH.into(), budget.depth.to_string()),
        (ENV_MAX_DEPTH.into(), budget.max_depth.to_string()),
        (
            ENV_ROOT_STARTED_AT_MS.into(),
            budget.root_started_at_ms.to_string(),
        ),
        (ENV_DEADLINE_AT_MS.into(), budget.deadline_at_ms.to_string()),
        (
            ENV_REMAINING_AGENTS.into(),
            budget.remaining_agents.to_string(),
        ),
        (
            ENV_FINGERPRINTS.into(),
            serde_json::to_string(&fingerprints).unwrap_or_else(|_| "[]".into()),
        ),
        (
            ENV_CAN_SPAWN.into(),
            if budget.can_spawn_children { "1" } else { "0" }.into(),
        ),
        (ENV_CONTEXT_MODE.into(), context.mode.to_string()),
        (ENV_CONTEXT_LIMIT.into(), context.limit.to_string()),
    ];
    if let Some(dir) = &context.memory_dir {
        vars.push((ENV_MEMORY_DIR.into(), dir.display().to_string()));
    }
    vars
}

/// Reconstruct a budget from an environment lookup.
///
/// Returns `None` when no run id is present (this process is a root). Other
/// missing or malformed fields fall back to the defaults a root would use.
pub fn from_env(lookup: impl Fn(&str) -> Option<String>, now_ms: i64) -> Option<ExecutionBudget> {
    let run_id = lookup(ENV_RUN_ID).filter(|v| !v.trim().is_empty())?;

    let depth = parse_or(&lookup, ENV_DEPTH, 0);
    let max_depth = parse_or(&lookup, ENV_MAX_DEPTH, DEFAULT_MAX_DEPTH);
    let root_started_at_ms = parse_or(&lookup, ENV_ROOT_STARTED_AT_MS, now_ms);
    let deadline_at_ms = parse_or(&lookup, ENV_DEADLINE_AT_MS, now_ms + DEFAULT_RUN_WINDOW_MS);
    let remaining_agents = parse_or(&lookup, ENV_REMAINING_AGENTS, DEFAULT_MAX_AGENTS);
    let can_spawn_children = matches!(lookup(ENV_CAN_SPAWN).as_deref(), Some("1") | None);

    let fingerprints: BTreeSet<String> = lookup(ENV_FINGERPRINTS)
        .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
        .map(|v| v.into_iter().collect())
        .unwrap_or_default();

    Some(ExecutionBudget {
        run_id,
        depth,
        max_depth,
        root_started_at_ms,
        deadline_at_ms,
        remaining_agents,
        fingerprints,
        can_spawn_children,
    })
}

/// Budget from the process environment, or a fresh root when absent.
pub fn from_process_env(now_ms: i64) -> ExecutionBudget {
    from_env(|key| std::env::var(key).ok(), now_ms).unwrap_or_else(|| ExecutionBudget::root(now_ms))
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings() -> ContextSettings {
        ContextSettings {
            mode: ContextMode::SharedRead,
            limit: 20,
            memory_dir: Some(PathBuf::from("/tmp/mem")),
        }
    }

    #[test]
    fn test_roundtrip_through_env() {
        let mut budget = ExecutionBudget::root(5_000);
        budget
            .reserve_child("scout", "list files", 0, false, 5_001)
            .unwrap();

        let vars: HashMap<String, String> = to_env(&budget, &settings()).into_iter().collect();
        let back = from_env(|k| vars.get(k).cloned(), 6_000).unwrap();

        assert_eq!(back.run_id, budget.run_id);
        assert_eq!(back.depth, budget.depth);
        assert_eq!(back.deadline_at_ms, budget.deadline_at_ms);
        assert_eq!(back.remaining_agents, budget.remaining_agents);
        assert_eq!(back.fingerprints, budget.fingerprints);
        assert_eq!(back.can_spawn_children, budget.can_spawn_children);
    }

    #[test]
    fn test_missing_run_id_means_root() {
        assert!(from_env(|_| None, 1_000).is_none());
    }

    #[test]
    fn test_malformed_fields_fall_back() {
        let vars: HashMap<String, String> = [
            (ENV_RUN_ID.to_string(), "run-x".to_string()),
            (ENV_DEPTH.to_string(), "not-a-number".to_string()),
            (ENV_FINGERPRINTS.to_string(), "{broken".to_string()),
            (ENV_CAN_SPAWN.to_string(), "0".to_string()),
        ]
        .into();

        let b = from_env(|k| vars.get(k).cloned(), 1_000).unwrap();
        assert_eq!(b.run_id, "run-x");
        assert_eq!(b.depth, 0);
        assert_eq!(b.max_depth, DEFAULT_MAX_DEPTH);
        assert!(b.fingerprints.is_empty());
        assert!(!b.can_spawn_children);
        assert_eq!(b.deadline_at_ms, 1_000 + DEFAULT_RUN_WINDOW_MS);
    }

    #[test]
    fn test_env_block_values() {
        let budget = ExecutionBudget::root(5_000);
        let vars: HashMap<String, String> = to_env(&budget, &settings()).into_iter().collect();
        assert_eq!(vars[ENV_CAN_SPAWN], "1");
        assert_eq!(vars[ENV_FINGERPRINTS], "[]");
        assert_eq!(vars[ENV_CONTEXT_MODE], "shared-read");
        assert_eq!(vars[ENV_MEMORY_DIR], "/tmp/mem");
    }
}
