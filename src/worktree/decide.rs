//! Shared-vs-worktree decision. Keyword and tool tables are product
//! decisions; keep them centralized here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agents::AgentCatalog;
use crate::topology::ExecutionPlan;

/// Task words that signal write intent.
pub const WRITE_KEYWORDS: &[&str] = &[
    "edit", "modify", "update", "implement", "write", "create", "refactor", "fix", "delete",
    "add", "remove", "patch", "rename", "replace", "migrate", "apply",
];

/// Task words that signal read-only work.
pub const READ_ONLY_KEYWORDS: &[&str] = &[
    "list", "find", "search", "inspect", "read", "analyze", "summarize", "explain", "locate",
    "show", "identify", "scan", "report",
];

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationRequest {
    #[default]
    Auto,
    Shared,
    Worktree,
}

impl FromStr for IsolationRequest {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "shared" => Ok(Self::Shared),
            "worktree" => Ok(Self::Worktree),
            other => Err(format!("unknown execution isolation: {other}")),
        }
    }
}

/// Where execution actually happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    Shared,
    Worktree,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Worktree => "worktree",
        })
    }
}

fn task_words(task: &str) -> Vec<String> {
    task.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_write_intent(task: &str) -> bool {
    let words = task_words(task);
    WRITE_KEYWORDS.iter().any(|k| words.iter().any(|w| w == k))
}

fn looks_read_only(task: &str) -> bool {
    let words = task_words(task);
    let reads = READ_ONLY_KEYWORDS.iter().any(|k| words.iter().any(|w| w == k));
    reads && !has_write_intent(task)
}

fn agent_writes_directly(catalog: &AgentCatalog, agent: &str) -> bool {
    catalog
        .get(agent)
        .map(|a| a.has_direct_write_tool())
        .unwrap_or(false)
}

/// Decide the isolation mode for a plan. Explicit requests always win; auto
/// applies the keyword/tool tables per topology.
pub fn decide_isolation(
    request: IsolationRequest,
    plan: &ExecutionPlan,
    catalog: &AgentCatalog,
) -> (IsolationMode, Vec<String>) {
    let mut reasons = Vec::new();

    match request {
        IsolationRequest::Shared => {
            reasons.push("isolation: shared requested explicitly".to_string());
            return (IsolationMode::Shared, reasons);
        }
        IsolationRequest::Worktree => {
            reasons.push("isolation: worktree requested explicitly".to_string());
            return (IsolationMode::Worktree, reasons);
        }
        IsolationRequest::Auto => {}
    }

    let mode = match plan {
        ExecutionPlan::Parallel(tasks) if tasks.len() <= 1 => {
            reasons.push("isolation: one-task parallel defaulting to shared".to_string());
            IsolationMode::Shared
        }
        ExecutionPlan::Parallel(tasks) => {
            if tasks.iter().all(|t| looks_read_only(&t.task)) {
                reasons.push("isolation: all parallel tasks look read-only, shared".to_string());
                IsolationMode::Shared
            } else {
                reasons.push("isolation: parallel tasks with write intent, worktree".to_string());
                IsolationMode::Worktree
            }
        }
        ExecutionPlan::Chain(tasks) => {
            let writes = tasks.iter().any(|t| {
                has_write_intent(&t.task) || agent_writes_directly(catalog, &t.agent)
            });
            if writes {
                reasons.push("isolation: chain carries write intent, worktree".to_string());
                IsolationMode::Worktree
            } else {
                reasons.push("isolation: read-only chain, shared".to_string());
                IsolationMode::Shared
            }
        }
        ExecutionPlan::Single(task) => {
            if has_write_intent(&task.task) && agent_writes_directly(catalog, &task.agent) {
                reasons.push(
                    "isolation: single task writes with a write-capable agent, worktree"
                        .to_string(),
                );
                IsolationMode::Worktree
            } else {
                reasons.push("isolation: single task defaulting to shared".to_string());
                IsolationMode::Shared
            }
        }
    };

    (mode, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentDefinition;
    use crate::topology::TaskSpec;

    fn catalog() -> AgentCatalog {
        AgentCatalog::from_definitions([
            AgentDefinition {
                name: "scout".into(),
                description: None,
                tools: vec!["read".into(), "grep".into()],
                model: None,
                source: Default::default(),
            },
            AgentDefinition {
                name: "worker".into(),
                description: None,
                tools: vec!["read".into(), "edit".into(), "bash".into()],
                model: None,
                source: Default::default(),
            },
        ])
    }

    #[test]
    fn test_explicit_request_wins() {
        let plan = ExecutionPlan::Single(TaskSpec::new("scout", "List files"));
        let (mode, _) = decide_isolation(IsolationRequest::Worktree, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Worktree);
    }

    #[test]
    fn test_single_read_only_defaults_to_shared() {
        let plan = ExecutionPlan::Single(TaskSpec::new("scout", "List files"));
        let (mode, reasons) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Shared);
        assert!(reasons.iter().any(|r| r.contains("single task defaulting to shared")));
    }

    #[test]
    fn test_single_write_with_capable_agent_isolates() {
        let plan = ExecutionPlan::Single(TaskSpec::new("worker", "Implement the fix"));
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Worktree);
    }

    #[test]
    fn test_single_write_without_write_tools_stays_shared() {
        let plan = ExecutionPlan::Single(TaskSpec::new("scout", "Implement the fix"));
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Shared);
    }

    #[test]
    fn test_parallel_read_only_shared() {
        let plan = ExecutionPlan::Parallel(vec![
            TaskSpec::new("scout", "Search for callers"),
            TaskSpec::new("scout", "Summarize the module"),
        ]);
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Shared);
    }

    #[test]
    fn test_parallel_write_intent_isolates() {
        let plan = ExecutionPlan::Parallel(vec![
            TaskSpec::new("worker", "Implement auth refactor and modify schema"),
            TaskSpec::new("worker", "Implement other change"),
        ]);
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Worktree);
    }

    #[test]
    fn test_one_task_parallel_shared() {
        let plan = ExecutionPlan::Parallel(vec![TaskSpec::new("worker", "Implement change")]);
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Shared);
    }

    #[test]
    fn test_chain_write_capable_agent_isolates() {
        // No write keywords, but the agent carries direct-write tools.
        let plan = ExecutionPlan::Chain(vec![
            TaskSpec::new("scout", "Collect facts"),
            TaskSpec::new("worker", "Act on {previous}"),
        ]);
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Worktree);
    }

    #[test]
    fn test_read_only_chain_shared() {
        let plan = ExecutionPlan::Chain(vec![
            TaskSpec::new("scout", "Collect facts"),
            TaskSpec::new("scout", "Summarize {previous}"),
        ]);
        let (mode, _) = decide_isolation(IsolationRequest::Auto, &plan, &catalog());
        assert_eq!(mode, IsolationMode::Shared);
    }

    #[test]
    fn test_word_boundaries_respected() {
        // "address" contains "add" but is not a write keyword hit
        assert!(!has_write_intent("Report the address of the handler"));
        assert!(has_write_intent("Add a handler"));
    }
}
