//! Execution budget shared by every delegation in a run.
//!
//! The budget bounds delegation depth, total agent count, and wall time, and
//! detects duplicate delegations by task fingerprint. It is mutated only by
//! the reserving parent before a spawn and travels to children through the
//! environment block in [`env`].

pub mod env;

use std::collections::BTreeSet;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};
use crate::utils::string::collapse_whitespace;

pub const DEFAULT_MAX_DEPTH: u32 = 2;
pub const DEFAULT_MAX_AGENTS: u32 = 16;
pub const DEFAULT_RUN_WINDOW_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    pub run_id: String,
    pub depth: u32,
    pub max_depth: u32,
    pub root_started_at_ms: i64,
    pub deadline_at_ms: i64,
    pub remaining_agents: u32,
    pub fingerprints: BTreeSet<String>,
    pub can_spawn_children: bool,
}

impl ExecutionBudget {
    /// Fresh budget for a top-level invocation.
    pub fn root(now_ms: i64) -> Self {
        Self {
            run_id: new_run_id(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            root_started_at_ms: now_ms,
            deadline_at_ms: now_ms + DEFAULT_RUN_WINDOW_MS,
            remaining_agents: DEFAULT_MAX_AGENTS,
            fingerprints: BTreeSet::new(),
            can_spawn_children: true,
        }
    }

    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn remaining_time_ms(&self, now_ms: i64) -> i64 {
        self.deadline_at_ms - now_ms
    }

    pub fn deadline_passed(&self, now_ms: i64) -> bool {
        now_ms >= self.deadline_at_ms
    }

    /// Reserve one child plus `reserved_descendants` tokens for its subtree.
    ///
    /// Deducts from this budget and returns the child's budget. The child sees
    /// only its subtree's tokens; `allow_nested` decides whether the child may
    /// itself delegate.
    pub fn reserve_child(
        &mut self,
        agent: &str,
        task: &str,
        reserved_descendants: u32,
        allow_nested: bool,
        now_ms: i64,
    ) -> Result<ExecutionBudget> {
        if self.depth >= self.max_depth {
            return Err(CoordinatorError::DepthExceeded {
                depth: self.depth,
                max_depth: self.max_depth,
            });
        }
        if self.deadline_passed(now_ms) {
            return Err(CoordinatorError::DeadlineReached);
        }

        let fingerprint = task_fingerprint(agent, task);
        if self.fingerprints.contains(&fingerprint) {
            return Err(CoordinatorError::LoopDetected {
                agent: agent.trim().to_string(),
                run_id: self.run_id.clone(),
                fingerprint,
            });
        }

        let needed = 1 + reserved_descendants;
        if self.remaining_agents < needed {
            return Err(CoordinatorError::BudgetExhausted {
                needed,
                remaining: self.remaining_agents,
            });
        }

        self.remaining_agents -= needed;
        self.fingerprints.insert(fingerprint);

        Ok(ExecutionBudget {
            run_id: self.run_id.clone(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            root_started_at_ms: self.root_started_at_ms,
            deadline_at_ms: self.deadline_at_ms,
            remaining_agents: reserved_descendants,
            fingerprints: self.fingerprints.clone(),
            can_spawn_children: allow_nested,
        })
    }
}

/// Duplicate-delegation key for an `(agent, task)` pair.
///
/// Normalization lowercases and collapses whitespace only; semantically
/// equivalent rewordings of the same task evade detection. Known limitation.
pub fn task_fingerprint(agent: &str, task: &str) -> String {
    format!(
        "{}::{}",
        agent.trim().to_lowercase(),
        collapse_whitespace(task).to_lowercase()
    )
}

fn new_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}
