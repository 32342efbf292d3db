//! Request scoring. Weights and thresholds here are deliberately simple
//! product decisions; keep them in one place and easy to edit.

use super::{ExecutionPlan, TopologyDecision, TopologyMode, TopologyPolicy};

/// Keywords that mark a task as risk-bearing wherever they appear.
pub const RISK_KEYWORDS: &[&str] = &[
    "migration",
    "database",
    "schema",
    "auth",
    "security",
    "payment",
    "delete",
    "production",
    "infra",
    "refactor",
];

const SCORE_MIN: u8 = 1;
const SCORE_MAX: u8 = 10;
const HIGH_SCORE: u8 = 7;
const LONG_TASK_CHARS: usize = 300;
const MANY_AGENTS: u32 = 4;

fn clamp_score(value: i64) -> u8 {
    value.clamp(SCORE_MIN as i64, SCORE_MAX as i64) as u8
}

/// Score a requested plan and derive the recommended topology.
///
/// The returned decision has `selected == requested`; policy conversion is a
/// separate step.
pub fn score_plan(plan: &ExecutionPlan, policy: TopologyPolicy) -> TopologyDecision {
    let requested = plan.mode();
    let tasks = plan.tasks();
    let estimated_agents = tasks.len().max(1) as u32;

    let avg_task_len = if tasks.is_empty() {
        0.0
    } else {
        tasks.iter().map(|t| t.task.len()).sum::<usize>() as f64 / tasks.len() as f64
    };

    let chain_bonus = if requested == TopologyMode::Chain { 1.0 } else { 0.0 };
    let complexity = clamp_score(
        (estimated_agents as f64 + avg_task_len / 120.0 + chain_bonus).round() as i64,
    );

    let hits: usize = tasks
        .iter()
        .map(|t| {
            let lowered = t.task.to_lowercase();
            RISK_KEYWORDS.iter().filter(|k| lowered.contains(*k)).count()
        })
        .sum();
    let risk = if hits == 0 {
        SCORE_MIN
    } else {
        clamp_score(1 + 2 * hits as i64)
    };

    let coupling = match requested {
        TopologyMode::Chain => 8,
        TopologyMode::Parallel => 4,
        TopologyMode::Single => 2,
    };

    let mut penalty: i64 = 0;
    if avg_task_len > LONG_TASK_CHARS as f64 {
        penalty += 2;
    }
    if risk >= HIGH_SCORE {
        penalty += 2;
    }
    if estimated_agents > MANY_AGENTS {
        penalty += 1;
    }
    let confidence = clamp_score(8 - penalty);

    let recommended = if complexity >= HIGH_SCORE || risk >= HIGH_SCORE || coupling >= HIGH_SCORE {
        TopologyMode::Chain
    } else if estimated_agents >= 2 && coupling <= 5 {
        TopologyMode::Parallel
    } else {
        TopologyMode::Single
    };

    let mut decision = TopologyDecision {
        complexity,
        risk,
        coupling,
        confidence,
        estimated_agents,
        requested,
        recommended,
        selected: requested,
        policy,
        reasons: Vec::new(),
    };
    decision.push_reason(format!(
        "scored: complexity {complexity}, risk {risk}, coupling {coupling}, confidence {confidence} over {estimated_agents} agent(s)"
    ));
    decision.push_reason(format!("recommended topology: {recommended}"));
    decision
}
