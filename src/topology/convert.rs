//! Policy-driven plan conversion. Only provably safe conversions are applied;
//! everything else keeps the requested topology with a note in the trail.

use super::{ExecutionPlan, TopologyDecision, TopologyMode, TopologyPolicy};

/// Apply the topology policy to a scored decision.
///
/// Advisory policy always keeps the requested mode. Auto policy converts the
/// plan when the recommendation differs and a safe conversion exists.
pub fn apply_policy(
    mut decision: TopologyDecision,
    plan: ExecutionPlan,
) -> (TopologyDecision, ExecutionPlan) {
    if decision.policy == TopologyPolicy::Advisory {
        if decision.recommended != decision.requested {
            decision.push_reason(format!(
                "advisory policy: keeping requested {} (recommended {})",
                decision.requested, decision.recommended
            ));
        }
        return (decision, plan);
    }

    if decision.recommended == decision.requested {
        return (decision, plan);
    }

    match (plan, decision.recommended) {
        // Higher-coupling downgrade is always safe.
        (ExecutionPlan::Parallel(tasks), TopologyMode::Chain) => {
            decision.selected = TopologyMode::Chain;
            decision.push_reason("auto policy: converted parallel plan to chain".to_string());
            (decision, ExecutionPlan::Chain(tasks))
        }
        (ExecutionPlan::Single(task), TopologyMode::Chain) => {
            decision.selected = TopologyMode::Chain;
            decision.push_reason("auto policy: wrapped single task as one-step chain".to_string());
            (decision, ExecutionPlan::Chain(vec![task]))
        }
        (ExecutionPlan::Chain(tasks), TopologyMode::Parallel)
            if tasks.len() > 1 && !tasks.iter().any(|t| t.depends_on_previous()) =>
        {
            decision.selected = TopologyMode::Parallel;
            decision.push_reason(
                "auto policy: chain has no step dependencies, converted to parallel".to_string(),
            );
            (decision, ExecutionPlan::Parallel(tasks))
        }
        (ExecutionPlan::Parallel(mut tasks), TopologyMode::Single) if tasks.len() == 1 => {
            let task = tasks.remove(0);
            decision.selected = TopologyMode::Single;
            decision.push_reason("auto policy: one-task parallel collapsed to single".to_string());
            (decision, ExecutionPlan::Single(task))
        }
        (ExecutionPlan::Chain(mut tasks), TopologyMode::Single)
            if tasks.len() == 1 && !tasks[0].depends_on_previous() =>
        {
            let task = tasks.remove(0);
            decision.selected = TopologyMode::Single;
            decision.push_reason("auto policy: one-step chain collapsed to single".to_string());
            (decision, ExecutionPlan::Single(task))
        }
        (plan, recommended) => {
            decision.push_reason(format!(
                "no safe topology conversion from {} to {}; keeping {}",
                decision.requested, recommended, decision.requested
            ));
            (decision, plan)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{score_plan, TaskSpec};

    fn decided(plan: &ExecutionPlan, policy: TopologyPolicy) -> TopologyDecision {
        score_plan(plan, policy)
    }

    #[test]
    fn test_advisory_never_converts() {
        let plan = ExecutionPlan::Chain(vec![
            TaskSpec::new("a", "Summarize one"),
            TaskSpec::new("b", "Summarize two"),
        ]);
        let mut d = decided(&plan, TopologyPolicy::Advisory);
        d.recommended = TopologyMode::Parallel;
        let (d, plan) = apply_policy(d, plan);
        assert_eq!(d.selected, TopologyMode::Chain);
        assert_eq!(plan.mode(), TopologyMode::Chain);
        assert!(d.reasons.iter().any(|r| r.contains("advisory policy")));
    }

    #[test]
    fn test_auto_parallel_to_chain() {
        let plan = ExecutionPlan::Parallel(vec![
            TaskSpec::new("a", "Run the database migration"),
            TaskSpec::new("b", "Update auth schema"),
        ]);
        let d = decided(&plan, TopologyPolicy::Auto);
        assert_eq!(d.recommended, TopologyMode::Chain);
        let (d, plan) = apply_policy(d, plan);
        assert_eq!(d.selected, TopologyMode::Chain);
        assert_eq!(plan.mode(), TopologyMode::Chain);
    }

    #[test]
    fn test_auto_chain_to_parallel_without_dependencies() {
        let plan = ExecutionPlan::Chain(vec![
            TaskSpec::new("a", "Summarize one"),
            TaskSpec::new("b", "Summarize two"),
        ]);
        let mut d = decided(&plan, TopologyPolicy::Auto);
        d.recommended = TopologyMode::Parallel;
        let (d, plan) = apply_policy(d, plan);
        assert_eq!(d.selected, TopologyMode::Parallel);
        assert_eq!(plan.mode(), TopologyMode::Parallel);
    }

    #[test]
    fn test_auto_keeps_chain_with_previous_dependency() {
        let plan = ExecutionPlan::Chain(vec![
            TaskSpec::new("scout", "Collect facts"),
            TaskSpec::new("worker", "Implement using {previous}"),
        ]);
        let mut d = decided(&plan, TopologyPolicy::Auto);
        d.recommended = TopologyMode::Parallel;
        let (d, plan) = apply_policy(d, plan);
        assert_eq!(d.selected, TopologyMode::Chain);
        assert_eq!(plan.mode(), TopologyMode::Chain);
        assert!(d
            .reasons
            .iter()
            .any(|r| r.contains("no safe topology conversion")));
    }

    #[test]
    fn test_auto_single_wraps_into_chain() {
        let plan = ExecutionPlan::Single(TaskSpec::new("worker", "Delete production database"));
        let d = decided(&plan, TopologyPolicy::Auto);
        assert_eq!(d.recommended, TopologyMode::Chain);
        let (d, plan) = apply_policy(d, plan);
        assert_eq!(d.selected, TopologyMode::Chain);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.mode(), TopologyMode::Chain);
    }

    #[test]
    fn test_one_task_parallel_collapses_to_single() {
        let plan = ExecutionPlan::Parallel(vec![TaskSpec::new("scout", "List files")]);
        let mut d = decided(&plan, TopologyPolicy::Auto);
        d.recommended = TopologyMode::Single;
        let (d, plan) = apply_policy(d, plan);
        assert_eq!(d.selected, TopologyMode::Single);
        assert_eq!(plan.mode(), TopologyMode::Single);
    }
}
