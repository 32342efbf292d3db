//! Execution orchestrator: validates the call, reserves budgets, drives the
//! planned topology, runs the post-execution smoke gate with bounded
//! remediation, and guarantees worktree cleanup plus monitor finalization.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use super::drivers::{
    execute_dispatch, prepare_dispatch, run_chain, run_parallel, run_single, RunContext,
};
use super::request::{CoordinatorOutcome, CoordinatorRequest, RunDetails};
use super::updates::{RunUpdate, UpdateSink};
use crate::agents::{AgentCatalog, AgentSource};
use crate::budget::env::{from_process_env, ContextSettings};
use crate::budget::ExecutionBudget;
use crate::child::ChildDriver;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::gate::{run_smoke, FixOutcome, GateStatus, PhaseGate, SmokeFailure};
use crate::ledger::SharedContext;
use crate::monitor::{AgentSlot, AgentState, CoordinatorMonitor, GovernanceSnapshot, RunPhase};
use crate::topology::{apply_policy, score_plan, ExecutionPlan, TaskSpec};
use crate::utils::string::truncate_with_marker;
use crate::worktree::{decide_isolation, IsolationMode, WorktreeSession};

/// Ledger directory relative to the call's cwd when not overridden.
const DEFAULT_MEMORY_DIR: &str = ".pi/subagent-memory";
/// Slot index for fix children, which have no slot in the run's agent list.
const FIX_SLOT: usize = usize::MAX;

pub struct Coordinator {
    monitor: Arc<CoordinatorMonitor>,
    driver: ChildDriver,
    catalog_override: Option<AgentCatalog>,
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            monitor: Arc::new(CoordinatorMonitor::new()),
            driver: ChildDriver::new(&config.child_program),
            catalog_override: None,
        }
    }

    pub fn monitor(&self) -> Arc<CoordinatorMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Replace filesystem agent discovery with a fixed catalog.
    pub fn with_catalog(mut self, catalog: AgentCatalog) -> Self {
        self.catalog_override = Some(catalog);
        self
    }

    /// Run one coordinator call to completion.
    ///
    /// Pre-dispatch failures (validation, guardrails) return `Err` with no
    /// side effects. Once dispatching begins, failures are folded into the
    /// outcome so the details record survives for inspection; `outcome.error`
    /// distinguishes them.
    pub async fn execute(
        &self,
        request: CoordinatorRequest,
        sink: Arc<dyn UpdateSink>,
        cancel: watch::Receiver<bool>,
    ) -> Result<CoordinatorOutcome> {
        let settings = CoordinatorConfig::resolve(
            request.topology_policy.as_deref(),
            request.execution_isolation.as_deref(),
            request.context_mode.as_deref(),
            request.shared_context_limit,
            request.memory_dir.clone(),
            request.worktree_base_dir.clone(),
            request.agent_scope.as_deref(),
            request.confirm_project_agents,
        )?;

        let plan = request.plan()?;
        let cwd = match &request.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        let loaded;
        let catalog: &AgentCatalog = match &self.catalog_override {
            Some(catalog) => catalog,
            None => {
                loaded = AgentCatalog::load(&cwd, settings.agent_scope).await;
                &loaded
            }
        };
        check_agents(&plan, catalog, settings.confirm_project_agents)?;

        let now = ExecutionBudget::now_ms();
        let budget = from_process_env(now);
        check_entry_gates(&budget, now)?;

        let decision = score_plan(&plan, settings.topology_policy);
        let (mut decision, plan) = apply_policy(decision, plan);
        check_plan_budget(&plan, &budget)?;

        let gate = PhaseGate::new(request.gate_params(), decision.summary())?;

        let (mut isolation, isolation_reasons) = decide_isolation(settings.isolation, &plan, catalog);
        decision.reasons.extend(isolation_reasons);

        let session = if isolation == IsolationMode::Worktree {
            match WorktreeSession::discover_repo(&cwd) {
                Some(repo_root) => Some(WorktreeSession::new(
                    &budget.run_id,
                    repo_root,
                    settings.worktree_base_dir.as_deref(),
                )),
                None => {
                    warn!(cwd = %cwd.display(), "Worktree isolation unavailable outside a repository");
                    decision.push_reason(
                        "worktree isolation unavailable outside a git repository; downgraded to shared",
                    );
                    isolation = IsolationMode::Shared;
                    None
                }
            }
        } else {
            None
        };

        let memory_dir = settings
            .memory_dir
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_MEMORY_DIR));
        let shared = SharedContext::open(
            &memory_dir,
            &budget.run_id,
            settings.context_mode,
            settings.context_limit,
        );
        let context_settings = ContextSettings {
            mode: settings.context_mode,
            limit: settings.context_limit,
            memory_dir: Some(memory_dir),
        };

        let slots: Vec<AgentSlot> = plan
            .tasks()
            .iter()
            .map(|task| AgentSlot {
                agent: task.agent.clone(),
                task: task.task.clone(),
                status: AgentState::Pending,
                step: None,
                error: None,
            })
            .collect();
        let monitor_id = self
            .monitor
            .begin_run(&budget.run_id, plan.mode().as_str(), slots);
        self.monitor.set_phase(monitor_id, RunPhase::Dispatch);
        sink.on_update(RunUpdate::PhaseChanged {
            phase: RunPhase::Dispatch,
        });

        let mut ctx = RunContext {
            catalog,
            driver: &self.driver,
            monitor: self.monitor.as_ref(),
            monitor_id,
            sink,
            cancel,
            cwd,
            isolation,
            context_settings,
            budget,
            session,
            shared,
            decision,
            gate,
            results: Vec::new(),
            reports: Vec::new(),
            fix_agent: None,
            headline: String::new(),
        };

        let run_result = run_plan(&mut ctx, plan).await;

        // Cleanup and finalization run on every exit path of the plan.
        if let Some(session) = &ctx.session {
            for warning in session.cleanup().await {
                ctx.decision.push_reason(format!("cleanup: {warning}"));
            }
        }
        self.monitor
            .set_governance(monitor_id, governance_snapshot(&ctx.gate));

        let error_text = run_result.as_ref().err().map(ToString::to_string);
        self.monitor
            .finish_run(monitor_id, error_text.clone(), ExecutionBudget::now_ms());
        let final_phase = if error_text.is_some() {
            RunPhase::Error
        } else {
            RunPhase::Done
        };
        ctx.sink
            .on_update(RunUpdate::PhaseChanged { phase: final_phase });

        Ok(assemble_outcome(ctx, run_result))
    }
}

fn check_agents(
    plan: &ExecutionPlan,
    catalog: &AgentCatalog,
    confirm_project_agents: bool,
) -> Result<()> {
    for task in plan.tasks() {
        let definition = catalog
            .get(&task.agent)
            .ok_or_else(|| CoordinatorError::AgentNotFound(task.agent.clone()))?;
        if definition.source == AgentSource::Project && !confirm_project_agents {
            return Err(CoordinatorError::InvalidInput(format!(
                "agent {} is project-scoped; set confirmProjectAgents to run it",
                task.agent
            )));
        }
    }
    Ok(())
}

/// Plan-shape checks against the available budget, still before any spawn.
fn check_plan_budget(plan: &ExecutionPlan, budget: &ExecutionBudget) -> Result<()> {
    let count = plan.len();
    let remaining = budget.remaining_agents;
    match plan {
        ExecutionPlan::Parallel(_) => {
            if count > crate::orchestrator::MAX_PARALLEL_TASKS {
                return Err(CoordinatorError::InvalidInput(format!(
                    "parallel supports at most {} tasks, got {count}",
                    crate::orchestrator::MAX_PARALLEL_TASKS
                )));
            }
            if (remaining as usize) < count {
                return Err(CoordinatorError::InvalidInput(format!(
                    "insufficient subagent budget for parallel: need at least {count}, have {remaining}"
                )));
            }
        }
        ExecutionPlan::Chain(_) => {
            if (remaining as usize) < count {
                return Err(CoordinatorError::InvalidInput(format!(
                    "insufficient subagent budget for chain: need at least {count}, have {remaining}"
                )));
            }
        }
        ExecutionPlan::Single(_) => {}
    }
    Ok(())
}

/// Entry guardrails, checked before any reservation or spawn.
fn check_entry_gates(budget: &ExecutionBudget, now_ms: i64) -> Result<()> {
    // A nested coordinator refuses further delegation; a depth-0 one is the
    // delegation the parent shell asked for and proceeds.
    if budget.depth > 0 && !budget.can_spawn_children {
        return Err(CoordinatorError::NestedSpawnBlocked {
            agent: "parent agent".into(),
        });
    }
    if budget.depth >= budget.max_depth {
        return Err(CoordinatorError::DepthExceeded {
            depth: budget.depth,
            max_depth: budget.max_depth,
        });
    }
    if budget.remaining_agents == 0 {
        return Err(CoordinatorError::BudgetExhausted {
            needed: 1,
            remaining: 0,
        });
    }
    if budget.deadline_passed(now_ms) {
        return Err(CoordinatorError::DeadlineReached);
    }
    Ok(())
}

async fn run_plan(ctx: &mut RunContext<'_>, plan: ExecutionPlan) -> Result<Option<String>> {
    match plan {
        ExecutionPlan::Single(task) => run_single(ctx, task).await?,
        ExecutionPlan::Parallel(tasks) => run_parallel(ctx, tasks).await?,
        ExecutionPlan::Chain(tasks) => run_chain(ctx, tasks).await?,
    }
    run_smoke_gate(ctx).await
}

/// Post-execution smoke gate with the bounded fix loop.
///
/// A fix attempt re-runs the whole retry sequence, so total smoke executions
/// can reach `(1 + fix_attempts) x (1 + retries)`.
async fn run_smoke_gate(ctx: &mut RunContext<'_>) -> Result<Option<String>> {
    if !ctx.gate.smoke_enabled() {
        return Ok(None);
    }

    ctx.monitor.set_phase(ctx.monitor_id, RunPhase::Finalizing);
    ctx.sink.on_update(RunUpdate::PhaseChanged {
        phase: RunPhase::Finalizing,
    });

    let mut failure = match run_smoke(&mut ctx.gate, &ctx.cwd, &ctx.cancel).await? {
        None => {
            ctx.gate.set_gate(
                "smoke",
                GateStatus::Passed,
                Some("all smoke commands passed".into()),
            );
            return Ok(None);
        }
        Some(failure) => failure,
    };

    if !ctx.gate.require_smoke || ctx.gate.smoke_max_fix_attempts == 0 {
        ctx.gate
            .set_gate("smoke", GateStatus::Failed, Some(failure.describe()));
        return Err(CoordinatorError::SmokeFailed(failure.describe()));
    }

    while ctx.gate.smoke_fix_attempts < ctx.gate.smoke_max_fix_attempts {
        ctx.gate.smoke_fix_attempts += 1;
        let attempt = ctx.gate.smoke_fix_attempts;

        let agent = ctx
            .fix_agent
            .clone()
            .or_else(|| ctx.results.last().map(|r| r.agent.clone()))
            .ok_or_else(|| {
                CoordinatorError::SmokeFailed("no agent available for fix attempts".into())
            })?;

        info!(attempt, agent = %agent, command = %failure.command, "Dispatching smoke fix attempt");
        let fix_task = TaskSpec::new(
            agent.clone(),
            remediation_prompt(&failure, attempt, ctx.gate.phase_name.as_deref()),
        );
        let mode = ctx.decision.selected;

        // Fix children go through the standard reservation path and run in
        // the orchestrator's cwd, where lanes have already been integrated.
        match prepare_dispatch(ctx, &fix_task, mode, None, FIX_SLOT, 0, None, None).await {
            Ok(prepared) => {
                let result = execute_dispatch(
                    ctx.driver,
                    &ctx.shared,
                    ctx.monitor,
                    ctx.monitor_id,
                    &ctx.sink,
                    ctx.cancel.clone(),
                    prepared,
                )
                .await;
                let fixed = result.is_success();
                let summary = result.summary(200);
                ctx.gate.record_fix(
                    &agent,
                    if fixed { FixOutcome::Success } else { FixOutcome::Error },
                    summary,
                );
                ctx.results.push(result);

                if fixed {
                    match run_smoke(&mut ctx.gate, &ctx.cwd, &ctx.cancel).await? {
                        None => {
                            ctx.gate.set_gate(
                                "smoke",
                                GateStatus::Passed,
                                Some(format!("passed after fix attempt {attempt}")),
                            );
                            return Ok(Some(format!(
                                "Phase smoke passed after fix attempt {attempt}"
                            )));
                        }
                        Some(next_failure) => failure = next_failure,
                    }
                }
            }
            Err(e) => {
                // Reservation refused (budget, loop, deadline); further
                // attempts cannot succeed either.
                warn!(attempt, error = %e, "Fix reservation refused");
                ctx.gate.record_fix(&agent, FixOutcome::Error, e.to_string());
                break;
            }
        }
    }

    ctx.gate
        .set_gate("smoke", GateStatus::Failed, Some(failure.describe()));
    Err(CoordinatorError::SmokeFailed(format!(
        "{} after {} fix attempt(s)",
        failure.describe(),
        ctx.gate.smoke_fix_attempts
    )))
}

fn remediation_prompt(failure: &SmokeFailure, attempt: u32, phase_name: Option<&str>) -> String {
    let phase = phase_name.unwrap_or("current phase");
    format!(
        "Phase smoke check for {phase} is failing (fix attempt {attempt}).\n\
         Command: {command}\n\
         Exit code: {exit_code}\n\
         Stdout:\n{stdout}\n\
         Stderr:\n{stderr}\n\n\
         Apply the minimal fix that makes this command pass. Do not refactor \
         unrelated files or change behavior beyond what the failure requires.",
        command = failure.command,
        exit_code = failure.exit_code,
        stdout = truncate_with_marker(&failure.stdout, 2_000),
        stderr = truncate_with_marker(&failure.stderr, 2_000),
    )
}

fn governance_snapshot(gate: &PhaseGate) -> GovernanceSnapshot {
    GovernanceSnapshot {
        gates: gate.summary(),
        smoke_attempts: gate.smoke_attempts,
        smoke_fix_attempts: gate.smoke_fix_attempts,
        remediation: gate
            .smoke_fix_history
            .iter()
            .map(|record| {
                let outcome = match record.outcome {
                    FixOutcome::Success => "success",
                    FixOutcome::Error => "error",
                };
                format!(
                    "attempt {} ({}): {} - {}",
                    record.attempt, record.agent, outcome, record.summary
                )
            })
            .collect(),
    }
}

fn assemble_outcome(ctx: RunContext<'_>, run_result: Result<Option<String>>) -> CoordinatorOutcome {
    let mut lines = Vec::new();
    let error = match &run_result {
        Ok(note) => {
            lines.push(ctx.headline.clone());
            if let Some(note) = note {
                lines.push(note.clone());
            }
            None
        }
        Err(e) => {
            lines.push(e.to_string());
            Some(e.to_string())
        }
    };
    for report in &ctx.reports {
        lines.push(format!("worktree {}", report.describe()));
    }

    CoordinatorOutcome {
        text: lines
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        error,
        details: RunDetails {
            run_id: ctx.budget.run_id.clone(),
            topology: ctx.decision,
            isolation: ctx.isolation,
            gate: ctx.gate,
            worktrees: ctx.reports,
            results: ctx.results,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_gates_on_fresh_budget() {
        let budget = ExecutionBudget::root(1_000);
        assert!(check_entry_gates(&budget, 1_000).is_ok());
    }

    #[test]
    fn test_entry_refuses_nested_without_permission() {
        let mut budget = ExecutionBudget::root(1_000);
        budget.depth = 1;
        budget.can_spawn_children = false;
        assert!(matches!(
            check_entry_gates(&budget, 1_000),
            Err(CoordinatorError::NestedSpawnBlocked { .. })
        ));
    }

    #[test]
    fn test_entry_allows_depth_zero_without_spawn_permission() {
        let mut budget = ExecutionBudget::root(1_000);
        budget.can_spawn_children = false;
        assert!(check_entry_gates(&budget, 1_000).is_ok());
    }

    #[test]
    fn test_entry_refuses_at_max_depth() {
        let mut budget = ExecutionBudget::root(1_000);
        budget.depth = budget.max_depth;
        assert!(matches!(
            check_entry_gates(&budget, 1_000),
            Err(CoordinatorError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn test_entry_refuses_empty_budget_and_past_deadline() {
        let mut budget = ExecutionBudget::root(1_000);
        budget.remaining_agents = 0;
        assert!(matches!(
            check_entry_gates(&budget, 1_000),
            Err(CoordinatorError::BudgetExhausted { .. })
        ));

        let budget = ExecutionBudget::root(1_000);
        assert!(matches!(
            check_entry_gates(&budget, budget.deadline_at_ms),
            Err(CoordinatorError::DeadlineReached)
        ));
    }

    #[test]
    fn test_remediation_prompt_contents() {
        let failure = SmokeFailure {
            command: "cargo check".into(),
            exit_code: 101,
            stdout: "compiling".into(),
            stderr: "error[E0308]".into(),
        };
        let prompt = remediation_prompt(&failure, 2, Some("auth"));
        assert!(prompt.contains("fix attempt 2"));
        assert!(prompt.contains("cargo check"));
        assert!(prompt.contains("101"));
        assert!(prompt.contains("E0308"));
        assert!(prompt.contains("minimal fix"));
    }
}
