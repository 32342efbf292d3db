//! The three execution drivers: single, parallel, and chain.
//!
//! All reservations happen before the corresponding spawns; parallel runs
//! under a fixed concurrency cap; chain substitutes `{previous}` with the
//! prior step's final assistant output before each delegation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info};

use super::updates::{RunUpdate, UpdateSink};
use crate::agents::AgentCatalog;
use crate::budget::env::{to_env, ContextSettings};
use crate::budget::ExecutionBudget;
use crate::child::{ChildDriver, ChildInvocation, ChildResult, StopKind, UsageCounters};
use crate::config::ENV_EXECUTION_ISOLATION;
use crate::error::{CoordinatorError, Result};
use crate::gate::PhaseGate;
use crate::git::GitRunner;
use crate::ledger::{HandoffEnvelope, SharedContext, TaskOutcome, OBSERVATION_SUMMARY_MAX_CHARS};
use crate::monitor::{AgentState, CoordinatorMonitor, RunPhase};
use crate::topology::{TaskSpec, TopologyDecision, TopologyMode, PREVIOUS_PLACEHOLDER};
use crate::worktree::{
    integrate_lane, IntegrationReport, IsolationMode, LaneIntegration, WorktreeSession,
};

pub const MAX_PARALLEL_TASKS: usize = 8;
pub const PARALLEL_CONCURRENCY: usize = 4;

/// Mutable state of one coordinator call, threaded through the drivers and
/// the gate runner.
pub(crate) struct RunContext<'a> {
    pub catalog: &'a AgentCatalog,
    pub driver: &'a ChildDriver,
    pub monitor: &'a CoordinatorMonitor,
    pub monitor_id: u64,
    pub sink: Arc<dyn UpdateSink>,
    pub cancel: watch::Receiver<bool>,
    pub cwd: PathBuf,
    pub isolation: IsolationMode,
    pub context_settings: ContextSettings,
    pub budget: ExecutionBudget,
    pub session: Option<WorktreeSession>,
    pub shared: SharedContext,
    pub decision: TopologyDecision,
    pub gate: PhaseGate,
    pub results: Vec<ChildResult>,
    pub reports: Vec<IntegrationReport>,
    pub fix_agent: Option<String>,
    pub headline: String,
}

/// One fully reserved dispatch, ready to launch.
pub(crate) struct PreparedDispatch {
    pub invocation: ChildInvocation,
    pub envelope: HandoffEnvelope,
    pub slot: usize,
    pub child_budget: ExecutionBudget,
}

/// Reserve budget, record the dispatch, assemble the handoff packet, and
/// resolve the child's working directory (lane-mapped when isolated).
pub(crate) async fn prepare_dispatch(
    ctx: &mut RunContext<'_>,
    task: &TaskSpec,
    mode: TopologyMode,
    step: Option<u32>,
    slot: usize,
    reserved_descendants: u32,
    parent_task_id: Option<String>,
    lane_index: Option<usize>,
) -> Result<PreparedDispatch> {
    let definition = ctx
        .catalog
        .get(&task.agent)
        .ok_or_else(|| CoordinatorError::AgentNotFound(task.agent.clone()))?;

    let now = ExecutionBudget::now_ms();
    let child_budget = ctx.budget.reserve_child(
        &task.agent,
        &task.task,
        reserved_descendants,
        definition.can_delegate(),
        now,
    )?;

    let envelope = HandoffEnvelope {
        run_id: child_budget.run_id.clone(),
        task_id: new_task_id(),
        parent_task_id,
        agent: task.agent.clone(),
        task: task.task.clone(),
        mode,
        depth: child_budget.depth,
        created_at_ms: now,
    };
    ctx.shared.record_dispatch(&envelope);
    let packet = ctx.shared.packet_for(&envelope);

    let requested_cwd = match &task.cwd {
        Some(path) if path.is_absolute() => Some(path.clone()),
        Some(path) => Some(ctx.cwd.join(path)),
        None => None,
    };
    let (cwd, cwd_warning) = match (&ctx.session, lane_index) {
        (Some(session), Some(index)) => {
            let lane = &session.assignments[index];
            session.lane_cwd(lane, requested_cwd.as_deref())
        }
        _ => (requested_cwd.unwrap_or_else(|| ctx.cwd.clone()), None),
    };
    if let Some(warning) = cwd_warning {
        ctx.decision.push_reason(warning);
    }

    let full_task = if packet.is_empty() {
        task.task.clone()
    } else {
        format!("{}\n\n{}", task.task, packet)
    };

    let mut env = to_env(&child_budget, &ctx.context_settings);
    env.push((ENV_EXECUTION_ISOLATION.to_string(), ctx.isolation.to_string()));

    let invocation = ChildInvocation {
        agent: definition.name.clone(),
        agent_source: definition.source,
        model: definition.model.clone(),
        tools: definition.tools_csv(),
        task: full_task,
        cwd,
        env,
        system_prompt: definition.description.clone(),
        step,
    };

    Ok(PreparedDispatch {
        invocation,
        envelope,
        slot,
        child_budget,
    })
}

/// Launch one prepared dispatch, stream its messages, and record the
/// observation. Launch failures become error results so a parallel batch
/// keeps running its other tasks.
pub(crate) async fn execute_dispatch(
    driver: &ChildDriver,
    shared: &SharedContext,
    monitor: &CoordinatorMonitor,
    monitor_id: u64,
    sink: &Arc<dyn UpdateSink>,
    cancel: watch::Receiver<bool>,
    prepared: PreparedDispatch,
) -> ChildResult {
    let PreparedDispatch {
        invocation,
        envelope,
        slot,
        child_budget,
    } = prepared;

    let agent = invocation.agent.clone();
    let task = invocation.task.clone();
    let step = invocation.step;

    monitor.update_agent(monitor_id, slot, AgentState::Running, None);
    sink.on_update(RunUpdate::AgentStarted {
        agent: agent.clone(),
        step,
    });

    let stream_sink = sink.clone();
    let stream_agent = agent.clone();
    let result = driver
        .run(invocation, &child_budget, cancel, |message| {
            let text = message.text();
            if !text.is_empty() {
                stream_sink.on_update(RunUpdate::AgentMessage {
                    agent: stream_agent.clone(),
                    text,
                });
            }
        })
        .await;

    let result = match result {
        Ok(result) => result,
        Err(e) => ChildResult {
            agent: agent.clone(),
            agent_source: Default::default(),
            task,
            exit_code: None,
            messages: Vec::new(),
            usage: UsageCounters::default(),
            model: None,
            stop: StopKind::Error,
            stop_message: Some(e.to_string()),
            stderr: String::new(),
            step,
        },
    };

    let outcome = if result.is_success() {
        TaskOutcome::Success
    } else {
        TaskOutcome::Error
    };
    let summary = result.summary(OBSERVATION_SUMMARY_MAX_CHARS);
    shared.record_observation(&envelope.task_id, &result.agent, outcome, &summary);

    let state = if result.is_success() {
        AgentState::Done
    } else {
        AgentState::Error
    };
    monitor.update_agent(monitor_id, slot, state, result.stop_message.clone());
    sink.on_update(RunUpdate::AgentCompleted {
        agent: result.agent.clone(),
        success: result.is_success(),
        summary,
    });

    result
}

pub(crate) async fn run_single(ctx: &mut RunContext<'_>, task: TaskSpec) -> Result<()> {
    ctx.fix_agent = Some(task.agent.clone());

    let lane_index = match &mut ctx.session {
        Some(session) => {
            let label = format!("single-{}", task.agent);
            session.add_lane(&label).await?;
            Some(0)
        }
        None => None,
    };

    let reserved = ctx.budget.remaining_agents.saturating_sub(1);
    let prepared = prepare_dispatch(
        ctx,
        &task,
        TopologyMode::Single,
        None,
        0,
        reserved,
        None,
        lane_index,
    )
    .await?;
    let task_id = prepared.envelope.task_id.clone();

    set_phase(ctx, RunPhase::Running);
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

    let success = result.is_success();
    let final_text = result.final_text();
    let cause = result
        .stop_message
        .clone()
        .unwrap_or_else(|| "child failed".to_string());
    ctx.results.push(result);

    if !success {
        return Err(CoordinatorError::Execution {
            phase: "dispatch".into(),
            message: format!("{}: {}", task.agent, cause),
        });
    }

    ctx.shared.record_decision(&task_id, "coordinator", &final_text);
    integrate_session(ctx, |_| true).await?;
    ctx.headline = format!("{} completed the task", task.agent);
    Ok(())
}

pub(crate) async fn run_parallel(ctx: &mut RunContext<'_>, tasks: Vec<TaskSpec>) -> Result<()> {
    let total = tasks.len();
    let remaining = ctx.budget.remaining_agents;
    ctx.fix_agent = tasks.first().map(|t| t.agent.clone());

    // Descendant tokens split evenly, remainder spread one per task.
    let distributable = remaining - total as u32;
    let base = distributable / total as u32;
    let extra = (distributable % total as u32) as usize;

    // Every lane and every reservation lands before the first spawn, so a
    // reservation failure aborts the whole batch cleanly.
    let mut prepared = Vec::with_capacity(total);
    for (index, task) in tasks.iter().enumerate() {
        let lane_index = match &mut ctx.session {
            Some(session) => {
                let label = format!("parallel-{}", task.agent);
                session.add_lane(&label).await?;
                Some(index)
            }
            None => None,
        };
        let reserved = base + u32::from(index < extra);
        prepared.push(
            prepare_dispatch(
                ctx,
                task,
                TopologyMode::Parallel,
                None,
                index,
                reserved,
                None,
                lane_index,
            )
            .await?,
        );
    }

    set_phase(ctx, RunPhase::Running);

    let results: Vec<ChildResult> = {
        let driver = ctx.driver;
        let shared = &ctx.shared;
        let monitor = ctx.monitor;
        let monitor_id = ctx.monitor_id;
        let sink = ctx.sink.clone();
        let cancel = ctx.cancel.clone();
        let semaphore = Arc::new(Semaphore::new(PARALLEL_CONCURRENCY));
        let running = AtomicU32::new(0);
        let completed = AtomicU32::new(0);

        let futures = prepared.into_iter().map(|dispatch| {
            let sink = sink.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let running = &running;
            let completed = &completed;
            async move {
                // The semaphore is never closed; a None permit cannot happen.
                let _permit = semaphore.acquire().await.ok();
                let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                monitor.set_parallel_running(monitor_id, now_running);
                sink.on_update(RunUpdate::Progress {
                    running: now_running,
                    completed: completed.load(Ordering::SeqCst),
                    total: total as u32,
                });

                let result = execute_dispatch(
                    driver, shared, monitor, monitor_id, &sink, cancel, dispatch,
                )
                .await;

                let now_running = running.fetch_sub(1, Ordering::SeqCst) - 1;
                let now_completed = completed.fetch_add(1, Ordering::SeqCst) + 1;
                monitor.set_parallel_running(monitor_id, now_running);
                sink.on_update(RunUpdate::Progress {
                    running: now_running,
                    completed: now_completed,
                    total: total as u32,
                });
                result
            }
        });

        join_all(futures).await
    };

    let succeeded: Vec<bool> = results.iter().map(ChildResult::is_success).collect();
    let success_count = succeeded.iter().filter(|s| **s).count();
    let failed_agents: Vec<String> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.agent.clone())
        .collect();
    ctx.results.extend(results);

    if success_count == 0 {
        return Err(CoordinatorError::Execution {
            phase: "parallel dispatch".into(),
            message: format!("all {total} tasks failed"),
        });
    }

    // Only lanes of successful tasks are integrated; a failed apply aborts
    // the call while already-applied lanes stay applied.
    integrate_session(ctx, |index| succeeded[index]).await?;

    ctx.headline = if failed_agents.is_empty() {
        format!("{success_count}/{total} succeeded")
    } else {
        format!(
            "{success_count}/{total} succeeded (failed: {})",
            failed_agents.join(", ")
        )
    };
    Ok(())
}

pub(crate) async fn run_chain(ctx: &mut RunContext<'_>, tasks: Vec<TaskSpec>) -> Result<()> {
    let total = tasks.len();
    ctx.fix_agent = tasks.last().map(|t| t.agent.clone());

    // One shared lane for every step, so `{previous}` substitution sees
    // consistent file state.
    let lane_index = match &mut ctx.session {
        Some(session) => {
            session.add_lane("chain").await?;
            Some(0)
        }
        None => None,
    };

    set_phase(ctx, RunPhase::Running);

    let mut previous = String::new();
    let mut last_task_id: Option<String> = None;
    for (index, task) in tasks.iter().enumerate() {
        let step = index as u32 + 1;
        let substituted = TaskSpec {
            agent: task.agent.clone(),
            task: task.task.replace(PREVIOUS_PLACEHOLDER, &previous),
            cwd: task.cwd.clone(),
        };

        // Leave at least one token for every later step.
        let later_steps = (total - 1 - index) as u32;
        let reserved = ctx
            .budget
            .remaining_agents
            .saturating_sub(later_steps + 1);

        let prepared = prepare_dispatch(
            ctx,
            &substituted,
            TopologyMode::Chain,
            Some(step),
            index,
            reserved,
            last_task_id.clone(),
            lane_index,
        )
        .await?;
        last_task_id = Some(prepared.envelope.task_id.clone());

        debug!(step, agent = %substituted.agent, "Dispatching chain step");
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

        let success = result.is_success();
        let cause = result
            .stop_message
            .clone()
            .unwrap_or_else(|| "child failed".to_string());
        previous = result.final_text();
        ctx.results.push(result);

        if !success {
            return Err(CoordinatorError::Execution {
                phase: format!("step {step}"),
                message: format!("{}: {}", substituted.agent, cause),
            });
        }
    }

    if let Some(task_id) = &last_task_id {
        ctx.shared.record_decision(task_id, "coordinator", &previous);
    }
    integrate_session(ctx, |_| true).await?;
    info!(steps = total, "Chain completed");
    ctx.headline = format!("chain completed {total} step(s)");
    Ok(())
}

/// Integrate the lanes selected by `lane_success`, in creation order.
///
/// The child only edits the lane's working tree; committing its changes so
/// lane HEAD moves past `base_head` is the coordinator's job, done here
/// right before the patch capture. The first failed commit or apply aborts;
/// lanes already applied remain applied.
async fn integrate_session(
    ctx: &mut RunContext<'_>,
    lane_success: impl Fn(usize) -> bool,
) -> Result<()> {
    let Some(session) = &ctx.session else {
        return Ok(());
    };

    let mut failure = None;
    for (index, lane) in session.assignments.iter().enumerate() {
        if !lane_success(index) {
            continue;
        }

        let lane_git = GitRunner::new(&lane.worktree_path);
        let report = match lane_git
            .commit_all(&format!("subagent lane {}", lane.id))
            .await
        {
            Ok(_committed) => integrate_lane(&session.repo_root, lane).await,
            Err(e) => IntegrationReport {
                lane_id: lane.id.clone(),
                integration: LaneIntegration::Failed {
                    message: format!("lane commit failed: {e}"),
                },
            },
        };

        let failed = report.failed().map(str::to_string);
        let lane_id = report.lane_id.clone();
        ctx.reports.push(report);
        if let Some(message) = failed {
            failure = Some(CoordinatorError::Integration {
                lane: lane_id,
                message,
            });
            break;
        }
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn set_phase(ctx: &RunContext<'_>, phase: RunPhase) {
    ctx.monitor.set_phase(ctx.monitor_id, phase);
    ctx.sink.on_update(RunUpdate::PhaseChanged { phase });
}

fn new_task_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("t{}", &id[..6])
}
