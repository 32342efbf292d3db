//! Thin CLI over the coordinator. The same request shape the embedding host
//! passes as a tool call can be driven from the command line for scripting
//! and debugging.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::orchestrator::{CoordinatorRequest, TaskRequest};

#[derive(Parser)]
#[command(name = "pi-coordinator")]
#[command(author, version, about = "Governed subagent coordinator for the pi CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Delegate a single task to one agent
    Run {
        /// Agent name
        agent: String,

        /// Task text
        task: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run independent tasks concurrently (agent=task pairs)
    Parallel {
        /// Tasks as agent=task pairs, declaration order preserved
        #[arg(short, long = "task", required = true)]
        tasks: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run dependent steps in order; {previous} carries the prior output
    Chain {
        /// Steps as agent=task pairs, executed in order
        #[arg(short, long = "step", required = true)]
        steps: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// List the agents available in the current scope
    Agents {
        /// Agent scope (user, project, both)
        #[arg(long, default_value = "both")]
        scope: String,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct CommonArgs {
    /// Topology policy (advisory, auto)
    #[arg(long)]
    pub topology_policy: Option<String>,

    /// Execution isolation (auto, shared, worktree)
    #[arg(long)]
    pub isolation: Option<String>,

    /// Shared-context mode (isolated, shared-read, shared-write)
    #[arg(long)]
    pub context_mode: Option<String>,

    /// Max recent ledger entries injected into handoff packets
    #[arg(long)]
    pub context_limit: Option<usize>,

    /// Ledger directory override
    #[arg(long)]
    pub memory_dir: Option<PathBuf>,

    /// Worktree base directory override
    #[arg(long)]
    pub worktree_base_dir: Option<PathBuf>,

    /// Phase name for gate reporting
    #[arg(long)]
    pub phase: Option<String>,

    /// Require the smoke gate to pass (enables the fix loop)
    #[arg(long)]
    pub require_smoke: bool,

    /// Smoke command, repeatable
    #[arg(long = "smoke")]
    pub smoke_commands: Vec<String>,

    /// Smoke retries per attempt
    #[arg(long)]
    pub smoke_retries: Option<u32>,

    /// Bounded fix attempts after smoke failure
    #[arg(long)]
    pub max_fix_attempts: Option<u32>,

    /// Allow project-scoped agents
    #[arg(long)]
    pub confirm_project_agents: bool,

    /// Working directory for the run
    #[arg(long)]
    pub cwd: Option<PathBuf>,
}

impl CommonArgs {
    fn fill(self, request: &mut CoordinatorRequest) {
        request.topology_policy = self.topology_policy;
        request.execution_isolation = self.isolation;
        request.context_mode = self.context_mode;
        request.shared_context_limit = self.context_limit;
        request.memory_dir = self.memory_dir;
        request.worktree_base_dir = self.worktree_base_dir;
        request.phase_name = self.phase;
        request.require_phase_smoke = self.require_smoke.then_some(true);
        request.phase_smoke_commands =
            (!self.smoke_commands.is_empty()).then_some(self.smoke_commands);
        request.phase_smoke_retries = self.smoke_retries;
        request.phase_max_fix_attempts = self.max_fix_attempts;
        request.confirm_project_agents = self.confirm_project_agents.then_some(true);
        request.cwd = self.cwd;
    }
}

/// Parse an `agent=task` pair.
pub fn parse_pair(raw: &str) -> Result<TaskRequest, String> {
    match raw.split_once('=') {
        Some((agent, task)) if !agent.trim().is_empty() && !task.trim().is_empty() => {
            Ok(TaskRequest {
                agent: agent.trim().to_string(),
                task: task.trim().to_string(),
                cwd: None,
            })
        }
        _ => Err(format!("expected agent=task, got: {raw}")),
    }
}

impl Commands {
    /// Convert the CLI invocation into the coordinator's request shape.
    pub fn into_request(self) -> Result<Option<CoordinatorRequest>, String> {
        let mut request = CoordinatorRequest::default();
        match self {
            Commands::Run { agent, task, common } => {
                request.agent = Some(agent);
                request.task = Some(task);
                common.fill(&mut request);
                Ok(Some(request))
            }
            Commands::Parallel { tasks, common } => {
                request.tasks = Some(
                    tasks
                        .iter()
                        .map(|raw| parse_pair(raw))
                        .collect::<Result<Vec<_>, _>>()?,
                );
                common.fill(&mut request);
                Ok(Some(request))
            }
            Commands::Chain { steps, common } => {
                request.chain = Some(
                    steps
                        .iter()
                        .map(|raw| parse_pair(raw))
                        .collect::<Result<Vec<_>, _>>()?,
                );
                common.fill(&mut request);
                Ok(Some(request))
            }
            Commands::Agents { .. } => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let pair = parse_pair("scout=List the files").unwrap();
        assert_eq!(pair.agent, "scout");
        assert_eq!(pair.task, "List the files");

        assert!(parse_pair("no-separator").is_err());
        assert!(parse_pair("=task only").is_err());
    }

    #[test]
    fn test_chain_command_builds_request() {
        let command = Commands::Chain {
            steps: vec!["scout=Collect facts".into(), "worker=Use {previous}".into()],
            common: CommonArgs {
                topology_policy: Some("auto".into()),
                isolation: None,
                context_mode: None,
                context_limit: None,
                memory_dir: None,
                worktree_base_dir: None,
                phase: None,
                require_smoke: false,
                smoke_commands: vec![],
                smoke_retries: None,
                max_fix_attempts: None,
                confirm_project_agents: true,
                cwd: None,
            },
        };
        let request = command.into_request().unwrap().unwrap();
        let chain = request.chain.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(request.topology_policy.as_deref(), Some("auto"));
        assert_eq!(request.confirm_project_agents, Some(true));
        assert_eq!(request.require_phase_smoke, None);
    }
}
