use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pi_coordinator::agents::AgentCatalog;
use pi_coordinator::cli::{Cli, Commands, OutputFormat};
use pi_coordinator::config::CoordinatorConfig;
use pi_coordinator::error::Result;
use pi_coordinator::orchestrator::{Coordinator, NullSink, RunUpdate, UpdateSink};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pi_coordinator=debug")
    } else {
        EnvFilter::new("pi_coordinator=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Sink that prints agent text to stderr as it streams.
struct StderrSink;

impl UpdateSink for StderrSink {
    fn on_update(&self, update: RunUpdate) {
        match update {
            RunUpdate::AgentStarted { agent, step } => match step {
                Some(step) => eprintln!("[{agent}] started (step {step})"),
                None => eprintln!("[{agent}] started"),
            },
            RunUpdate::AgentCompleted { agent, success, .. } => {
                eprintln!("[{agent}] {}", if success { "done" } else { "failed" });
            }
            RunUpdate::Progress {
                running,
                completed,
                total,
            } => eprintln!("[coordinator] running {running}, completed {completed}/{total}"),
            _ => {}
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let output = cli.output;

    if let Commands::Agents { scope } = &cli.command {
        return list_agents(scope, output).await;
    }

    let request = match cli
        .command
        .into_request()
        .map_err(pi_coordinator::error::CoordinatorError::InvalidInput)?
    {
        Some(request) => request,
        // Only `agents` maps to no request, and it was handled above.
        None => return Ok(true),
    };

    let config = CoordinatorConfig::default();
    let coordinator = Coordinator::new(&config);
    let sink: Arc<dyn UpdateSink> = match output {
        OutputFormat::Text => Arc::new(StderrSink),
        OutputFormat::Json => Arc::new(NullSink),
    };
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = coordinator.execute(request, sink, cancel_rx).await?;

    match output {
        OutputFormat::Text => println!("{}", outcome.text),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }

    Ok(outcome.is_success())
}

async fn list_agents(scope: &str, output: OutputFormat) -> Result<bool> {
    let scope = scope
        .parse()
        .map_err(pi_coordinator::error::CoordinatorError::InvalidInput)?;
    let cwd = std::env::current_dir()?;
    let catalog = AgentCatalog::load(&cwd, scope).await;

    match output {
        OutputFormat::Json => {
            let agents: Vec<_> = catalog.iter().collect();
            println!("{}", serde_json::to_string_pretty(&agents)?);
        }
        OutputFormat::Text => {
            if catalog.is_empty() {
                println!("no agents found");
            }
            for agent in catalog.iter() {
                let tools = agent.tools_csv().unwrap_or_else(|| "-".into());
                println!("{:<20} tools: {}", agent.name, tools);
            }
        }
    }
    Ok(true)
}
