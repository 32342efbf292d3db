use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::PhaseGate;
use crate::error::Result;
use crate::utils::string::truncate_with_marker;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const CAPTURE_MAX_BYTES: usize = 4_000;

/// A failing smoke command, captured for the remediation prompt.
#[derive(Debug, Clone)]
pub struct SmokeFailure {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl SmokeFailure {
    pub fn describe(&self) -> String {
        format!("`{}` exited with code {}", self.command, self.exit_code)
    }
}

/// Run the configured smoke commands sequentially in `cwd`, stopping at the
/// first non-zero exit. On failure the whole list is retried up to the gate's
/// retry budget. Each pass over the list counts as one attempt.
///
/// Cancellation aborts the current command and surfaces as a failure.
/// Returns `None` on a clean pass, `Some(failure)` once retries are spent.
pub async fn run_smoke(
    gate: &mut PhaseGate,
    cwd: &Path,
    cancel: &watch::Receiver<bool>,
) -> Result<Option<SmokeFailure>> {
    let rounds = 1 + gate.smoke_max_retries;
    let mut last_failure = None;

    for round in 1..=rounds {
        gate.smoke_attempts += 1;
        match run_command_list(&gate.smoke_commands, cwd, cancel).await? {
            None => {
                debug!(round, "Smoke commands passed");
                return Ok(None);
            }
            Some(failure) => {
                warn!(round, command = %failure.command, exit_code = failure.exit_code, "Smoke command failed");
                let cancelled = failure.stderr == CANCELLED_MARKER;
                last_failure = Some(failure);
                if cancelled {
                    break;
                }
            }
        }
    }

    Ok(last_failure)
}

const CANCELLED_MARKER: &str = "cancelled";

async fn run_command_list(
    commands: &[String],
    cwd: &Path,
    cancel: &watch::Receiver<bool>,
) -> Result<Option<SmokeFailure>> {
    for command in commands {
        if *cancel.borrow() {
            return Ok(Some(cancelled_failure(command)));
        }
        debug!(command = %command, dir = %cwd.display(), "Running smoke command");
        let mut cancel = cancel.clone();
        let mut shell = shell_command(command, cwd);
        let mut run = std::pin::pin!(tokio::time::timeout(COMMAND_TIMEOUT, shell.output()));
        let output = tokio::select! {
            output = &mut run => output,
            changed = cancel.wait_for(|stop| *stop) => {
                if changed.is_ok() {
                    return Ok(Some(cancelled_failure(command)));
                }
                // Cancellation source dropped; finish the command normally.
                run.await
            }
        };

        let failure = match output {
            Ok(Ok(output)) if output.status.success() => continue,
            Ok(Ok(output)) => SmokeFailure {
                command: command.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: capture(&output.stdout),
                stderr: capture(&output.stderr),
            },
            Ok(Err(e)) => SmokeFailure {
                command: command.clone(),
                exit_code: -1,
                stdout: String::new(),
                stderr: e.to_string(),
            },
            Err(_) => SmokeFailure {
                command: command.clone(),
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("timed out after {}s", COMMAND_TIMEOUT.as_secs()),
            },
        };
        return Ok(Some(failure));
    }
    Ok(None)
}

fn cancelled_failure(command: &str) -> SmokeFailure {
    SmokeFailure {
        command: command.to_string(),
        exit_code: -1,
        stdout: String::new(),
        stderr: CANCELLED_MARKER.to_string(),
    }
}

#[cfg(not(windows))]
fn shell_command(cmd: &str, cwd: &Path) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", cmd]).current_dir(cwd);
    command
}

#[cfg(windows)]
fn shell_command(cmd: &str, cwd: &Path) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", cmd]).current_dir(cwd);
    command
}

fn capture(bytes: &[u8]) -> String {
    truncate_with_marker(&String::from_utf8_lossy(bytes), CAPTURE_MAX_BYTES)
}
