//! Child process driver.
//!
//! Launches the opaque child program in single-turn JSON mode, injects the
//! budget environment, streams its line-delimited event protocol, and
//! enforces the run's absolute wall-time deadline with a graceful-then-forceful
//! termination sequence.

mod event;

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use event::{parse_line, AssistantMessage, ChildEvent, ContentPart, ToolResultMessage, UsageCounters};

use crate::agents::AgentSource;
use crate::budget::ExecutionBudget;
use crate::error::{CoordinatorError, Result};
use crate::utils::string::single_line;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);
/// Bound on the retained stderr tail.
const STDERR_MAX_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Normal,
    Error,
    Aborted,
}

/// One planned child launch.
#[derive(Debug, Clone)]
pub struct ChildInvocation {
    pub agent: String,
    pub agent_source: AgentSource,
    pub model: Option<String>,
    pub tools: Option<String>,
    pub task: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub system_prompt: Option<String>,
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildResult {
    pub agent: String,
    pub agent_source: AgentSource,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub messages: Vec<AssistantMessage>,
    pub usage: UsageCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub stop: StopKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_message: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl ChildResult {
    pub fn is_success(&self) -> bool {
        self.stop == StopKind::Normal
    }

    /// Final assistant output of this child; the chain's `{previous}` value.
    pub fn final_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .map(AssistantMessage::text)
            .find(|t| !t.is_empty())
            .unwrap_or_default()
    }

    /// One-line outcome for ledger observations.
    pub fn summary(&self, max_chars: usize) -> String {
        match self.stop {
            StopKind::Normal => single_line(&self.final_text(), max_chars),
            StopKind::Aborted => "aborted".to_string(),
            StopKind::Error => {
                let cause = self
                    .stop_message
                    .clone()
                    .or_else(|| (!self.stderr.is_empty()).then(|| self.stderr.clone()))
                    .unwrap_or_else(|| "unknown error".to_string());
                single_line(&cause, max_chars)
            }
        }
    }
}

/// Launches child agent processes.
pub struct ChildDriver {
    program: String,
}

impl ChildDriver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run one child to completion, streaming each completed assistant turn
    /// through `on_message`.
    ///
    /// The deadline is absolute; if already past, the launch fails as a
    /// wall-time error without spawning. Cancellation triggers the same
    /// graceful-then-forceful termination as the deadline and marks the
    /// result aborted.
    pub async fn run(
        &self,
        invocation: ChildInvocation,
        budget: &ExecutionBudget,
        mut cancel: watch::Receiver<bool>,
        mut on_message: impl FnMut(&AssistantMessage),
    ) -> Result<ChildResult> {
        let now = ExecutionBudget::now_ms();
        let remaining_ms = budget.remaining_time_ms(now);
        if remaining_ms <= 0 {
            return Ok(self.error_result(
                invocation,
                None,
                "wall-time deadline reached before launch",
                String::new(),
            ));
        }

        // The prompt file must outlive the child; dropping the handle on any
        // exit path removes it.
        let prompt_file = match &invocation.system_prompt {
            Some(prompt) => Some(write_prompt_file(prompt)?),
            None => None,
        };

        let mut command = Command::new(&self.program);
        command
            .args(["--mode", "json", "-p", "--no-session"])
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(model) = &invocation.model {
            command.args(["--model", model]);
        }
        if let Some(tools) = &invocation.tools {
            command.args(["--tools", tools]);
        }
        if let Some(file) = &prompt_file {
            command.arg("--append-system-prompt").arg(file.path());
        }
        command.arg(&invocation.task);

        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        debug!(agent = %invocation.agent, program = %self.program, remaining_ms, "Spawning child agent");
        let mut child = command
            .spawn()
            .map_err(|e| CoordinatorError::ChildLaunch(format!("{}: {}", self.program, e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CoordinatorError::ChildLaunch("child stdout was not piped".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            CoordinatorError::ChildLaunch("child stderr was not piped".into())
        })?;

        let stderr_task = tokio::spawn(read_tail(stderr));

        let deadline = Instant::now() + Duration::from_millis(remaining_ms as u64);
        let mut lines = BufReader::new(stdout).lines();
        let mut messages: Vec<AssistantMessage> = Vec::new();
        let mut usage = UsageCounters::default();
        let mut model = None;
        let mut timed_out = false;
        let mut aborted = false;
        let mut terminating = false;
        let mut cancel_closed = false;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => match parse_line(&line) {
                            ChildEvent::MessageEnd(message) => {
                                usage.add(&message.usage);
                                if message.model.is_some() {
                                    model = message.model.clone();
                                }
                                on_message(&message);
                                messages.push(message);
                            }
                            ChildEvent::ToolResultEnd(result) => {
                                debug!(agent = %invocation.agent, tool_call = %result.tool_call_id, "Child tool result");
                            }
                            ChildEvent::Ignored => {}
                        },
                        Ok(None) => break,
                        Err(e) => {
                            warn!(agent = %invocation.agent, error = %e, "Child stdout read failed");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !terminating => {
                    warn!(agent = %invocation.agent, "Child exceeded run deadline, terminating");
                    timed_out = true;
                    terminating = true;
                    terminate(&mut child).await;
                }
                changed = cancel.changed(), if !terminating && !cancel_closed => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            debug!(agent = %invocation.agent, "Cancellation requested, terminating child");
                            aborted = true;
                            terminating = true;
                            terminate(&mut child).await;
                        }
                        Ok(()) => {}
                        Err(_) => cancel_closed = true,
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();
        drop(prompt_file);

        let exit_code = status.code();
        let message_error = messages
            .iter()
            .find(|m| m.is_error())
            .map(|m| m.error_message.clone().unwrap_or_else(|| "child reported an error".into()));

        let (stop, stop_message) = if aborted {
            (StopKind::Aborted, Some("cancelled".to_string()))
        } else if timed_out {
            (
                StopKind::Error,
                Some("wall-time deadline exceeded".to_string()),
            )
        } else if let Some(message) = message_error {
            (StopKind::Error, Some(message))
        } else if !status.success() {
            (
                StopKind::Error,
                Some(format!("child exited with code {}", exit_code.unwrap_or(-1))),
            )
        } else {
            (StopKind::Normal, None)
        };

        Ok(ChildResult {
            agent: invocation.agent,
            agent_source: invocation.agent_source,
            task: invocation.task,
            exit_code,
            messages,
            usage,
            model,
            stop,
            stop_message,
            stderr: stderr_tail,
            step: invocation.step,
        })
    }

    fn error_result(
        &self,
        invocation: ChildInvocation,
        exit_code: Option<i32>,
        message: &str,
        stderr: String,
    ) -> ChildResult {
        ChildResult {
            agent: invocation.agent,
            agent_source: invocation.agent_source,
            task: invocation.task,
            exit_code,
            messages: Vec::new(),
            usage: UsageCounters::default(),
            model: None,
            stop: StopKind::Error,
            stop_message: Some(message.to_string()),
            stderr,
            step: invocation.step,
        }
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    graceful_signal(child);
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(TERMINATION_GRACE) => {
            warn!("Child ignored graceful termination, killing");
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn graceful_signal(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn graceful_signal(child: &Child) {
    // No portable graceful signal; the grace period still applies before the
    // forceful kill.
    let _ = child;
}

async fn read_tail(stream: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > STDERR_MAX_BYTES {
                    let excess = buf.len() - STDERR_MAX_BYTES;
                    buf.drain(..excess);
                }
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

fn write_prompt_file(prompt: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("pi-coordinator-prompt-")
        .suffix(".md")
        .tempfile()?;
    file.write_all(prompt.as_bytes())?;
    file.flush()?;
    Ok(file)
}
