//! Shared fixtures: throwaway git repositories, stub child programs, and
//! in-memory agent catalogs.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use pi_coordinator::agents::{AgentCatalog, AgentDefinition, AgentSource};

pub fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git available");
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

/// Initialize a repository with one committed file `a.txt`.
pub fn init_repo(dir: &Path) {
    run_git(dir, &["init", "-q"]);
    run_git(dir, &["config", "user.email", "tests@example.com"]);
    run_git(dir, &["config", "user.name", "Tests"]);
    run_git(dir, &["config", "commit.gpgsign", "false"]);
    fs::write(dir.join("a.txt"), "base\n").unwrap();
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "-q", "-m", "init"]);
}

pub fn head_of(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .expect("git available");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn branches_of(dir: &Path) -> Vec<String> {
    let output = Command::new("git")
        .args(["branch", "--list", "--format=%(refname:short)"])
        .current_dir(dir)
        .output()
        .expect("git available");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect()
}

/// A JSON event line the stub children emit for a successful turn.
pub fn stub_message_line(text: &str) -> String {
    format!(
        r#"{{"type":"message_end","message":{{"role":"assistant","content":[{{"type":"text","text":"{text}"}}],"usage":{{"input_tokens":3,"output_tokens":2}},"model":"stub","stop_reason":"end_turn"}}}}"#
    )
}

/// Write an executable stub standing in for the `pi` child program.
///
/// The body runs with the child's cwd and arguments; emit event lines with
/// `emit_success` or exit non-zero to simulate failure.
pub fn write_stub_child(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\n{body}\n");
    fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Stub that prints one successful assistant turn with `text`.
pub fn success_stub(dir: &Path, name: &str, text: &str) -> PathBuf {
    write_stub_child(
        dir,
        name,
        &format!("printf '%s\\n' '{}'", stub_message_line(text)),
    )
}

pub fn agent(name: &str, tools: &[&str]) -> AgentDefinition {
    AgentDefinition {
        name: name.to_string(),
        description: None,
        tools: tools.iter().map(|t| t.to_string()).collect(),
        model: None,
        source: AgentSource::Unknown,
    }
}

/// Catalog with a read-only `scout` and a write-capable `worker`.
pub fn default_catalog() -> AgentCatalog {
    AgentCatalog::from_definitions([
        agent("scout", &["read", "grep"]),
        agent("worker", &["read", "edit", "bash"]),
    ])
}
