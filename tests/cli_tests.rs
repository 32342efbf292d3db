use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_project_agent(dir: &std::path::Path, name: &str, tools: &[&str]) {
    let agents_dir = dir.join(".pi").join("agents");
    fs::create_dir_all(&agents_dir).unwrap();
    let tools = tools
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(",");
    fs::write(
        agents_dir.join(format!("{name}.json")),
        format!("{{\"name\": \"{name}\", \"tools\": [{tools}]}}"),
    )
    .unwrap();
}

#[test]
fn test_agents_command_with_empty_scope() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("pi-coordinator")
        .unwrap()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .args(["agents"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no agents found"));
}

#[test]
fn test_agents_command_lists_project_agents() {
    let dir = tempfile::tempdir().unwrap();
    write_project_agent(dir.path(), "scout", &["read", "grep"]);
    Command::cargo_bin("pi-coordinator")
        .unwrap()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .args(["agents", "--scope", "project"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scout"))
        .stdout(predicate::str::contains("read,grep"));
}

#[test]
fn test_chain_refused_when_inherited_budget_is_too_small() {
    let dir = tempfile::tempdir().unwrap();
    write_project_agent(dir.path(), "worker", &["read"]);

    Command::cargo_bin("pi-coordinator")
        .unwrap()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .env("SUBAGENT_RUN_ID", "cli-test-run")
        .env("SUBAGENT_REMAINING_AGENTS", "3")
        .args([
            "chain",
            "-s",
            "worker=step one",
            "-s",
            "worker=step two",
            "-s",
            "worker=step three",
            "-s",
            "worker=step four",
            "--confirm-project-agents",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "insufficient subagent budget for chain: need at least 4, have 3",
        ));
}

#[test]
fn test_nested_invocation_without_permission_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    write_project_agent(dir.path(), "worker", &["read"]);

    Command::cargo_bin("pi-coordinator")
        .unwrap()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .env("SUBAGENT_RUN_ID", "cli-test-run")
        .env("SUBAGENT_DEPTH", "1")
        .env("SUBAGENT_CAN_SPAWN", "0")
        .args(["run", "worker", "Do the thing", "--confirm-project-agents"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nested delegation blocked"));
}

#[test]
fn test_project_agent_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    write_project_agent(dir.path(), "worker", &["read"]);

    Command::cargo_bin("pi-coordinator")
        .unwrap()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .args(["run", "worker", "Do the thing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("confirmProjectAgents"));
}

#[test]
fn test_malformed_task_pair_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("pi-coordinator")
        .unwrap()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .args(["parallel", "-t", "no-separator-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected agent=task"));
}
