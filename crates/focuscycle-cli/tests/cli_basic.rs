//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own throwaway home directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn cli(home: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_focuscycle"));
    command
        .env("HOME", home)
        .env("FOCUSCYCLE_ENV", "dev")
        .env("FOCUSCYCLE_LOG", "warn");
    command
}

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = cli(home)
        .args(args)
        .output()
        .expect("Failed to execute CLI command");
    split(output)
}

/// Run `focuscycle run` feeding `input` on stdin.
fn run_session(home: &Path, input: &str) -> (String, String, i32) {
    let mut child = cli(home)
        .arg("run")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn CLI");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("Failed to write stdin");
    split(child.wait_with_output().expect("Failed to wait for CLI"))
}

fn split(output: Output) -> (String, String, i32) {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);
    (stdout, stderr, code)
}

fn json_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout carries JSON lines"))
        .collect()
}

#[test]
fn test_status_without_session() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["status"]);
    assert_eq!(code, 0, "Status failed");
    let status = &json_lines(&stdout)[0];
    assert_eq!(status["phase"], "idle");
    assert!(home.path().join(".config/focuscycle-dev").is_dir());
}

#[test]
fn test_run_then_status_then_reset() {
    let home = tempfile::tempdir().unwrap();

    let (stdout, stderr, code) = run_session(home.path(), "status\nquit\n");
    assert_eq!(code, 0, "Run failed: {stderr}");
    let lines = json_lines(&stdout);
    assert_eq!(lines[0]["type"], "session_started");
    assert!(lines
        .iter()
        .any(|line| line["phase"] == "working" && line["remaining_secs"].is_u64()));

    // The session stays stored after leaving the console.
    let (stdout, _, code) = run_cli(home.path(), &["status"]);
    assert_eq!(code, 0, "Status failed");
    assert_eq!(json_lines(&stdout)[0]["phase"], "working");

    let (stdout, _, code) = run_cli(home.path(), &["reset"]);
    assert_eq!(code, 0, "Reset failed");
    assert!(stdout.contains("session reset"));

    let (stdout, _, _) = run_cli(home.path(), &["status"]);
    assert_eq!(json_lines(&stdout)[0]["phase"], "idle");
}

#[test]
fn test_run_reports_bad_console_input() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_session(home.path(), "snooze\nstart abc\nquit\n");
    assert_eq!(code, 0, "Run failed");
    assert!(stderr.contains("unknown command: snooze"));
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_get() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "timing.work_secs"]);
    assert_eq!(code, 0, "Config get failed");
    assert_eq!(stdout.trim(), "1500");
}

#[test]
fn test_config_get_unknown_key() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["config", "get", "timing.nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_set_and_list() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["config", "set", "timing.work_secs", "600"]);
    assert_eq!(code, 0, "Config set failed");

    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "timing.work_secs"]);
    assert_eq!(stdout.trim(), "600");

    let (stdout, _, code) = run_cli(home.path(), &["config", "list"]);
    assert_eq!(code, 0, "Config list failed");
    assert!(stdout.lines().any(|line| line == "timing.work_secs = 600"));

    let (_, _, code) = run_cli(home.path(), &["config", "reset"]);
    assert_eq!(code, 0, "Config reset failed");
    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "timing.work_secs"]);
    assert_eq!(stdout.trim(), "1500");
}

#[test]
fn test_config_set_rejects_bad_value() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["config", "set", "timing.work_secs", "soon"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}
