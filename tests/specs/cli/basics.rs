//! CLI front-end specs: the `mab` binary over a live daemon.

use serial_test::serial;

use crate::prelude::*;

fn stdout_of(output: std::process::Output) -> String {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
#[serial]
fn spawn_list_and_stop_through_the_cli() {
    let daemon = TestDaemon::start();

    let out = stdout_of(
        daemon
            .cli_command()
            .args(["spawn", "developer", "--town", &daemon.town_path()])
            .output()
            .unwrap(),
    );
    assert!(out.contains("spawned worker-developer-"), "got: {out}");
    let worker_id = out
        .split_whitespace()
        .find(|w| w.starts_with("worker-developer-"))
        .unwrap()
        .to_string();

    let out = stdout_of(daemon.cli_command().args(["list"]).output().unwrap());
    assert!(out.lines().next().unwrap().starts_with("ID"));
    assert!(out.contains(&worker_id));
    assert!(out.contains("developer"));

    let out = stdout_of(
        daemon
            .cli_command()
            .args(["stop", &worker_id, "--timeout", "3"])
            .output()
            .unwrap(),
    );
    assert!(out.contains("stopped"), "got: {out}");
}

#[test]
#[serial]
fn status_without_daemon_says_so() {
    let home = tempfile::tempdir().unwrap();
    let output = std::process::Command::new(mab_binary())
        .env("MAB_HOME", home.path())
        .args(["daemon", "status"])
        .output()
        .unwrap();
    let out = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(out.contains("daemon not running"), "got: {out}");
}

#[test]
#[serial]
fn town_commands_round_trip() {
    let daemon = TestDaemon::start();
    let dir = tempfile::tempdir().unwrap();

    stdout_of(
        daemon
            .cli_command()
            .args(["town", "create", "alpha", &dir.path().display().to_string()])
            .output()
            .unwrap(),
    );
    let out = stdout_of(daemon.cli_command().args(["town", "list"]).output().unwrap());
    assert!(out.contains("alpha"));

    let out = stdout_of(
        daemon
            .cli_command()
            .args(["town", "get", "alpha"])
            .output()
            .unwrap(),
    );
    assert!(out.contains("\"name\": \"alpha\""));

    stdout_of(
        daemon
            .cli_command()
            .args(["town", "delete", "alpha"])
            .output()
            .unwrap(),
    );
    let out = stdout_of(daemon.cli_command().args(["town", "list"]).output().unwrap());
    assert!(out.contains("no towns"));
}

#[test]
#[serial]
fn daemon_start_via_cli_prints_ready_state() {
    // No daemon yet: the CLI starts one in the background.
    let home = tempfile::tempdir().unwrap();
    let output = std::process::Command::new(mab_binary())
        .env("MAB_HOME", home.path())
        .env("MAB_DAEMON_BIN", mabd_binary())
        .args(["daemon", "start"])
        .output()
        .unwrap();
    let out = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(out.contains("daemon started"), "got: {out}");

    // Second start is a no-op.
    let output = std::process::Command::new(mab_binary())
        .env("MAB_HOME", home.path())
        .env("MAB_DAEMON_BIN", mabd_binary())
        .args(["daemon", "start"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("already running"));

    // Stop it again so nothing leaks past the test.
    let output = std::process::Command::new(mab_binary())
        .env("MAB_HOME", home.path())
        .args(["daemon", "stop"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("daemon stopped"));
}
