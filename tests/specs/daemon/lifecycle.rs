//! Daemon lifecycle specs: single instance, shutdown, version.

use serde_json::json;
use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn second_daemon_exits_with_already_running() {
    let daemon = TestDaemon::start();

    let output = daemon.daemon_command().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("already running"),
        "unexpected stderr: {stderr}"
    );
    assert!(
        stderr.contains("pid:"),
        "stderr should name the running pid: {stderr}"
    );
}

#[test]
#[serial]
fn shutdown_rpc_stops_the_daemon_and_removes_files() {
    let mut daemon = TestDaemon::start();

    let result = daemon.call("daemon.shutdown", json!({}));
    assert_eq!(result["accepted"], true);

    wait_until("daemon to exit", || daemon.daemon_exited());
    wait_until("socket removal", || !daemon.socket_path().exists());
    assert!(!daemon.home().join("daemon.pid").exists());
    // The registry survives shutdown.
    assert!(daemon.home().join("workers.db").exists());
}

#[test]
#[serial]
fn daemon_restarts_cleanly_after_shutdown() {
    let mut daemon = TestDaemon::start();
    daemon.call("daemon.shutdown", json!({}));
    wait_until("daemon to exit", || daemon.daemon_exited());

    // The lock was released; a fresh instance starts immediately.
    daemon.launch();
    let status = daemon.call("daemon.status", json!(null));
    assert_eq!(status["towns"], 0);
}

#[test]
fn version_flag_prints_and_exits() {
    let output = std::process::Command::new(mabd_binary())
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("mabd "));
}

#[test]
fn unexpected_argument_is_rejected() {
    let output = std::process::Command::new(mabd_binary())
        .arg("--frobnicate")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
#[serial]
fn status_reports_uptime_and_counts() {
    let daemon = TestDaemon::start();
    daemon.spawn_worker("developer");

    let status = daemon.call("daemon.status", json!(null));
    assert!(status["uptime"].is_u64());
    assert_eq!(status["towns"], 1);
    assert_eq!(status["workers_by_status"]["starting"], 1);
}
