//! Worker lifecycle specs against real stub agent processes.

use serde_json::json;
use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn happy_spawn_reaches_running_via_heartbeat() {
    let daemon = TestDaemon::start();
    let result = daemon.call(
        "worker.spawn",
        json!({ "role": "developer", "town": daemon.town_path() }),
    );

    let worker_id = result["worker_id"].as_str().unwrap();
    assert!(
        worker_id.starts_with("worker-developer-"),
        "unexpected id: {worker_id}"
    );
    let suffix = worker_id.rsplit('-').next().unwrap();
    assert!(suffix.len() >= 6);
    assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(result["status"], "starting");
    assert!(result["pid"].as_u64().is_some());

    // The stub touches its heartbeat file; the monitor promotes it.
    daemon.wait_for_status(worker_id, "running");

    // The worker log exists where the layout says it should.
    let log = std::path::Path::new(&daemon.town_path())
        .join(".mab/logs")
        .join(format!("{worker_id}.log"));
    assert!(log.exists(), "missing worker log at {}", log.display());
}

#[test]
#[serial]
fn capacity_limit_rejects_the_third_qa_worker() {
    let daemon = TestDaemon::start_with(StubAgent::Heartbeat, "max_workers_per_town: 2\n");

    daemon.spawn_worker("qa");
    daemon.spawn_worker("qa");
    let code = daemon.call_err(
        "worker.spawn",
        json!({ "role": "qa", "town": daemon.town_path() }),
    );
    assert_eq!(code, 300, "expected the capacity error code");

    let result = daemon.call("worker.list", json!({ "role": "qa" }));
    let workers = result["workers"].as_array().unwrap();
    let live = workers
        .iter()
        .filter(|w| {
            let status = w["status"].as_str().unwrap();
            status == "starting" || status == "running"
        })
        .count();
    assert_eq!(live, 2);
}

#[test]
#[serial]
fn invalid_role_is_rejected() {
    let daemon = TestDaemon::start();
    let code = daemon.call_err(
        "worker.spawn",
        json!({ "role": "barista", "town": daemon.town_path() }),
    );
    assert_eq!(code, 200, "expected the invalid_role error code");
}

#[test]
#[serial]
fn graceful_stop_is_idempotent() {
    let daemon = TestDaemon::start();
    let (worker_id, pid) = daemon.spawn_worker("developer");
    daemon.wait_for_status(&worker_id, "running");

    let result = daemon.call(
        "worker.stop",
        json!({ "worker_id": worker_id, "timeout_seconds": 3 }),
    );
    assert_eq!(result["status"], "stopped");
    wait_until("stub process to die", || !pid_alive(pid));

    // A second stop sends no signal and reports already_terminal.
    let code = daemon.call_err("worker.stop", json!({ "worker_id": worker_id }));
    assert_eq!(code, 302, "expected the already_terminal error code");
    assert_eq!(daemon.worker_status(&worker_id), "stopped");
}

#[test]
#[serial]
fn stop_escalates_on_a_term_ignoring_worker() {
    let daemon = TestDaemon::start_with(StubAgent::IgnoresTerm, "");
    let (worker_id, pid) = daemon.spawn_worker("developer");
    daemon.wait_for_status(&worker_id, "running");

    let result = daemon.call(
        "worker.stop",
        json!({ "worker_id": worker_id, "graceful": true, "timeout_seconds": 1 }),
    );
    assert_eq!(result["status"], "failed");

    let worker = daemon.call("worker.get", json!({ "worker_id": worker_id }));
    assert_eq!(
        worker["worker"]["error_message"],
        "force killed on shutdown"
    );
    assert!(!pid_alive(pid), "the stub must be SIGKILLed");
}

#[test]
#[serial]
fn silent_worker_fails_with_startup_timeout() {
    let daemon = TestDaemon::start_with(StubAgent::Silent, "");
    let (worker_id, pid) = daemon.spawn_worker("qa");

    // MAB_STARTUP_TIMEOUT_SECS is 3 in the harness.
    daemon.wait_for_status(&worker_id, "failed");
    let worker = daemon.call("worker.get", json!({ "worker_id": worker_id }));
    assert_eq!(worker["worker"]["error_message"], "startup timeout");
    wait_until("silent stub cleanup", || !pid_alive(pid));
}

#[test]
#[serial]
fn killed_worker_fails_and_respawns() {
    // The stub heartbeats only while alive; killing it behind the
    // daemon's back loses both process and heartbeat.
    let daemon = TestDaemon::start_with(
        StubAgent::Heartbeat,
        "restart_policy:\n  backoff_base_seconds: 0\n",
    );
    let (worker_id, pid) = daemon.spawn_worker("developer");
    daemon.wait_for_status(&worker_id, "running");

    kill_pid(pid);
    daemon.wait_for_status(&worker_id, "failed");

    // A successor appears with the same slot and bumped accounting.
    wait_until("successor worker", || {
        let result = daemon.call("worker.list", json!({ "role": "developer" }));
        result["workers"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w["restart_count"] == 1 && w["predecessor"] == worker_id.as_str())
    });
}

#[test]
#[serial]
fn worker_list_round_trips_worker_get() {
    let daemon = TestDaemon::start();
    daemon.spawn_worker("developer");
    daemon.spawn_worker("reviewer");

    let listed = daemon.call("worker.list", json!({}));
    let workers = listed["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 2);
    for worker in workers {
        let id = worker["id"].as_str().unwrap();
        let fetched = daemon.call("worker.get", json!({ "worker_id": id }));
        assert_eq!(fetched["worker"]["status"], worker["status"]);
        assert_eq!(fetched["worker"]["role"], worker["role"]);
    }
}

#[test]
#[serial]
fn oversize_frame_closes_the_connection_but_not_the_daemon() {
    use std::io::Write;

    let daemon = TestDaemon::start();
    let mut stream =
        std::os::unix::net::UnixStream::connect(daemon.socket_path()).unwrap();
    // Announce a 2 MiB frame; the daemon must refuse and hang up.
    stream.write_all(&(2u32 * 1024 * 1024).to_be_bytes()).unwrap();
    stream.write_all(&[0u8; 1024]).unwrap();
    stream.flush().unwrap();

    wait_until("connection to close", || {
        use std::io::Read;
        let mut buf = [0u8; 1];
        stream
            .set_read_timeout(Some(std::time::Duration::from_millis(100)))
            .unwrap();
        matches!(stream.read(&mut buf), Ok(0))
    });

    // The daemon is still serving other connections.
    let status = daemon.call("daemon.status", json!(null));
    assert!(status["uptime"].is_u64());
}
