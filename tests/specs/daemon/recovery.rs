//! Crash-recovery specs: the registry outlives the daemon process.

use serde_json::json;
use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn reconciliation_orphans_dead_workers_and_respawns_them() {
    let mut daemon = TestDaemon::start_with(
        StubAgent::Heartbeat,
        "restart_policy:\n  backoff_base_seconds: 0\n",
    );
    let (worker_id, pid) = daemon.spawn_worker("developer");
    daemon.wait_for_status(&worker_id, "running");

    // Simulated crash: SIGKILL the daemon, then the worker, so the
    // persisted RUNNING record points at a dead pid.
    daemon.kill_daemon();
    kill_pid(pid);
    wait_until("stub to die", || !pid_alive(pid));

    daemon.launch();

    // The old record was reconciled to FAILED ("orphaned")...
    wait_until("orphaned record", || {
        daemon.worker_status(&worker_id) == "failed"
    });
    let worker = daemon.call("worker.get", json!({ "worker_id": worker_id }));
    assert_eq!(worker["worker"]["error_message"], "orphaned");

    // ...and auto_restart brought up a successor in the same slot.
    wait_until("respawned successor", || {
        let result = daemon.call("worker.list", json!({ "role": "developer" }));
        result["workers"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w["predecessor"] == worker_id.as_str() && w["status"] != "failed")
    });
}

#[test]
#[serial]
fn terminal_records_survive_a_restart_untouched() {
    let mut daemon = TestDaemon::start();
    let (worker_id, _) = daemon.spawn_worker("qa");
    daemon.wait_for_status(&worker_id, "running");
    daemon.call(
        "worker.stop",
        json!({ "worker_id": worker_id, "timeout_seconds": 3 }),
    );
    assert_eq!(daemon.worker_status(&worker_id), "stopped");

    daemon.kill_daemon();
    daemon.launch();

    // Reconciliation leaves terminal history alone.
    assert_eq!(daemon.worker_status(&worker_id), "stopped");
}
