// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_id_embeds_role_and_suffix() {
    let id = WorkerId::generate(Role::Developer);
    let s = id.as_str();
    assert!(s.starts_with("worker-developer-"), "got {s}");
    let suffix = s.rsplit('-').next().unwrap();
    assert!(suffix.len() >= 6);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
}

#[yare::parameterized(
    starting = { WorkerStatus::Starting, false },
    running  = { WorkerStatus::Running, false },
    stopping = { WorkerStatus::Stopping, false },
    stopped  = { WorkerStatus::Stopped, true },
    failed   = { WorkerStatus::Failed, true },
)]
fn terminal_statuses(status: WorkerStatus, terminal: bool) {
    assert_eq!(status.is_terminal(), terminal);
}

#[test]
fn status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&WorkerStatus::Starting).unwrap(),
        "\"starting\""
    );
    let back: WorkerStatus = serde_json::from_str("\"failed\"").unwrap();
    assert_eq!(back, WorkerStatus::Failed);
}

#[test]
fn status_round_trips_through_str() {
    for status in [
        WorkerStatus::Starting,
        WorkerStatus::Running,
        WorkerStatus::Stopping,
        WorkerStatus::Stopped,
        WorkerStatus::Failed,
    ] {
        let parsed: WorkerStatus = status.as_str().parse().unwrap();
        assert_eq!(parsed, status);
    }
}

#[test]
fn record_backward_compat_missing_fields() {
    let json = r#"{
        "id": "worker-qa-abc12345",
        "town_id": "town-1",
        "role": "qa",
        "instance": 1,
        "status": "running",
        "log_path": "/t/.mab/logs/worker-qa-abc12345.log",
        "heartbeat_path": "/t/.mab/heartbeat/worker-qa-abc12345"
    }"#;

    let record: WorkerRecord = serde_json::from_str(json).unwrap();
    assert_eq!(record.restart_count, 0);
    assert!(record.auto_restart);
    assert!(record.pid.is_none());
    assert!(record.predecessor.is_none());
}
