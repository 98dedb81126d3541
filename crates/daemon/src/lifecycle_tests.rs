// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config_in(dir: &std::path::Path) -> DaemonConfig {
    DaemonConfig {
        mab_home: dir.to_path_buf(),
        socket_path: dir.join("mab.sock"),
        lock_path: dir.join("daemon.lock"),
        pid_path: dir.join("daemon.pid"),
        log_path: dir.join("daemon.log"),
        db_path: dir.join("workers.db"),
        config_path: dir.join("config.yaml"),
    }
}

#[tokio::test]
async fn startup_acquires_lock_and_binds_socket() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("mab");
    let config = config_in(&home);

    let result = startup(&config).unwrap();

    assert!(home.is_dir());
    assert!(config.socket_path.exists());
    assert!(config.db_path.exists());
    let pid = std::fs::read_to_string(&config.pid_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());

    // The socket is private to the owning user.
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&config.socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    result.guard.shutdown();
    assert!(!config.socket_path.exists());
    assert!(!config.pid_path.exists());
}

#[tokio::test]
async fn second_startup_fails_with_lock_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let first = startup(&config).unwrap();
    let err = startup(&config).unwrap_err();
    assert!(matches!(err, LifecycleError::LockFailed(_)));

    // The running daemon's files are untouched by the failed attempt.
    assert!(config.socket_path.exists());
    assert!(config.pid_path.exists());
    drop(first);
}

#[tokio::test]
async fn lock_is_released_when_the_guard_drops() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let first = startup(&config).unwrap();
    drop(first);

    let second = startup(&config).unwrap();
    drop(second);
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(&config.mab_home).unwrap();
    // A socket file left behind by a crashed daemon.
    std::os::unix::net::UnixListener::bind(&config.socket_path).unwrap();

    let result = startup(&config).unwrap();
    assert!(config.socket_path.exists());
    drop(result);
}

#[tokio::test]
async fn unreadable_store_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(&config.mab_home).unwrap();
    std::fs::write(&config.db_path, b"this is not a database").unwrap();

    let err = startup(&config).unwrap_err();
    assert!(matches!(err, LifecycleError::Store(_)));
    // A failed startup leaves no pid or socket behind.
    assert!(!config.pid_path.exists());
    assert!(!config.socket_path.exists());
}

#[tokio::test]
async fn startup_reconciles_persisted_workers() {
    use mab_core::{Role, TownId, TownRecord, WorkerId, WorkerRecord, WorkerStatus};

    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    // Seed a registry with a running worker whose pid is long gone.
    {
        let store = mab_storage::Store::open(&config.db_path).unwrap();
        store
            .insert_town(&TownRecord {
                id: TownId::new("town-1"),
                path: dir.path().to_path_buf(),
                name: "t".to_string(),
                created_at: 0,
                config_overrides: None,
            })
            .unwrap();
        store
            .insert_worker(&WorkerRecord {
                id: WorkerId::new("worker-qa-00000001"),
                town_id: TownId::new("town-1"),
                role: Role::Qa,
                instance: 1,
                pid: Some(10_000_001),
                status: WorkerStatus::Running,
                started_at: Some(1),
                stopped_at: None,
                last_heartbeat: None,
                exit_code: None,
                error_message: None,
                restart_count: 0,
                auto_restart: false,
                predecessor: None,
                log_path: dir.path().join("w.log"),
                heartbeat_path: dir.path().join("hb"),
            })
            .unwrap();
    }

    let StartupResult {
        guard: _guard,
        coordinator,
        handle,
        ..
    } = startup(&config).unwrap();
    tokio::spawn(coordinator.run());

    let worker = handle
        .get_worker(WorkerId::new("worker-qa-00000001"))
        .await
        .unwrap();
    assert_eq!(worker.status, WorkerStatus::Failed);
    assert_eq!(worker.error_message.as_deref(), Some("orphaned"));
}
