// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stop semantics: grace escalation, idempotence, stop-while-starting.

use super::*;

#[tokio::test(start_paused = true)]
async fn graceful_stop_of_a_gone_process_ends_stopped() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    // The fake pid does not exist, so the grace watchdog finds the
    // process already gone and closes the record out clean.
    let status = h
        .handle
        .stop_worker(record.id.clone(), true, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(status, WorkerStatus::Stopped);

    let stopped = h.worker(&record.id).await;
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert!(stopped.stopped_at.is_some());
    assert!(stopped.pid.is_none());
}

#[tokio::test(start_paused = true)]
async fn second_stop_is_already_terminal() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    h.handle
        .stop_worker(record.id.clone(), true, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let err = h
        .handle
        .stop_worker(record.id.clone(), true, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyTerminal);

    // Status is unchanged by the second call.
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_of_unknown_worker_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .handle
        .stop_worker(WorkerId::new("worker-qa-deadbeef"), true, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn stop_while_starting_waits_for_resolution() {
    let h = Harness::new().await;
    let reply = h.spawn(Role::Developer).await;
    let record = h.worker(&reply.worker_id).await;

    let handle = h.handle.clone();
    let id = record.id.clone();
    let stop_task =
        tokio::spawn(async move { handle.stop_worker(id, true, Some(Duration::from_secs(1))).await });
    tokio::task::yield_now().await;

    // Still starting: the stop is parked, nothing has changed.
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Starting);

    // The worker comes up; the parked stop applies immediately after.
    h.touch_heartbeat(&record, h.clock.epoch_ms());
    h.handle.tick().await.unwrap();

    let status = stop_task.await.unwrap().unwrap();
    assert_eq!(status, WorkerStatus::Stopped);
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_while_starting_reports_startup_failure() {
    let h = Harness::new().await;
    let reply = h.spawn(Role::Developer).await;

    let handle = h.handle.clone();
    let id = reply.worker_id.clone();
    let stop_task = tokio::spawn(async move { handle.stop_worker(id, true, None).await });
    tokio::task::yield_now().await;

    // STARTING resolves to FAILED via the startup timeout; the parked
    // stop reports that terminal status rather than hanging.
    h.clock.advance(Duration::from_secs(31));
    h.handle.tick().await.unwrap();

    let status = stop_task.await.unwrap().unwrap();
    assert_eq!(status, WorkerStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn force_stop_skips_the_grace_period() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    let status = h
        .handle
        .stop_worker(record.id.clone(), false, None)
        .await
        .unwrap();
    assert_eq!(status, WorkerStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn restart_spawns_a_successor_with_fresh_accounting() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    let reply = h.handle.restart_worker(record.id.clone()).await.unwrap();
    assert_ne!(reply.worker_id, record.id);

    let old = h.worker(&record.id).await;
    assert!(old.is_terminal());

    let new = h.worker(&reply.worker_id).await;
    assert_eq!(new.status, WorkerStatus::Starting);
    assert_eq!(new.role, Role::Developer);
    assert_eq!(new.instance, record.instance);
    assert_eq!(new.restart_count, 0);
    assert_eq!(new.predecessor.as_ref(), Some(&record.id));
}

#[tokio::test(start_paused = true)]
async fn restart_of_a_terminal_worker_just_spawns() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Qa).await;
    h.handle
        .stop_worker(record.id.clone(), true, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let reply = h.handle.restart_worker(record.id.clone()).await.unwrap();
    let new = h.worker(&reply.worker_id).await;
    assert_eq!(new.status, WorkerStatus::Starting);
    assert_eq!(new.restart_count, 0);
}

#[tokio::test(start_paused = true)]
async fn restart_of_unknown_worker_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .handle
        .restart_worker(WorkerId::new("worker-qa-deadbeef"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}
