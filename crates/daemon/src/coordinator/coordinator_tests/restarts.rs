// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart supervisor behavior: respawn chains, budgets, cancellation.

use super::*;

/// Wait (in paused time) until the number of records matches.
async fn wait_for_record_count(h: &Harness, expected: usize) -> Vec<WorkerRecord> {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
        if workers.len() >= expected {
            return workers;
        }
    }
    h.handle.list_workers(WorkerFilter::default()).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn failed_worker_respawns_with_incremented_count() {
    let h = Harness::with_global(
        "restart_policy:\n  backoff_base_seconds: 1\n",
    )
    .await;
    let record = h.spawn_running(Role::Developer).await;

    // Heartbeat goes stale; three misses fail the worker.
    h.clock.advance(Duration::from_secs(31));
    for _ in 0..3 {
        h.handle.tick().await.unwrap();
    }
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Failed);

    let workers = wait_for_record_count(&h, 2).await;
    assert_eq!(workers.len(), 2);
    let successor = workers
        .iter()
        .find(|w| !w.is_terminal())
        .expect("a successor should be starting");
    assert_eq!(successor.restart_count, 1);
    assert_eq!(successor.role, record.role);
    assert_eq!(successor.instance, record.instance);
    assert_eq!(successor.predecessor.as_ref(), Some(&record.id));
}

#[tokio::test(start_paused = true)]
async fn respawn_chain_stops_at_max_restarts() {
    let h = Harness::with_global(
        "restart_policy:\n  backoff_base_seconds: 0\n  max_restarts: 3\nhealth_check:\n  heartbeat_timeout_seconds: 1\n  unhealthy_threshold: 1\n",
    )
    .await;
    let first = h.spawn_running(Role::Qa).await;

    // Fail each generation in turn by letting its heartbeat go stale.
    // The first record plus three respawns; the fourth failure is final.
    for _ in 0..10 {
        let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
        let Some(live) = workers.iter().find(|w| !w.is_terminal()).cloned() else {
            break;
        };
        if live.status == WorkerStatus::Starting {
            touch_with_mtime(&live.heartbeat_path, h.clock.epoch_ms());
            h.handle.tick().await.unwrap();
        }
        h.clock.advance(Duration::from_secs(2));
        h.handle.tick().await.unwrap();
        // Give the zero-backoff respawn a chance to land.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(
        workers.len(),
        4,
        "one original + three respawns, then the budget is spent"
    );
    assert!(workers.iter().all(|w| w.is_terminal()));
    let counts: Vec<u32> = {
        let mut counts: Vec<u32> = workers.iter().map(|w| w.restart_count).collect();
        counts.sort_unstable();
        counts
    };
    assert_eq!(counts, vec![0, 1, 2, 3]);
    let _ = first;
}

#[tokio::test(start_paused = true)]
async fn max_restarts_zero_disables_respawns() {
    let h = Harness::with_global("restart_policy:\n  max_restarts: 0\n").await;
    let record = h.spawn_running(Role::Developer).await;

    h.clock.advance(Duration::from_secs(31));
    for _ in 0..3 {
        h.handle.tick().await.unwrap();
    }
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Failed);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(workers.len(), 1, "no respawn may appear");
}

#[tokio::test(start_paused = true)]
async fn auto_restart_false_is_respected() {
    let h = Harness::new().await;
    let reply = h
        .handle
        .spawn_worker(Role::Developer, Some(h.town_path()), None, Some(false))
        .await
        .unwrap();
    let record = h.worker(&reply.worker_id).await;
    h.touch_heartbeat(&record, h.clock.epoch_ms());
    h.handle.tick().await.unwrap();

    h.clock.advance(Duration::from_secs(31));
    for _ in 0..3 {
        h.handle.tick().await.unwrap();
    }
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Failed);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(workers.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn user_stop_never_triggers_a_respawn() {
    let h = Harness::with_global("restart_policy:\n  backoff_base_seconds: 0\n").await;
    let record = h.spawn_running(Role::Developer).await;

    h.handle
        .stop_worker(record.id.clone(), true, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(workers.len(), 1, "stopped workers stay stopped");
}

#[tokio::test(start_paused = true)]
async fn drain_cancels_pending_respawns() {
    let h = Harness::with_global(
        "restart_policy:\n  backoff_base_seconds: 120\n",
    )
    .await;
    let record = h.spawn_running(Role::Developer).await;

    h.clock.advance(Duration::from_secs(31));
    for _ in 0..3 {
        h.handle.tick().await.unwrap();
    }
    let failed = h.worker(&record.id).await;
    assert_eq!(failed.status, WorkerStatus::Failed);
    assert_eq!(failed.restart_count, 0, "the failed record keeps its accounting");

    // A respawn is pending 120s out; nothing may land before the drain,
    // and the drain itself must abort the sleeper and return promptly.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(workers.len(), 1);
    h.handle.drain(true).await;
}
