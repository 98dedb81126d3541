// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health monitor behavior: heartbeat promotion, misses, timeouts.

use super::*;

#[tokio::test(start_paused = true)]
async fn first_heartbeat_promotes_starting_to_running() {
    let h = Harness::new().await;
    let reply = h.spawn(Role::Developer).await;
    let record = h.worker(&reply.worker_id).await;

    // No heartbeat yet: still starting after a tick.
    h.handle.tick().await.unwrap();
    assert_eq!(h.worker(&reply.worker_id).await.status, WorkerStatus::Starting);

    h.touch_heartbeat(&record, h.clock.epoch_ms());
    h.handle.tick().await.unwrap();

    let running = h.worker(&reply.worker_id).await;
    assert_eq!(running.status, WorkerStatus::Running);
    assert!(running.last_heartbeat.is_some());
}

#[tokio::test(start_paused = true)]
async fn startup_timeout_fails_silent_worker() {
    let h = Harness::new().await;
    let reply = h.spawn(Role::Qa).await;

    // 29s in: still within the 30s budget.
    h.clock.advance(Duration::from_secs(29));
    h.handle.tick().await.unwrap();
    assert_eq!(h.worker(&reply.worker_id).await.status, WorkerStatus::Starting);

    h.clock.advance(Duration::from_secs(2));
    h.handle.tick().await.unwrap();

    let failed = h.worker(&reply.worker_id).await;
    assert_eq!(failed.status, WorkerStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("startup timeout"));
    assert!(failed.stopped_at.is_some());
    assert!(failed.pid.is_none());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_loss_fails_after_threshold_misses() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    // Default timeout 30s, threshold 3. Stop touching the heartbeat.
    h.clock.advance(Duration::from_secs(31));
    h.handle.tick().await.unwrap(); // miss 1
    h.handle.tick().await.unwrap(); // miss 2
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Running);

    h.handle.tick().await.unwrap(); // miss 3 → failed
    let failed = h.worker(&record.id).await;
    assert_eq!(failed.status, WorkerStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("heartbeat lost"));
}

#[tokio::test(start_paused = true)]
async fn fresh_heartbeat_resets_the_miss_counter() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    h.clock.advance(Duration::from_secs(31));
    h.handle.tick().await.unwrap(); // miss 1
    h.handle.tick().await.unwrap(); // miss 2

    // The worker comes back: counter starts over.
    h.touch_heartbeat(&record, h.clock.epoch_ms());
    h.handle.tick().await.unwrap();
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Running);

    h.clock.advance(Duration::from_secs(31));
    h.handle.tick().await.unwrap(); // miss 1
    h.handle.tick().await.unwrap(); // miss 2
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Running);
    h.handle.tick().await.unwrap(); // miss 3 → failed
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_exactly_at_timeout_is_still_fresh() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;

    // Age == timeout: the check is strictly greater-than.
    h.touch_heartbeat(&record, h.clock.epoch_ms() - 30_000);
    h.handle.tick().await.unwrap();
    h.handle.tick().await.unwrap();
    h.handle.tick().await.unwrap();
    assert_eq!(h.worker(&record.id).await.status, WorkerStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_updates_are_persisted() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;
    let first = h.worker(&record.id).await.last_heartbeat.unwrap();

    h.clock.advance(Duration::from_secs(5));
    h.touch_heartbeat(&record, h.clock.epoch_ms());
    h.handle.tick().await.unwrap();

    let second = h.worker(&record.id).await.last_heartbeat.unwrap();
    assert!(second > first, "{second} should advance past {first}");
}

#[tokio::test(start_paused = true)]
async fn per_town_heartbeat_timeout_overrides_global() {
    let h = Harness::new().await;
    // Project override: a much tighter heartbeat budget.
    std::fs::create_dir_all(h.town_dir.path().join(".mab")).unwrap();
    std::fs::write(
        h.town_dir.path().join(".mab/config.yaml"),
        "health_check:\n  heartbeat_timeout_seconds: 1\n  unhealthy_threshold: 1\n",
    )
    .unwrap();

    let record = h.spawn_running(Role::Qa).await;
    h.clock.advance(Duration::from_secs(2));
    h.handle.tick().await.unwrap();

    let failed = h.worker(&record.id).await;
    assert_eq!(failed.status, WorkerStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("heartbeat lost"));
}
