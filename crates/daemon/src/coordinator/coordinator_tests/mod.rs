// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator behavior tests, driven through the actor handle with a
//! fake spawner and a fake clock. Tokio time is paused so watchdogs and
//! backoff sleepers fire deterministically.

use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use mab_core::config::ConfigOverrides;
use mab_core::{FakeClock, Role, WorkerStatus};
use mab_storage::{Store, WorkerFilter};

use super::spawn::FakeSpawner;
use super::*;

mod monitoring;
mod restarts;
mod stops;
mod towns;

pub(crate) struct Harness {
    pub handle: CoordinatorHandle,
    pub spawner: FakeSpawner,
    pub clock: FakeClock,
    #[allow(dead_code)]
    pub home: tempfile::TempDir,
    pub town_dir: tempfile::TempDir,
}

impl Harness {
    /// Coordinator over an in-memory store, one town pre-created from a
    /// tempdir, with the given global config document.
    pub async fn with_global(global_yaml: &str) -> Self {
        let store = Store::open_in_memory().unwrap();
        let spawner = FakeSpawner::new();
        let clock = FakeClock::new();
        // Pin the fake epoch to the real one so file mtimes compare.
        clock.set_epoch_ms(
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_millis() as i64,
        );
        let home = tempfile::tempdir().unwrap();
        let town_dir = tempfile::tempdir().unwrap();
        let global = ConfigOverrides::parse(global_yaml, "test").unwrap();

        let (coordinator, handle) = Coordinator::new(
            store,
            home.path().to_path_buf(),
            global,
            spawner.clone(),
            clock.clone(),
        );
        tokio::spawn(coordinator.run());

        let harness = Self {
            handle,
            spawner,
            clock,
            home,
            town_dir,
        };
        harness
            .handle
            .create_town(
                "alpha".to_string(),
                harness.town_dir.path().display().to_string(),
                None,
            )
            .await
            .unwrap();
        harness
    }

    pub async fn new() -> Self {
        Self::with_global("").await
    }

    pub fn town_path(&self) -> String {
        self.town_dir.path().display().to_string()
    }

    pub async fn spawn(&self, role: Role) -> SpawnReply {
        self.handle
            .spawn_worker(role, Some(self.town_path()), None, None)
            .await
            .unwrap()
    }

    /// Touch the worker's heartbeat file with an explicit epoch-ms
    /// mtime, so tests line up with the fake clock.
    pub fn touch_heartbeat(&self, worker: &WorkerRecord, epoch_ms: i64) {
        touch_with_mtime(&worker.heartbeat_path, epoch_ms);
    }

    pub async fn worker(&self, id: &WorkerId) -> WorkerRecord {
        self.handle.get_worker(id.clone()).await.unwrap()
    }

    /// Spawn, heartbeat, and tick until RUNNING.
    pub async fn spawn_running(&self, role: Role) -> WorkerRecord {
        let reply = self.spawn(role).await;
        let record = self.worker(&reply.worker_id).await;
        self.touch_heartbeat(&record, self.clock.epoch_ms());
        self.handle.tick().await.unwrap();
        let record = self.worker(&reply.worker_id).await;
        assert_eq!(record.status, WorkerStatus::Running);
        record
    }
}

pub(crate) fn touch_with_mtime(path: &Path, epoch_ms: i64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_millis(epoch_ms as u64))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn spawn_creates_starting_record() {
    let h = Harness::new().await;
    let reply = h.spawn(Role::Developer).await;

    assert!(reply.worker_id.as_str().starts_with("worker-developer-"));
    assert_eq!(reply.status, WorkerStatus::Starting);

    let record = h.worker(&reply.worker_id).await;
    assert_eq!(record.status, WorkerStatus::Starting);
    assert_eq!(record.pid, Some(reply.pid));
    assert_eq!(record.instance, 1);
    assert_eq!(record.restart_count, 0);
    assert!(record.auto_restart);
    assert!(record.started_at.is_some());
    assert!(record.stopped_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn spawn_request_carries_prompt_cwd_and_log() {
    let h = Harness::new().await;
    let reply = h.spawn(Role::TechLead).await;

    let requests = h.spawner.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.worker_id, reply.worker_id);
    assert_eq!(request.program, "claude");
    assert!(request
        .prompt_path
        .to_string_lossy()
        .ends_with("prompts/tech_lead.md"));
    assert_eq!(
        request.town_path,
        std::fs::canonicalize(h.town_dir.path()).unwrap()
    );
    assert!(request
        .log_path
        .to_string_lossy()
        .contains("/.mab/logs/worker-tech_lead-"));
}

#[tokio::test(start_paused = true)]
async fn instances_fill_the_lowest_free_slot() {
    let h = Harness::new().await;
    let a = h.spawn(Role::Developer).await;
    let b = h.spawn(Role::Developer).await;
    assert_eq!(h.worker(&a.worker_id).await.instance, 1);
    assert_eq!(h.worker(&b.worker_id).await.instance, 2);

    // Requesting an occupied slot is refused.
    let err = h
        .handle
        .spawn_worker(Role::Developer, Some(h.town_path()), Some(2), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Duplicate);

    let err = h
        .handle
        .spawn_worker(Role::Developer, Some(h.town_path()), Some(0), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
}

#[tokio::test(start_paused = true)]
async fn capacity_limit_rejects_without_state_change() {
    let h = Harness::with_global("max_workers_per_town: 2\n").await;
    h.spawn(Role::Qa).await;
    h.spawn(Role::Qa).await;

    let err = h
        .handle
        .spawn_worker(Role::Qa, Some(h.town_path()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Capacity);

    let workers = h
        .handle
        .list_workers(WorkerFilter {
            role: Some(Role::Qa),
            ..Default::default()
        })
        .await
        .unwrap();
    let live: Vec<_> = workers.iter().filter(|w| !w.is_terminal()).collect();
    assert_eq!(live.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_leaves_failed_record_with_diagnostic() {
    let h = Harness::new().await;
    h.spawner.fail_next("no such binary");

    let err = h
        .handle
        .spawn_worker(Role::Qa, Some(h.town_path()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SpawnFailed);

    let workers = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].status, WorkerStatus::Failed);
    assert!(workers[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("no such binary"));
    assert!(workers[0].stopped_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn list_is_consistent_with_get() {
    let h = Harness::new().await;
    h.spawn(Role::Developer).await;
    h.spawn(Role::Qa).await;

    let listed = h.handle.list_workers(WorkerFilter::default()).await.unwrap();
    assert_eq!(listed.len(), 2);
    for worker in listed {
        let fetched = h.worker(&worker.id).await;
        assert_eq!(fetched.status, worker.status);
        assert_eq!(fetched.instance, worker.instance);
        assert_eq!(fetched.role, worker.role);
    }
}

#[tokio::test(start_paused = true)]
async fn status_counts_workers_and_towns() {
    let h = Harness::new().await;
    h.spawn(Role::Developer).await;
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.towns, 1);
    assert_eq!(
        status.workers_by_status,
        vec![("starting".to_string(), 1)]
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_worker_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .handle
        .get_worker(WorkerId::new("worker-qa-deadbeef"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn drain_rejects_later_calls() {
    let h = Harness::new().await;
    h.spawn(Role::Developer).await;
    h.handle.drain(true).await;

    let err = h
        .handle
        .spawn_worker(Role::Qa, Some(h.town_path()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ShuttingDown);
}
