// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Town registry behavior: identity by canonical path, deletes, limits.

use super::*;

#[tokio::test(start_paused = true)]
async fn duplicate_path_is_rejected_regardless_of_name() {
    let h = Harness::new().await;
    let err = h
        .handle
        .create_town("different-name".to_string(), h.town_path(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Duplicate);
}

#[tokio::test(start_paused = true)]
async fn nonexistent_path_is_invalid() {
    let h = Harness::new().await;
    let err = h
        .handle
        .create_town("ghost".to_string(), "/definitely/not/a/real/path".to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidPath);
}

#[tokio::test(start_paused = true)]
async fn get_resolves_id_and_name() {
    let h = Harness::new().await;
    let by_name = h.handle.get_town("alpha".to_string()).await.unwrap();
    let by_id = h
        .handle
        .get_town(by_name.id.as_str().to_string())
        .await
        .unwrap();
    assert_eq!(by_id.path, by_name.path);

    let err = h.handle.get_town("nope".to_string()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn spawn_auto_creates_a_town_for_a_fresh_path() {
    let h = Harness::new().await;
    let fresh = tempfile::tempdir().unwrap();
    let reply = h
        .handle
        .spawn_worker(
            Role::Developer,
            Some(fresh.path().display().to_string()),
            None,
            None,
        )
        .await
        .unwrap();

    let towns = h.handle.list_towns().await.unwrap();
    assert_eq!(towns.len(), 2);
    let created = towns
        .iter()
        .find(|t| t.path == std::fs::canonicalize(fresh.path()).unwrap())
        .expect("spawn should have registered the town");
    let expected_name = created
        .path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(created.name, expected_name);

    let worker = h.worker(&reply.worker_id).await;
    assert_eq!(worker.town_id, created.id);
}

#[tokio::test(start_paused = true)]
async fn auto_create_can_be_disabled() {
    let h = Harness::with_global("auto_create_town: false\n").await;
    let fresh = tempfile::tempdir().unwrap();
    let err = h
        .handle
        .spawn_worker(
            Role::Developer,
            Some(fresh.path().display().to_string()),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTown);
}

#[tokio::test(start_paused = true)]
async fn spawn_with_unknown_name_is_unknown_town() {
    let h = Harness::new().await;
    let err = h
        .handle
        .spawn_worker(Role::Qa, Some("atlantis".to_string()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTown);
}

#[tokio::test(start_paused = true)]
async fn omitted_town_resolves_to_the_sole_town() {
    let h = Harness::new().await;
    let reply = h
        .handle
        .spawn_worker(Role::Qa, None, None, None)
        .await
        .unwrap();
    let town = h.handle.get_town("alpha".to_string()).await.unwrap();
    assert_eq!(h.worker(&reply.worker_id).await.town_id, town.id);

    // With a second town registered the selector becomes mandatory.
    let other = tempfile::tempdir().unwrap();
    h.handle
        .create_town("beta".to_string(), other.path().display().to_string(), None)
        .await
        .unwrap();
    let err = h
        .handle
        .spawn_worker(Role::Qa, None, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTown);
}

#[tokio::test(start_paused = true)]
async fn delete_refuses_while_workers_are_live() {
    let h = Harness::new().await;
    h.spawn(Role::Developer).await;

    let err = h
        .handle
        .delete_town("alpha".to_string(), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::HasLiveWorkers);

    // Force delete kills and removes everything.
    let deleted = h.handle.delete_town("alpha".to_string(), true).await.unwrap();
    assert!(deleted);
    assert!(h.handle.list_towns().await.unwrap().is_empty());
    assert!(h
        .handle
        .list_workers(WorkerFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_after_workers_finish_is_clean() {
    let h = Harness::new().await;
    let record = h.spawn_running(Role::Developer).await;
    h.handle
        .stop_worker(record.id.clone(), true, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let deleted = h.handle.delete_town("alpha".to_string(), false).await.unwrap();
    assert!(deleted);

    let err = h.handle.get_town("alpha".to_string()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn town_config_overrides_apply_to_capacity() {
    let h = Harness::new().await;
    let dir = tempfile::tempdir().unwrap();
    let overrides = ConfigOverrides::parse("max_workers_per_town: 1\n", "test").unwrap();
    h.handle
        .create_town(
            "tight".to_string(),
            dir.path().display().to_string(),
            Some(overrides),
        )
        .await
        .unwrap();

    h.handle
        .spawn_worker(Role::Qa, Some("tight".to_string()), None, None)
        .await
        .unwrap();
    let err = h
        .handle
        .spawn_worker(Role::Qa, Some("tight".to_string()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Capacity);
}
