// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn insert_and_fetch_round_trips_all_fields() {
    let store = store_with_town("town-1", "/p");
    let mut w = worker("worker-developer-ab12cd34", "town-1", Role::Developer, 1);
    w.predecessor = Some(WorkerId::new("worker-developer-00000000"));
    w.restart_count = 2;
    store.insert_worker(&w).unwrap();

    let back = store
        .worker(&WorkerId::new("worker-developer-ab12cd34"))
        .unwrap()
        .unwrap();
    assert_eq!(back.town_id, "town-1");
    assert_eq!(back.role, Role::Developer);
    assert_eq!(back.instance, 1);
    assert_eq!(back.status, WorkerStatus::Starting);
    assert_eq!(back.restart_count, 2);
    assert_eq!(
        back.predecessor.as_ref().map(|p| p.as_str()),
        Some("worker-developer-00000000")
    );
    assert!(back.auto_restart);
    assert!(back.pid.is_none());
}

#[test]
fn live_slot_uniqueness_is_enforced_by_the_schema() {
    let store = store_with_town("town-1", "/p");
    store
        .insert_worker(&worker("worker-qa-00000001", "town-1", Role::Qa, 1))
        .unwrap();

    // Same live slot: rejected.
    let err = store
        .insert_worker(&worker("worker-qa-00000002", "town-1", Role::Qa, 1))
        .unwrap_err();
    assert!(matches!(err, StoreError::Sqlite(_)));

    // A terminal record frees the slot.
    store
        .finish_worker(
            &WorkerId::new("worker-qa-00000001"),
            WorkerStatus::Failed,
            9_000,
            None,
            Some("heartbeat lost"),
        )
        .unwrap();
    store
        .insert_worker(&worker("worker-qa-00000002", "town-1", Role::Qa, 1))
        .unwrap();
}

#[test]
fn finish_sets_stopped_at_and_clears_pid() {
    let store = store_with_town("town-1", "/p");
    let id = WorkerId::new("worker-qa-00000001");
    store
        .insert_worker(&worker("worker-qa-00000001", "town-1", Role::Qa, 1))
        .unwrap();
    store.set_worker_pid(&id, 4242).unwrap();
    store.mark_worker_running(&id, 5_000).unwrap();

    let live = store.worker(&id).unwrap().unwrap();
    assert_eq!(live.pid, Some(4242));
    assert_eq!(live.status, WorkerStatus::Running);
    assert_eq!(live.last_heartbeat, Some(5_000));
    assert!(live.stopped_at.is_none());

    store
        .finish_worker(&id, WorkerStatus::Stopped, 6_000, Some(0), None)
        .unwrap();
    let done = store.worker(&id).unwrap().unwrap();
    assert_eq!(done.status, WorkerStatus::Stopped);
    assert_eq!(done.stopped_at, Some(6_000));
    assert_eq!(done.exit_code, Some(0));
    assert!(done.pid.is_none());
}

#[test]
fn update_on_unknown_worker_is_not_found() {
    let store = Store::open_in_memory().unwrap();
    let err = store
        .record_heartbeat(&WorkerId::new("worker-qa-missing0"), 1)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn list_workers_applies_filters() {
    let store = store_with_town("town-1", "/p");
    store.insert_town(&town("town-2", "/q")).unwrap();
    store
        .insert_worker(&worker("worker-qa-00000001", "town-1", Role::Qa, 1))
        .unwrap();
    store
        .insert_worker(&worker("worker-qa-00000002", "town-2", Role::Qa, 1))
        .unwrap();
    store
        .insert_worker(&worker(
            "worker-developer-00000003",
            "town-1",
            Role::Developer,
            1,
        ))
        .unwrap();
    store
        .mark_worker_running(&WorkerId::new("worker-qa-00000001"), 1)
        .unwrap();

    let all = store.list_workers(&WorkerFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    let town1 = store
        .list_workers(&WorkerFilter {
            town_id: Some(TownId::new("town-1")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(town1.len(), 2);

    let running_qa = store
        .list_workers(&WorkerFilter {
            role: Some(Role::Qa),
            status: Some(WorkerStatus::Running),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(running_qa.len(), 1);
    assert_eq!(running_qa[0].id, "worker-qa-00000001");
}

#[test]
fn live_accounting_ignores_terminal_records() {
    let store = store_with_town("town-1", "/p");
    let town_id = TownId::new("town-1");
    store
        .insert_worker(&worker("worker-qa-00000001", "town-1", Role::Qa, 1))
        .unwrap();
    store
        .insert_worker(&worker("worker-qa-00000002", "town-1", Role::Qa, 2))
        .unwrap();
    assert_eq!(store.count_live_in_town(&town_id).unwrap(), 2);
    assert_eq!(store.live_instances(&town_id, Role::Qa).unwrap(), vec![1, 2]);

    store
        .finish_worker(
            &WorkerId::new("worker-qa-00000001"),
            WorkerStatus::Failed,
            9_000,
            None,
            Some("process exited"),
        )
        .unwrap();
    assert_eq!(store.count_live_in_town(&town_id).unwrap(), 1);
    assert_eq!(store.live_instances(&town_id, Role::Qa).unwrap(), vec![2]);
    assert!(store
        .live_worker_for_slot(&town_id, Role::Qa, 1)
        .unwrap()
        .is_none());
    assert!(store
        .live_worker_for_slot(&town_id, Role::Qa, 2)
        .unwrap()
        .is_some());
}

#[test]
fn non_terminal_scan_feeds_reconciliation() {
    let store = store_with_town("town-1", "/p");
    store
        .insert_worker(&worker("worker-qa-00000001", "town-1", Role::Qa, 1))
        .unwrap();
    let mut stopping = worker("worker-manager-00000002", "town-1", Role::Manager, 1);
    stopping.status = WorkerStatus::Stopping;
    store.insert_worker(&stopping).unwrap();
    let mut done = worker("worker-qa-00000003", "town-1", Role::Qa, 3);
    done.status = WorkerStatus::Stopped;
    done.stopped_at = Some(1);
    store.insert_worker(&done).unwrap();

    let live = store.non_terminal_workers().unwrap();
    assert_eq!(live.len(), 2);
}

#[test]
fn status_counts_group_for_daemon_status() {
    let store = store_with_town("town-1", "/p");
    store
        .insert_worker(&worker("worker-qa-00000001", "town-1", Role::Qa, 1))
        .unwrap();
    store
        .insert_worker(&worker("worker-qa-00000002", "town-1", Role::Qa, 2))
        .unwrap();
    store
        .mark_worker_running(&WorkerId::new("worker-qa-00000002"), 1)
        .unwrap();

    let counts = store.workers_by_status().unwrap();
    assert_eq!(
        counts,
        vec![("running".to_string(), 1), ("starting".to_string(), 1)]
    );
}
