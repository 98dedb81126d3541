// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mab_core::config::ConfigOverrides;

use super::*;

#[test]
fn insert_and_fetch_by_id_path_and_name() {
    let store = Store::open_in_memory().unwrap();
    store.insert_town(&town("town-1", "/projects/alpha")).unwrap();

    let by_id = store.town(&TownId::new("town-1")).unwrap().unwrap();
    assert_eq!(by_id.name, "alpha");

    let by_path = store
        .town_by_path(std::path::Path::new("/projects/alpha"))
        .unwrap()
        .unwrap();
    assert_eq!(by_path.id, "town-1");

    let by_name = store.town_by_name("alpha").unwrap().unwrap();
    assert_eq!(by_name.id, "town-1");
}

#[test]
fn duplicate_path_violates_uniqueness() {
    let store = Store::open_in_memory().unwrap();
    store.insert_town(&town("town-1", "/p")).unwrap();

    let mut other = town("town-2", "/p");
    other.name = "different-name".to_string();
    let err = store.insert_town(&other).unwrap_err();
    assert!(matches!(err, StoreError::Sqlite(_)));
}

#[test]
fn missing_town_is_none() {
    let store = Store::open_in_memory().unwrap();
    assert!(store.town(&TownId::new("town-x")).unwrap().is_none());
    assert!(store.town_by_name("nope").unwrap().is_none());
}

#[test]
fn delete_removes_town_and_worker_history() {
    let store = store_with_town("town-1", "/p");
    let mut done = worker("worker-qa-aaaa0001", "town-1", Role::Qa, 1);
    done.status = WorkerStatus::Stopped;
    done.stopped_at = Some(3_000);
    store.insert_worker(&done).unwrap();

    assert!(store.delete_town(&TownId::new("town-1")).unwrap());
    assert!(store.town(&TownId::new("town-1")).unwrap().is_none());
    assert!(store
        .worker(&WorkerId::new("worker-qa-aaaa0001"))
        .unwrap()
        .is_none());

    // Second delete is a no-op.
    assert!(!store.delete_town(&TownId::new("town-1")).unwrap());
}

#[test]
fn config_overrides_round_trip() {
    let store = Store::open_in_memory().unwrap();
    let overrides =
        ConfigOverrides::parse("max_workers_per_town: 2\n", "test").unwrap();
    let mut t = town("town-1", "/p");
    t.config_overrides = Some(overrides);
    store.insert_town(&t).unwrap();

    let back = store.town(&TownId::new("town-1")).unwrap().unwrap();
    assert_eq!(
        back.config_overrides.unwrap().max_workers_per_town,
        Some(2)
    );
}

#[test]
fn list_orders_by_creation() {
    let store = Store::open_in_memory().unwrap();
    let mut a = town("town-a", "/a");
    a.created_at = 50;
    let mut b = town("town-b", "/b");
    b.created_at = 10;
    store.insert_town(&a).unwrap();
    store.insert_town(&b).unwrap();

    let listed = store.list_towns().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, "town-b");
    assert_eq!(store.count_towns().unwrap(), 2);
}
