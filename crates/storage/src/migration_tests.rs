// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::Store;

#[test]
fn fresh_database_lands_on_current_version() {
    let store = Store::open_in_memory().unwrap();
    let version: u32 = store
        .conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[test]
fn migrate_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    migrate(&store.conn).unwrap();
    migrate(&store.conn).unwrap();
}

#[test]
fn refuses_database_from_the_future() {
    let store = Store::open_in_memory().unwrap();
    store
        .conn
        .execute_batch("PRAGMA user_version = 999")
        .unwrap();
    let err = migrate(&store.conn).unwrap_err();
    assert!(matches!(
        err,
        StoreError::TooNew {
            found: 999,
            supported: _
        }
    ));
}

#[test]
fn reopen_from_disk_preserves_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workers.db");
    drop(Store::open(&path).unwrap());
    let store = Store::open(&path).unwrap();
    let version: u32 = store
        .conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}
