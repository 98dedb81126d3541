// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn table_aligns_columns_and_uppercases_headers() {
    let rows = vec![
        vec!["worker-qa-1".to_string(), "running".to_string()],
        vec!["w".to_string(), "failed".to_string()],
    ];
    let table = render_table(&["id", "status"], &rows);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], "ID           STATUS");
    assert_eq!(lines[1], "worker-qa-1  running");
    assert_eq!(lines[2], "w            failed");
}

#[test]
fn worker_rows_fill_missing_fields_with_dashes() {
    let workers = vec![json!({
        "id": "worker-qa-00000001",
        "role": "qa",
        "instance": 1,
        "status": "failed",
        "pid": null,
        "started_at": null,
        "town_id": "town-1",
    })];
    let rows = worker_rows(&workers);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], "worker-qa-00000001");
    assert_eq!(rows[0][4], "-");
    assert_eq!(rows[0][5], "-");
}

#[test]
fn worker_rows_render_age_from_started_at() {
    let now = SystemClock.epoch_ms();
    let workers = vec![json!({
        "id": "worker-developer-00000001",
        "role": "developer",
        "instance": 2,
        "status": "running",
        "pid": 4242,
        "started_at": now - 90_000,
        "town_id": "town-1",
    })];
    let rows = worker_rows(&workers);
    assert_eq!(rows[0][2], "2");
    assert_eq!(rows[0][4], "4242");
    assert_eq!(rows[0][5], "1m");
}

#[test]
fn town_rows_use_id_name_path() {
    let towns = vec![json!({"id": "town-1", "name": "alpha", "path": "/p/alpha"})];
    let rows = town_rows(&towns);
    assert_eq!(rows[0], vec!["town-1", "alpha", "/p/alpha"]);
}
