// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forward-only schema migrations keyed off `PRAGMA user_version`.
//!
//! Each entry in [`MIGRATIONS`] upgrades the schema by exactly one
//! version. A database at version N applies entries N.. in order; a
//! database newer than the binary is refused.

use rusqlite::Connection;

use crate::store::StoreError;

/// Ordered migration batches; index i upgrades version i → i + 1.
const MIGRATIONS: &[&str] = &[
    // v0 → v1: initial schema
    "
    CREATE TABLE towns (
        id               TEXT PRIMARY KEY,
        path             TEXT NOT NULL UNIQUE,
        name             TEXT NOT NULL,
        created_at       INTEGER NOT NULL,
        config_overrides TEXT
    );

    CREATE TABLE workers (
        id             TEXT PRIMARY KEY,
        town_id        TEXT NOT NULL REFERENCES towns(id),
        role           TEXT NOT NULL,
        instance       INTEGER NOT NULL,
        pid            INTEGER,
        status         TEXT NOT NULL,
        started_at     INTEGER,
        stopped_at     INTEGER,
        last_heartbeat INTEGER,
        exit_code      INTEGER,
        error_message  TEXT,
        restart_count  INTEGER NOT NULL DEFAULT 0,
        auto_restart   INTEGER NOT NULL DEFAULT 1,
        predecessor    TEXT,
        log_path       TEXT NOT NULL,
        heartbeat_path TEXT NOT NULL
    );

    CREATE INDEX idx_workers_town ON workers(town_id);
    CREATE INDEX idx_workers_status ON workers(status);

    -- At most one non-terminal record per (town, role, instance) slot.
    CREATE UNIQUE INDEX idx_workers_live_slot
        ON workers(town_id, role, instance)
        WHERE status IN ('starting', 'running', 'stopping');
    ",
];

/// Current schema version produced by a fresh database.
pub(crate) const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the connected database up to [`SCHEMA_VERSION`].
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(StoreError::TooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for (i, batch) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let target = i as u32 + 1;
        tracing::info!(from = i, to = target, "migrating worker store schema");
        conn.execute_batch(batch)?;
        // PRAGMA does not support parameter binding.
        conn.execute_batch(&format!("PRAGMA user_version = {target}"))?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
