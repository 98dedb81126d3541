// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store open/close and integrity checking.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

use crate::migration;

/// How long a reader/writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the worker store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is corrupt: {0}")]
    Corrupt(String),

    #[error("store schema version {found} is newer than supported ({supported})")]
    TooNew { found: u32, supported: u32 },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Handle to the worker registry database.
///
/// Owned exclusively by the lifecycle coordinator; never cloned or
/// shared. WAL mode keeps concurrent external readers (dashboards
/// inspecting `workers.db` directly) consistent with the single writer.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open or create the registry at `path` and migrate it forward.
    ///
    /// Fails fast with [`StoreError::Corrupt`] when SQLite's integrity
    /// check reports anything but `ok`; a corrupt registry is fatal to
    /// daemon startup rather than silently rebuilt.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(StoreError::Corrupt(check));
        }

        migration::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migration::migrate(&conn)?;
        Ok(Self { conn })
    }
}

#[cfg(test)]
#[path = "store_tests/mod.rs"]
mod tests;
