// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker record queries and transition updates.
//!
//! Update paths are deliberately narrow: records enter through
//! `insert_worker`, leave the live set only through `finish_worker`,
//! and every other update touches a single aspect of one record.

use std::path::PathBuf;
use std::str::FromStr;

use mab_core::{Role, TownId, WorkerId, WorkerRecord, WorkerStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::store::{Store, StoreError};

/// Filter for `list_workers`. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct WorkerFilter {
    pub town_id: Option<TownId>,
    pub role: Option<Role>,
    pub status: Option<WorkerStatus>,
}

fn row_to_worker(row: &Row<'_>) -> rusqlite::Result<WorkerRecord> {
    let role: String = row.get("role")?;
    let status: String = row.get("status")?;
    Ok(WorkerRecord {
        id: WorkerId::new(row.get::<_, String>("id")?),
        town_id: TownId::new(row.get::<_, String>("town_id")?),
        role: Role::from_str(&role).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        instance: row.get("instance")?,
        pid: row.get("pid")?,
        status: WorkerStatus::from_str(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        started_at: row.get("started_at")?,
        stopped_at: row.get("stopped_at")?,
        last_heartbeat: row.get("last_heartbeat")?,
        exit_code: row.get("exit_code")?,
        error_message: row.get("error_message")?,
        restart_count: row.get("restart_count")?,
        auto_restart: row.get("auto_restart")?,
        predecessor: row
            .get::<_, Option<String>>("predecessor")?
            .map(WorkerId::new),
        log_path: PathBuf::from(row.get::<_, String>("log_path")?),
        heartbeat_path: PathBuf::from(row.get::<_, String>("heartbeat_path")?),
    })
}

impl Store {
    pub fn insert_worker(&self, worker: &WorkerRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO workers (
                id, town_id, role, instance, pid, status,
                started_at, stopped_at, last_heartbeat, exit_code, error_message,
                restart_count, auto_restart, predecessor, log_path, heartbeat_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                worker.id.as_str(),
                worker.town_id.as_str(),
                worker.role.as_str(),
                worker.instance,
                worker.pid,
                worker.status.as_str(),
                worker.started_at,
                worker.stopped_at,
                worker.last_heartbeat,
                worker.exit_code,
                worker.error_message,
                worker.restart_count,
                worker.auto_restart,
                worker.predecessor.as_ref().map(|p| p.as_str().to_string()),
                worker.log_path.display().to_string(),
                worker.heartbeat_path.display().to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT * FROM workers WHERE id = ?1",
                params![id.as_str()],
                row_to_worker,
            )
            .optional()?)
    }

    pub fn list_workers(&self, filter: &WorkerFilter) -> Result<Vec<WorkerRecord>, StoreError> {
        let mut sql = String::from("SELECT * FROM workers WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(town) = &filter.town_id {
            args.push(town.as_str().to_string());
            sql.push_str(&format!(" AND town_id = ?{}", args.len()));
        }
        if let Some(role) = filter.role {
            args.push(role.as_str().to_string());
            sql.push_str(&format!(" AND role = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY started_at, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let workers = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_worker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(workers)
    }

    /// All workers persisted in a non-terminal status, for startup
    /// reconciliation.
    pub fn non_terminal_workers(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM workers
             WHERE status IN ('starting', 'running', 'stopping')
             ORDER BY id",
        )?;
        let workers = stmt
            .query_map([], row_to_worker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(workers)
    }

    pub fn count_live_in_town(&self, town_id: &TownId) -> Result<u32, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM workers
             WHERE town_id = ?1 AND status IN ('starting', 'running', 'stopping')",
            params![town_id.as_str()],
            |row| row.get(0),
        )?)
    }

    /// The live record occupying a `(town, role, instance)` slot, if any.
    pub fn live_worker_for_slot(
        &self,
        town_id: &TownId,
        role: Role,
        instance: u32,
    ) -> Result<Option<WorkerRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT * FROM workers
                 WHERE town_id = ?1 AND role = ?2 AND instance = ?3
                   AND status IN ('starting', 'running', 'stopping')",
                params![town_id.as_str(), role.as_str(), instance],
                row_to_worker,
            )
            .optional()?)
    }

    /// Instances currently occupied for a role in a town.
    pub fn live_instances(&self, town_id: &TownId, role: Role) -> Result<Vec<u32>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT instance FROM workers
             WHERE town_id = ?1 AND role = ?2
               AND status IN ('starting', 'running', 'stopping')
             ORDER BY instance",
        )?;
        let instances = stmt
            .query_map(params![town_id.as_str(), role.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(instances)
    }

    /// Counts per status string, for `daemon.status`.
    pub fn workers_by_status(&self) -> Result<Vec<(String, u32)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM workers GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Record the spawned pid on a STARTING worker.
    pub fn set_worker_pid(&self, id: &WorkerId, pid: u32) -> Result<(), StoreError> {
        self.update(id, "UPDATE workers SET pid = ?2 WHERE id = ?1", params![
            id.as_str(),
            pid
        ])
    }

    /// Promote a worker to RUNNING on its first observed heartbeat.
    pub fn mark_worker_running(&self, id: &WorkerId, heartbeat_ms: i64) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE workers SET status = 'running', last_heartbeat = ?2 WHERE id = ?1",
            params![id.as_str(), heartbeat_ms],
        )
    }

    /// Mark a worker STOPPING while its grace period runs.
    pub fn mark_worker_stopping(&self, id: &WorkerId) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE workers SET status = 'stopping' WHERE id = ?1",
            params![id.as_str()],
        )
    }

    /// Record a fresh heartbeat observation.
    pub fn record_heartbeat(&self, id: &WorkerId, heartbeat_ms: i64) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE workers SET last_heartbeat = ?2 WHERE id = ?1",
            params![id.as_str(), heartbeat_ms],
        )
    }

    /// Move a worker into a terminal status.
    ///
    /// This is the only path that sets `stopped_at`, and it always does,
    /// so `stopped_at` is present exactly on terminal records. The pid is
    /// cleared: terminal records own no OS process.
    pub fn finish_worker(
        &self,
        id: &WorkerId,
        status: WorkerStatus,
        stopped_at: i64,
        exit_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        debug_assert!(status.is_terminal());
        self.update(
            id,
            "UPDATE workers
             SET status = ?2, stopped_at = ?3, exit_code = ?4, error_message = ?5, pid = NULL
             WHERE id = ?1",
            params![
                id.as_str(),
                status.as_str(),
                stopped_at,
                exit_code,
                error_message
            ],
        )
    }

    fn update(
        &self,
        id: &WorkerId,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(sql, args)?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.as_str().to_string()));
        }
        Ok(())
    }
}
