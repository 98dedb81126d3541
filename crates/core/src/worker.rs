// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker records and their lifecycle status.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::role::Role;
use crate::town::TownId;

crate::define_id! {
    /// Unique identifier for a worker record, of the form `worker-<role>-<hex>`.
    pub struct WorkerId;
}

impl WorkerId {
    /// Generate a fresh worker id for the given role.
    pub fn generate(role: Role) -> Self {
        Self(format!("worker-{}-{}", role, crate::id::random_suffix(8)))
    }
}

/// Lifecycle status of a worker record.
///
/// `Stopped` and `Failed` are terminal: a record never leaves them.
/// A restart creates a new record instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Stopped | WorkerStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(WorkerStatus::Starting),
            "running" => Ok(WorkerStatus::Running),
            "stopping" => Ok(WorkerStatus::Stopping),
            "stopped" => Ok(WorkerStatus::Stopped),
            "failed" => Ok(WorkerStatus::Failed),
            other => Err(format!("unrecognized worker status: {other}")),
        }
    }
}

/// Persistent record of a supervised worker.
///
/// Timestamps are epoch milliseconds. `pid` is present only while the
/// daemon owns a live OS process for this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub town_id: TownId,
    pub role: Role,
    /// Distinguishes multiple workers of the same role in one town (≥ 1).
    pub instance: u32,
    #[serde(default)]
    pub pid: Option<u32>,
    pub status: WorkerStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub stopped_at: Option<i64>,
    #[serde(default)]
    pub last_heartbeat: Option<i64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    /// Previous record in the respawn chain, if any.
    #[serde(default)]
    pub predecessor: Option<WorkerId>,
    pub log_path: PathBuf,
    pub heartbeat_path: PathBuf,
}

fn default_auto_restart() -> bool {
    true
}

impl WorkerRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
