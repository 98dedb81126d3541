// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker subprocess launching.
//!
//! The `Spawner` trait is the seam between the lifecycle coordinator
//! and the operating system: `OsSpawner` launches real agent processes,
//! `FakeSpawner` scripts outcomes for coordinator tests.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use mab_core::{Role, WorkerId};
use thiserror::Error;

/// Per-town daemon directories under `<town>/.mab/`.
pub fn town_mab_dir(town_path: &Path) -> PathBuf {
    town_path.join(".mab")
}

pub fn town_logs_dir(town_path: &Path) -> PathBuf {
    town_mab_dir(town_path).join("logs")
}

pub fn town_heartbeat_dir(town_path: &Path) -> PathBuf {
    town_mab_dir(town_path).join("heartbeat")
}

/// Everything needed to launch one worker subprocess.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub worker_id: WorkerId,
    pub role: Role,
    pub town_path: PathBuf,
    /// Agent program from the effective config.
    pub program: String,
    /// Extra arguments appended after the prompt path.
    pub args: Vec<String>,
    /// Role prompt, resolved once from `<mab_home>/prompts/`.
    pub prompt_path: PathBuf,
    pub log_path: PathBuf,
}

/// A successfully launched child.
pub struct SpawnedChild {
    pub pid: u32,
    /// Present for real children; the coordinator hands it to a waiter
    /// task that reports termination. Fakes have no process to wait on.
    pub child: Option<tokio::process::Child>,
}

/// Typed launch failures.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare {path}: {source}")]
    Setup {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child exited before a pid could be observed")]
    NoPid,
}

/// Launches worker subprocesses.
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedChild, SpawnError>;
}

/// Real subprocess spawner.
#[derive(Clone, Default)]
pub struct OsSpawner;

#[async_trait]
impl Spawner for OsSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedChild, SpawnError> {
        let setup = |path: &Path, source| SpawnError::Setup {
            path: path.display().to_string(),
            source,
        };

        // Worker-visible directories must exist before the child runs.
        let logs_dir = town_logs_dir(&request.town_path);
        std::fs::create_dir_all(&logs_dir).map_err(|e| setup(&logs_dir, e))?;
        let heartbeat_dir = town_heartbeat_dir(&request.town_path);
        std::fs::create_dir_all(&heartbeat_dir).map_err(|e| setup(&heartbeat_dir, e))?;

        // stdout and stderr both append to the worker log.
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)
            .map_err(|e| setup(&request.log_path, e))?;
        let log_err = log.try_clone().map_err(|e| setup(&request.log_path, e))?;

        let child = tokio::process::Command::new(&request.program)
            .arg(&request.prompt_path)
            .args(&request.args)
            .current_dir(&request.town_path)
            .env("MAB_WORKER_ID", request.worker_id.as_str())
            .env("MAB_TOWN_PATH", &request.town_path)
            .env("MAB_ROLE", request.role.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| SpawnError::Launch {
                program: request.program.clone(),
                source: e,
            })?;

        let pid = child.id().ok_or(SpawnError::NoPid)?;
        Ok(SpawnedChild {
            pid,
            child: Some(child),
        })
    }
}

/// Scripted spawner for coordinator tests.
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeSpawner;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Records spawn requests and hands out fake pids, or scripted
    /// failures queued with [`FakeSpawner::fail_next`].
    #[derive(Clone, Default)]
    pub struct FakeSpawner {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        next_pid: u32,
        failures: VecDeque<String>,
        requests: Vec<SpawnRequest>,
    }

    impl FakeSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a launch failure for the next spawn call.
        pub fn fail_next(&self, message: impl Into<String>) {
            self.inner.lock().failures.push_back(message.into());
        }

        /// All spawn requests observed so far.
        pub fn requests(&self) -> Vec<SpawnRequest> {
            self.inner.lock().requests.clone()
        }
    }

    #[async_trait]
    impl Spawner for FakeSpawner {
        async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedChild, SpawnError> {
            let mut inner = self.inner.lock();
            inner.requests.push(request.clone());
            if let Some(message) = inner.failures.pop_front() {
                return Err(SpawnError::Launch {
                    program: request.program.clone(),
                    source: std::io::Error::other(message),
                });
            }
            inner.next_pid += 1;
            // Above PID_MAX_LIMIT (4194304): these pids can never exist,
            // so signals sent to them are guaranteed no-ops.
            Ok(SpawnedChild {
                pid: 10_000_000 + inner.next_pid,
                child: None,
            })
        }
    }
}
