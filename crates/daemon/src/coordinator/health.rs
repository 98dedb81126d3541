// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health monitor: periodic liveness ticks into the coordinator.
//!
//! The monitor only keeps time; the actual per-worker checks run inside
//! the coordinator so they serialize with every other transition.
//! Workers spawned by this daemon instance get exit detection from their
//! waiter tasks; the tick covers heartbeat files, startup timeouts and
//! adopted workers with no waiter.

use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::debug;

use super::CoordinatorHandle;

/// Modification time of a heartbeat file as epoch milliseconds, or None
/// when the worker has not touched it yet.
pub fn heartbeat_mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}

/// Start the periodic health tick task.
///
/// `interval` comes from the global `health_check.interval_seconds`
/// (env-overridable via `MAB_HEALTH_TICK_MS` for tests). The task exits
/// when the coordinator goes away.
pub fn spawn_monitor(handle: CoordinatorHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh daemon
        // does not health-check before workers have had any time.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if handle.tick().await.is_err() {
                debug!("health monitor stopping: coordinator is gone");
                return;
            }
        }
    })
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
