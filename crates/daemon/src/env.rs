// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve the daemon home: `MAB_HOME` > `~/.mab`.
pub fn mab_home() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("MAB_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoHome)?;
    Ok(PathBuf::from(home).join(".mab"))
}

/// Log-level override, e.g. `MAB_LOG=debug` or a full tracing filter.
pub fn log_filter() -> Option<String> {
    std::env::var("MAB_LOG").ok()
}

/// How long a STARTING worker may go without a heartbeat or an exit
/// before it is failed. Overridable for tests via
/// `MAB_STARTUP_TIMEOUT_SECS`; not a config key on purpose.
pub fn startup_timeout() -> Duration {
    std::env::var("MAB_STARTUP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}

/// Health monitor tick override (default: config `interval_seconds`).
pub fn health_tick_override() -> Option<Duration> {
    std::env::var("MAB_HEALTH_TICK_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}
