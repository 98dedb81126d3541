// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the CLI.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve the daemon home: `MAB_HOME` > `~/.mab`.
pub fn mab_home() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("MAB_HOME") {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".mab"))
}

/// Path of the daemon's RPC socket.
pub fn socket_path() -> Option<PathBuf> {
    mab_home().map(|home| home.join("mab.sock"))
}

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for a single RPC round-trip.
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("MAB_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(35))
}

/// Timeout for waiting for the daemon to start.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("MAB_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Polling interval for connection retries.
pub fn poll_interval() -> Duration {
    parse_duration_ms("MAB_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
