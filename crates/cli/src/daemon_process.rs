// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Starting and stopping the daemon process from the CLI.

use std::path::PathBuf;
use std::process::Stdio;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::{ClientError, DaemonClient};
use crate::env;

/// Locate the `mabd` binary: `MAB_DAEMON_BIN` > sibling of this
/// executable > whatever `mabd` resolves to on PATH.
pub fn daemon_binary() -> PathBuf {
    if let Ok(bin) = std::env::var("MAB_DAEMON_BIN") {
        return PathBuf::from(bin);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("mabd");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("mabd")
}

/// Start the daemon in the background and wait for its READY line.
///
/// Returns false when a daemon was already running.
pub async fn start_daemon() -> Result<bool, ClientError> {
    let socket_path = env::socket_path().ok_or(ClientError::NoHome)?;
    let client = DaemonClient::at(socket_path);
    if client.probe().await {
        return Ok(false);
    }

    let mut child = tokio::process::Command::new(daemon_binary())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(e.to_string()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClientError::DaemonStartFailed("no stdout".to_string()))?;

    // The daemon prints READY once the socket is bound. If it exits
    // first (lock conflict, bad store), surface its stderr.
    let ready = async {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == "READY" {
                return true;
            }
        }
        false
    };

    let became_ready = tokio::time::timeout(env::timeout_connect(), ready)
        .await
        .map_err(|_| ClientError::DaemonStartTimeout)?;

    if !became_ready {
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClientError::DaemonStartFailed(e.to_string()))?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ClientError::DaemonStartFailed(if stderr.is_empty() {
            format!("daemon exited with {:?}", output.status.code())
        } else {
            stderr
        }));
    }

    Ok(true)
}

/// Ask a running daemon to shut down and wait for the socket to close.
///
/// Returns false when no daemon was running.
pub async fn stop_daemon(graceful: bool) -> Result<bool, ClientError> {
    let client = match DaemonClient::connect() {
        Ok(client) => client,
        Err(ClientError::DaemonNotRunning(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    client
        .request("daemon.shutdown", json!({ "graceful": graceful }))
        .await?;

    // The daemon removes its socket as the last shutdown step.
    let socket_path = env::socket_path().ok_or(ClientError::NoHome)?;
    let deadline = tokio::time::Instant::now() + env::timeout_connect();
    while socket_path.exists() {
        if tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(env::poll_interval()).await;
    }
    Ok(true)
}
