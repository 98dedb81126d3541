// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands.

use std::path::PathBuf;

use mab_core::ErrorKind;
use mab_daemon::protocol::{self, ProtocolError, Request, Response};
use serde_json::Value;
use thiserror::Error;
use tokio::net::UnixStream;

use crate::env;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running (no socket at {0})")]
    DaemonNotRunning(PathBuf),

    #[error("could not determine mab home (set MAB_HOME or HOME)")]
    NoHome,

    #[error("failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("timed out waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("daemon error ({kind}): {message}")]
    Daemon { kind: ErrorKind, message: String },

    #[error("daemon returned a response for a different request")]
    IdMismatch,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One-request-per-connection RPC client.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connectable client; fails fast when no daemon is listening.
    pub fn connect() -> Result<Self, ClientError> {
        let socket_path = env::socket_path().ok_or(ClientError::NoHome)?;
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning(socket_path));
        }
        Ok(Self { socket_path })
    }

    pub fn at(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let request = Request {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
        };
        let response = tokio::time::timeout(env::timeout_ipc(), self.round_trip(&request))
            .await
            .map_err(|_| ClientError::Protocol(ProtocolError::Timeout))??;

        if response.id != request.id {
            return Err(ClientError::IdMismatch);
        }
        if let Some(error) = response.error {
            return Err(ClientError::Daemon {
                kind: ErrorKind::from_code(error.code).unwrap_or(ErrorKind::Internal),
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn round_trip(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|_| ClientError::DaemonNotRunning(self.socket_path.clone()))?;

        let payload = serde_json::to_vec(request).map_err(ProtocolError::Json)?;
        protocol::write_frame(&mut stream, &payload).await?;

        let frame = protocol::read_frame(&mut stream).await?;
        let response: Response = serde_json::from_slice(&frame).map_err(ProtocolError::Json)?;
        Ok(response)
    }

    /// Whether a daemon currently answers on the socket.
    pub async fn probe(&self) -> bool {
        self.request("daemon.status", Value::Null).await.is_ok()
    }
}
