// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared between the daemon and its RPC clients.
//!
//! Kinds are stable strings; numeric codes are stable but opaque to
//! clients. Supervision decisions dispatch on the kind, never on the
//! human-readable message.

use serde::{Deserialize, Serialize};

/// Every error kind a client can observe on the RPC surface, plus the
/// fatal startup kinds the daemon exits with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyRunning,
    InvalidRole,
    UnknownTown,
    Duplicate,
    InvalidPath,
    InvalidParams,
    MethodNotFound,
    Capacity,
    NotFound,
    AlreadyTerminal,
    HasLiveWorkers,
    SpawnFailed,
    ShuttingDown,
    StoreCorrupt,
    ProtocolError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::InvalidRole => "invalid_role",
            ErrorKind::UnknownTown => "unknown_town",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::MethodNotFound => "method_not_found",
            ErrorKind::Capacity => "capacity",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyTerminal => "already_terminal",
            ErrorKind::HasLiveWorkers => "has_live_workers",
            ErrorKind::SpawnFailed => "spawn_failed",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::StoreCorrupt => "store_corrupt",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::Internal => "internal",
        }
    }

    /// Stable numeric code carried in RPC error responses.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::AlreadyRunning => 100,
            ErrorKind::InvalidRole => 200,
            ErrorKind::UnknownTown => 201,
            ErrorKind::Duplicate => 202,
            ErrorKind::InvalidPath => 203,
            ErrorKind::InvalidParams => 204,
            ErrorKind::MethodNotFound => 205,
            ErrorKind::Capacity => 300,
            ErrorKind::NotFound => 301,
            ErrorKind::AlreadyTerminal => 302,
            ErrorKind::HasLiveWorkers => 303,
            ErrorKind::SpawnFailed => 400,
            ErrorKind::ShuttingDown => 401,
            ErrorKind::StoreCorrupt => 500,
            ErrorKind::ProtocolError => 501,
            ErrorKind::Internal => 502,
        }
    }

    /// Resolve a kind back from its stable numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            100 => ErrorKind::AlreadyRunning,
            200 => ErrorKind::InvalidRole,
            201 => ErrorKind::UnknownTown,
            202 => ErrorKind::Duplicate,
            203 => ErrorKind::InvalidPath,
            204 => ErrorKind::InvalidParams,
            205 => ErrorKind::MethodNotFound,
            300 => ErrorKind::Capacity,
            301 => ErrorKind::NotFound,
            302 => ErrorKind::AlreadyTerminal,
            303 => ErrorKind::HasLiveWorkers,
            400 => ErrorKind::SpawnFailed,
            401 => ErrorKind::ShuttingDown,
            500 => ErrorKind::StoreCorrupt,
            501 => ErrorKind::ProtocolError,
            502 => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
