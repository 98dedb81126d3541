// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! Requests carry a client-chosen correlation `id`; responses on one
//! connection may come back in any order and are matched by that id.

use mab_core::ErrorKind;
use serde::{Deserialize, Serialize};

#[path = "protocol_wire.rs"]
mod wire;
pub use wire::{
    read_frame, write_frame, ProtocolError, DEFAULT_DEADLINE, MAX_FRAME_SIZE,
};

/// A single RPC request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Error payload carried in failed responses.
///
/// `code` is the stable numeric form of an [`ErrorKind`]; `message` is
/// human-readable and carries no contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// A single RPC response envelope: exactly one of `result` / `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: impl Into<String>, error: &RpcError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorBody {
                code: error.kind.code(),
                message: error.message.clone(),
            }),
        }
    }
}

/// A typed RPC-level failure: a kind from the stable taxonomy plus a
/// diagnostic message. Supervision decisions dispatch on the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} not found"))
    }

    pub fn shutting_down() -> Self {
        Self::new(ErrorKind::ShuttingDown, "daemon is shutting down")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<mab_storage::StoreError> for RpcError {
    fn from(e: mab_storage::StoreError) -> Self {
        match e {
            mab_storage::StoreError::Corrupt(msg) => Self::new(ErrorKind::StoreCorrupt, msg),
            mab_storage::StoreError::NotFound(what) => Self::not_found(what),
            other => Self::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
