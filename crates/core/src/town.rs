// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Town records: isolated project contexts keyed by canonical path.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a town.
    pub struct TownId;
}

impl TownId {
    /// Generate a fresh town id.
    pub fn generate() -> Self {
        Self(format!("town-{}", crate::id::random_suffix(8)))
    }
}

/// Persistent record of a town.
///
/// The canonical absolute `path` is the uniqueness key; `name` is a
/// human-readable label and is never used for identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TownRecord {
    pub id: TownId,
    pub path: PathBuf,
    pub name: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Raw override document supplied at creation, if any.
    #[serde(default)]
    pub config_overrides: Option<crate::config::ConfigOverrides>,
}
