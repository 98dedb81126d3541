// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Town registry queries.

use std::path::{Path, PathBuf};

use mab_core::config::ConfigOverrides;
use mab_core::{TownId, TownRecord};
use rusqlite::{params, OptionalExtension, Row};

use crate::store::{Store, StoreError};

fn row_to_town(row: &Row<'_>) -> rusqlite::Result<TownRecord> {
    let overrides: Option<String> = row.get("config_overrides")?;
    Ok(TownRecord {
        id: TownId::new(row.get::<_, String>("id")?),
        path: PathBuf::from(row.get::<_, String>("path")?),
        name: row.get("name")?,
        created_at: row.get("created_at")?,
        config_overrides: overrides
            .as_deref()
            .and_then(|text| serde_json::from_str::<ConfigOverrides>(text).ok()),
    })
}

impl Store {
    /// Insert a new town. The caller has already canonicalised the path;
    /// a duplicate path surfaces as a constraint violation.
    pub fn insert_town(&self, town: &TownRecord) -> Result<(), StoreError> {
        let overrides = town
            .config_overrides
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .unwrap_or(None);
        self.conn.execute(
            "INSERT INTO towns (id, path, name, created_at, config_overrides)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                town.id.as_str(),
                town.path.display().to_string(),
                town.name,
                town.created_at,
                overrides,
            ],
        )?;
        Ok(())
    }

    pub fn town(&self, id: &TownId) -> Result<Option<TownRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT * FROM towns WHERE id = ?1",
                params![id.as_str()],
                row_to_town,
            )
            .optional()?)
    }

    pub fn town_by_path(&self, path: &Path) -> Result<Option<TownRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT * FROM towns WHERE path = ?1",
                params![path.display().to_string()],
                row_to_town,
            )
            .optional()?)
    }

    pub fn town_by_name(&self, name: &str) -> Result<Option<TownRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT * FROM towns WHERE name = ?1 ORDER BY created_at LIMIT 1",
                params![name],
                row_to_town,
            )
            .optional()?)
    }

    pub fn list_towns(&self) -> Result<Vec<TownRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM towns ORDER BY created_at")?;
        let towns = stmt
            .query_map([], row_to_town)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(towns)
    }

    pub fn count_towns(&self) -> Result<u32, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM towns", [], |row| row.get(0))?)
    }

    /// Delete a town and its worker history.
    pub fn delete_town(&self, id: &TownId) -> Result<bool, StoreError> {
        self.conn.execute(
            "DELETE FROM workers WHERE town_id = ?1",
            params![id.as_str()],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM towns WHERE id = ?1", params![id.as_str()])?;
        Ok(deleted > 0)
    }
}
