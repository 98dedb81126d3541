// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use mab_core::{Role, TownId, TownRecord, WorkerId, WorkerRecord, WorkerStatus};

use super::*;
use crate::WorkerFilter;

mod towns;
mod workers;

pub(crate) fn town(id: &str, path: &str) -> TownRecord {
    TownRecord {
        id: TownId::new(id),
        path: PathBuf::from(path),
        name: path.rsplit('/').next().unwrap_or("town").to_string(),
        created_at: 1_000,
        config_overrides: None,
    }
}

pub(crate) fn worker(id: &str, town_id: &str, role: Role, instance: u32) -> WorkerRecord {
    WorkerRecord {
        id: WorkerId::new(id),
        town_id: TownId::new(town_id),
        role,
        instance,
        pid: None,
        status: WorkerStatus::Starting,
        started_at: Some(2_000),
        stopped_at: None,
        last_heartbeat: None,
        exit_code: None,
        error_message: None,
        restart_count: 0,
        auto_restart: true,
        predecessor: None,
        log_path: PathBuf::from(format!("/t/.mab/logs/{id}.log")),
        heartbeat_path: PathBuf::from(format!("/t/.mab/heartbeat/{id}")),
    }
}

pub(crate) fn store_with_town(id: &str, path: &str) -> Store {
    let store = Store::open_in_memory().unwrap();
    store.insert_town(&town(id, path)).unwrap();
    store
}
