// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconciliation: persisted worker records vs OS reality.
//!
//! Every record left in a non-terminal status by the previous daemon
//! instance is checked against the process table. A live pid that still
//! looks like the worker executable is adopted as RUNNING; everything
//! else is failed as orphaned, which feeds the restart policy exactly
//! like any other failure.

use std::collections::HashMap;

use mab_core::config::ConfigOverrides;
use mab_core::{Clock, SystemClock, TownId, WorkerId, WorkerRecord, WorkerStatus};
use mab_storage::{Store, StoreError};
use tracing::{info, warn};

use crate::coordinator::town_effective_config;
use crate::process;

/// What reconciliation found.
pub(crate) struct ReconcileOutcome {
    /// Records left RUNNING under a live pid; the coordinator polls
    /// their liveness since no waiter task owns them.
    pub adopted: Vec<WorkerId>,
    /// Records failed as orphaned, post-update, for respawn scheduling.
    pub orphaned: Vec<WorkerRecord>,
}

pub(crate) fn reconcile_store(
    store: &Store,
    global: &ConfigOverrides,
) -> Result<ReconcileOutcome, StoreError> {
    let workers = store.non_terminal_workers()?;
    let mut outcome = ReconcileOutcome {
        adopted: Vec::new(),
        orphaned: Vec::new(),
    };
    if workers.is_empty() {
        return Ok(outcome);
    }
    info!("reconciling {} persisted workers", workers.len());

    // The expected executable is per-town config.
    let mut programs: HashMap<TownId, String> = HashMap::new();
    let now = SystemClock.epoch_ms();

    for worker in workers {
        let program = match programs.get(&worker.town_id) {
            Some(program) => program.clone(),
            None => {
                let program = match store.town(&worker.town_id)? {
                    Some(town) => town_effective_config(global, &town).agent.program,
                    None => mab_core::config::AgentConfig::default().program,
                };
                programs.insert(worker.town_id.clone(), program.clone());
                program
            }
        };

        let alive = worker
            .pid
            .map(|pid| process::alive(pid) && process::belongs_to(pid, &program))
            .unwrap_or(false);

        if alive {
            info!(worker = %worker.id, pid = worker.pid, "adopting live worker");
            if worker.status != WorkerStatus::Running {
                store.mark_worker_running(&worker.id, now)?;
            }
            outcome.adopted.push(worker.id);
        } else {
            warn!(
                worker = %worker.id,
                pid = worker.pid,
                status = %worker.status,
                "worker orphaned by daemon restart"
            );
            store.finish_worker(&worker.id, WorkerStatus::Failed, now, None, Some("orphaned"))?;
            if let Some(updated) = store.worker(&worker.id)? {
                outcome.orphaned.push(updated);
            }
        }
    }

    info!(
        "reconciliation complete: {} adopted, {} orphaned",
        outcome.adopted.len(),
        outcome.orphaned.len()
    );
    Ok(outcome)
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
