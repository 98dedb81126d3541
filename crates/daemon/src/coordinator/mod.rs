// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The lifecycle coordinator: single writer to the worker registry.
//!
//! All worker and town mutations arrive as mailbox [`Command`]s carrying
//! reply channels, and are processed one at a time, so at any instant at
//! most one state transition is in flight. Long waits never block the
//! mailbox: grace periods run as watchdog tasks that send follow-up
//! commands, and process exits arrive from per-child waiter tasks.
//!
//! Every transition persists to the store before its externally visible
//! effect (signal, spawn, reply), so a crash mid-transition leaves the
//! store at the pre-transition state for reconciliation.

pub mod health;
pub mod restart;
pub mod spawn;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use mab_core::config::{Config, ConfigOverrides};
use mab_core::{Clock, ErrorKind, Role, TownId, TownRecord, WorkerId, WorkerRecord, WorkerStatus};
use mab_storage::{Store, WorkerFilter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::process;
use crate::protocol::RpcError;
use spawn::{SpawnRequest, Spawner};

/// Mailbox depth; senders briefly queue when the actor is busy.
const MAILBOX: usize = 256;

/// Poll interval while draining waits for worker exits.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Result of a spawn or restart, as surfaced over RPC.
#[derive(Debug, Clone)]
pub struct SpawnReply {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub status: WorkerStatus,
}

/// Snapshot for `daemon.status`.
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub uptime_secs: u64,
    pub workers_by_status: Vec<(String, u32)>,
    pub towns: u32,
}

/// A scheduled respawn, delivered after its backoff delay.
#[derive(Debug, Clone)]
pub struct Respawn {
    pub town_id: TownId,
    pub role: Role,
    pub instance: u32,
    pub auto_restart: bool,
    pub next_count: u32,
    pub predecessor: WorkerId,
}

type Reply<T> = oneshot::Sender<Result<T, RpcError>>;

/// Commands processed by the coordinator actor.
pub enum Command {
    // RPC-facing
    SpawnWorker {
        role: Role,
        town: Option<String>,
        instance: Option<u32>,
        auto_restart: Option<bool>,
        reply: Reply<SpawnReply>,
    },
    StopWorker {
        worker_id: WorkerId,
        graceful: bool,
        timeout: Option<Duration>,
        reply: Reply<WorkerStatus>,
    },
    RestartWorker {
        worker_id: WorkerId,
        reply: Reply<SpawnReply>,
    },
    ListWorkers {
        filter: WorkerFilter,
        reply: Reply<Vec<WorkerRecord>>,
    },
    GetWorker {
        worker_id: WorkerId,
        reply: Reply<WorkerRecord>,
    },
    CreateTown {
        name: String,
        path: String,
        overrides: Option<ConfigOverrides>,
        reply: Reply<TownId>,
    },
    ListTowns {
        reply: Reply<Vec<TownRecord>>,
    },
    GetTown {
        selector: String,
        reply: Reply<TownRecord>,
    },
    DeleteTown {
        selector: String,
        force: bool,
        reply: Reply<bool>,
    },
    Status {
        reply: Reply<DaemonStatus>,
    },
    /// Resolve a town selector for `worker.list` filtering.
    ResolveTown {
        selector: String,
        reply: Reply<TownId>,
    },

    // Internal
    ProcessExited {
        worker_id: WorkerId,
        exit_code: Option<i32>,
    },
    HealthTick,
    RespawnDue {
        respawn: Respawn,
    },
    StopGraceExpired {
        worker_id: WorkerId,
    },
    StopForceExpired {
        worker_id: WorkerId,
    },
    Drain {
        graceful: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Cheap cloneable handle for the listener, monitors and watchdogs.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

macro_rules! rpc_call {
    ($self:ident, $variant:ident { $($field:ident : $value:expr),* $(,)? }) => {{
        let (reply, rx) = oneshot::channel();
        $self
            .tx
            .send(Command::$variant { $($field: $value,)* reply })
            .await
            .map_err(|_| RpcError::shutting_down())?;
        rx.await.map_err(|_| RpcError::shutting_down())?
    }};
}

impl CoordinatorHandle {
    pub async fn spawn_worker(
        &self,
        role: Role,
        town: Option<String>,
        instance: Option<u32>,
        auto_restart: Option<bool>,
    ) -> Result<SpawnReply, RpcError> {
        rpc_call!(self, SpawnWorker { role: role, town: town, instance: instance, auto_restart: auto_restart })
    }

    pub async fn stop_worker(
        &self,
        worker_id: WorkerId,
        graceful: bool,
        timeout: Option<Duration>,
    ) -> Result<WorkerStatus, RpcError> {
        rpc_call!(self, StopWorker { worker_id: worker_id, graceful: graceful, timeout: timeout })
    }

    pub async fn restart_worker(&self, worker_id: WorkerId) -> Result<SpawnReply, RpcError> {
        rpc_call!(self, RestartWorker { worker_id: worker_id })
    }

    pub async fn list_workers(&self, filter: WorkerFilter) -> Result<Vec<WorkerRecord>, RpcError> {
        rpc_call!(self, ListWorkers { filter: filter })
    }

    pub async fn get_worker(&self, worker_id: WorkerId) -> Result<WorkerRecord, RpcError> {
        rpc_call!(self, GetWorker { worker_id: worker_id })
    }

    pub async fn create_town(
        &self,
        name: String,
        path: String,
        overrides: Option<ConfigOverrides>,
    ) -> Result<TownId, RpcError> {
        rpc_call!(self, CreateTown { name: name, path: path, overrides: overrides })
    }

    pub async fn list_towns(&self) -> Result<Vec<TownRecord>, RpcError> {
        rpc_call!(self, ListTowns {})
    }

    pub async fn get_town(&self, selector: String) -> Result<TownRecord, RpcError> {
        rpc_call!(self, GetTown { selector: selector })
    }

    pub async fn delete_town(&self, selector: String, force: bool) -> Result<bool, RpcError> {
        rpc_call!(self, DeleteTown { selector: selector, force: force })
    }

    pub async fn status(&self) -> Result<DaemonStatus, RpcError> {
        rpc_call!(self, Status {})
    }

    pub async fn resolve_town(&self, selector: String) -> Result<TownId, RpcError> {
        rpc_call!(self, ResolveTown { selector: selector })
    }

    /// Deliver a health tick. Errors mean the coordinator is gone.
    pub async fn tick(&self) -> Result<(), ()> {
        self.tx.send(Command::HealthTick).await.map_err(|_| ())
    }

    /// Drain all workers and shut the coordinator down.
    pub async fn drain(&self, graceful: bool) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Drain { graceful, reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// A stop requested while the worker was still STARTING.
struct PendingStop {
    graceful: bool,
    timeout: Duration,
}

/// The coordinator actor. Generic over the spawner and clock so tests
/// drive it with fakes.
pub struct Coordinator<S: Spawner, C: Clock> {
    store: Store,
    mab_home: PathBuf,
    global: ConfigOverrides,
    spawner: S,
    clock: C,
    start_time: Instant,
    rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    /// Workers adopted from a previous daemon instance: no waiter task,
    /// liveness is polled on health ticks.
    adopted: HashSet<WorkerId>,
    /// Consecutive heartbeat misses per live worker.
    miss_counts: HashMap<WorkerId, u32>,
    /// Scheduled respawn sleepers, keyed by the failed record's id.
    pending_respawns: HashMap<WorkerId, JoinHandle<()>>,
    /// RPC stop replies waiting for a terminal transition.
    stop_waiters: HashMap<WorkerId, Vec<Reply<WorkerStatus>>>,
    /// Stops requested while STARTING, applied once STARTING resolves.
    pending_stops: HashMap<WorkerId, PendingStop>,
    /// RPC restart replies waiting for the old record to go terminal.
    pending_restarts: HashMap<WorkerId, Vec<Reply<SpawnReply>>>,
    /// Workers whose grace period expired and were force-killed; their
    /// exit becomes FAILED "force killed on shutdown".
    escalated: HashSet<WorkerId>,
    draining: bool,
}

impl<S: Spawner, C: Clock> Coordinator<S, C> {
    pub fn new(
        store: Store,
        mab_home: PathBuf,
        global: ConfigOverrides,
        spawner: S,
        clock: C,
    ) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX);
        let handle = CoordinatorHandle { tx: tx.clone() };
        let start_time = clock.now();
        (
            Self {
                store,
                mab_home,
                global,
                spawner,
                clock,
                start_time,
                rx,
                tx,
                adopted: HashSet::new(),
                miss_counts: HashMap::new(),
                pending_respawns: HashMap::new(),
                stop_waiters: HashMap::new(),
                pending_stops: HashMap::new(),
                pending_restarts: HashMap::new(),
                escalated: HashSet::new(),
                draining: false,
            },
            handle,
        )
    }

    /// Register workers reconciliation left RUNNING under a live pid.
    pub fn adopt_all(&mut self, worker_ids: impl IntoIterator<Item = WorkerId>) {
        self.adopted.extend(worker_ids);
    }

    /// Schedule respawns for workers reconciliation marked FAILED.
    pub fn schedule_orphan_respawns(&mut self, orphaned: Vec<WorkerRecord>) {
        let now = self.clock.epoch_ms();
        for worker in orphaned {
            self.after_failure(&worker, now);
        }
    }

    /// Process commands until drained.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            if let Command::Drain { graceful, reply } = command {
                self.drain(graceful).await;
                let _ = reply.send(());
                break;
            }
            self.handle(command).await;
        }
        debug!("coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SpawnWorker {
                role,
                town,
                instance,
                auto_restart,
                reply,
            } => {
                let result = self.handle_spawn(role, town, instance, auto_restart).await;
                let _ = reply.send(result);
            }
            Command::StopWorker {
                worker_id,
                graceful,
                timeout,
                reply,
            } => self.handle_stop(worker_id, graceful, timeout, reply),
            Command::RestartWorker { worker_id, reply } => {
                self.handle_restart(worker_id, reply).await
            }
            Command::ListWorkers { filter, reply } => {
                let _ = reply.send(self.store.list_workers(&filter).map_err(Into::into));
            }
            Command::GetWorker { worker_id, reply } => {
                let result = match self.store.worker(&worker_id) {
                    Ok(Some(worker)) => Ok(worker),
                    Ok(None) => Err(RpcError::not_found(&worker_id)),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::CreateTown {
                name,
                path,
                overrides,
                reply,
            } => {
                let _ = reply.send(self.handle_create_town(name, path, overrides));
            }
            Command::ListTowns { reply } => {
                let _ = reply.send(self.store.list_towns().map_err(Into::into));
            }
            Command::GetTown { selector, reply } => {
                let _ = reply.send(self.resolve_id_or_name(&selector));
            }
            Command::DeleteTown {
                selector,
                force,
                reply,
            } => {
                let _ = reply.send(self.handle_delete_town(&selector, force));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.handle_status());
            }
            Command::ResolveTown { selector, reply } => {
                let result = self.resolve_town_selector(&selector).map(|t| t.id);
                let _ = reply.send(result);
            }
            Command::ProcessExited {
                worker_id,
                exit_code,
            } => self.on_process_exited(&worker_id, exit_code),
            Command::HealthTick => self.handle_health_tick(),
            Command::RespawnDue { respawn } => self.handle_respawn_due(respawn).await,
            Command::StopGraceExpired { worker_id } => self.on_stop_grace_expired(&worker_id),
            Command::StopForceExpired { worker_id } => self.on_stop_force_expired(&worker_id),
            Command::Drain { .. } => unreachable!("drain is handled by the run loop"),
        }
    }

    // ----- config resolution -----

    fn town_config(&self, town: &TownRecord) -> Config {
        town_effective_config(&self.global, town)
    }

    fn global_config(&self) -> Config {
        Config::resolve([&self.global])
    }

    fn prompt_path(&self, role: Role) -> PathBuf {
        self.mab_home.join("prompts").join(role.prompt_filename())
    }

    // ----- town resolution -----

    /// Resolve a `worker.spawn` town argument: absolute path or name.
    /// Omitted resolves to the sole registered town. Unknown paths are
    /// auto-created when `auto_create_town` allows it.
    fn resolve_spawn_town(&mut self, selector: Option<&str>) -> Result<TownRecord, RpcError> {
        let Some(selector) = selector else {
            let mut towns = self.store.list_towns()?;
            if towns.len() == 1 {
                if let Some(town) = towns.pop() {
                    return Ok(town);
                }
            }
            return Err(RpcError::new(
                ErrorKind::UnknownTown,
                match towns.len() {
                    0 => "no towns registered".to_string(),
                    n => format!("{n} towns registered, specify one"),
                },
            ));
        };

        if !selector.starts_with('/') {
            return self
                .store
                .town_by_name(selector)?
                .ok_or_else(|| RpcError::new(ErrorKind::UnknownTown, format!("unknown town: {selector}")));
        }

        let canonical = std::fs::canonicalize(selector).map_err(|e| {
            RpcError::new(ErrorKind::UnknownTown, format!("unknown town path {selector}: {e}"))
        })?;
        if let Some(town) = self.store.town_by_path(&canonical)? {
            return Ok(town);
        }
        if !self.global_config().auto_create_town() {
            return Err(RpcError::new(
                ErrorKind::UnknownTown,
                format!("unknown town: {}", canonical.display()),
            ));
        }

        // First spawn into a fresh path: create the town implicitly.
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "town".to_string());
        let town = TownRecord {
            id: TownId::generate(),
            path: canonical,
            name,
            created_at: self.clock.epoch_ms(),
            config_overrides: None,
        };
        self.store.insert_town(&town)?;
        info!(town = %town.name, path = %town.path.display(), "auto-created town");
        Ok(town)
    }

    /// Resolve a `town.get` / `town.delete` selector: id first, then name.
    fn resolve_id_or_name(&self, selector: &str) -> Result<TownRecord, RpcError> {
        if let Some(town) = self.store.town(&TownId::new(selector))? {
            return Ok(town);
        }
        self.store
            .town_by_name(selector)?
            .ok_or_else(|| RpcError::not_found(format!("town '{selector}'")))
    }

    /// Resolve a `worker.list` town filter: path, id, or name.
    fn resolve_town_selector(&self, selector: &str) -> Result<TownRecord, RpcError> {
        if selector.starts_with('/') {
            let canonical =
                std::fs::canonicalize(selector).unwrap_or_else(|_| PathBuf::from(selector));
            return self
                .store
                .town_by_path(&canonical)?
                .ok_or_else(|| RpcError::not_found(format!("town '{selector}'")));
        }
        self.resolve_id_or_name(selector)
    }

    // ----- spawn -----

    async fn handle_spawn(
        &mut self,
        role: Role,
        town: Option<String>,
        instance: Option<u32>,
        auto_restart: Option<bool>,
    ) -> Result<SpawnReply, RpcError> {
        if self.draining {
            return Err(RpcError::shutting_down());
        }
        let town = self.resolve_spawn_town(town.as_deref())?;
        let config = self.town_config(&town);

        let live = self.store.count_live_in_town(&town.id)?;
        if live >= config.max_workers_per_town() {
            return Err(RpcError::new(
                ErrorKind::Capacity,
                format!(
                    "town '{}' is at its limit of {} live workers",
                    town.name,
                    config.max_workers_per_town()
                ),
            ));
        }

        let instance = match instance {
            Some(0) => return Err(RpcError::invalid_params("instance must be >= 1")),
            Some(n) => {
                if self.store.live_worker_for_slot(&town.id, role, n)?.is_some() {
                    return Err(RpcError::new(
                        ErrorKind::Duplicate,
                        format!("{role} instance {n} is already live in town '{}'", town.name),
                    ));
                }
                n
            }
            None => {
                // Lowest free instance number.
                let taken = self.store.live_instances(&town.id, role)?;
                (1..).find(|n| !taken.contains(n)).unwrap_or(1)
            }
        };

        self.spawn_slot(&town, &config, role, instance, auto_restart.unwrap_or(true), 0, None)
            .await
    }

    /// Create and launch one worker record. Shared by RPC spawn, manual
    /// restart and scheduled respawns; the caller has validated the slot.
    #[allow(clippy::too_many_arguments)]
    async fn spawn_slot(
        &mut self,
        town: &TownRecord,
        config: &Config,
        role: Role,
        instance: u32,
        auto_restart: bool,
        restart_count: u32,
        predecessor: Option<WorkerId>,
    ) -> Result<SpawnReply, RpcError> {
        let worker_id = WorkerId::generate(role);
        let log_path = spawn::town_logs_dir(&town.path).join(format!("{worker_id}.log"));
        let heartbeat_path = spawn::town_heartbeat_dir(&town.path).join(worker_id.as_str());
        let now = self.clock.epoch_ms();

        let record = WorkerRecord {
            id: worker_id.clone(),
            town_id: town.id.clone(),
            role,
            instance,
            pid: None,
            status: WorkerStatus::Starting,
            started_at: Some(now),
            stopped_at: None,
            last_heartbeat: None,
            exit_code: None,
            error_message: None,
            restart_count,
            auto_restart,
            predecessor: predecessor.clone(),
            log_path: log_path.clone(),
            heartbeat_path,
        };
        // Persist before the child exists; a crash here leaves a STARTING
        // record for reconciliation to fail as orphaned.
        self.store.insert_worker(&record)?;

        let request = SpawnRequest {
            worker_id: worker_id.clone(),
            role,
            town_path: town.path.clone(),
            program: config.agent.program.clone(),
            args: config.agent.args.clone(),
            prompt_path: self.prompt_path(role),
            log_path,
        };

        match self.spawner.spawn(&request).await {
            Ok(spawned) => {
                self.store.set_worker_pid(&worker_id, spawned.pid)?;
                if let Some(child) = spawned.child {
                    spawn_waiter(self.tx.clone(), worker_id.clone(), child);
                }
                info!(
                    worker = %worker_id,
                    town = %town.name,
                    role = %role,
                    instance,
                    pid = spawned.pid,
                    restart_count,
                    "spawned worker"
                );
                Ok(SpawnReply {
                    worker_id,
                    pid: spawned.pid,
                    status: WorkerStatus::Starting,
                })
            }
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "worker launch failed");
                self.store.finish_worker(
                    &worker_id,
                    WorkerStatus::Failed,
                    self.clock.epoch_ms(),
                    None,
                    Some(&e.to_string()),
                )?;
                // Respawn chains keep trying under policy; a failed manual
                // spawn surfaces to the caller and stays final.
                if predecessor.is_some() && restart_count > 0 {
                    if let Ok(Some(failed)) = self.store.worker(&worker_id) {
                        let now = self.clock.epoch_ms();
                        self.after_failure(&failed, now);
                    }
                }
                Err(RpcError::new(ErrorKind::SpawnFailed, e.to_string()))
            }
        }
    }

    // ----- stop / restart -----

    fn handle_stop(
        &mut self,
        worker_id: WorkerId,
        graceful: bool,
        timeout: Option<Duration>,
        reply: Reply<WorkerStatus>,
    ) {
        if self.draining {
            let _ = reply.send(Err(RpcError::shutting_down()));
            return;
        }
        let worker = match self.store.worker(&worker_id) {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                let _ = reply.send(Err(RpcError::not_found(&worker_id)));
                return;
            }
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        if worker.is_terminal() {
            // Idempotent: no second signal is sent.
            let _ = reply.send(Err(RpcError::new(
                ErrorKind::AlreadyTerminal,
                format!("worker {worker_id} is already {}", worker.status),
            )));
            return;
        }

        let timeout = timeout.unwrap_or_else(|| self.grace_for(&worker));
        match worker.status {
            WorkerStatus::Starting => {
                // Wait for STARTING to resolve, then stop (or report the
                // failure it resolved to).
                self.pending_stops
                    .insert(worker_id.clone(), PendingStop { graceful, timeout });
                self.stop_waiters.entry(worker_id).or_default().push(reply);
            }
            WorkerStatus::Stopping => {
                // A stop is already in flight; just wait for it.
                self.stop_waiters.entry(worker_id).or_default().push(reply);
            }
            WorkerStatus::Running => {
                self.stop_waiters
                    .entry(worker_id.clone())
                    .or_default()
                    .push(reply);
                self.begin_stop(&worker, graceful, timeout);
            }
            WorkerStatus::Stopped | WorkerStatus::Failed => unreachable!("terminal handled above"),
        }
    }

    /// Grace period for a worker's town, from config.
    fn grace_for(&self, worker: &WorkerRecord) -> Duration {
        match self.store.town(&worker.town_id) {
            Ok(Some(town)) => self.town_config(&town).shutdown.worker_grace(),
            _ => self.global_config().shutdown.worker_grace(),
        }
    }

    fn force_timeout_for(&self, worker: &WorkerRecord) -> Duration {
        match self.store.town(&worker.town_id) {
            Ok(Some(town)) => self.town_config(&town).shutdown.force_kill_timeout(),
            _ => self.global_config().shutdown.force_kill_timeout(),
        }
    }

    /// Transition RUNNING → STOPPING and deliver the first signal.
    fn begin_stop(&mut self, worker: &WorkerRecord, graceful: bool, timeout: Duration) {
        if let Err(e) = self.store.mark_worker_stopping(&worker.id) {
            warn!(worker = %worker.id, error = %e, "failed to persist stopping");
            self.settle_terminal_waiters(&worker.id, Err(e.into()));
            return;
        }

        let Some(pid) = worker.pid else {
            // No process to signal; close the record out directly.
            let now = self.clock.epoch_ms();
            self.finish_and_notify(&worker.id, WorkerStatus::Stopped, now, None, None);
            return;
        };

        if graceful {
            if let Err(e) = process::terminate(pid) {
                debug!(worker = %worker.id, pid, error = %e, "SIGTERM failed; treating as exited");
            }
            let tx = self.tx.clone();
            let worker_id = worker.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Command::StopGraceExpired { worker_id }).await;
            });
        } else {
            if let Err(e) = process::force_kill(pid) {
                debug!(worker = %worker.id, pid, error = %e, "SIGKILL failed; treating as exited");
            }
            let force_timeout = self.force_timeout_for(worker);
            let tx = self.tx.clone();
            let worker_id = worker.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(force_timeout).await;
                let _ = tx.send(Command::StopForceExpired { worker_id }).await;
            });
        }
    }

    fn on_stop_grace_expired(&mut self, worker_id: &WorkerId) {
        let Ok(Some(worker)) = self.store.worker(worker_id) else {
            return;
        };
        if worker.status != WorkerStatus::Stopping {
            return;
        }
        let Some(pid) = worker.pid else {
            let now = self.clock.epoch_ms();
            self.finish_and_notify(worker_id, WorkerStatus::Stopped, now, None, None);
            return;
        };
        if !process::alive(pid) {
            // Exited during the grace period but nobody owned a waiter
            // (adopted worker); the exit code is unobservable.
            let now = self.clock.epoch_ms();
            self.finish_and_notify(worker_id, WorkerStatus::Stopped, now, None, None);
            return;
        }

        info!(worker = %worker_id, pid, "grace period expired, force killing");
        self.escalated.insert(worker_id.clone());
        if let Err(e) = process::force_kill(pid) {
            debug!(worker = %worker_id, pid, error = %e, "SIGKILL failed");
        }
        let force_timeout = self.force_timeout_for(&worker);
        let tx = self.tx.clone();
        let worker_id = worker_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(force_timeout).await;
            let _ = tx.send(Command::StopForceExpired { worker_id }).await;
        });
    }

    fn on_stop_force_expired(&mut self, worker_id: &WorkerId) {
        let Ok(Some(worker)) = self.store.worker(worker_id) else {
            return;
        };
        if worker.status != WorkerStatus::Stopping {
            return;
        }
        // SIGKILL did not produce an observable exit in time. Close the
        // record out; the pid, if somehow still present, is disowned.
        let escalated = self.escalated.remove(worker_id);
        let now = self.clock.epoch_ms();
        if escalated || worker.pid.map(process::alive).unwrap_or(false) {
            self.finish_and_notify(
                worker_id,
                WorkerStatus::Failed,
                now,
                None,
                Some("force killed on shutdown"),
            );
        } else {
            self.finish_and_notify(worker_id, WorkerStatus::Stopped, now, None, None);
        }
    }

    async fn handle_restart(&mut self, worker_id: WorkerId, reply: Reply<SpawnReply>) {
        if self.draining {
            let _ = reply.send(Err(RpcError::shutting_down()));
            return;
        }
        let worker = match self.store.worker(&worker_id) {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                let _ = reply.send(Err(RpcError::not_found(&worker_id)));
                return;
            }
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        if worker.is_terminal() {
            let result = self.respawn_for(&worker, 0).await;
            let _ = reply.send(result);
            return;
        }

        // Stop first; the spawn happens when the record goes terminal.
        self.pending_restarts
            .entry(worker_id.clone())
            .or_default()
            .push(reply);
        match worker.status {
            WorkerStatus::Starting => {
                let timeout = self.grace_for(&worker);
                self.pending_stops
                    .insert(worker_id, PendingStop { graceful: true, timeout });
            }
            WorkerStatus::Running => {
                let timeout = self.grace_for(&worker);
                self.begin_stop(&worker, true, timeout);
            }
            WorkerStatus::Stopping => {}
            WorkerStatus::Stopped | WorkerStatus::Failed => unreachable!("terminal handled above"),
        }
    }

    /// Spawn the successor record for a manual restart: same slot, fresh
    /// restart accounting.
    async fn respawn_for(
        &mut self,
        old: &WorkerRecord,
        restart_count: u32,
    ) -> Result<SpawnReply, RpcError> {
        let town = self
            .store
            .town(&old.town_id)?
            .ok_or_else(|| RpcError::not_found(format!("town '{}'", old.town_id)))?;
        let config = self.town_config(&town);
        if self
            .store
            .live_worker_for_slot(&town.id, old.role, old.instance)?
            .is_some()
        {
            return Err(RpcError::new(
                ErrorKind::Duplicate,
                format!(
                    "{} instance {} is already live in town '{}'",
                    old.role, old.instance, town.name
                ),
            ));
        }
        self.spawn_slot(
            &town,
            &config,
            old.role,
            old.instance,
            old.auto_restart,
            restart_count,
            Some(old.id.clone()),
        )
        .await
    }

    // ----- exits and failures -----

    fn on_process_exited(&mut self, worker_id: &WorkerId, exit_code: Option<i32>) {
        self.adopted.remove(worker_id);
        self.miss_counts.remove(worker_id);

        let Ok(Some(worker)) = self.store.worker(worker_id) else {
            return;
        };
        if worker.is_terminal() {
            return;
        }
        let now = self.clock.epoch_ms();

        match worker.status {
            WorkerStatus::Stopping => {
                // A stop was in flight; dying inside the grace period is
                // the clean outcome, dying only to SIGKILL is not.
                if self.escalated.remove(worker_id) {
                    self.finish_and_notify(
                        worker_id,
                        WorkerStatus::Failed,
                        now,
                        exit_code,
                        Some("force killed on shutdown"),
                    );
                } else {
                    self.finish_and_notify(worker_id, WorkerStatus::Stopped, now, exit_code, None);
                }
            }
            WorkerStatus::Starting | WorkerStatus::Running => {
                self.finish_and_notify(
                    worker_id,
                    WorkerStatus::Failed,
                    now,
                    exit_code,
                    Some("process exited"),
                );
                self.after_failure(&worker, now);
            }
            WorkerStatus::Stopped | WorkerStatus::Failed => {}
        }
    }

    /// Fail a live worker from the health monitor (heartbeat lost,
    /// startup timeout, vanished process).
    fn fail_worker(&mut self, worker: &WorkerRecord, reason: &str, exit_code: Option<i32>) {
        let now = self.clock.epoch_ms();
        self.finish_and_notify(&worker.id, WorkerStatus::Failed, now, exit_code, Some(reason));

        // The record is FAILED; a process that is somehow still running
        // is no longer ours to keep (a hung worker holding its pid would
        // otherwise violate the pid/status invariant).
        if let Some(pid) = worker.pid {
            if process::alive(pid) {
                info!(worker = %worker.id, pid, reason, "killing unhealthy worker process");
                let _ = process::force_kill(pid);
            }
        }
        self.after_failure(worker, now);
    }

    /// Persist a terminal transition and settle every parked reply.
    fn finish_and_notify(
        &mut self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        now: i64,
        exit_code: Option<i32>,
        error_message: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .finish_worker(worker_id, status, now, exit_code, error_message)
        {
            warn!(worker = %worker_id, error = %e, "failed to persist terminal transition");
        }
        info!(worker = %worker_id, status = %status, exit_code, reason = error_message, "worker finished");

        self.adopted.remove(worker_id);
        self.miss_counts.remove(worker_id);
        self.pending_stops.remove(worker_id);
        self.escalated.remove(worker_id);
        self.settle_terminal_waiters(worker_id, Ok(status));
    }

    /// Reply to parked stop calls and kick off any parked restart.
    fn settle_terminal_waiters(
        &mut self,
        worker_id: &WorkerId,
        outcome: Result<WorkerStatus, RpcError>,
    ) {
        if let Some(waiters) = self.stop_waiters.remove(worker_id) {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        if let Some(waiters) = self.pending_restarts.remove(worker_id) {
            // Restarts must spawn from the actor context; queue a respawn
            // command so the spawn runs as its own mailbox step.
            let worker_id = worker_id.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let (reply, rx) = oneshot::channel();
                if tx
                    .send(Command::RestartWorker { worker_id, reply })
                    .await
                    .is_err()
                {
                    for waiter in waiters {
                        let _ = waiter.send(Err(RpcError::shutting_down()));
                    }
                    return;
                }
                let result = rx
                    .await
                    .unwrap_or_else(|_| Err(RpcError::shutting_down()));
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            });
        }
    }

    /// Consult the restart policy after an unexpected failure.
    fn after_failure(&mut self, worker: &WorkerRecord, now: i64) {
        if self.draining {
            return;
        }
        let Ok(Some(town)) = self.store.town(&worker.town_id) else {
            return;
        };
        let config = self.town_config(&town);
        let quiet_ms = now - worker.started_at.unwrap_or(now);
        let Some(decision) = restart::plan_respawn(
            &config.restart_policy,
            worker.auto_restart,
            worker.restart_count,
            quiet_ms,
        ) else {
            if worker.auto_restart && config.restart_policy.enabled {
                warn!(
                    worker = %worker.id,
                    restart_count = worker.restart_count,
                    "restart budget exhausted, giving up"
                );
            }
            return;
        };

        info!(
            worker = %worker.id,
            delay_secs = decision.delay.as_secs(),
            next_count = decision.next_count,
            "scheduling respawn"
        );
        let respawn = Respawn {
            town_id: worker.town_id.clone(),
            role: worker.role,
            instance: worker.instance,
            auto_restart: worker.auto_restart,
            next_count: decision.next_count,
            predecessor: worker.id.clone(),
        };
        let tx = self.tx.clone();
        let delay = decision.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::RespawnDue { respawn }).await;
        });
        self.pending_respawns.insert(worker.id.clone(), handle);
    }

    async fn handle_respawn_due(&mut self, respawn: Respawn) {
        self.pending_respawns.remove(&respawn.predecessor);
        if self.draining {
            return;
        }
        let town = match self.store.town(&respawn.town_id) {
            Ok(Some(town)) => town,
            _ => {
                debug!(worker = %respawn.predecessor, "dropping respawn: town is gone");
                return;
            }
        };
        match self
            .store
            .live_worker_for_slot(&town.id, respawn.role, respawn.instance)
        {
            Ok(None) => {}
            _ => {
                debug!(worker = %respawn.predecessor, "dropping respawn: slot is occupied");
                return;
            }
        }
        let config = self.town_config(&town);
        match self.store.count_live_in_town(&town.id) {
            Ok(live) if live < config.max_workers_per_town() => {}
            _ => {
                warn!(worker = %respawn.predecessor, "dropping respawn: town is at capacity");
                return;
            }
        }

        let result = self
            .spawn_slot(
                &town,
                &config,
                respawn.role,
                respawn.instance,
                respawn.auto_restart,
                respawn.next_count,
                Some(respawn.predecessor.clone()),
            )
            .await;
        if let Err(e) = result {
            warn!(predecessor = %respawn.predecessor, error = %e, "respawn failed");
        }
    }

    // ----- health -----

    fn handle_health_tick(&mut self) {
        let now = self.clock.epoch_ms();
        let workers = match self.store.non_terminal_workers() {
            Ok(workers) => workers,
            Err(e) => {
                warn!(error = %e, "health tick could not scan workers");
                return;
            }
        };
        let mut configs: HashMap<TownId, Config> = HashMap::new();

        for worker in workers {
            let config = match configs.entry(worker.town_id.clone()) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let config = match self.store.town(&worker.town_id) {
                        Ok(Some(town)) => self.town_config(&town),
                        _ => self.global_config(),
                    };
                    entry.insert(config)
                }
            };
            let config = config.clone();
            self.check_worker(&worker, &config, now);
        }
    }

    fn check_worker(&mut self, worker: &WorkerRecord, config: &Config, now: i64) {
        match worker.status {
            WorkerStatus::Starting => self.check_starting(worker, now),
            WorkerStatus::Running => self.check_running(worker, config, now),
            WorkerStatus::Stopping => {
                // Owned children report exits through their waiter; only
                // adopted workers need a liveness poll here.
                if self.adopted.contains(&worker.id) {
                    if let Some(pid) = worker.pid {
                        if !process::alive(pid) {
                            self.on_process_exited(&worker.id, None);
                        }
                    }
                }
            }
            WorkerStatus::Stopped | WorkerStatus::Failed => {}
        }
    }

    fn check_starting(&mut self, worker: &WorkerRecord, now: i64) {
        if let Some(mtime) = health::heartbeat_mtime_ms(&worker.heartbeat_path) {
            // First heartbeat: the worker is up.
            if let Err(e) = self.store.mark_worker_running(&worker.id, mtime) {
                warn!(worker = %worker.id, error = %e, "failed to persist running");
                return;
            }
            info!(worker = %worker.id, "worker is running");
            self.miss_counts.remove(&worker.id);

            // A stop that arrived during STARTING applies now.
            if let Some(pending) = self.pending_stops.remove(&worker.id) {
                if let Ok(Some(running)) = self.store.worker(&worker.id) {
                    self.begin_stop(&running, pending.graceful, pending.timeout);
                }
            }
            return;
        }

        let started = worker.started_at.unwrap_or(now);
        let deadline_ms = crate::env::startup_timeout().as_millis() as i64;
        if now - started > deadline_ms {
            self.fail_worker(worker, "startup timeout", None);
        }
    }

    fn check_running(&mut self, worker: &WorkerRecord, config: &Config, now: i64) {
        // Adopted workers have no waiter task; poll the pid directly.
        if self.adopted.contains(&worker.id) {
            if let Some(pid) = worker.pid {
                if !process::alive(pid) {
                    self.fail_worker(worker, "process exited", None);
                    return;
                }
            }
        }

        let timeout_ms = (config.health_check.heartbeat_timeout_seconds as i64).saturating_mul(1000);
        let fresh = match health::heartbeat_mtime_ms(&worker.heartbeat_path) {
            // Strictly greater: a heartbeat exactly at the timeout is
            // still within budget.
            Some(mtime) if now - mtime > timeout_ms => None,
            Some(mtime) => Some(mtime),
            None => None,
        };

        match fresh {
            Some(mtime) => {
                self.miss_counts.remove(&worker.id);
                if worker.last_heartbeat != Some(mtime) {
                    if let Err(e) = self.store.record_heartbeat(&worker.id, mtime) {
                        warn!(worker = %worker.id, error = %e, "failed to persist heartbeat");
                    }
                }
            }
            None => {
                let misses = self.miss_counts.entry(worker.id.clone()).or_insert(0);
                *misses += 1;
                debug!(worker = %worker.id, misses = *misses, "heartbeat miss");
                if *misses >= config.health_check.unhealthy_threshold {
                    self.fail_worker(worker, "heartbeat lost", None);
                }
            }
        }
    }

    // ----- towns -----

    fn handle_create_town(
        &mut self,
        name: String,
        path: String,
        overrides: Option<ConfigOverrides>,
    ) -> Result<TownId, RpcError> {
        if self.draining {
            return Err(RpcError::shutting_down());
        }
        let canonical = std::fs::canonicalize(&path).map_err(|e| {
            RpcError::new(ErrorKind::InvalidPath, format!("invalid town path {path}: {e}"))
        })?;
        if !canonical.is_dir() {
            return Err(RpcError::new(
                ErrorKind::InvalidPath,
                format!("town path is not a directory: {}", canonical.display()),
            ));
        }
        if let Some(existing) = self.store.town_by_path(&canonical)? {
            return Err(RpcError::new(
                ErrorKind::Duplicate,
                format!(
                    "path {} is already registered as town '{}'",
                    canonical.display(),
                    existing.name
                ),
            ));
        }

        let town = TownRecord {
            id: TownId::generate(),
            path: canonical,
            name,
            created_at: self.clock.epoch_ms(),
            config_overrides: overrides,
        };
        self.store.insert_town(&town)?;
        info!(town = %town.name, path = %town.path.display(), "created town");
        Ok(town.id)
    }

    fn handle_delete_town(&mut self, selector: &str, force: bool) -> Result<bool, RpcError> {
        if self.draining {
            return Err(RpcError::shutting_down());
        }
        let town = self.resolve_id_or_name(selector)?;
        let live = self.store.list_workers(&WorkerFilter {
            town_id: Some(town.id.clone()),
            ..Default::default()
        })?;
        let live: Vec<_> = live.into_iter().filter(|w| !w.is_terminal()).collect();

        if !live.is_empty() && !force {
            return Err(RpcError::new(
                ErrorKind::HasLiveWorkers,
                format!("town '{}' has {} live workers", town.name, live.len()),
            ));
        }

        // Forced delete kills whatever is still running; the records go
        // with the town, so there is nothing to transition.
        for worker in &live {
            if let Some(pid) = worker.pid {
                if process::alive(pid) {
                    let _ = process::force_kill(pid);
                }
            }
            self.adopted.remove(&worker.id);
            self.miss_counts.remove(&worker.id);
            self.pending_stops.remove(&worker.id);
            if let Some(handle) = self.pending_respawns.remove(&worker.id) {
                handle.abort();
            }
            self.settle_terminal_waiters(&worker.id, Ok(WorkerStatus::Stopped));
        }

        let deleted = self.store.delete_town(&town.id)?;
        info!(town = %town.name, force, "deleted town");
        Ok(deleted)
    }

    fn handle_status(&self) -> Result<DaemonStatus, RpcError> {
        Ok(DaemonStatus {
            uptime_secs: self
                .clock
                .now()
                .saturating_duration_since(self.start_time)
                .as_secs(),
            workers_by_status: self.store.workers_by_status()?,
            towns: self.store.count_towns()?,
        })
    }

    // ----- drain -----

    /// Graceful shutdown: cancel pending respawns, signal every live
    /// worker, wait out the grace periods, and close the books.
    async fn drain(&mut self, graceful: bool) {
        self.draining = true;
        info!(graceful, "draining workers");

        for (_, handle) in self.pending_respawns.drain() {
            handle.abort();
        }
        // Parked RPC callers will never see their transition complete.
        let parked: Vec<WorkerId> = self.stop_waiters.keys().cloned().collect();
        for worker_id in parked {
            self.settle_terminal_waiters(&worker_id, Err(RpcError::shutting_down()));
        }
        self.pending_restarts.clear();
        self.pending_stops.clear();

        let config = self.global_config();
        let live = match self.store.non_terminal_workers() {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "drain could not scan workers");
                return;
            }
        };

        // Persist STOPPING for everything before the first signal goes out.
        for worker in &live {
            if worker.status != WorkerStatus::Stopping {
                if let Err(e) = self.store.mark_worker_stopping(&worker.id) {
                    warn!(worker = %worker.id, error = %e, "failed to persist stopping");
                }
            }
        }
        for worker in &live {
            if let Some(pid) = worker.pid {
                let result = if graceful {
                    process::terminate(pid)
                } else {
                    process::force_kill(pid)
                };
                if let Err(e) = result {
                    debug!(worker = %worker.id, pid, error = %e, "shutdown signal failed");
                }
            }
        }

        let grace = if graceful {
            config.shutdown.worker_grace()
        } else {
            Duration::ZERO
        };
        self.wait_for_exits(grace).await;

        // Escalate whatever survived the grace period.
        let stragglers = self.store.non_terminal_workers().unwrap_or_default();
        for worker in &stragglers {
            if let Some(pid) = worker.pid {
                if process::alive(pid) {
                    info!(worker = %worker.id, pid, "force killing on shutdown");
                    self.escalated.insert(worker.id.clone());
                    let _ = process::force_kill(pid);
                }
            }
        }
        if !stragglers.is_empty() {
            self.wait_for_exits(config.shutdown.force_kill_timeout()).await;
        }

        // Whatever still has not produced an exit is closed out FAILED.
        let now = self.clock.epoch_ms();
        for worker in self.store.non_terminal_workers().unwrap_or_default() {
            self.finish_and_notify(
                &worker.id,
                WorkerStatus::Failed,
                now,
                None,
                Some("force killed on shutdown"),
            );
        }
        info!("drain complete");
    }

    /// Process exits (and reject other commands) until every worker is
    /// terminal or the deadline passes.
    async fn wait_for_exits(&mut self, deadline: Duration) {
        let started = tokio::time::Instant::now();
        loop {
            let live = self.store.non_terminal_workers().unwrap_or_default();
            if live.is_empty() {
                return;
            }
            // Exits of adopted workers are only visible via the pid.
            for worker in &live {
                if self.adopted.contains(&worker.id) {
                    if let Some(pid) = worker.pid {
                        if !process::alive(pid) {
                            self.on_process_exited(&worker.id, None);
                        }
                    }
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return;
            }
            let wait = DRAIN_POLL.min(deadline - elapsed);
            match tokio::time::timeout(wait, self.rx.recv()).await {
                Ok(Some(Command::ProcessExited {
                    worker_id,
                    exit_code,
                })) => self.on_process_exited(&worker_id, exit_code),
                Ok(Some(command)) => reject_while_draining(command),
                Ok(None) => return,
                Err(_) => {}
            }
        }
    }
}

/// Effective config for a town: built-in defaults, then the global
/// document, the town's stored overrides, and the project file.
pub(crate) fn town_effective_config(global: &ConfigOverrides, town: &TownRecord) -> Config {
    let project_path = spawn::town_mab_dir(&town.path).join("config.yaml");
    let project = match ConfigOverrides::load(&project_path) {
        Ok(overrides) => overrides,
        Err(e) => {
            warn!(town = %town.name, error = %e, "ignoring unreadable project config");
            ConfigOverrides::default()
        }
    };
    let mut layers = vec![global];
    if let Some(overrides) = &town.config_overrides {
        layers.push(overrides);
    }
    layers.push(&project);
    Config::resolve(layers)
}

/// Answer a command that arrived while the daemon is draining.
fn reject_while_draining(command: Command) {
    let shutting_down = RpcError::shutting_down();
    match command {
        Command::SpawnWorker { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::StopWorker { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::RestartWorker { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::ListWorkers { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::GetWorker { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::CreateTown { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::ListTowns { reply } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::GetTown { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::DeleteTown { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::Status { reply } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::ResolveTown { reply, .. } => {
            let _ = reply.send(Err(shutting_down));
        }
        Command::Drain { reply, .. } => {
            let _ = reply.send(());
        }
        Command::ProcessExited { .. }
        | Command::HealthTick
        | Command::RespawnDue { .. }
        | Command::StopGraceExpired { .. }
        | Command::StopForceExpired { .. } => {}
    }
}

/// Wait for a real child to terminate and report it to the mailbox.
fn spawn_waiter(
    tx: mpsc::Sender<Command>,
    worker_id: WorkerId,
    mut child: tokio::process::Child,
) {
    tokio::spawn(async move {
        let exit_code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "failed to wait on child");
                None
            }
        };
        let _ = tx.send(Command::ProcessExited { worker_id, exit_code }).await;
    });
}

#[cfg(test)]
#[path = "coordinator_tests/mod.rs"]
mod tests;
