// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

mod reconcile;
pub(crate) use reconcile::{reconcile_store, ReconcileOutcome};

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;
use mab_core::config::ConfigOverrides;
use mab_core::{Config, SystemClock};
use mab_storage::{Store, StoreError};
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::coordinator::spawn::OsSpawner;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::env;

/// Daemon configuration: fixed paths under `<mab_home>`.
///
/// One daemon serves all towns for a user; `MAB_HOME` relocates the
/// whole layout (tests point it at a tempdir).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory (e.g. ~/.mab), mode 0700.
    pub mab_home: PathBuf,
    /// Unix socket the RPC server binds, mode 0600.
    pub socket_path: PathBuf,
    /// Zero-byte advisory flock target.
    pub lock_path: PathBuf,
    /// ASCII decimal PID of the running daemon.
    pub pid_path: PathBuf,
    /// Daemon-level structured log.
    pub log_path: PathBuf,
    /// SQLite worker registry.
    pub db_path: PathBuf,
    /// Global config document.
    pub config_path: PathBuf,
}

impl DaemonConfig {
    pub fn load() -> Result<Self, LifecycleError> {
        let mab_home = env::mab_home()?;
        Ok(Self {
            socket_path: mab_home.join("mab.sock"),
            lock_path: mab_home.join("daemon.lock"),
            pid_path: mab_home.join("daemon.pid"),
            log_path: mab_home.join("daemon.log"),
            db_path: mab_home.join("workers.db"),
            config_path: mab_home.join("config.yaml"),
            mab_home,
        })
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine home directory (set MAB_HOME or HOME)")]
    NoHome,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the daemon's exclusive resources; releases them in reverse
/// order of acquisition on all exit paths.
pub struct DaemonGuard {
    pub config: DaemonConfig,
    // NOTE(lifetime): held to maintain the exclusive flock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl DaemonGuard {
    /// Remove the daemon's runtime files. The flock itself is released
    /// when the guard drops.
    pub fn shutdown(&self) {
        info!("shutting down daemon");
        for path in [&self.config.socket_path, &self.config.pid_path] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove runtime file");
                }
            }
        }
        info!("daemon shutdown complete");
    }
}

/// Result of daemon startup; the listener and coordinator are spawned
/// as tasks by `main`.
pub struct StartupResult {
    pub guard: DaemonGuard,
    pub listener: UnixListener,
    pub coordinator: Coordinator<OsSpawner, SystemClock>,
    pub handle: CoordinatorHandle,
    /// Effective global config (health interval, shutdown timings).
    pub global_config: Config,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

/// Start the daemon: lock, pid file, store, reconciliation, socket.
pub fn startup(config: &DaemonConfig) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config) {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

fn startup_inner(config: &DaemonConfig) -> Result<StartupResult, LifecycleError> {
    // 1. Create the home directory, private to the owning user.
    create_private_dir(&config.mab_home)?;

    // 2. Cross-host locking over network filesystems is unreliable;
    // warn loudly and carry on.
    warn_if_network_filesystem(&config.mab_home);

    // 3. Acquire the lock FIRST - prevents races. The lock file itself
    // stays zero-byte; the PID lives in its own file.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // 4. Write our PID now that we hold the lock.
    let mut pid_file = File::create(&config.pid_path)?;
    write!(pid_file, "{}", std::process::id())?;

    // 5. Open the registry; corruption is fatal here, before we touch
    // anything else.
    let store = Store::open(&config.db_path)?;

    // Global config document; a broken file logs and falls back to
    // defaults rather than keeping the daemon down.
    let global = match ConfigOverrides::load(&config.config_path) {
        Ok(overrides) => overrides,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable global config");
            ConfigOverrides::default()
        }
    };
    let global_config = Config::resolve([&global]);

    // 6. Reconcile persisted workers against OS reality.
    let clock = SystemClock;
    let outcome = reconcile_store(&store, &global)?;

    // 7. Remove a stale socket and bind. Safe to unlink: holding the
    // lock proves no other daemon is serving it.
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;
    set_socket_permissions(&config.socket_path)?;

    // 8. Assemble the coordinator; adopted workers keep running,
    // orphans feed the restart policy.
    let (mut coordinator, handle) = Coordinator::new(
        store,
        config.mab_home.clone(),
        global,
        OsSpawner,
        clock,
    );
    coordinator.adopt_all(outcome.adopted);
    coordinator.schedule_orphan_respawns(outcome.orphaned);

    Ok(StartupResult {
        guard: DaemonGuard {
            config: config.clone(),
            lock_file,
        },
        listener,
        coordinator,
        handle,
        global_config,
    })
}

/// Remove files created by a failed startup attempt.
fn cleanup_on_failure(config: &DaemonConfig) {
    for path in [&config.socket_path, &config.pid_path] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn create_private_dir(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    match std::fs::DirBuilder::new().recursive(true).mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

fn set_socket_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

/// Warn when `<mab_home>` sits on a filesystem where advisory locks do
/// not coordinate across hosts.
#[cfg(target_os = "linux")]
fn warn_if_network_filesystem(path: &std::path::Path) {
    use nix::sys::statfs::{statfs, NFS_SUPER_MAGIC, SMB_SUPER_MAGIC};

    let Ok(fs) = statfs(path) else {
        return;
    };
    let fs_type = fs.filesystem_type();
    if fs_type == NFS_SUPER_MAGIC || fs_type == SMB_SUPER_MAGIC {
        warn!(
            path = %path.display(),
            "mab home is on a network filesystem; the daemon lock cannot \
             prevent a second daemon on another host"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn warn_if_network_filesystem(_path: &std::path::Path) {}

#[cfg(test)]
#[path = "../lifecycle_tests.rs"]
mod tests;
