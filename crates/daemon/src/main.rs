// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mab daemon (mabd)
//!
//! Single-instance supervisor for agent worker processes.
//!
//! Architecture:
//! - Listener task: socket I/O, dispatching RPCs into the coordinator
//! - Coordinator task: the single writer owning every state transition
//! - Health monitor: periodic liveness ticks into the coordinator

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod coordinator;
mod env;
mod lifecycle;
mod listener;
mod process;
mod protocol;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::coordinator::health;
use crate::lifecycle::{DaemonConfig, LifecycleError, StartupResult};
use crate::listener::{ListenCtx, Listener};

/// Exit code when another daemon already holds the lock.
const EXIT_ALREADY_RUNNING: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("mabd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("mabd {}", env!("CARGO_PKG_VERSION"));
                println!("mab daemon - supervises agent worker processes across towns");
                println!();
                println!("USAGE:");
                println!("    mabd");
                println!();
                println!("The daemon is typically started by the `mab` CLI and should not");
                println!("be invoked directly. It listens on a Unix socket under MAB_HOME");
                println!("(default ~/.mab) for commands from `mab`.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: mabd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = DaemonConfig::load()?;

    // Move an oversize log aside before the appender opens it
    archive_log_if_oversize(&config.log_path);

    // Write the startup marker before tracing setup, so the CLI can find
    // where this attempt begins even if setup fails.
    write_startup_marker(&config)?;

    let log_guard = setup_logging(&config)?;

    info!("starting daemon");

    let StartupResult {
        guard,
        listener: unix_listener,
        coordinator,
        handle,
        global_config,
    } = match lifecycle::startup(&config) {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.pid_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("mabd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(EXIT_ALREADY_RUNNING);
        }
        Err(e) => {
            // Write the error synchronously (tracing is non-blocking and
            // may not flush before exit).
            write_startup_error(&config, &e);
            error!("failed to start daemon: {e}");
            drop(log_guard);
            return Err(e.into());
        }
    };

    tokio::spawn(coordinator.run());

    // Shutdown plumbing shared with the RPC surface.
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_graceful = Arc::new(AtomicBool::new(true));
    let draining = Arc::new(AtomicBool::new(false));

    let ctx = Arc::new(ListenCtx::new(
        handle.clone(),
        Arc::clone(&shutdown_notify),
        Arc::clone(&shutdown_graceful),
        Arc::clone(&draining),
    ));
    let listener_task = tokio::spawn(Listener::new(unix_listener, ctx).run());

    let tick = env::health_tick_override().unwrap_or_else(|| global_config.health_check.interval());
    let monitor_task = health::spawn_monitor(handle.clone(), tick);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        "daemon ready, listening on {}",
        config.socket_path.display()
    );

    // Signal ready for parent process (CLI waiting for startup)
    println!("READY");

    tokio::select! {
        _ = shutdown_notify.notified() => {
            info!("shutdown requested via rpc");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }

    // Graceful shutdown, exactly once: stop accepting connections, then
    // drain workers, then release files and the lock. The signal streams
    // stay installed so repeated signals are absorbed while draining.
    draining.store(true, Ordering::SeqCst);
    listener_task.abort();
    monitor_task.abort();
    handle.drain(shutdown_graceful.load(Ordering::SeqCst)).await;
    guard.shutdown();
    info!("daemon stopped");
    Ok(())
}

/// Log size past which startup moves the file aside (10 MB).
const LOG_ARCHIVE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Timestamped archives kept after pruning.
const LOG_ARCHIVES_KEPT: usize = 3;

/// Archive an oversize `daemon.log` before the appender opens it.
///
/// The archive carries the epoch second of the move
/// (`daemon.log.1754006400`) and older archives beyond
/// [`LOG_ARCHIVES_KEPT`] are pruned. Best-effort: archival failures
/// must not keep the daemon down.
fn archive_log_if_oversize(log_path: &std::path::Path) {
    let oversize = std::fs::metadata(log_path)
        .map(|meta| meta.len() >= LOG_ARCHIVE_THRESHOLD)
        .unwrap_or(false);
    if !oversize {
        return;
    }

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or(0);
    let archive = log_path.with_extension(format!("log.{stamp}"));
    if std::fs::rename(log_path, &archive).is_ok() {
        prune_log_archives(log_path);
    }
}

/// Delete all but the newest [`LOG_ARCHIVES_KEPT`] archives of this log.
fn prune_log_archives(log_path: &std::path::Path) {
    let Some(dir) = log_path.parent() else { return };
    let Some(name) = log_path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let prefix = format!("{name}.");

    let Ok(entries) = std::fs::read_dir(dir) else { return };
    let mut archives: Vec<(u64, std::path::PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let stamp = path
                .file_name()?
                .to_str()?
                .strip_prefix(&prefix)?
                .parse::<u64>()
                .ok()?;
            Some((stamp, path))
        })
        .collect();
    if archives.len() <= LOG_ARCHIVES_KEPT {
        return;
    }

    archives.sort_unstable_by_key(|(stamp, _)| *stamp);
    let excess = archives.len() - LOG_ARCHIVES_KEPT;
    for (_, path) in archives.into_iter().take(excess) {
        let _ = std::fs::remove_file(path);
    }
}

/// Startup marker prefix; the CLI scans for it to find where the
/// current attempt begins. Full line: "=== mabd start pid=12345 v0.1.0".
const STARTUP_MARKER_PREFIX: &str = "=== mabd start pid=";

/// Append one line to the daemon log outside the tracing pipeline.
///
/// The startup marker and fatal startup errors must hit the disk
/// synchronously, even when the non-blocking writer never gets a
/// chance to flush.
fn append_raw_log_line(config: &DaemonConfig, line: &str) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{line}")
}

fn write_startup_marker(config: &DaemonConfig) -> Result<(), LifecycleError> {
    let line = format!(
        "{}{} v{}",
        STARTUP_MARKER_PREFIX,
        std::process::id(),
        env!("CARGO_PKG_VERSION")
    );
    append_raw_log_line(config, &line)?;
    Ok(())
}

fn write_startup_error(config: &DaemonConfig, error: &LifecycleError) {
    let _ = append_raw_log_line(config, &format!("ERROR failed to start daemon: {error}"));
}

fn setup_logging(
    config: &DaemonConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::EnvFilter;

    let dir = config.log_path.parent().ok_or(LifecycleError::NoHome)?;
    std::fs::create_dir_all(dir)?;

    // The filesystem layout pins the live file at daemon.log, so the
    // appender itself never rotates; oversize logs are archived at
    // startup by archive_log_if_oversize instead.
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("daemon")
        .filename_suffix("log")
        .build(dir)
        .map_err(std::io::Error::other)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // MAB_LOG wins over the config file's log_level; default info.
    let filter = match env::log_filter() {
        Some(filter) => EnvFilter::new(filter),
        None => {
            let level = mab_core::config::ConfigOverrides::load(&config.config_path)
                .ok()
                .and_then(|overrides| overrides.log_level)
                .unwrap_or_default();
            EnvFilter::new(level.as_str())
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
