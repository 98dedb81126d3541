// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mab: CLI front-end for the mab daemon.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod daemon_process;
mod env;
mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crate::client::DaemonClient;

#[derive(Parser)]
#[command(name = "mab", version, about = "Supervise agent workers across towns")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the daemon process
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
    /// Spawn a worker
    Spawn {
        /// Worker role (developer, qa, tech_lead, manager, reviewer)
        role: String,
        /// Town path or name (defaults to the current directory)
        #[arg(long)]
        town: Option<String>,
        /// Explicit instance slot (>= 1)
        #[arg(long)]
        instance: Option<u32>,
        /// Leave the worker down if it fails
        #[arg(long)]
        no_auto_restart: bool,
    },
    /// Stop a worker
    Stop {
        worker_id: String,
        /// Skip the grace period and kill immediately
        #[arg(long)]
        force: bool,
        /// Grace period in seconds before escalating
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Restart a worker (new record, fresh restart accounting)
    Restart { worker_id: String },
    /// List workers
    List {
        #[arg(long)]
        town: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one worker in full
    Get { worker_id: String },
    /// Manage towns
    Town {
        #[command(subcommand)]
        command: TownCommand,
    },
    /// Daemon status summary
    Status,
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the daemon in the background
    Start,
    /// Ask the daemon to shut down
    Stop {
        /// Kill workers immediately instead of waiting out the grace period
        #[arg(long)]
        force: bool,
    },
    /// Show whether the daemon is running
    Status,
}

#[derive(Subcommand)]
enum TownCommand {
    /// Register a project directory as a town
    Create { name: String, path: String },
    /// List towns
    List,
    /// Show one town
    Get { town: String },
    /// Delete a town
    Delete {
        town: String,
        /// Delete even with live workers (they are killed)
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Daemon { command } => daemon_command(command).await,
        Command::Spawn {
            role,
            town,
            instance,
            no_auto_restart,
        } => spawn(role, town, instance, no_auto_restart).await,
        Command::Stop {
            worker_id,
            force,
            timeout,
        } => stop(worker_id, force, timeout).await,
        Command::Restart { worker_id } => restart(worker_id).await,
        Command::List { town, role, status } => list(town, role, status).await,
        Command::Get { worker_id } => get(worker_id).await,
        Command::Town { command } => town_command(command).await,
        Command::Status => status().await,
    }
}

async fn daemon_command(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            if daemon_process::start_daemon().await? {
                println!("daemon started");
            } else {
                println!("daemon already running");
            }
        }
        DaemonCommand::Stop { force } => {
            if daemon_process::stop_daemon(!force).await? {
                println!("daemon stopped");
            } else {
                println!("daemon not running");
            }
        }
        DaemonCommand::Status => match DaemonClient::connect() {
            Ok(client) => {
                let result = client.request("daemon.status", Value::Null).await?;
                print_status(&result);
            }
            Err(client::ClientError::DaemonNotRunning(path)) => {
                println!("daemon not running (no socket at {})", path.display());
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}

/// Default the town argument to the caller's working directory.
fn town_or_cwd(town: Option<String>) -> Result<String> {
    if let Some(town) = town {
        return Ok(town);
    }
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(cwd.display().to_string())
}

async fn spawn(
    role: String,
    town: Option<String>,
    instance: Option<u32>,
    no_auto_restart: bool,
) -> Result<()> {
    let client = DaemonClient::connect()?;
    let mut params = json!({
        "role": role,
        "town": town_or_cwd(town)?,
    });
    if let Some(instance) = instance {
        params["instance"] = json!(instance);
    }
    if no_auto_restart {
        params["auto_restart"] = json!(false);
    }

    let result = client.request("worker.spawn", params).await?;
    println!(
        "spawned {} (pid {})",
        result["worker_id"].as_str().unwrap_or("?"),
        result["pid"]
    );
    Ok(())
}

async fn stop(worker_id: String, force: bool, timeout: Option<u64>) -> Result<()> {
    let client = DaemonClient::connect()?;
    let mut params = json!({
        "worker_id": worker_id,
        "graceful": !force,
    });
    if let Some(timeout) = timeout {
        params["timeout_seconds"] = json!(timeout);
    }
    let result = client.request("worker.stop", params).await?;
    println!("{}: {}", worker_id, result["status"].as_str().unwrap_or("?"));
    Ok(())
}

async fn restart(worker_id: String) -> Result<()> {
    let client = DaemonClient::connect()?;
    let result = client
        .request("worker.restart", json!({ "worker_id": worker_id }))
        .await?;
    println!(
        "restarted as {} (pid {})",
        result["new_worker_id"].as_str().unwrap_or("?"),
        result["pid"]
    );
    Ok(())
}

async fn list(town: Option<String>, role: Option<String>, status: Option<String>) -> Result<()> {
    let client = DaemonClient::connect()?;
    let mut params = json!({});
    if let Some(town) = town {
        params["town"] = json!(town);
    }
    if let Some(role) = role {
        params["role"] = json!(role);
    }
    if let Some(status) = status {
        params["status"] = json!(status);
    }

    let result = client.request("worker.list", params).await?;
    let Some(workers) = result["workers"].as_array() else {
        bail!("malformed response: {result}");
    };
    if workers.is_empty() {
        println!("no workers");
        return Ok(());
    }
    print!(
        "{}",
        output::render_table(
            &["id", "role", "inst", "status", "pid", "age", "town"],
            &output::worker_rows(workers),
        )
    );
    Ok(())
}

async fn get(worker_id: String) -> Result<()> {
    let client = DaemonClient::connect()?;
    let result = client
        .request("worker.get", json!({ "worker_id": worker_id }))
        .await?;
    println!("{}", serde_json::to_string_pretty(&result["worker"])?);
    Ok(())
}

async fn town_command(command: TownCommand) -> Result<()> {
    let client = DaemonClient::connect()?;
    match command {
        TownCommand::Create { name, path } => {
            let canonical = std::fs::canonicalize(&path)
                .with_context(|| format!("invalid town path: {path}"))?;
            let result = client
                .request(
                    "town.create",
                    json!({ "name": name, "path": canonical.display().to_string() }),
                )
                .await?;
            println!(
                "created town {} ({})",
                name,
                result["town_id"].as_str().unwrap_or("?")
            );
        }
        TownCommand::List => {
            let result = client.request("town.list", Value::Null).await?;
            let Some(towns) = result["towns"].as_array() else {
                bail!("malformed response: {result}");
            };
            if towns.is_empty() {
                println!("no towns");
            } else {
                print!(
                    "{}",
                    output::render_table(&["id", "name", "path"], &output::town_rows(towns))
                );
            }
        }
        TownCommand::Get { town } => {
            let result = client
                .request("town.get", json!({ "town_id_or_name": town }))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result["town"])?);
        }
        TownCommand::Delete { town, force } => {
            client
                .request(
                    "town.delete",
                    json!({ "town_id_or_name": town, "force": force }),
                )
                .await?;
            println!("deleted {town}");
        }
    }
    Ok(())
}

async fn status() -> Result<()> {
    let client = DaemonClient::connect()?;
    let result = client.request("daemon.status", Value::Null).await?;
    print_status(&result);
    Ok(())
}

fn print_status(result: &Value) {
    let uptime = result["uptime"].as_u64().unwrap_or(0);
    println!("daemon up {}", mab_core::format_elapsed(uptime));
    println!("towns: {}", result["towns"]);
    if let Some(by_status) = result["workers_by_status"].as_object() {
        if by_status.is_empty() {
            println!("workers: none");
        } else {
            let summary = by_status
                .iter()
                .map(|(status, count)| format!("{count} {status}"))
                .collect::<Vec<_>>()
                .join(", ");
            println!("workers: {summary}");
        }
    }
}
