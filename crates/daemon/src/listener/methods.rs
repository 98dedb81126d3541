// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC method dispatch: method strings to coordinator calls.

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mab_core::config::ConfigOverrides;
use mab_core::{ErrorKind, Role, WorkerId, WorkerRecord, WorkerStatus};
use mab_storage::WorkerFilter;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ListenCtx;
use crate::protocol::{Request, Response, RpcError, DEFAULT_DEADLINE};

/// Extra headroom a stop/restart dispatch gets beyond the grace period
/// it was asked to wait out.
const STOP_DEADLINE_MARGIN: Duration = Duration::from_secs(30);

/// Dispatch one request under its deadline.
pub(super) async fn dispatch(request: Request, ctx: &ListenCtx) -> Response {
    let id = request.id.clone();
    let deadline = deadline_for(&request);
    let result = match tokio::time::timeout(deadline, handle(request, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::internal(format!(
            "request deadline of {}s exceeded",
            deadline.as_secs()
        ))),
    };
    match result {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::fail(id, &e),
    }
}

/// Long operations get their explicit timeout plus margin; everything
/// else answers within the default 30s.
fn deadline_for(request: &Request) -> Duration {
    match request.method.as_str() {
        "worker.stop" | "worker.restart" => {
            let explicit = request
                .params
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DEADLINE);
            // Worst case the stop escalates to a force kill after the
            // grace period; leave room for that before giving up.
            explicit + STOP_DEADLINE_MARGIN + STOP_DEADLINE_MARGIN
        }
        _ => DEFAULT_DEADLINE,
    }
}

async fn handle(request: Request, ctx: &ListenCtx) -> Result<Value, RpcError> {
    if ctx.draining.load(Ordering::SeqCst) && request.method != "daemon.shutdown" {
        return Err(RpcError::shutting_down());
    }

    match request.method.as_str() {
        "worker.spawn" => worker_spawn(request.params, ctx).await,
        "worker.stop" => worker_stop(request.params, ctx).await,
        "worker.restart" => worker_restart(request.params, ctx).await,
        "worker.list" => worker_list(request.params, ctx).await,
        "worker.get" => worker_get(request.params, ctx).await,
        "town.create" => town_create(request.params, ctx).await,
        "town.list" => town_list(ctx).await,
        "town.get" => town_get(request.params, ctx).await,
        "town.delete" => town_delete(request.params, ctx).await,
        "daemon.status" => daemon_status(ctx).await,
        "daemon.shutdown" => daemon_shutdown(request.params, ctx),
        other => Err(RpcError::new(
            ErrorKind::MethodNotFound,
            format!("unknown method: {other}"),
        )),
    }
}

/// Decode a params object, treating absent params as empty.
fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn parse_role(role: &str) -> Result<Role, RpcError> {
    Role::from_str(role)
        .map_err(|e| RpcError::new(ErrorKind::InvalidRole, e.to_string()))
}

/// Full worker record as it appears in results.
fn worker_json(worker: &WorkerRecord) -> Value {
    json!(worker)
}

async fn worker_spawn(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        role: String,
        town: Option<String>,
        instance: Option<u32>,
        auto_restart: Option<bool>,
    }
    let p: Params = parse_params(params)?;
    let role = parse_role(&p.role)?;
    let reply = ctx
        .coordinator
        .spawn_worker(role, p.town, p.instance, p.auto_restart)
        .await?;
    Ok(json!({
        "worker_id": reply.worker_id,
        "pid": reply.pid,
        "status": reply.status,
    }))
}

async fn worker_stop(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        worker_id: String,
        graceful: Option<bool>,
        timeout_seconds: Option<u64>,
    }
    let p: Params = parse_params(params)?;
    let status = ctx
        .coordinator
        .stop_worker(
            WorkerId::new(p.worker_id),
            p.graceful.unwrap_or(true),
            p.timeout_seconds.map(Duration::from_secs),
        )
        .await?;
    Ok(json!({ "status": status }))
}

async fn worker_restart(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        worker_id: String,
    }
    let p: Params = parse_params(params)?;
    let reply = ctx
        .coordinator
        .restart_worker(WorkerId::new(p.worker_id))
        .await?;
    Ok(json!({
        "new_worker_id": reply.worker_id,
        "pid": reply.pid,
    }))
}

async fn worker_list(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        town: Option<String>,
        role: Option<String>,
        status: Option<String>,
    }
    let p: Params = parse_params(params)?;

    let mut filter = WorkerFilter::default();
    if let Some(role) = &p.role {
        filter.role = Some(parse_role(role)?);
    }
    if let Some(status) = &p.status {
        filter.status = Some(
            WorkerStatus::from_str(status).map_err(RpcError::invalid_params)?,
        );
    }
    if let Some(town) = p.town {
        // An unknown town simply matches nothing.
        match ctx.coordinator.resolve_town(town).await {
            Ok(town_id) => filter.town_id = Some(town_id),
            Err(e) if e.kind == ErrorKind::NotFound => {
                return Ok(json!({ "workers": [] }));
            }
            Err(e) => return Err(e),
        }
    }

    let workers = ctx.coordinator.list_workers(filter).await?;
    Ok(json!({
        "workers": workers.iter().map(worker_json).collect::<Vec<_>>(),
    }))
}

async fn worker_get(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        worker_id: String,
    }
    let p: Params = parse_params(params)?;
    let worker = ctx
        .coordinator
        .get_worker(WorkerId::new(p.worker_id))
        .await?;
    Ok(json!({ "worker": worker_json(&worker) }))
}

async fn town_create(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        name: String,
        path: String,
        config: Option<Value>,
    }
    let p: Params = parse_params(params)?;
    let overrides = p
        .config
        .map(serde_json::from_value::<ConfigOverrides>)
        .transpose()
        .map_err(|e| RpcError::invalid_params(format!("config: {e}")))?;
    let town_id = ctx.coordinator.create_town(p.name, p.path, overrides).await?;
    Ok(json!({ "town_id": town_id }))
}

async fn town_list(ctx: &ListenCtx) -> Result<Value, RpcError> {
    let towns = ctx.coordinator.list_towns().await?;
    Ok(json!({ "towns": towns }))
}

async fn town_get(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        town_id_or_name: String,
    }
    let p: Params = parse_params(params)?;
    let town = ctx.coordinator.get_town(p.town_id_or_name).await?;
    Ok(json!({ "town": town }))
}

async fn town_delete(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        town_id_or_name: String,
        force: Option<bool>,
    }
    let p: Params = parse_params(params)?;
    let deleted = ctx
        .coordinator
        .delete_town(p.town_id_or_name, p.force.unwrap_or(false))
        .await?;
    Ok(json!({ "deleted": deleted }))
}

async fn daemon_status(ctx: &ListenCtx) -> Result<Value, RpcError> {
    let status = ctx.coordinator.status().await?;
    let by_status: serde_json::Map<String, Value> = status
        .workers_by_status
        .into_iter()
        .map(|(status, count)| (status, json!(count)))
        .collect();
    Ok(json!({
        "uptime": status.uptime_secs,
        "workers_by_status": by_status,
        "towns": status.towns,
    }))
}

fn daemon_shutdown(params: Value, ctx: &ListenCtx) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        graceful: Option<bool>,
    }
    let p: Params = parse_params(params)?;
    if !p.graceful.unwrap_or(true) {
        ctx.shutdown_graceful.store(false, Ordering::SeqCst);
    }
    ctx.shutdown.notify_one();
    Ok(json!({ "accepted": true }))
}

#[cfg(test)]
#[path = "methods_tests.rs"]
mod tests;
