// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use mab_core::{Clock, FakeClock, SystemClock};
use mab_storage::Store;
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::coordinator::spawn::FakeSpawner;
use crate::coordinator::Coordinator;

struct Ctx {
    ctx: ListenCtx,
    shutdown: Arc<Notify>,
    #[allow(dead_code)]
    home: tempfile::TempDir,
    #[allow(dead_code)]
    town_dir: tempfile::TempDir,
    town_path: String,
}

async fn listen_ctx() -> Ctx {
    let store = Store::open_in_memory().unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(SystemClock.epoch_ms());
    let home = tempfile::tempdir().unwrap();
    let (coordinator, handle) = Coordinator::new(
        store,
        home.path().to_path_buf(),
        Default::default(),
        FakeSpawner::new(),
        clock,
    );
    tokio::spawn(coordinator.run());

    let town_dir = tempfile::tempdir().unwrap();
    let town_path = town_dir.path().display().to_string();
    handle
        .create_town("alpha".to_string(), town_path.clone(), None)
        .await
        .unwrap();

    let shutdown = Arc::new(Notify::new());
    let ctx = ListenCtx::new(
        handle,
        Arc::clone(&shutdown),
        Arc::new(AtomicBool::new(true)),
        Arc::new(AtomicBool::new(false)),
    );
    Ctx {
        ctx,
        shutdown,
        home,
        town_dir,
        town_path,
    }
}

fn request(id: &str, method: &str, params: serde_json::Value) -> Request {
    Request {
        id: id.to_string(),
        method: method.to_string(),
        params,
    }
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let c = listen_ctx().await;
    let response = dispatch(request("1", "worker.levitate", json!({})), &c.ctx).await;
    assert_eq!(response.id, "1");
    let error = response.error.unwrap();
    assert_eq!(error.code, mab_core::ErrorKind::MethodNotFound.code());
}

#[tokio::test]
async fn malformed_params_are_invalid_params() {
    let c = listen_ctx().await;
    let response = dispatch(
        request("2", "worker.spawn", json!({"role": 17})),
        &c.ctx,
    )
    .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, mab_core::ErrorKind::InvalidParams.code());
}

#[tokio::test]
async fn unknown_role_is_invalid_role() {
    let c = listen_ctx().await;
    let response = dispatch(
        request("3", "worker.spawn", json!({"role": "intern", "town": c.town_path})),
        &c.ctx,
    )
    .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, mab_core::ErrorKind::InvalidRole.code());
}

#[tokio::test]
async fn spawn_result_has_id_pid_and_status() {
    let c = listen_ctx().await;
    let response = dispatch(
        request("4", "worker.spawn", json!({"role": "developer", "town": c.town_path})),
        &c.ctx,
    )
    .await;
    let result = response.result.unwrap();
    let worker_id = result["worker_id"].as_str().unwrap();
    assert!(worker_id.starts_with("worker-developer-"));
    assert!(result["pid"].as_u64().is_some());
    assert_eq!(result["status"], "starting");

    // worker.get round-trips the record.
    let response = dispatch(
        request("5", "worker.get", json!({"worker_id": worker_id})),
        &c.ctx,
    )
    .await;
    let worker = &response.result.unwrap()["worker"];
    assert_eq!(worker["id"], worker_id);
    assert_eq!(worker["role"], "developer");
    assert_eq!(worker["instance"], 1);
}

#[tokio::test]
async fn list_filters_by_unknown_town_match_nothing() {
    let c = listen_ctx().await;
    dispatch(
        request("6", "worker.spawn", json!({"role": "qa", "town": c.town_path})),
        &c.ctx,
    )
    .await;

    let response = dispatch(
        request("7", "worker.list", json!({"town": "atlantis"})),
        &c.ctx,
    )
    .await;
    let workers = response.result.unwrap()["workers"].as_array().unwrap().clone();
    assert!(workers.is_empty());

    let response = dispatch(request("8", "worker.list", json!({"town": "alpha"})), &c.ctx).await;
    let workers = response.result.unwrap()["workers"].as_array().unwrap().clone();
    assert_eq!(workers.len(), 1);
}

#[tokio::test]
async fn status_reports_counts() {
    let c = listen_ctx().await;
    let response = dispatch(request("9", "daemon.status", json!(null)), &c.ctx).await;
    let result = response.result.unwrap();
    assert_eq!(result["towns"], 1);
    assert!(result["workers_by_status"].is_object());
    assert!(result["uptime"].is_u64());
}

#[tokio::test]
async fn shutdown_notifies_and_accepts() {
    let c = listen_ctx().await;
    let notified = c.shutdown.notified();
    let response = dispatch(request("10", "daemon.shutdown", json!({})), &c.ctx).await;
    assert_eq!(response.result.unwrap()["accepted"], true);
    notified.await;
    assert!(c.ctx.shutdown_graceful.load(Ordering::SeqCst));
}

#[tokio::test]
async fn forced_shutdown_clears_graceful_flag() {
    let c = listen_ctx().await;
    dispatch(
        request("11", "daemon.shutdown", json!({"graceful": false})),
        &c.ctx,
    )
    .await;
    assert!(!c.ctx.shutdown_graceful.load(Ordering::SeqCst));
}

#[tokio::test]
async fn draining_refuses_everything_but_shutdown() {
    let c = listen_ctx().await;
    c.ctx.draining.store(true, Ordering::SeqCst);

    let response = dispatch(request("12", "town.list", json!(null)), &c.ctx).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, mab_core::ErrorKind::ShuttingDown.code());

    let response = dispatch(request("13", "daemon.shutdown", json!({})), &c.ctx).await;
    assert!(response.result.is_some());
}

#[tokio::test]
async fn town_create_and_get_round_trip_canonical_path() {
    let c = listen_ctx().await;
    let dir = tempfile::tempdir().unwrap();
    let response = dispatch(
        request(
            "14",
            "town.create",
            json!({"name": "beta", "path": dir.path().display().to_string()}),
        ),
        &c.ctx,
    )
    .await;
    let town_id = response.result.unwrap()["town_id"].as_str().unwrap().to_string();

    let response = dispatch(
        request("15", "town.get", json!({"town_id_or_name": "beta"})),
        &c.ctx,
    )
    .await;
    let town = response.result.unwrap()["town"].clone();
    assert_eq!(town["id"], town_id.as_str());
    let canonical = std::fs::canonicalize(dir.path()).unwrap();
    assert_eq!(town["path"], canonical.display().to_string());
}
