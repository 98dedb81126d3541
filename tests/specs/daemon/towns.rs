//! Town registry specs.

use serde_json::json;
use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn duplicate_path_is_rejected_whatever_the_name() {
    let daemon = TestDaemon::start();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().display().to_string();

    daemon.call("town.create", json!({ "name": "a", "path": path }));
    let code = daemon.call_err("town.create", json!({ "name": "b", "path": path }));
    assert_eq!(code, 202, "expected the duplicate error code");
}

#[test]
#[serial]
fn create_then_get_round_trips_the_canonical_path() {
    let daemon = TestDaemon::start();
    let dir = tempfile::tempdir().unwrap();

    let result = daemon.call(
        "town.create",
        json!({ "name": "roundtrip", "path": dir.path().display().to_string() }),
    );
    let town_id = result["town_id"].as_str().unwrap().to_string();

    let by_name = daemon.call("town.get", json!({ "town_id_or_name": "roundtrip" }));
    assert_eq!(by_name["town"]["id"], town_id.as_str());
    let canonical = std::fs::canonicalize(dir.path()).unwrap();
    assert_eq!(
        by_name["town"]["path"],
        canonical.display().to_string()
    );
}

#[test]
#[serial]
fn delete_refuses_live_workers_without_force() {
    let daemon = TestDaemon::start();
    let (_, pid) = daemon.spawn_worker("developer");

    let code = daemon.call_err(
        "town.delete",
        json!({ "town_id_or_name": daemon.town_path().rsplit('/').next().unwrap() }),
    );
    assert_eq!(code, 303, "expected the has_live_workers error code");

    let result = daemon.call(
        "town.delete",
        json!({
            "town_id_or_name": daemon.town_path().rsplit('/').next().unwrap(),
            "force": true
        }),
    );
    assert_eq!(result["deleted"], true);
    wait_until("forced delete to kill the stub", || !pid_alive(pid));
}

#[test]
#[serial]
fn spawn_auto_creates_the_town() {
    let daemon = TestDaemon::start();
    assert_eq!(daemon.call("town.list", json!(null))["towns"].as_array().unwrap().len(), 0);

    daemon.spawn_worker("manager");

    let towns = daemon.call("town.list", json!(null));
    let towns = towns["towns"].as_array().unwrap();
    assert_eq!(towns.len(), 1);
    let expected = std::fs::canonicalize(daemon.town_path()).unwrap();
    assert_eq!(towns[0]["path"], expected.display().to_string());
}

#[test]
#[serial]
fn unknown_town_name_is_not_found() {
    let daemon = TestDaemon::start();
    let code = daemon.call_err("town.get", json!({ "town_id_or_name": "atlantis" }));
    assert_eq!(code, 301, "expected the not_found error code");
}
