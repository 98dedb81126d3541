// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn policy() -> RestartConfig {
    RestartConfig {
        enabled: true,
        max_restarts: 5,
        backoff_base_seconds: 5,
        backoff_max_seconds: 300,
        cooldown_seconds: 3600,
    }
}

#[yare::parameterized(
    first   = { 0, 5, 1 },
    second  = { 1, 10, 2 },
    third   = { 2, 20, 3 },
    fourth  = { 3, 40, 4 },
)]
fn backoff_doubles_per_restart(count: u32, delay_secs: u64, next: u32) {
    let decision = plan_respawn(&policy(), true, count, 0).unwrap();
    assert_eq!(decision.delay, Duration::from_secs(delay_secs));
    assert_eq!(decision.next_count, next);
}

#[test]
fn backoff_is_capped_at_max() {
    let mut p = policy();
    p.max_restarts = 20;
    let decision = plan_respawn(&p, true, 10, 0).unwrap();
    assert_eq!(decision.delay, Duration::from_secs(300));
}

#[test]
fn huge_counts_do_not_overflow() {
    let mut p = policy();
    p.max_restarts = u32::MAX;
    let decision = plan_respawn(&p, true, 63, 0).unwrap();
    assert_eq!(decision.delay, Duration::from_secs(300));
}

#[test]
fn gives_up_at_max_restarts() {
    assert!(plan_respawn(&policy(), true, 5, 0).is_none());
    assert!(plan_respawn(&policy(), true, 6, 0).is_none());
}

#[test]
fn zero_max_restarts_disables_restarts_entirely() {
    let mut p = policy();
    p.max_restarts = 0;
    assert!(plan_respawn(&p, true, 0, 0).is_none());
}

#[test]
fn disabled_policy_never_respawns() {
    let mut p = policy();
    p.enabled = false;
    assert!(plan_respawn(&p, true, 0, 0).is_none());
}

#[test]
fn auto_restart_false_never_respawns() {
    assert!(plan_respawn(&policy(), false, 0, 0).is_none());
}

#[test]
fn quiet_chain_resets_the_count() {
    // One hour and one second of quiet: counting starts over.
    let decision = plan_respawn(&policy(), true, 5, 3_601_000).unwrap();
    assert_eq!(decision.delay, Duration::from_secs(5));
    assert_eq!(decision.next_count, 1);
}

#[test]
fn quiet_exactly_at_cooldown_does_not_reset() {
    assert!(plan_respawn(&policy(), true, 5, 3_600_000).is_none());
}
