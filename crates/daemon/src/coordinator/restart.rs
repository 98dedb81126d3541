// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart policy: whether and when a failed worker is respawned.
//!
//! Pure computation; the coordinator schedules the actual respawn and
//! owns cancellation. Restart accounting is a forward chain: each
//! respawned record carries its predecessor's count plus one, and the
//! count is treated as zero again once the chain has been quiet for
//! longer than the cooldown window.

use std::time::Duration;

use mab_core::config::RestartConfig;

/// A scheduled respawn: wait `delay`, then create a successor record
/// carrying `next_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartDecision {
    pub delay: Duration,
    pub next_count: u32,
}

/// Decide whether a just-failed worker gets a respawn.
///
/// `quiet_ms` is how long the failure chain had been quiet before this
/// failure, i.e. the failed record's lifetime: auto-respawned records
/// start immediately after their predecessor's failure. Strictly more
/// than `cooldown_seconds` of quiet resets the accounting.
pub fn plan_respawn(
    policy: &RestartConfig,
    auto_restart: bool,
    restart_count: u32,
    quiet_ms: i64,
) -> Option<RestartDecision> {
    if !auto_restart || !policy.enabled {
        return None;
    }

    let cooldown_ms = (policy.cooldown_seconds as i64).saturating_mul(1000);
    let effective = if quiet_ms > cooldown_ms {
        0
    } else {
        restart_count
    };

    if effective >= policy.max_restarts {
        return None;
    }

    let factor = 2u64.saturating_pow(effective);
    let delay_secs = policy
        .backoff_base_seconds
        .saturating_mul(factor)
        .min(policy.backoff_max_seconds);

    Some(RestartDecision {
        delay: Duration::from_secs(delay_secs),
        next_count: effective + 1,
    })
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
