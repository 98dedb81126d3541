// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration documents and the global → town → project merge.
//!
//! The effective [`Config`] is resolved per town by layering optional
//! override documents over built-in defaults. Scalars and lists replace
//! wholesale; the keyed sub-sections (`health_check`, `restart_policy`,
//! `shutdown`, `agent`) merge shallowly. Unknown keys are preserved in
//! the override documents and otherwise ignored.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::Role;

/// Errors loading or parsing a config document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Daemon log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Heartbeat and liveness polling options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    /// Consecutive heartbeat misses before a worker is marked failed.
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            heartbeat_timeout_seconds: 30,
            unhealthy_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }
}

/// Automatic respawn policy for failed workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartConfig {
    pub enabled: bool,
    /// Respawns allowed within one cooldown window. Zero disables restarts.
    pub max_restarts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub cooldown_seconds: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restarts: 5,
            backoff_base_seconds: 5,
            backoff_max_seconds: 300,
            cooldown_seconds: 3600,
        }
    }
}

/// Grace periods applied when stopping workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    pub worker_grace_seconds: u64,
    pub force_kill_timeout_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            worker_grace_seconds: 60,
            force_kill_timeout_seconds: 10,
        }
    }
}

impl ShutdownConfig {
    pub fn worker_grace(&self) -> Duration {
        Duration::from_secs(self.worker_grace_seconds)
    }

    pub fn force_kill_timeout(&self) -> Duration {
        Duration::from_secs(self.force_kill_timeout_seconds)
    }
}

/// How agent subprocesses are launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Program executed for every role. The resolved prompt path is the
    /// first argument, followed by `args`.
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: Vec::new(),
        }
    }
}

/// Effective configuration for one town (or the daemon itself when no
/// town is in play).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub max_workers_per_town: MaxWorkers,
    #[serde(default)]
    pub auto_create_town: AutoCreate,
    #[serde(default)]
    pub default_roles: Vec<Role>,
    #[serde(default)]
    pub health_check: HealthConfig,
    #[serde(default)]
    pub restart_policy: RestartConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Newtype so `max_workers_per_town` defaults to 5 under serde.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxWorkers(pub u32);

impl Default for MaxWorkers {
    fn default() -> Self {
        Self(5)
    }
}

/// Newtype so `auto_create_town` defaults to true under serde.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCreate(pub bool);

impl Default for AutoCreate {
    fn default() -> Self {
        Self(true)
    }
}

/// All-optional mirror of one `health_check` override section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HealthOverrides {
    pub interval_seconds: Option<u64>,
    pub heartbeat_timeout_seconds: Option<u64>,
    pub unhealthy_threshold: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// All-optional mirror of one `restart_policy` override section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RestartOverrides {
    pub enabled: Option<bool>,
    pub max_restarts: Option<u32>,
    pub backoff_base_seconds: Option<u64>,
    pub backoff_max_seconds: Option<u64>,
    pub cooldown_seconds: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// All-optional mirror of one `shutdown` override section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ShutdownOverrides {
    pub worker_grace_seconds: Option<u64>,
    pub force_kill_timeout_seconds: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// All-optional mirror of one `agent` override section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentOverrides {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// One override document: `<mab_home>/config.yaml`, a town's
/// `.mab/config.yaml`, or the document supplied at `town.create`.
///
/// Unknown keys land in `extra` so documents survive round-trips intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfigOverrides {
    pub max_workers_per_town: Option<u32>,
    pub auto_create_town: Option<bool>,
    pub default_roles: Option<Vec<Role>>,
    pub health_check: Option<HealthOverrides>,
    pub restart_policy: Option<RestartOverrides>,
    pub shutdown: Option<ShutdownOverrides>,
    pub agent: Option<AgentOverrides>,
    pub log_level: Option<LogLevel>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ConfigOverrides {
    /// Load an override document, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse a YAML override document. Empty documents are valid.
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Yaml {
            path: origin.to_string(),
            source: e,
        })
    }

    /// Apply this layer on top of `config`.
    ///
    /// Scalars and lists replace; sections merge shallowly, field by field.
    pub fn apply(&self, config: &mut Config) {
        if let Some(v) = self.max_workers_per_town {
            config.max_workers_per_town = MaxWorkers(v);
        }
        if let Some(v) = self.auto_create_town {
            config.auto_create_town = AutoCreate(v);
        }
        if let Some(v) = &self.default_roles {
            config.default_roles = v.clone();
        }
        if let Some(h) = &self.health_check {
            let t = &mut config.health_check;
            if let Some(v) = h.interval_seconds {
                t.interval_seconds = v;
            }
            if let Some(v) = h.heartbeat_timeout_seconds {
                t.heartbeat_timeout_seconds = v;
            }
            if let Some(v) = h.unhealthy_threshold {
                t.unhealthy_threshold = v;
            }
        }
        if let Some(r) = &self.restart_policy {
            let t = &mut config.restart_policy;
            if let Some(v) = r.enabled {
                t.enabled = v;
            }
            if let Some(v) = r.max_restarts {
                t.max_restarts = v;
            }
            if let Some(v) = r.backoff_base_seconds {
                t.backoff_base_seconds = v;
            }
            if let Some(v) = r.backoff_max_seconds {
                t.backoff_max_seconds = v;
            }
            if let Some(v) = r.cooldown_seconds {
                t.cooldown_seconds = v;
            }
        }
        if let Some(s) = &self.shutdown {
            let t = &mut config.shutdown;
            if let Some(v) = s.worker_grace_seconds {
                t.worker_grace_seconds = v;
            }
            if let Some(v) = s.force_kill_timeout_seconds {
                t.force_kill_timeout_seconds = v;
            }
        }
        if let Some(a) = &self.agent {
            let t = &mut config.agent;
            if let Some(v) = &a.program {
                t.program = v.clone();
            }
            if let Some(v) = &a.args {
                t.args = v.clone();
            }
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
    }
}

impl Config {
    /// Resolve an effective config from override layers ordered low → high
    /// precedence (global first, most specific last).
    pub fn resolve<'a>(layers: impl IntoIterator<Item = &'a ConfigOverrides>) -> Config {
        let mut config = Config::default();
        for layer in layers {
            layer.apply(&mut config);
        }
        config
    }

    pub fn max_workers_per_town(&self) -> u32 {
        self.max_workers_per_town.0
    }

    pub fn auto_create_town(&self) -> bool {
        self.auto_create_town.0
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
