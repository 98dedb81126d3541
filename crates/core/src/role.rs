// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed set of recognized agent roles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing an unrecognized role name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized role: {0}")]
pub struct InvalidRole(pub String);

/// Role an agent plays within a town.
///
/// The set is closed: unknown role names are rejected at the RPC boundary
/// rather than mapped onto arbitrary prompt files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Developer,
    Qa,
    TechLead,
    Manager,
    Reviewer,
}

impl Role {
    /// All recognized roles, in display order.
    pub const ALL: [Role; 5] = [
        Role::Developer,
        Role::Qa,
        Role::TechLead,
        Role::Manager,
        Role::Reviewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Qa => "qa",
            Role::TechLead => "tech_lead",
            Role::Manager => "manager",
            Role::Reviewer => "reviewer",
        }
    }

    /// File name of the role prompt under the prompts directory.
    pub fn prompt_filename(&self) -> String {
        format!("{}.md", self.as_str())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developer" => Ok(Role::Developer),
            "qa" => Ok(Role::Qa),
            "tech_lead" => Ok(Role::TechLead),
            "manager" => Ok(Role::Manager),
            "reviewer" => Ok(Role::Reviewer),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "role_tests.rs"]
mod tests;
