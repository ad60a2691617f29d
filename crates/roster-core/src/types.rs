//! Shared types used across Roster crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a registered instance.
pub type InstanceId = String;

/// Health status reported for (or imposed on) a registered instance.
///
/// Only equality is meaningful; there is no ordering between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::OutOfService => "OUT_OF_SERVICE",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }

    /// UP and OUT_OF_SERVICE are the two statuses a server may hold
    /// authoritatively over what a client reports.
    pub fn is_up_or_out_of_service(&self) -> bool {
        matches!(self, InstanceStatus::Up | InstanceStatus::OutOfService)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised instance status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for InstanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(InstanceStatus::Up),
            "DOWN" => Ok(InstanceStatus::Down),
            "STARTING" => Ok(InstanceStatus::Starting),
            "OUT_OF_SERVICE" => Ok(InstanceStatus::OutOfService),
            "UNKNOWN" => Ok(InstanceStatus::Unknown),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Registration payload of a single service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub app_name: String,
    /// Effective status as last stored by the registry (or as reported).
    pub status: InstanceStatus,
    /// Override carried by the instance; `Unknown` means none.
    #[serde(default = "unknown_status")]
    pub overridden_status: InstanceStatus,
    /// Unix timestamp (milliseconds) of the last client-side change.
    #[serde(default)]
    pub last_dirty_timestamp: u64,
}

fn unknown_status() -> InstanceStatus {
    InstanceStatus::Unknown
}

impl InstanceInfo {
    pub fn new(app_name: &str, id: &str, status: InstanceStatus) -> Self {
        Self {
            id: id.to_string(),
            app_name: app_name.to_string(),
            status,
            overridden_status: InstanceStatus::Unknown,
            last_dirty_timestamp: 0,
        }
    }

    pub fn with_overridden_status(mut self, status: InstanceStatus) -> Self {
        self.overridden_status = status;
        self
    }

    pub fn with_dirty_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.last_dirty_timestamp = timestamp_ms;
        self
    }
}

// ── Replication ───────────────────────────────────────────────────

/// Registry actions propagated to peer nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Register,
    Heartbeat,
    Cancel,
    StatusUpdate,
    DeleteStatusOverride,
}

// ── Stats ─────────────────────────────────────────────────────────

/// Point-in-time view of the registry's self-preservation inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryStats {
    pub registered: usize,
    pub renews_last_min: u64,
    pub replications_last_min: u64,
    pub expected_clients: u64,
    pub renews_threshold: u64,
    pub self_preservation_active: bool,
}
