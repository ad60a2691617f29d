//! Status override rules.
//!
//! Each rule looks at the status an instance (or a peer) reports, the
//! lease the registry already holds, and whether the event came from
//! replication, and either decides the status to store or passes.

use tracing::debug;

use roster_core::{InstanceInfo, InstanceStatus};

use crate::lease::Lease;
use crate::overrides::StatusOverrides;

/// Outcome of a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOverrideResult {
    /// The rule has no opinion; evaluation continues.
    NoMatch,
    /// The rule decided the status to store.
    Matched(InstanceStatus),
}

impl StatusOverrideResult {
    pub fn status(&self) -> Option<InstanceStatus> {
        match self {
            StatusOverrideResult::NoMatch => None,
            StatusOverrideResult::Matched(s) => Some(*s),
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, StatusOverrideResult::Matched(_))
    }
}

/// Identifies which rule decided a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    DownOrStarting,
    OverrideExists,
    LeaseExists,
    AlwaysMatch,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::DownOrStarting => "down_or_starting",
            RuleKind::OverrideExists => "override_exists",
            RuleKind::LeaseExists => "lease_exists",
            RuleKind::AlwaysMatch => "always_match",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of status override rules.
#[derive(Debug, Clone)]
pub enum OverrideRule {
    /// Trust any reported status other than UP and OUT_OF_SERVICE.
    ///
    /// An instance or peer saying DOWN, STARTING or UNKNOWN is believed
    /// immediately. UP and OUT_OF_SERVICE may be stale relative to an
    /// operator change, so they are left to later rules.
    DownOrStarting,
    /// An operator override for the instance id wins.
    OverrideExists(StatusOverrides),
    /// For self-reported events, keep an existing UP or OUT_OF_SERVICE
    /// status held by the server.
    LeaseExists,
    /// Accept the reported status. Always matches.
    AlwaysMatch,
}

impl OverrideRule {
    pub fn kind(&self) -> RuleKind {
        match self {
            OverrideRule::DownOrStarting => RuleKind::DownOrStarting,
            OverrideRule::OverrideExists(_) => RuleKind::OverrideExists,
            OverrideRule::LeaseExists => RuleKind::LeaseExists,
            OverrideRule::AlwaysMatch => RuleKind::AlwaysMatch,
        }
    }

    pub fn apply(
        &self,
        instance: &InstanceInfo,
        existing_lease: Option<&Lease<InstanceInfo>>,
        is_replication: bool,
    ) -> StatusOverrideResult {
        match self {
            OverrideRule::DownOrStarting => down_or_starting(instance),
            OverrideRule::OverrideExists(overrides) => override_exists(instance, overrides),
            OverrideRule::LeaseExists => lease_exists(instance, existing_lease, is_replication),
            OverrideRule::AlwaysMatch => StatusOverrideResult::Matched(instance.status),
        }
    }
}

fn down_or_starting(instance: &InstanceInfo) -> StatusOverrideResult {
    if instance.status.is_up_or_out_of_service() {
        return StatusOverrideResult::NoMatch;
    }
    debug!(
        instance_id = %instance.id,
        status = %instance.status,
        "trusting reported status from replica or instance"
    );
    StatusOverrideResult::Matched(instance.status)
}

fn override_exists(instance: &InstanceInfo, overrides: &StatusOverrides) -> StatusOverrideResult {
    match overrides.get(&instance.id) {
        Some(overridden) => {
            debug!(
                instance_id = %instance.id,
                status = %overridden,
                "instance specific override applies"
            );
            StatusOverrideResult::Matched(overridden)
        }
        None => StatusOverrideResult::NoMatch,
    }
}

fn lease_exists(
    instance: &InstanceInfo,
    existing_lease: Option<&Lease<InstanceInfo>>,
    is_replication: bool,
) -> StatusOverrideResult {
    // Replicated events skip this rule and trust the peer's state outright.
    // A node rejoining with stale replicated data can therefore replace a
    // server-held UP/OUT_OF_SERVICE. This precedence is kept as is; revisit
    // only together with the replication model.
    if is_replication {
        return StatusOverrideResult::NoMatch;
    }

    let Some(lease) = existing_lease else {
        return StatusOverrideResult::NoMatch;
    };

    let existing = lease.holder().status;
    if existing.is_up_or_out_of_service() {
        debug!(
            instance_id = %instance.id,
            status = %existing,
            "existing lease status wins over reported status"
        );
        return StatusOverrideResult::Matched(existing);
    }
    StatusOverrideResult::NoMatch
}
