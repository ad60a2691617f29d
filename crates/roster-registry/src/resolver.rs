//! First-match-wins chain of status override rules.

use tracing::trace;

use roster_core::{InstanceInfo, InstanceStatus};

use crate::lease::Lease;
use crate::overrides::StatusOverrides;
use crate::rule::{OverrideRule, RuleKind, StatusOverrideResult};

/// The status to store and the rule that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub status: InstanceStatus,
    pub rule: RuleKind,
}

/// Evaluates rules in order and stops at the first match.
///
/// `AlwaysMatch` is applied after the configured rules, so every
/// resolution produces a status.
#[derive(Debug, Clone)]
pub struct StatusOverrideResolver {
    rules: Vec<OverrideRule>,
}

impl StatusOverrideResolver {
    /// The registry's chain. Order is precedence:
    ///
    /// 1. `DownOrStarting`: unhealthy reports are believed.
    /// 2. `OverrideExists`: operator intent beats anything reported.
    /// 3. `LeaseExists`: server-held UP/OUT_OF_SERVICE beats self-reports.
    /// 4. `AlwaysMatch`: the reported status.
    pub fn standard(overrides: StatusOverrides) -> Self {
        Self::with_rules(vec![
            OverrideRule::DownOrStarting,
            OverrideRule::OverrideExists(overrides),
            OverrideRule::LeaseExists,
        ])
    }

    /// Build a chain from explicit rules. `AlwaysMatch` is still applied
    /// last.
    pub fn with_rules(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    /// Kinds of all rules in evaluation order, terminal included.
    pub fn rule_kinds(&self) -> Vec<RuleKind> {
        self.rules
            .iter()
            .map(OverrideRule::kind)
            .chain(std::iter::once(RuleKind::AlwaysMatch))
            .collect()
    }

    pub fn resolve(
        &self,
        instance: &InstanceInfo,
        existing_lease: Option<&Lease<InstanceInfo>>,
        is_replication: bool,
    ) -> Resolution {
        for rule in &self.rules {
            if let StatusOverrideResult::Matched(status) =
                rule.apply(instance, existing_lease, is_replication)
            {
                trace!(instance_id = %instance.id, rule = %rule.kind(), %status, "status override resolved");
                return Resolution {
                    status,
                    rule: rule.kind(),
                };
            }
        }

        trace!(instance_id = %instance.id, status = %instance.status, "no rule matched, keeping reported status");
        Resolution {
            status: instance.status,
            rule: RuleKind::AlwaysMatch,
        }
    }
}
