//! roster.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("renewal_percent_threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RosterConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Lease, eviction and self-preservation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Lease duration granted to instances that do not ask for one.
    pub lease_duration_secs: u64,
    /// How often clients are expected to renew.
    pub expected_renewal_interval_secs: u64,
    /// Fraction of expected renewals below which eviction is suspended.
    pub renewal_percent_threshold: f64,
    /// Whether low renewal rates suspend eviction at all.
    pub self_preservation: bool,
    /// Period of the eviction sweep.
    pub eviction_interval_ms: u64,
    /// Length of the window the renewal and replication rates are measured over.
    pub rate_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: 90,
            expected_renewal_interval_secs: 30,
            renewal_percent_threshold: 0.85,
            self_preservation: true,
            eviction_interval_ms: 60_000,
            rate_interval_ms: 60_000,
        }
    }
}

impl RegistryConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.renewal_percent_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(ConfigError::InvalidThreshold(t));
        }
        if self.lease_duration_secs == 0 {
            return Err(ConfigError::ZeroDuration("lease_duration_secs"));
        }
        if self.expected_renewal_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("expected_renewal_interval_secs"));
        }
        if self.eviction_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("eviction_interval_ms"));
        }
        if self.rate_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("rate_interval_ms"));
        }
        Ok(())
    }
}

impl RosterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RosterConfig = toml::from_str(&content)?;
        config.registry.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
