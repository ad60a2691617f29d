//! roster-registry — the registration core of a Roster node.
//!
//! Decides which status to store for an instance on every registration,
//! renewal and replicated update, and decides whether the eviction sweep
//! may expire leases or must hold back (self-preservation).
//!
//! # Architecture
//!
//! ```text
//! Registry
//!   ├── leases: DashMap<InstanceId, Lease<InstanceInfo>>   (per-key locking)
//!   ├── overrides: StatusOverrides                          (operator intent)
//!   ├── resolver: StatusOverrideResolver
//!   │     DownOrStarting → OverrideExists → LeaseExists → AlwaysMatch
//!   ├── renews / replications: MeasuredRate
//!   └── Option<PeerReplicator>                              (transport seam)
//!
//! EvictionTask
//!   └── periodic evict() with compensation time, gated by
//!       is_lease_expiration_enabled()
//! ```
//!
//! # Self-Preservation
//!
//! Every registration raises the number of clients expected to renew and
//! every cancellation lowers it. When the renewals counted over the last
//! completed interval fall to or below the derived threshold, the registry
//! assumes a network fault rather than mass instance death and stops
//! evicting until renewals recover.

pub mod error;
pub mod eviction;
pub mod lease;
pub mod overrides;
pub mod registry;
pub mod replication;
pub mod resolver;
pub mod rule;

pub use error::{RegistryError, RegistryResult};
pub use eviction::EvictionTask;
pub use lease::Lease;
pub use overrides::StatusOverrides;
pub use registry::Registry;
pub use replication::PeerReplicator;
pub use resolver::{Resolution, StatusOverrideResolver};
pub use rule::{OverrideRule, RuleKind, StatusOverrideResult};
