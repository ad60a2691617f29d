//! Registry core — the lease table and the status decisions made on it.
//!
//! Every registration, renewal and replicated update runs the status
//! override chain against the lease currently held for the instance and
//! stores the resolved status. Renewals and outbound replications are
//! counted for the self-preservation check in [`crate::eviction`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use roster_core::{ActionType, InstanceId, InstanceInfo, InstanceStatus, RegistryConfig, RegistryStats};
use roster_metrics::{MeasuredRate, RateResult};

use crate::error::{RegistryError, RegistryResult};
use crate::lease::{epoch_millis, Lease};
use crate::overrides::StatusOverrides;
use crate::replication::PeerReplicator;
use crate::resolver::{Resolution, StatusOverrideResolver};

/// Clients expected to renew and the renewal count derived from them.
#[derive(Debug, Default)]
struct RenewalExpectation {
    expected_clients: u64,
    threshold: u64,
}

/// The registration core of a single registry node.
///
/// Shared across request handlers behind an `Arc`. Updates to one
/// instance id are serialized by the lease table's entry locks; updates
/// to different ids do not contend.
pub struct Registry {
    pub(crate) config: RegistryConfig,
    pub(crate) leases: DashMap<InstanceId, Lease<InstanceInfo>>,
    overrides: StatusOverrides,
    resolver: StatusOverrideResolver,
    pub(crate) renews: MeasuredRate,
    replications: MeasuredRate,
    expectation: Mutex<RenewalExpectation>,
    replicator: Option<Arc<dyn PeerReplicator>>,
    /// Evictions performed since start.
    pub(crate) evicted_total: AtomicU64,
}

impl Registry {
    /// Create an empty registry with the standard rule chain.
    pub fn new(config: RegistryConfig) -> Self {
        let overrides = StatusOverrides::new();
        let resolver = StatusOverrideResolver::standard(overrides.clone());
        Self {
            config,
            leases: DashMap::new(),
            overrides,
            resolver,
            renews: MeasuredRate::new("renews"),
            replications: MeasuredRate::new("replications"),
            expectation: Mutex::new(RenewalExpectation::default()),
            replicator: None,
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Forward self-originated actions to peers through `replicator`.
    pub fn with_replicator(mut self, replicator: Arc<dyn PeerReplicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start both rate counters on the configured interval.
    pub fn start_counters(&self) -> RateResult<()> {
        let interval = self.config.rate_interval();
        self.renews.start(interval)?;
        self.replications.start(interval)?;
        info!(interval_ms = interval.as_millis() as u64, "registry rate counters started");
        Ok(())
    }

    pub fn stop_counters(&self) {
        self.renews.stop();
        self.replications.stop();
    }

    pub fn renews(&self) -> &MeasuredRate {
        &self.renews
    }

    pub fn replications(&self) -> &MeasuredRate {
        &self.replications
    }

    pub fn overrides(&self) -> &StatusOverrides {
        &self.overrides
    }

    // ── Registration ───────────────────────────────────────────

    /// Register (or re-register) an instance and return the status stored
    /// for it.
    ///
    /// `lease_duration` falls back to the configured default. An id held by
    /// another app is rejected and its lease left untouched.
    pub fn register(
        &self,
        mut info: InstanceInfo,
        lease_duration: Option<Duration>,
        is_replication: bool,
    ) -> RegistryResult<Resolution> {
        let now = epoch_millis();
        let duration = lease_duration.unwrap_or_else(|| self.config.lease_duration());

        let (resolution, stored, is_new) = match self.leases.entry(info.id.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                let registered_app = &existing.holder().app_name;
                if *registered_app != info.app_name {
                    warn!(
                        instance_id = %info.id,
                        %registered_app,
                        app = %info.app_name,
                        "instance id already registered by another app"
                    );
                    return Err(RegistryError::app_mismatch(
                        &info.id,
                        registered_app,
                        &info.app_name,
                    ));
                }

                self.apply_carried_override(&mut info);
                let existing_dirty = existing.holder().last_dirty_timestamp;
                if existing_dirty > info.last_dirty_timestamp {
                    warn!(
                        instance_id = %info.id,
                        existing_dirty,
                        registration_dirty = info.last_dirty_timestamp,
                        "existing lease is newer than registration, keeping existing instance"
                    );
                    info = existing.holder().clone();
                }

                let resolution = self.resolver.resolve(&info, Some(existing), is_replication);
                info.status = resolution.status;

                let mut lease = Lease::new_at(info, duration, now);
                lease.set_service_up_timestamp(existing.service_up_timestamp());
                if resolution.status == InstanceStatus::Up {
                    lease.service_up_at(now);
                }
                let stored = lease.holder().clone();
                entry.insert(lease);
                (resolution, stored, false)
            }
            Entry::Vacant(entry) => {
                self.apply_carried_override(&mut info);
                let resolution = self.resolver.resolve(&info, None, is_replication);
                info.status = resolution.status;

                let mut lease = Lease::new_at(info, duration, now);
                if resolution.status == InstanceStatus::Up {
                    lease.service_up_at(now);
                }
                let stored = lease.holder().clone();
                entry.insert(lease);
                (resolution, stored, true)
            }
        };

        if is_new {
            self.adjust_expected_clients(1);
        }

        info!(
            app = %stored.app_name,
            instance_id = %stored.id,
            status = %resolution.status,
            rule = %resolution.rule,
            is_replication,
            "registered instance"
        );

        if !is_replication {
            self.replicate(ActionType::Register, &stored);
        }
        Ok(resolution)
    }

    /// Store an override carried by a registration unless one is already
    /// held, then stamp the effective override onto the registration.
    /// Runs under the lease entry guard for `info.id`.
    fn apply_carried_override(&self, info: &mut InstanceInfo) {
        if info.overridden_status != InstanceStatus::Unknown
            && self.overrides.insert_if_absent(&info.id, info.overridden_status)
        {
            info!(
                instance_id = %info.id,
                status = %info.overridden_status,
                "stored overridden status carried by registration"
            );
        }
        if let Some(overridden) = self.overrides.get(&info.id) {
            info.overridden_status = overridden;
        }
    }

    /// Renew an instance's lease, re-resolving its status.
    pub fn renew(&self, app: &str, id: &str, is_replication: bool) -> RegistryResult<InstanceStatus> {
        let now = epoch_millis();

        let (status, stored) = {
            let mut lease = self
                .leases
                .get_mut(id)
                .filter(|l| l.holder().app_name == app)
                .ok_or_else(|| {
                    debug!(%app, instance_id = %id, "renewal for unregistered instance");
                    RegistryError::not_registered(app, id)
                })?;

            if lease.is_cancelled() {
                return Err(RegistryError::lease_cancelled(app, id));
            }

            let reported = lease.holder().clone();
            let resolution = self.resolver.resolve(&reported, Some(&*lease), is_replication);
            if resolution.status == InstanceStatus::Unknown {
                warn!(
                    %app,
                    instance_id = %id,
                    rule = %resolution.rule,
                    "instance status resolved to UNKNOWN, re-registration required"
                );
                return Err(RegistryError::reregistration_required(app, id));
            }

            if reported.status != resolution.status {
                info!(
                    %app,
                    instance_id = %id,
                    from = %reported.status,
                    to = %resolution.status,
                    rule = %resolution.rule,
                    "instance status changed on renewal"
                );
                lease.holder_mut().status = resolution.status;
            }

            lease.renew_at(now);
            (resolution.status, lease.holder().clone())
        };

        self.renews.increment();
        debug!(%app, instance_id = %id, %status, is_replication, "lease renewed");

        if !is_replication {
            self.replicate(ActionType::Heartbeat, &stored);
        }
        Ok(status)
    }

    /// Cancel an instance's lease, removing it from the registry.
    pub fn cancel(&self, app: &str, id: &str, is_replication: bool) -> RegistryResult<()> {
        let lease = self
            .remove_lease(app, id, epoch_millis(), |_| true)
            .ok_or_else(|| RegistryError::not_registered(app, id))?;

        self.adjust_expected_clients(-1);
        info!(%app, instance_id = %id, is_replication, "cancelled instance");

        if !is_replication {
            self.replicate(ActionType::Cancel, lease.holder());
        }
        Ok(())
    }

    /// Remove the lease if it belongs to `app` and `should_remove` holds,
    /// marking it cancelled. The override for the id is dropped under the
    /// same entry guard, so a concurrent re-registration cannot lose its own.
    pub(crate) fn remove_lease(
        &self,
        app: &str,
        id: &str,
        now_ms: u64,
        should_remove: impl FnOnce(&Lease<InstanceInfo>) -> bool,
    ) -> Option<Lease<InstanceInfo>> {
        let Entry::Occupied(entry) = self.leases.entry(id.to_string()) else {
            return None;
        };
        if entry.get().holder().app_name != app || !should_remove(entry.get()) {
            return None;
        }

        if let Some(overridden) = self.overrides.remove(id) {
            debug!(instance_id = %id, status = %overridden, "removed status override with lease");
        }
        let mut lease = entry.remove();
        lease.cancel_at(now_ms);
        Some(lease)
    }

    // ── Operator overrides ─────────────────────────────────────

    /// Apply an operator status override to a registered instance.
    pub fn status_update(
        &self,
        app: &str,
        id: &str,
        new_status: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> RegistryResult<()> {
        let now = epoch_millis();

        let stored = {
            let mut lease = self
                .leases
                .get_mut(id)
                .filter(|l| l.holder().app_name == app)
                .ok_or_else(|| RegistryError::not_registered(app, id))?;

            if !lease.renew_at(now) {
                return Err(RegistryError::lease_cancelled(app, id));
            }
            if new_status == InstanceStatus::Up {
                lease.service_up_at(now);
            }

            self.overrides.insert(id, new_status);

            let holder = lease.holder_mut();
            let previous = holder.status;
            holder.overridden_status = new_status;
            holder.status = new_status;
            if let Some(dirty) = last_dirty_timestamp {
                holder.last_dirty_timestamp = holder.last_dirty_timestamp.max(dirty);
            }
            info!(%app, instance_id = %id, from = %previous, to = %new_status, is_replication, "status override applied");
            holder.clone()
        };

        if !is_replication {
            self.replicate(ActionType::StatusUpdate, &stored);
        }
        Ok(())
    }

    /// Remove an operator override and set the instance to `new_status`.
    ///
    /// The status is only changed when an override was actually present.
    pub fn delete_status_override(
        &self,
        app: &str,
        id: &str,
        new_status: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> RegistryResult<()> {
        let now = epoch_millis();

        let stored = {
            let mut lease = self
                .leases
                .get_mut(id)
                .filter(|l| l.holder().app_name == app)
                .ok_or_else(|| RegistryError::not_registered(app, id))?;

            if !lease.renew_at(now) {
                return Err(RegistryError::lease_cancelled(app, id));
            }

            if let Some(removed) = self.overrides.remove(id) {
                let holder = lease.holder_mut();
                holder.overridden_status = InstanceStatus::Unknown;
                holder.status = new_status;
                if let Some(dirty) = last_dirty_timestamp {
                    holder.last_dirty_timestamp = holder.last_dirty_timestamp.max(dirty);
                }
                info!(%app, instance_id = %id, removed = %removed, status = %new_status, "status override removed");
            } else {
                debug!(%app, instance_id = %id, "no status override to remove");
            }
            lease.holder().clone()
        };

        if !is_replication {
            self.replicate(ActionType::DeleteStatusOverride, &stored);
        }
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────

    /// Snapshot of the instance registered under `id`.
    pub fn get(&self, id: &str) -> Option<InstanceInfo> {
        self.leases.get(id).map(|l| l.holder().clone())
    }

    /// Snapshot of the lease registered under `id`.
    pub fn lease(&self, id: &str) -> Option<Lease<InstanceInfo>> {
        self.leases.get(id).map(|l| l.clone())
    }

    pub fn instances_for_app(&self, app: &str) -> Vec<InstanceInfo> {
        let mut instances: Vec<InstanceInfo> = self
            .leases
            .iter()
            .filter(|l| l.holder().app_name == app)
            .map(|l| l.holder().clone())
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    pub fn overridden_status(&self, id: &str) -> Option<InstanceStatus> {
        self.overrides.get(id)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Leases removed by the eviction sweep since start.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total.load(Ordering::Relaxed)
    }

    // ── Self-preservation bookkeeping ──────────────────────────

    pub fn expected_clients(&self) -> u64 {
        self.lock_expectation().expected_clients
    }

    /// Renewals per rate interval below which eviction is suspended.
    pub fn renews_threshold(&self) -> u64 {
        self.lock_expectation().threshold
    }

    pub fn stats(&self) -> RegistryStats {
        let (expected_clients, renews_threshold) = {
            let e = self.lock_expectation();
            (e.expected_clients, e.threshold)
        };
        RegistryStats {
            registered: self.len(),
            renews_last_min: self.renews.count(),
            replications_last_min: self.replications.count(),
            expected_clients,
            renews_threshold,
            self_preservation_active: !self.is_lease_expiration_enabled(),
        }
    }

    fn adjust_expected_clients(&self, delta: i64) {
        let mut e = self.lock_expectation();
        e.expected_clients = if delta >= 0 {
            e.expected_clients.saturating_add(delta as u64)
        } else {
            e.expected_clients.saturating_sub(delta.unsigned_abs())
        };
        e.threshold = renews_threshold_for(&self.config, e.expected_clients);
        debug!(
            expected_clients = e.expected_clients,
            threshold = e.threshold,
            "renewal threshold updated"
        );
    }

    fn lock_expectation(&self) -> MutexGuard<'_, RenewalExpectation> {
        self.expectation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replicate(&self, action: ActionType, instance: &InstanceInfo) {
        if let Some(replicator) = &self.replicator {
            replicator.replicate(action, instance);
            self.replications.increment();
        }
    }
}

/// `expected_clients` renewing every `expected_renewal_interval_secs`
/// yields this many renewals per rate interval, scaled by the percent
/// threshold.
pub(crate) fn renews_threshold_for(config: &RegistryConfig, expected_clients: u64) -> u64 {
    let renewals_per_client =
        config.rate_interval_ms as f64 / (config.expected_renewal_interval_secs as f64 * 1000.0);
    (expected_clients as f64 * renewals_per_client * config.renewal_percent_threshold) as u64
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("registered", &self.len())
            .field("overrides", &self.overrides.len())
            .field("renews", &self.renews)
            .field("replications", &self.replications)
            .finish()
    }
}
