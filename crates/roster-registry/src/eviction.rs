//! Lease eviction and self-preservation.
//!
//! The sweep expires leases that stopped renewing, unless the renewal
//! rate over the last completed interval says the silence is more likely
//! a network partition than dead instances. In that case nothing is
//! evicted until renewals recover.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use roster_core::InstanceId;

use crate::lease::epoch_millis;
use crate::registry::Registry;

impl Registry {
    /// Whether the eviction sweep may expire leases right now.
    pub fn is_lease_expiration_enabled(&self) -> bool {
        if !self.config.self_preservation {
            return true;
        }
        // No interval has closed yet: zero renewals means "no data", not
        // "nobody renewed".
        if !self.renews.has_completed_interval() {
            return true;
        }
        let threshold = self.renews_threshold();
        threshold > 0 && self.renews.count() > threshold
    }

    /// Evict expired leases as of now.
    pub fn evict(&self, additional_lease_ms: u64) -> Vec<InstanceId> {
        self.evict_at(epoch_millis(), additional_lease_ms)
    }

    /// Evict leases expired at `now_ms`, returning the evicted ids.
    ///
    /// At most `size - floor(size * renewal_percent_threshold)` leases go
    /// in one sweep, most overdue first.
    pub fn evict_at(&self, now_ms: u64, additional_lease_ms: u64) -> Vec<InstanceId> {
        if !self.is_lease_expiration_enabled() {
            debug!(
                renews_last_interval = self.renews.count(),
                threshold = self.renews_threshold(),
                "lease expiration is currently disabled, self-preservation active"
            );
            return Vec::new();
        }

        let mut expired: Vec<(u64, String, InstanceId)> = self
            .leases
            .iter()
            .filter(|l| l.is_expired_at(now_ms, additional_lease_ms))
            .map(|l| {
                (
                    l.expires_at(additional_lease_ms),
                    l.holder().app_name.clone(),
                    l.key().clone(),
                )
            })
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        let registry_size = self.leases.len();
        let keep = (registry_size as f64 * self.config.renewal_percent_threshold) as usize;
        let limit = registry_size.saturating_sub(keep);
        if expired.len() > limit {
            warn!(
                expired = expired.len(),
                limit, "too many expired leases, evicting a bounded batch"
            );
        }

        expired.sort();
        expired.truncate(limit);

        let mut evicted = Vec::with_capacity(expired.len());
        for (_, app, id) in expired {
            // Renewed since the scan: leave it.
            let removed = self.remove_lease(&app, &id, now_ms, |l| {
                l.is_expired_at(now_ms, additional_lease_ms)
            });
            if removed.is_some() {
                warn!(%app, instance_id = %id, "evicted expired lease");
                evicted.push(id);
            }
        }

        self.evicted_total
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }
}

/// Periodic eviction sweep for a registry.
pub struct EvictionTask {
    registry: Arc<Registry>,
    interval: Duration,
    last_run: Option<Instant>,
}

impl EvictionTask {
    pub fn new(registry: Arc<Registry>) -> Self {
        let interval = registry.config().eviction_interval();
        Self {
            registry,
            interval,
            last_run: None,
        }
    }

    /// Override the sweep interval taken from the registry config.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Extra lease time granted because this sweep ran late (GC pauses,
    /// clock skew, a starved runtime). Zero on the first run.
    pub fn compensation(&mut self, now: Instant) -> Duration {
        let compensation = match self.last_run {
            Some(last) => now
                .saturating_duration_since(last)
                .saturating_sub(self.interval),
            None => Duration::ZERO,
        };
        self.last_run = Some(now);
        compensation
    }

    /// Run one sweep with compensation.
    pub fn tick(&mut self) -> Vec<InstanceId> {
        let compensation = self.compensation(Instant::now());
        let evicted = self.registry.evict(compensation.as_millis() as u64);
        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                compensation_ms = compensation.as_millis() as u64,
                "eviction sweep completed"
            );
        }
        evicted
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "eviction task started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    info!("eviction task shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{InstanceInfo, InstanceStatus, RegistryConfig};

    const MINUTE_MS: u64 = 60_000;

    fn registry_with(config: RegistryConfig) -> Registry {
        Registry::new(config)
    }

    fn register(reg: &Registry, id: &str, lease_secs: u64) {
        reg.register(
            InstanceInfo::new("billing", id, InstanceStatus::Up),
            Some(Duration::from_secs(lease_secs)),
            false,
        )
        .unwrap();
    }

    fn far_future() -> u64 {
        epoch_millis() + 10 * MINUTE_MS
    }

    #[test]
    fn cold_counter_never_engages_self_preservation() {
        let reg = registry_with(RegistryConfig::default());
        for i in 0..10 {
            register(&reg, &format!("i-{i}"), 90);
        }
        assert!(!reg.renews.has_completed_interval());
        assert!(reg.is_lease_expiration_enabled());
    }

    #[test]
    fn low_renewal_rate_suspends_eviction() {
        let reg = registry_with(RegistryConfig::default());
        for i in 0..10 {
            register(&reg, &format!("i-{i}"), 90);
        }
        // Threshold is 17; only 5 renewals in the closed interval.
        for i in 0..5 {
            reg.renew("billing", &format!("i-{i}"), false).unwrap();
        }
        reg.renews.rotate();

        assert!(!reg.is_lease_expiration_enabled());
        assert!(reg.evict_at(far_future(), 0).is_empty());
        assert_eq!(reg.len(), 10);
        assert!(reg.stats().self_preservation_active);
    }

    #[test]
    fn healthy_renewal_rate_allows_eviction() {
        let reg = registry_with(RegistryConfig::default());
        for i in 0..10 {
            register(&reg, &format!("i-{i}"), 90);
        }
        for _ in 0..2 {
            for i in 0..10 {
                reg.renew("billing", &format!("i-{i}"), false).unwrap();
            }
        }
        reg.renews.rotate();
        assert_eq!(reg.renews.count(), 20);
        assert!(reg.is_lease_expiration_enabled());
    }

    #[test]
    fn renewals_at_threshold_still_suspend() {
        let reg = registry_with(RegistryConfig::default());
        for i in 0..10 {
            register(&reg, &format!("i-{i}"), 90);
        }
        for _ in 0..17 {
            reg.renew("billing", "i-0", false).unwrap();
        }
        reg.renews.rotate();
        assert!(!reg.is_lease_expiration_enabled());
    }

    #[test]
    fn disabled_self_preservation_always_evicts() {
        let config = RegistryConfig {
            self_preservation: false,
            renewal_percent_threshold: 1.0,
            ..RegistryConfig::default()
        };
        let reg = registry_with(config);
        register(&reg, "i-0", 90);
        register(&reg, "i-1", 90);
        reg.renews.rotate();

        let mut evicted = reg.evict_at(far_future(), 0);
        evicted.sort();
        // A threshold of 1.0 keeps floor(2 * 1.0) = 2, so nothing may go.
        assert!(evicted.is_empty());

        let config = RegistryConfig {
            self_preservation: false,
            ..RegistryConfig::default()
        };
        let reg = registry_with(config);
        register(&reg, "i-0", 90);
        reg.renews.rotate();
        // floor(1 * 0.85) = 0 kept, so the single expired lease goes.
        assert_eq!(reg.evict_at(far_future(), 0), vec!["i-0".to_string()]);
        assert!(reg.is_empty());
        assert_eq!(reg.evicted_total(), 1);
    }

    #[test]
    fn only_expired_leases_are_evicted() {
        let reg = registry_with(RegistryConfig::default());
        register(&reg, "short", 10);
        for i in 0..9 {
            register(&reg, &format!("long-{i}"), 3600);
        }

        let evicted = reg.evict_at(epoch_millis() + 30_000, 0);
        assert_eq!(evicted, vec!["short".to_string()]);
        assert_eq!(reg.len(), 9);
        assert!(reg.get("short").is_none());
    }

    #[test]
    fn compensation_delays_expiry() {
        let reg = registry_with(RegistryConfig::default());
        register(&reg, "i-0", 10);
        for i in 0..9 {
            register(&reg, &format!("long-{i}"), 3600);
        }

        let now = epoch_millis() + 30_000;
        assert!(reg.evict_at(now, 60_000).is_empty());
        assert_eq!(reg.evict_at(now, 0), vec!["i-0".to_string()]);
    }

    #[test]
    fn eviction_batch_is_bounded_most_overdue_first() {
        let reg = registry_with(RegistryConfig::default());
        // Twenty leases; four of them expire, with different deadlines.
        register(&reg, "a-10s", 10);
        register(&reg, "b-20s", 20);
        register(&reg, "c-30s", 30);
        register(&reg, "d-40s", 40);
        for i in 0..16 {
            register(&reg, &format!("long-{i:02}"), 3600);
        }

        // 20 - floor(20 * 0.85) = 3 may go per sweep.
        let now = epoch_millis() + 120_000;
        let evicted = reg.evict_at(now, 0);
        assert_eq!(
            evicted,
            vec!["a-10s".to_string(), "b-20s".to_string(), "c-30s".to_string()]
        );
        assert!(reg.get("d-40s").is_some());

        // The next sweep: 17 - floor(17 * 0.85) = 3, picks the remainder.
        assert_eq!(reg.evict_at(now, 0), vec!["d-40s".to_string()]);
    }

    #[test]
    fn eviction_does_not_lower_expected_clients() {
        let reg = registry_with(RegistryConfig::default());
        register(&reg, "short", 10);
        for i in 0..9 {
            register(&reg, &format!("long-{i}"), 3600);
        }
        assert_eq!(reg.expected_clients(), 10);

        reg.evict_at(epoch_millis() + 30_000, 0);
        assert_eq!(reg.expected_clients(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn compensation_is_lateness_beyond_interval() {
        let reg = Arc::new(registry_with(RegistryConfig::default()));
        let mut task = EvictionTask::new(reg).with_interval(Duration::from_secs(60));

        let start = Instant::now();
        assert_eq!(task.compensation(start), Duration::ZERO);
        assert_eq!(
            task.compensation(start + Duration::from_secs(60)),
            Duration::ZERO
        );
        assert_eq!(
            task.compensation(start + Duration::from_secs(135)),
            Duration::from_secs(15)
        );
        // Early runs never go negative.
        assert_eq!(
            task.compensation(start + Duration::from_secs(140)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let reg = Arc::new(registry_with(RegistryConfig::default()));
        let task = EvictionTask::new(reg).with_interval(Duration::from_secs(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(task.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(3)).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
