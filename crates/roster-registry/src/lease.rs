//! Time-bounded membership claim held by the registry for one instance.
//!
//! All timestamps are Unix epoch milliseconds. The `*_at` variants take
//! the current time explicitly; the registry passes `epoch_millis()`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A lease on registry membership.
#[derive(Debug, Clone)]
pub struct Lease<T> {
    holder: T,
    registration_timestamp: u64,
    last_update_timestamp: u64,
    /// Zero while the lease is active.
    eviction_timestamp: u64,
    /// When the holder was first seen UP. Zero until then.
    service_up_timestamp: u64,
    duration: Duration,
}

impl<T> Lease<T> {
    pub fn new(holder: T, duration: Duration) -> Self {
        Self::new_at(holder, duration, epoch_millis())
    }

    pub fn new_at(holder: T, duration: Duration, now_ms: u64) -> Self {
        Self {
            holder,
            registration_timestamp: now_ms,
            last_update_timestamp: now_ms,
            eviction_timestamp: 0,
            service_up_timestamp: 0,
            duration,
        }
    }

    pub fn holder(&self) -> &T {
        &self.holder
    }

    pub fn holder_mut(&mut self) -> &mut T {
        &mut self.holder
    }

    /// Extend the lease from `now_ms`.
    ///
    /// Returns `false` without touching the lease if it was cancelled.
    pub fn renew_at(&mut self, now_ms: u64) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.last_update_timestamp = now_ms;
        true
    }

    /// Mark the lease cancelled. Only the first call takes effect.
    pub fn cancel_at(&mut self, now_ms: u64) {
        if self.eviction_timestamp == 0 {
            self.eviction_timestamp = now_ms.max(1);
        }
    }

    /// Record the first time the holder came UP. Later calls keep the
    /// original timestamp.
    pub fn service_up_at(&mut self, now_ms: u64) {
        if self.service_up_timestamp == 0 {
            self.service_up_timestamp = now_ms;
        }
    }

    pub(crate) fn set_service_up_timestamp(&mut self, timestamp_ms: u64) {
        self.service_up_timestamp = timestamp_ms;
    }

    pub fn is_cancelled(&self) -> bool {
        self.eviction_timestamp != 0
    }

    /// Whether the lease is cancelled or has gone unrenewed for longer
    /// than its duration plus `additional_ms`.
    pub fn is_expired_at(&self, now_ms: u64, additional_ms: u64) -> bool {
        self.is_cancelled() || now_ms > self.expires_at(additional_ms)
    }

    /// Timestamp after which the lease counts as expired.
    pub fn expires_at(&self, additional_ms: u64) -> u64 {
        self.last_update_timestamp
            .saturating_add(self.duration.as_millis() as u64)
            .saturating_add(additional_ms)
    }

    pub fn registration_timestamp(&self) -> u64 {
        self.registration_timestamp
    }

    pub fn last_update_timestamp(&self) -> u64 {
        self.last_update_timestamp
    }

    pub fn eviction_timestamp(&self) -> u64 {
        self.eviction_timestamp
    }

    pub fn service_up_timestamp(&self) -> u64 {
        self.service_up_timestamp
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const NINETY_SECS: Duration = Duration::from_secs(90);

    #[test]
    fn new_lease_is_active() {
        let lease = Lease::new_at("i-1", NINETY_SECS, 1_000);
        assert!(!lease.is_cancelled());
        assert_eq!(lease.eviction_timestamp(), 0);
        assert_eq!(lease.registration_timestamp(), 1_000);
        assert_eq!(lease.last_update_timestamp(), 1_000);
        assert_eq!(lease.service_up_timestamp(), 0);
    }

    #[test]
    fn expiry_honours_duration_and_compensation() {
        let lease = Lease::new_at("i-1", NINETY_SECS, 1_000);
        assert!(!lease.is_expired_at(91_000, 0));
        assert!(lease.is_expired_at(91_001, 0));
        // Compensation pushes the deadline out.
        assert!(!lease.is_expired_at(91_001, 5_000));
        assert!(lease.is_expired_at(96_001, 5_000));
    }

    #[test]
    fn renew_moves_the_deadline() {
        let mut lease = Lease::new_at("i-1", NINETY_SECS, 1_000);
        assert!(lease.renew_at(60_000));
        assert_eq!(lease.last_update_timestamp(), 60_000);
        assert!(!lease.is_expired_at(120_000, 0));
        assert_eq!(lease.registration_timestamp(), 1_000);
    }

    #[test]
    fn cancelled_lease_is_expired_and_not_renewable() {
        let mut lease = Lease::new_at("i-1", NINETY_SECS, 1_000);
        lease.cancel_at(2_000);
        assert!(lease.is_cancelled());
        assert!(lease.is_expired_at(2_000, 0));

        assert!(!lease.renew_at(3_000));
        assert_eq!(lease.last_update_timestamp(), 1_000);

        // Second cancel keeps the first timestamp.
        lease.cancel_at(4_000);
        assert_eq!(lease.eviction_timestamp(), 2_000);
    }

    #[test]
    fn service_up_is_recorded_once() {
        let mut lease = Lease::new_at("i-1", NINETY_SECS, 1_000);
        lease.service_up_at(1_500);
        lease.service_up_at(9_000);
        assert_eq!(lease.service_up_timestamp(), 1_500);
    }
}
