//! End-to-end status resolution through the registry.
//!
//! Drives registration, renewal and operator overrides through the public
//! `Registry` API and checks both the stored status and which rule decided
//! it.

use std::sync::Arc;
use std::time::Duration;

use roster_core::{InstanceInfo, InstanceStatus, RegistryConfig};
use roster_registry::*;

const APP: &str = "billing";
const ID: &str = "i-1";

const UNHEALTHY: [InstanceStatus; 3] = [
    InstanceStatus::Down,
    InstanceStatus::Starting,
    InstanceStatus::Unknown,
];
const SERVER_HELD: [InstanceStatus; 2] = [InstanceStatus::Up, InstanceStatus::OutOfService];

fn test_registry() -> Registry {
    Registry::new(RegistryConfig::default())
}

fn report(status: InstanceStatus) -> InstanceInfo {
    InstanceInfo::new(APP, ID, status)
}

/// A registry holding a lease for `ID` with `held` as its status.
fn registry_holding(held: InstanceStatus) -> Registry {
    let reg = test_registry();
    // Replicated so the reported status is stored verbatim.
    let r = reg.register(report(held), None, true).unwrap();
    assert_eq!(r.status, held);
    reg
}

#[test]
fn scenario_a_fresh_up_registration_falls_through() {
    let reg = test_registry();
    let r = reg.register(report(InstanceStatus::Up), None, false).unwrap();
    assert_eq!(r.status, InstanceStatus::Up);
    assert_eq!(r.rule, RuleKind::AlwaysMatch);
}

#[test]
fn scenario_b_existing_up_lease_wins_for_self_report() {
    let reg = registry_holding(InstanceStatus::Up);
    let r = reg.register(report(InstanceStatus::Up), None, false).unwrap();
    assert_eq!(r.status, InstanceStatus::Up);
    assert_eq!(r.rule, RuleKind::LeaseExists);
}

#[test]
fn scenario_c_replication_skips_lease_exists() {
    let reg = registry_holding(InstanceStatus::Up);
    let r = reg.register(report(InstanceStatus::Up), None, true).unwrap();
    // Same literal outcome as scenario B, decided by a different rule.
    assert_eq!(r.status, InstanceStatus::Up);
    assert_eq!(r.rule, RuleKind::AlwaysMatch);
}

#[test]
fn scenario_d_override_beats_reported_out_of_service() {
    let reg = registry_holding(InstanceStatus::Up);
    reg.status_update(APP, ID, InstanceStatus::Down, None, false)
        .unwrap();

    let r = reg.register(report(InstanceStatus::OutOfService), None, false).unwrap();
    assert_eq!(r.status, InstanceStatus::Down);
    assert_eq!(r.rule, RuleKind::OverrideExists);
}

#[test]
fn scenario_e_starting_short_circuits_before_override() {
    let reg = registry_holding(InstanceStatus::Up);
    reg.status_update(APP, ID, InstanceStatus::OutOfService, None, false)
        .unwrap();

    let r = reg.register(report(InstanceStatus::Starting), None, false).unwrap();
    assert_eq!(r.status, InstanceStatus::Starting);
    assert_eq!(r.rule, RuleKind::DownOrStarting);
    // The override is still recorded, just never consulted.
    assert_eq!(reg.overridden_status(ID), Some(InstanceStatus::OutOfService));
}

#[test]
fn unhealthy_reports_are_never_overridden() {
    for reported in UNHEALTHY {
        for held in [None, Some(InstanceStatus::Up), Some(InstanceStatus::OutOfService)] {
            for with_override in [false, true] {
                for is_replication in [false, true] {
                    let reg = match held {
                        Some(h) => registry_holding(h),
                        None => test_registry(),
                    };
                    if with_override && held.is_some() {
                        reg.status_update(APP, ID, InstanceStatus::Up, None, false)
                            .unwrap();
                    }

                    let r = reg.register(report(reported), None, is_replication).unwrap();
                    assert_eq!(r.status, reported, "held={held:?} override={with_override}");
                    assert_eq!(r.rule, RuleKind::DownOrStarting);
                }
            }
        }
    }
}

#[test]
fn server_held_status_wins_over_self_report() {
    let resolver = StatusOverrideResolver::standard(StatusOverrides::new());
    for held in SERVER_HELD {
        let lease = Lease::new(report(held), Duration::from_secs(90));
        for reported in SERVER_HELD {
            let r = resolver.resolve(&report(reported), Some(&lease), false);
            assert_eq!(r.status, held);
            assert_eq!(r.rule, RuleKind::LeaseExists);
        }
    }
}

#[test]
fn override_wins_whenever_reached() {
    for reported in SERVER_HELD {
        for held in SERVER_HELD {
            for overridden in [
                InstanceStatus::Up,
                InstanceStatus::Down,
                InstanceStatus::OutOfService,
            ] {
                for is_replication in [false, true] {
                    let reg = registry_holding(held);
                    reg.status_update(APP, ID, overridden, None, false).unwrap();

                    let r = reg.register(report(reported), None, is_replication).unwrap();
                    assert_eq!(r.status, overridden);
                    assert_eq!(r.rule, RuleKind::OverrideExists);
                }
            }
        }
    }
}

#[test]
fn no_match_falls_back_to_reported_status() {
    for reported in SERVER_HELD {
        let reg = test_registry();
        let r = reg.register(report(reported), None, false).unwrap();
        assert_eq!(r.status, reported);
        assert_eq!(r.rule, RuleKind::AlwaysMatch);
    }
}

#[test]
fn operator_override_lifecycle_through_renewals() {
    let reg = test_registry();
    reg.register(report(InstanceStatus::Up), None, false).unwrap();

    reg.status_update(APP, ID, InstanceStatus::OutOfService, None, false)
        .unwrap();
    assert_eq!(reg.renew(APP, ID, false), Ok(InstanceStatus::OutOfService));
    assert_eq!(reg.renew(APP, ID, true), Ok(InstanceStatus::OutOfService));

    reg.delete_status_override(APP, ID, InstanceStatus::Up, None, false)
        .unwrap();
    assert_eq!(reg.renew(APP, ID, false), Ok(InstanceStatus::Up));

    reg.cancel(APP, ID, false).unwrap();
    assert_eq!(
        reg.renew(APP, ID, false),
        Err(RegistryError::NotRegistered {
            app: APP.to_string(),
            id: ID.to_string(),
        })
    );
}

#[test]
fn concurrent_registrations_of_one_instance_count_once() {
    let reg = Arc::new(test_registry());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let reg = reg.clone();
            std::thread::spawn(move || {
                for n in 0..100 {
                    let status = if (t + n) % 2 == 0 {
                        InstanceStatus::Up
                    } else {
                        InstanceStatus::OutOfService
                    };
                    reg.register(report(status), None, t % 2 == 0).unwrap();
                    let _ = reg.renew(APP, ID, false);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(reg.len(), 1);
    assert_eq!(reg.expected_clients(), 1);
    let stored = reg.get(ID).unwrap();
    assert!(stored.status.is_up_or_out_of_service());
}
