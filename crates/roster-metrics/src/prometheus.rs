//! Prometheus text exposition format.
//!
//! Renders a registry stats snapshot as gauges, suitable for a scrape
//! endpoint or a node-exporter textfile collector.

use std::fmt::Write;

use roster_core::RegistryStats;

/// Render registry stats into Prometheus text format.
pub fn render_prometheus(stats: &RegistryStats) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "roster_registered_instances",
        "Number of leases currently held.",
        stats.registered as u64,
    );
    gauge(
        &mut out,
        "roster_renews_last_min",
        "Renewals counted in the last completed interval.",
        stats.renews_last_min,
    );
    gauge(
        &mut out,
        "roster_replications_last_min",
        "Outbound replications counted in the last completed interval.",
        stats.replications_last_min,
    );
    gauge(
        &mut out,
        "roster_expected_clients",
        "Clients expected to be sending renewals.",
        stats.expected_clients,
    );
    gauge(
        &mut out,
        "roster_renews_threshold",
        "Renewals per interval below which eviction is suspended.",
        stats.renews_threshold,
    );
    gauge(
        &mut out,
        "roster_self_preservation_active",
        "1 when lease eviction is currently suspended.",
        stats.self_preservation_active as u64,
    );

    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}
