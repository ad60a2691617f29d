//! Registry node mode — owns the registry and its background tasks.
//!
//! In this mode, the daemon:
//! 1. Builds the registry from the `[registry]` config section
//! 2. Starts the renewal and replication rate counters
//! 3. Runs the eviction sweep
//! 4. Reports stats periodically, optionally as a Prometheus textfile
//! 5. Shuts everything down on Ctrl-C

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use roster_core::{RegistryStats, RosterConfig};
use roster_metrics::render_prometheus;
use roster_registry::{EvictionTask, Registry};

/// Run the registry node until interrupted.
pub async fn run_node(
    config: RosterConfig,
    metrics_file: Option<PathBuf>,
    stats_interval: u64,
) -> anyhow::Result<()> {
    info!("Roster daemon starting");

    let registry = Arc::new(Registry::new(config.registry));
    registry.start_counters()?;
    info!(
        lease_duration_secs = registry.config().lease_duration_secs,
        self_preservation = registry.config().self_preservation,
        "registry initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let eviction = EvictionTask::new(registry.clone());
    let eviction_handle = tokio::spawn(eviction.run(shutdown_rx.clone()));

    let stats_registry = registry.clone();
    let stats_handle = tokio::spawn(async move {
        run_stats_reporter(
            stats_registry,
            Duration::from_secs(stats_interval.max(1)),
            metrics_file,
            shutdown_rx,
        )
        .await;
    });

    // ── Wait for Ctrl-C ────────────────────────────────────────

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = eviction_handle.await;
    let _ = stats_handle.await;
    registry.stop_counters();

    info!("Roster daemon stopped");
    Ok(())
}

async fn run_stats_reporter(
    registry: Arc<Registry>,
    interval: Duration,
    metrics_file: Option<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let stats = registry.stats();
                info!(
                    registered = stats.registered,
                    renews_last_min = stats.renews_last_min,
                    replications_last_min = stats.replications_last_min,
                    expected_clients = stats.expected_clients,
                    renews_threshold = stats.renews_threshold,
                    self_preservation_active = stats.self_preservation_active,
                    "registry stats"
                );
                if let Some(path) = &metrics_file {
                    if let Err(e) = write_metrics_file(path, &stats) {
                        warn!(path = %path.display(), error = %e, "failed to write metrics file");
                    }
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}

/// Write gauges atomically so a textfile collector never reads a
/// partial file.
fn write_metrics_file(path: &Path, stats: &RegistryStats) -> anyhow::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, render_prometheus(stats))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stats() -> RegistryStats {
        RegistryStats {
            registered: 3,
            renews_last_min: 6,
            replications_last_min: 0,
            expected_clients: 3,
            renews_threshold: 5,
            self_preservation_active: false,
        }
    }

    #[test]
    fn metrics_file_is_written_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.prom");

        write_metrics_file(&path, &test_stats()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("roster_registered_instances 3\n"));

        let mut stats = test_stats();
        stats.registered = 4;
        write_metrics_file(&path, &stats).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("roster_registered_instances 4\n"));
        assert!(!path.with_extension("prom.tmp").exists());
    }

    #[test]
    fn metrics_file_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("roster.prom");
        assert!(write_metrics_file(&path, &test_stats()).is_err());
    }

    #[tokio::test]
    async fn stats_reporter_writes_file_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.prom");
        let registry = Arc::new(Registry::new(RosterConfig::default().registry));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_stats_reporter(
            registry,
            Duration::from_millis(10),
            Some(path.clone()),
            shutdown_rx,
        ));

        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("roster_registered_instances 0\n"));
    }
}
