//! rosterd — the Roster registry daemon.
//!
//! Assembles a registry node's background machinery:
//! - Registry core (lease table, override map, status rules)
//! - Renewal and replication rate counters
//! - Eviction sweep with self-preservation
//! - Periodic stats reporting (log + optional Prometheus textfile)
//!
//! # Usage
//!
//! ```text
//! rosterd run --config /etc/roster/roster.toml --metrics-file /var/lib/node_exporter/roster.prom
//! rosterd check-config --config /etc/roster/roster.toml
//! ```

mod node;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use roster_core::RosterConfig;

#[derive(Parser)]
#[command(name = "rosterd", about = "Roster registry daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a registry node until interrupted.
    Run {
        /// Path to roster.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write Prometheus gauges to this file on every stats tick.
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Stats reporting interval in seconds.
        #[arg(long, default_value = "30")]
        stats_interval: u64,
    },
    /// Validate a config file and print the effective configuration.
    CheckConfig {
        /// Path to roster.toml.
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rosterd=debug,roster=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            metrics_file,
            stats_interval,
        } => {
            let config = load_config(config.as_deref())?;
            node::run_node(config, metrics_file, stats_interval).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RosterConfig> {
    match path {
        Some(p) => RosterConfig::from_file(p)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", p.display())),
        None => Ok(RosterConfig::default()),
    }
}
