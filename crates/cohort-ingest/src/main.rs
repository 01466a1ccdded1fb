//! Cohort aggregation daemon.
//!
//! Periodically queries relays for the configured core and agency
//! identities, merges what it finds into the committed graph and writes
//! `registry.json` and `snapshot.json` to the data directory.
//!
//! # Usage
//!
//! ```bash
//! # One pass, then exit
//! cohort-ingest --core npub1... --interval-secs 0
//!
//! # Every 15 minutes, custom relays
//! cohort-ingest \
//!     --core npub1...,npub1... \
//!     --agency npub1... \
//!     --relays wss://relay.damus.io,wss://nos.lol \
//!     --data-dir /var/lib/cohort
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) stops the daemon between passes. A pass in flight is
//! finished and committed first.

use anyhow::{Context, Result};
use clap::Parser;
use cohort_core::metrics::{init_metrics, start_metrics_server};
use cohort_ingest::{
    Aggregator, AggregatorConfig, JsonFileStore, NostrConnector, default_relays,
    parse_identities,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Cohort aggregation daemon.
#[derive(Parser, Debug)]
#[command(name = "cohort-ingest")]
#[command(about = "Social graph aggregation daemon")]
#[command(version)]
struct Args {
    /// Relay URLs (comma-separated, overrides defaults)
    #[arg(long, value_delimiter = ',')]
    relays: Option<Vec<String>>,

    /// Core identities, npub or hex (comma-separated)
    #[arg(long, value_delimiter = ',')]
    core: Vec<String>,

    /// Agency identities, npub or hex (comma-separated)
    #[arg(long, value_delimiter = ',')]
    agency: Vec<String>,

    /// Directory for registry.json and snapshot.json
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Per-query timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Interaction lookback window in days
    #[arg(long, default_value = "7")]
    lookback_days: u64,

    /// Maximum concurrent relay connections
    #[arg(long, default_value = "4")]
    max_connections: usize,

    /// Delay between relay connection attempts in milliseconds
    #[arg(long, default_value = "250")]
    stagger_ms: u64,

    /// Seconds between passes (0 to run once and exit)
    #[arg(long, default_value = "900")]
    interval_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9091")]
    metrics_port: u16,
}

impl Args {
    fn into_config(self) -> Result<AggregatorConfig> {
        let config = AggregatorConfig {
            relays: self.relays.unwrap_or_else(default_relays),
            core: parse_identities(&self.core),
            agency: parse_identities(&self.agency),
            query_timeout: Duration::from_millis(self.timeout_ms),
            lookback: Duration::from_secs(self.lookback_days * 24 * 60 * 60),
            max_connections: self.max_connections,
            connect_stagger: Duration::from_millis(self.stagger_ms),
            data_dir: self.data_dir,
            ..Default::default()
        };
        config.validate().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A provider may already be installed by a dependency; either way one is.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("cohort_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let interval = Duration::from_secs(args.interval_secs);
    let metrics_port = args.metrics_port;
    let config = args.into_config()?;

    tracing::info!("Cohort aggregation daemon starting...");

    if metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping after the current pass...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::info!("Configuration:");
    tracing::info!("  Data dir: {}", config.data_dir.display());
    tracing::info!("  Relays: {}", config.relays.join(", "));
    tracing::info!("  Core identities: {}", config.core.len());
    tracing::info!("  Agency identities: {}", config.agency.len());
    tracing::info!("  Query timeout: {:?}", config.query_timeout);
    tracing::info!("  Max connections: {}", config.max_connections);

    let store = JsonFileStore::in_dir(&config.data_dir);
    let aggregator = Aggregator::new(config, NostrConnector::default(), store)
        .context("Failed to load committed graph state")?;

    let mut passes = 0usize;
    let mut failures = 0usize;
    while running.load(Ordering::SeqCst) {
        passes += 1;
        match aggregator.run_once().await {
            Ok(report) => tracing::info!(
                "Pass {} committed at {} ({} members)",
                passes,
                report.committed_at,
                report.members
            ),
            Err(e) => {
                failures += 1;
                tracing::error!("Pass {} failed: {}", passes, e);
            }
        }

        if interval.is_zero() {
            break;
        }
        let next = tokio::time::Instant::now() + interval;
        while running.load(Ordering::SeqCst) && tokio::time::Instant::now() < next {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Passes run:     {}", passes);
    tracing::info!("Passes failed:  {}", failures);

    if interval.is_zero() && failures > 0 {
        anyhow::bail!("aggregation pass failed");
    }
    Ok(())
}
