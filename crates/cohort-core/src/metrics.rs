//! Prometheus metrics helpers for cohort.
//!
//! Centralized recorder setup and metric descriptions shared by the ingest
//! daemon and the HTTP server.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cohort_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("aggregation_runs_total", "outcome" => "success").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`aggregation_`, `relay_query_`, `relay_endpoint_`, `graph_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only low-cardinality ones (`outcome`, `kind`); never identities or URLs

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Serve `/metrics` on `port` from a background task.
///
/// The listener is bound before returning, so a port conflict surfaces as an
/// error here rather than inside the spawned task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics emitted across cohort.
fn register_common_metrics() {
    // =========================================================================
    // Aggregation
    // =========================================================================

    describe_counter!(
        "aggregation_runs_total",
        "Aggregation passes finished (label: outcome = success|failure)"
    );
    describe_histogram!(
        "aggregation_run_duration_seconds",
        "Wall time of a full aggregation pass"
    );
    describe_counter!(
        "aggregation_identity_failures_total",
        "Tracked identities with a query that got no answer from any relay"
    );
    describe_counter!(
        "aggregation_records_dropped_total",
        "Malformed records dropped during merge"
    );
    describe_counter!(
        "aggregation_new_identities_total",
        "Identities added to the registry"
    );
    describe_gauge!(
        "aggregation_running",
        "Whether an aggregation pass is in progress (1=yes, 0=no)"
    );

    // =========================================================================
    // Relay queries
    // =========================================================================

    describe_counter!(
        "relay_query_total",
        "Relay queries issued (label: outcome = complete|timeout)"
    );
    describe_counter!(
        "relay_query_records_total",
        "Unique records returned by relay queries"
    );
    describe_counter!(
        "relay_query_duplicates_total",
        "Records dropped because another endpoint already returned them"
    );
    describe_histogram!(
        "relay_query_duration_seconds",
        "Wall time of a relay query across all endpoints"
    );
    describe_counter!(
        "relay_endpoint_failures_total",
        "Endpoint connections that failed or closed before end of stored data"
    );

    // =========================================================================
    // Graph
    // =========================================================================

    describe_gauge!("graph_members", "Members in the committed snapshot");
    describe_gauge!(
        "graph_registry_size",
        "Identities in the committed registry"
    );
    describe_gauge!(
        "graph_last_updated_unix",
        "Commit time of the current snapshot"
    );
}

/// Publish the size of a committed graph.
pub fn record_graph_size(members: usize, registry: usize, last_updated: u64) {
    metrics::gauge!("graph_members").set(members as f64);
    metrics::gauge!("graph_registry_size").set(registry as f64);
    metrics::gauge!("graph_last_updated_unix").set(last_updated as f64);
}
