//! Health check endpoints.

use axum::Json;
use axum::extract::State;
use cohort_ingest::{GraphStore, RelayConnector};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Unix seconds of the last committed aggregation; 0 if never.
    last_updated: u64,
    aggregating: bool,
}

/// Public health check endpoint.
///
/// Returns basic service health without authentication.
/// Use this for load balancer health probes.
pub async fn health_check<C: RelayConnector, S: GraphStore>(
    State(state): State<AppState<C, S>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        last_updated: state.aggregator.current().snapshot.last_updated,
        aggregating: state.aggregator.is_running(),
    })
}

/// Authenticated ping endpoint.
///
/// Returns a simple response confirming authentication works.
/// Useful for API clients to verify their token is valid.
#[derive(Debug, Clone, Serialize)]
pub struct PingResponse {
    message: &'static str,
}

pub async fn authenticated_ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}
