//! Graph endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use cohort_core::VisualizationGraph;
use cohort_ingest::{Aggregator, GraphStore, RelayConnector, RunReport};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// The exported graph plus snapshot freshness.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResponse {
    #[serde(flatten)]
    pub graph: VisualizationGraph,
    /// Unix seconds of the committed snapshot; 0 if never aggregated.
    pub last_updated: u64,
    /// The snapshot is older than the configured max age.
    pub stale: bool,
    /// An aggregation pass is running (possibly started by this request).
    pub refreshing: bool,
}

/// Summary of a forced refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub identities: usize,
    pub failed: usize,
    pub new_identities: usize,
    pub members: usize,
    pub records: usize,
    pub dropped: usize,
    pub committed_at: u64,
    pub duration_ms: u64,
    pub graph: VisualizationGraph,
}

impl RefreshResponse {
    fn new(report: RunReport, graph: VisualizationGraph) -> Self {
        Self {
            identities: report.identities,
            failed: report.failed,
            new_identities: report.new_identities,
            members: report.members,
            records: report.records,
            dropped: report.dropped,
            committed_at: report.committed_at,
            duration_ms: report.duration.as_millis() as u64,
            graph,
        }
    }
}

fn spawn_refresh<C: RelayConnector, S: GraphStore>(aggregator: Arc<Aggregator<C, S>>) {
    tokio::spawn(async move {
        match aggregator.refresh_if_stale().await {
            Ok(Some(report)) => tracing::info!(
                members = report.members,
                failed = report.failed,
                "background refresh committed"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "background refresh failed"),
        }
    });
}

/// `GET /api/v1/graph`
///
/// Serves the last committed graph. A stale snapshot triggers a background
/// refresh; the response never waits for it.
pub async fn graph<C: RelayConnector, S: GraphStore>(
    State(state): State<AppState<C, S>>,
) -> Json<GraphResponse> {
    let aggregator = &state.aggregator;
    let stale = !aggregator.is_fresh();
    let mut refreshing = aggregator.is_running();
    if stale && !refreshing {
        spawn_refresh(Arc::clone(aggregator));
        refreshing = true;
    }

    let last_updated = aggregator.current().snapshot.last_updated;
    Json(GraphResponse {
        graph: aggregator.export(),
        last_updated,
        stale,
        refreshing,
    })
}

/// `POST /api/v1/graph/refresh`
///
/// Runs an aggregation pass now and returns its summary with the new graph.
/// 409 if a pass is already running.
pub async fn refresh<C: RelayConnector, S: GraphStore>(
    State(state): State<AppState<C, S>>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let report = state.aggregator.run_once().await?;
    Ok(Json(RefreshResponse::new(report, state.aggregator.export())))
}
