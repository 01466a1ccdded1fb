//! API route definitions.

mod graph;
mod health;
mod members;

use axum::Router;
use axum::http::header;
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use cohort_ingest::{GraphStore, RelayConnector};

use crate::auth::require_auth;
use crate::state::AppState;

pub use graph::{GraphResponse, RefreshResponse};
pub use members::MemberResponse;

/// Build the complete API router.
///
/// # Route Structure
///
/// ## Public (no auth)
/// - `GET /health` - Health check
///
/// ## Protected (auth required)
/// - `GET /api/v1/ping` - Token check
/// - `GET /api/v1/graph` - Committed graph; a stale snapshot is refreshed in the background
/// - `GET /api/v1/members/{identity}` - Record and registry entry for one identity
/// - `POST /api/v1/graph/refresh` - Run an aggregation pass now
pub fn router<C: RelayConnector, S: GraphStore>(state: AppState<C, S>) -> Router {
    // Public routes (no authentication)
    let public = Router::new().route("/health", get(health::health_check::<C, S>));

    // Cacheable reads
    let reads = Router::new()
        .route("/ping", get(health::authenticated_ping))
        .route("/graph", get(graph::graph::<C, S>))
        .route("/members/{identity}", get(members::member::<C, S>))
        .layer(middleware::map_response(add_cache_headers));

    let api_v1 = Router::new()
        .route("/graph/refresh", post(graph::refresh::<C, S>))
        .merge(reads)
        // Auth middleware
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Add cache headers to read responses.
///
/// Successful responses may be cached for 60 seconds.
async fn add_cache_headers(response: Response) -> Response {
    // Only cache successful responses
    if response.status().is_success() {
        let (mut parts, body) = response.into_parts();
        parts.headers.insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("public, max-age=60, stale-while-revalidate=300"),
        );
        Response::from_parts(parts, body)
    } else {
        response
    }
}
