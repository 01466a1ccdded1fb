//! Member lookup endpoint.

use axum::Json;
use axum::extract::{Path, State};
use cohort_core::{Classification, Identity, KnownIdentityEntry, MemberRecord, classify};
use cohort_ingest::{GraphStore, RelayConnector};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    pub id: String,
    pub encoded: String,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<KnownIdentityEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<MemberRecord>,
}

/// `GET /api/v1/members/{identity}`
///
/// Raw record and registry entry for one identity, given as npub or hex.
pub async fn member<C: RelayConnector, S: GraphStore>(
    State(state): State<AppState<C, S>>,
    Path(raw): Path<String>,
) -> Result<Json<MemberResponse>, ApiError> {
    let identity =
        Identity::parse(&raw).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let current = state.aggregator.current();
    let registry = current.registry.get(&identity).cloned();
    let record = current.snapshot.member(&identity);
    if registry.is_none() && record.is_none() {
        return Err(ApiError::NotFound(format!(
            "identity {} has not been observed",
            identity.short()
        )));
    }

    let classification = classify(&identity, &current.registry.core_set(), record);
    Ok(Json(MemberResponse {
        id: identity.to_hex(),
        encoded: identity.to_npub(),
        classification,
        registry,
        record: record.cloned(),
    }))
}
