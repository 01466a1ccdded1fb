//! API error types and response formatting.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Authentication failed (missing or invalid token).
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request collides with work already in progress.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (persistence, etc.).
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<cohort_ingest::Error> for ApiError {
    fn from(err: cohort_ingest::Error) -> Self {
        match err {
            cohort_ingest::Error::RunInProgress => Self::Conflict(err.to_string()),
            cohort_ingest::Error::Core(cohort_core::Error::InvalidIdentity { .. }) => {
                Self::BadRequest(err.to_string())
            }
            other => Self::Internal(other.into()),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone())),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_in_progress_is_a_conflict() {
        let err = ApiError::from(cohort_ingest::Error::RunInProgress);
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn persistence_failures_are_internal() {
        let err = ApiError::from(cohort_ingest::Error::Persistence {
            path: "snapshot.json".into(),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
