//! Cohort Serve - HTTP API for the cohort social graph
//!
//! This crate serves the committed graph snapshot to the visualization UI and
//! lets operators force an aggregation pass. Reads never wait on a pass: they
//! see the last committed snapshot, and a stale one is refreshed in the
//! background.
//!
//! # Authentication
//!
//! All `/api/v1` endpoints require Bearer token authentication. Tokens are
//! configured via environment variables (typically in a `.env` file).
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (aggregator, configuration)
//! - **Auth**: Bearer token middleware for request authentication
//! - **Routes**: Endpoint handlers grouped by domain

mod auth;
mod error;
mod routes;
mod state;

pub use self::auth::require_auth;
pub use self::error::ApiError;
pub use self::routes::{GraphResponse, MemberResponse, RefreshResponse, router};
pub use self::state::{AppState, Config};
