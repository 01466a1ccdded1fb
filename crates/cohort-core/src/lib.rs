//! Core types and pure graph logic for the cohort social graph.
//!
//! This crate provides:
//! - The identity codec (hex ⇄ NIP-19 `npub`) via the nostr crate
//! - The persisted model: known-identity registry and graph snapshot
//! - Node classification relative to the core set
//! - Visualization export (nodes + links) and the snapshot freshness gate
//! - Prometheus metrics helpers
//! - Shared error types
//!
//! Nothing in this crate performs network I/O. Relay access and persistence
//! live in `cohort-ingest`.

mod classify;
mod error;
mod export;
mod freshness;
mod identity;
pub mod metrics;
mod model;

pub use classify::{Classification, classify};
pub use error::{Error, Result};
pub use export::{ClassificationCounts, GraphLink, GraphNode, VisualizationGraph, export};
pub use freshness::is_fresh;
pub use identity::Identity;
pub use model::{
    GraphSnapshot, GraphState, Group, KnownIdentityEntry, MemberRecord, ProfileMetadata, Registry,
    ZapEntry,
};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
