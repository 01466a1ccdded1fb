//! Relay querying and graph aggregation for the cohort social graph.
//!
//! # Modules
//!
//! - [`relay`] - Best-effort fan-out queries over relay endpoints
//! - [`record`] - Record-kind dispatch into [`GraphRecord`]
//! - [`store`] - Committed state: JSON documents and the shared read handle
//! - [`aggregate`] - The aggregation pass and the [`Aggregator`] service
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │    Aggregator    │  one pass at a time, per tracked identity
//! └────────┬─────────┘
//!          │ RecordQuery
//!          ▼
//! ┌──────────────────┐
//! │ RelayQueryClient │  fan-out, dedupe by id, bounded by timeout
//! └────────┬─────────┘
//!          │ Event
//!          ▼
//! ┌──────────────────┐
//! │   GraphRecord    │  decoded by kind, fed to merge handlers
//! └────────┬─────────┘
//!          │ GraphState
//!          ▼
//! ┌──────────────────┐
//! │    GraphStore    │  commit both documents, then publish to readers
//! └──────────────────┘
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod record;
pub mod relay;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregate::{Aggregator, MergeStats, RunReport};
pub use config::{AggregatorConfig, default_relays, parse_identities};
pub use error::{Error, Result};
pub use record::{GraphRecord, InteractionKind, RecordError, ZapReceipt};
pub use relay::{NostrConnector, QueryOutcome, RecordQuery, RelayConnector, RelayQueryClient};
pub use store::{GraphStore, JsonFileStore, MemoryStore, SharedGraph};
