//! Relay access.
//!
//! ```text
//! RelayQueryClient::query(endpoints, RecordQuery, timeout)
//!        │
//!        ├── endpoint 0 ──► RelayConnector::fetch ──► FrameSink ─┐
//!        ├── endpoint 1 ──► RelayConnector::fetch ──► FrameSink ─┤  (staggered,
//!        └── endpoint N ──► RelayConnector::fetch ──► FrameSink ─┤   semaphore-bounded)
//!                                                                ▼
//!                                         dedupe by record id ► QueryOutcome
//! ```
//!
//! Queries are best-effort: a failing or slow endpoint only shrinks the
//! result, it never fails the call.

mod connector;
mod query;
pub mod url;

pub use connector::{FrameSink, NostrConnector, RelayConnector};
pub use query::{QueryOutcome, RecordQuery, RelayQueryClient};
pub use url::{NormalizeResult, normalize_endpoints, normalize_relay_url};
