//! Aggregation: per-identity queries merged into a copy-on-write commit.

mod merge;
mod orchestrator;

pub use merge::MergeStats;
pub use orchestrator::{Aggregator, RunReport};
