//! Error types for the cohort core crate.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding identities or model documents.
#[derive(Error, Debug)]
pub enum Error {
    /// An identity string could not be decoded in either encoding.
    #[error("invalid identity '{input}': {reason}")]
    InvalidIdentity {
        /// The offending input, as received.
        input: String,
        /// Why decoding failed.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
