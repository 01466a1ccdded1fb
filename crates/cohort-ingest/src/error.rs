//! Error types for relay access and aggregation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while aggregating.
///
/// Relay and record errors are absorbed per identity during a run; only
/// persistence, configuration and concurrency errors reach the caller of
/// an aggregation.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core model error (identity decoding, JSON).
    #[error(transparent)]
    Core(#[from] cohort_core::Error),

    /// Nostr SDK error.
    #[error("Nostr SDK error: {0}")]
    NostrSdk(#[from] nostr_sdk::client::Error),

    /// Relay transport error for a single endpoint.
    #[error("Relay error: {0}")]
    Relay(String),

    /// Committed state could not be read or written.
    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A committed document exists but does not parse.
    #[error("Corrupt document at {}: {source}", path.display())]
    CorruptDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Another aggregation run holds the run lock.
    #[error("An aggregation run is already in progress")]
    RunInProgress,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_names_the_path() {
        let err = Error::persistence(
            "/data/snapshot.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/snapshot.json"), "{msg}");
        assert!(msg.contains("denied"), "{msg}");
    }

    #[test]
    fn core_errors_convert() {
        let core = cohort_core::Identity::parse("nope").unwrap_err();
        let err: Error = core.into();
        assert!(matches!(err, Error::Core(_)));
    }
}
