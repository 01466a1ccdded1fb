//! Aggregation configuration.

use std::path::PathBuf;
use std::time::Duration;

use cohort_core::Identity;
use tracing::warn;

use crate::relay::normalize_endpoints;
use crate::{Error, Result};

/// Public relays queried when none are configured.
pub fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".to_string(),
        "wss://nos.lol".to_string(),
        "wss://relay.nostr.band".to_string(),
        "wss://relay.primal.net".to_string(),
        "wss://purplepag.es".to_string(),
    ]
}

/// Configuration for an [`Aggregator`](crate::Aggregator).
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Relay endpoints every query fans out to.
    pub relays: Vec<String>,

    /// Seed identities the graph is anchored to.
    pub core: Vec<Identity>,

    /// Additionally tracked identities. They get metadata, follows and
    /// interactions fetched, but do not count as core for classification.
    pub agency: Vec<Identity>,

    /// Upper bound on a single fan-out query.
    pub query_timeout: Duration,

    /// How far back interactions are fetched.
    pub lookback: Duration,

    /// Maximum simultaneously open endpoint connections, across all queries.
    pub max_connections: usize,

    /// Delay between launching successive endpoint connections of one query.
    pub connect_stagger: Duration,

    /// Age after which the committed snapshot is refreshed on read.
    pub cache_max_age: Duration,

    /// Per-endpoint cap on interaction records for one identity.
    pub interaction_limit: usize,

    /// Per-endpoint cap on follow lists scanned for a core identity's followers.
    pub follower_scan_limit: usize,

    /// Authors per discovered-metadata query.
    pub metadata_batch_size: usize,

    /// Maximum identities whose missing metadata is fetched in one run.
    pub discovered_metadata_limit: usize,

    /// Directory holding `registry.json` and `snapshot.json`.
    pub data_dir: PathBuf,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            core: Vec::new(),
            agency: Vec::new(),
            query_timeout: Duration::from_secs(10),
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
            max_connections: 4,
            connect_stagger: Duration::from_millis(250),
            cache_max_age: Duration::from_secs(15 * 60),
            interaction_limit: 500,
            follower_scan_limit: 500,
            metadata_batch_size: 100,
            discovered_metadata_limit: 1000,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl AggregatorConfig {
    /// Normalize relay URLs and check the settings that would make every run
    /// useless.
    pub fn validate(mut self) -> Result<Self> {
        self.relays = normalize_endpoints(&self.relays);
        if self.relays.is_empty() {
            return Err(Error::Config("no valid relay endpoints configured".into()));
        }
        if self.core.is_empty() && self.agency.is_empty() {
            return Err(Error::Config(
                "at least one core or agency identity is required".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.metadata_batch_size == 0 {
            return Err(Error::Config("metadata_batch_size must be at least 1".into()));
        }
        if self.query_timeout.is_zero() {
            return Err(Error::Config("query_timeout must be non-zero".into()));
        }
        // Core wins when an identity is listed in both.
        let core = self.core.clone();
        self.agency.retain(|id| !core.contains(id));
        Ok(self)
    }
}

/// Decode a list of identities in either encoding. Undecodable entries are
/// skipped with a warning; duplicates are dropped, order is kept.
pub fn parse_identities<S: AsRef<str>>(inputs: &[S]) -> Vec<Identity> {
    let mut out: Vec<Identity> = Vec::new();
    for input in inputs {
        let input = input.as_ref().trim();
        if input.is_empty() {
            continue;
        }
        match Identity::parse(input) {
            Ok(id) if !out.contains(&id) => out.push(id),
            Ok(_) => {}
            Err(e) => warn!("Skipping identity {:?}: {}", input, e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::Keys;

    #[test]
    fn defaults_match_documented_values() {
        let config = AggregatorConfig::default();
        assert_eq!(config.query_timeout, Duration::from_secs(10));
        assert_eq!(config.lookback, Duration::from_secs(604_800));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.connect_stagger, Duration::from_millis(250));
        assert_eq!(config.cache_max_age, Duration::from_secs(900));
        assert!(!config.relays.is_empty());
    }

    #[test]
    fn parse_identities_accepts_both_encodings_and_skips_garbage() {
        let a = Keys::generate().public_key();
        let b = Keys::generate().public_key();
        let inputs = vec![
            Identity::from(a).to_npub(),
            "garbage".to_string(),
            b.to_hex().to_uppercase(),
            a.to_hex(),
            "  ".to_string(),
        ];
        assert_eq!(
            parse_identities(&inputs),
            vec![Identity::from(a), Identity::from(b)]
        );
    }

    #[test]
    fn validate_requires_relays_and_seeds() {
        let id = Identity::from(Keys::generate().public_key());

        let no_seeds = AggregatorConfig::default();
        assert!(matches!(no_seeds.validate(), Err(Error::Config(_))));

        let no_relays = AggregatorConfig {
            relays: vec!["http://not-a-relay".into()],
            core: vec![id],
            ..Default::default()
        };
        assert!(matches!(no_relays.validate(), Err(Error::Config(_))));

        let ok = AggregatorConfig {
            core: vec![id],
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn validate_drops_agency_entries_that_are_core() {
        let (a, b) = (
            Identity::from(Keys::generate().public_key()),
            Identity::from(Keys::generate().public_key()),
        );
        let config = AggregatorConfig {
            core: vec![a],
            agency: vec![a, b],
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(config.agency, vec![b]);
    }
}
