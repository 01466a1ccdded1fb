//! Application state and configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cohort_ingest::{
    Aggregator, AggregatorConfig, GraphStore, JsonFileStore, NostrConnector, RelayConnector,
    default_relays, parse_identities,
};

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080").
    pub bind_addr: String,

    /// Valid API tokens (loaded from COHORT_API_TOKENS).
    pub api_tokens: HashSet<String>,

    /// Aggregation settings for refreshes triggered through the API.
    pub aggregator: AggregatorConfig,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{name}: invalid value {raw:?}: {e}")),
        _ => Ok(default),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `COHORT_API_TOKENS`: Comma-separated list of valid API tokens
    /// - `COHORT_CORE` or `COHORT_AGENCY`: Comma-separated identities (npub or hex)
    ///
    /// Optional environment variables:
    /// - `COHORT_BIND_ADDR`: Server bind address (default: "0.0.0.0:8080")
    /// - `COHORT_RELAYS`: Comma-separated relay URLs
    /// - `COHORT_DATA_DIR`: Directory for the committed documents (default: "./data")
    /// - `COHORT_QUERY_TIMEOUT_MS`: Per-query timeout (default: 10000)
    /// - `COHORT_LOOKBACK_DAYS`: Interaction lookback (default: 7)
    /// - `COHORT_MAX_CONNECTIONS`: Concurrent relay connections (default: 4)
    /// - `COHORT_CACHE_MAX_AGE_SECS`: Snapshot freshness window (default: 900)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("COHORT_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let tokens_str = lookup("COHORT_API_TOKENS")
            .ok_or_else(|| anyhow::anyhow!("COHORT_API_TOKENS environment variable is required"))?;

        let api_tokens: HashSet<String> = split_list(Some(tokens_str)).into_iter().collect();

        if api_tokens.is_empty() {
            anyhow::bail!("COHORT_API_TOKENS must contain at least one token");
        }

        let defaults = AggregatorConfig::default();
        let relays = split_list(lookup("COHORT_RELAYS"));
        let timeout_ms = parse_var(&lookup, "COHORT_QUERY_TIMEOUT_MS", 10_000u64)?;
        let lookback_days = parse_var(&lookup, "COHORT_LOOKBACK_DAYS", 7u64)?;
        let cache_secs = parse_var(&lookup, "COHORT_CACHE_MAX_AGE_SECS", 900u64)?;

        let aggregator = AggregatorConfig {
            relays: if relays.is_empty() {
                default_relays()
            } else {
                relays
            },
            core: parse_identities(&split_list(lookup("COHORT_CORE"))),
            agency: parse_identities(&split_list(lookup("COHORT_AGENCY"))),
            query_timeout: Duration::from_millis(timeout_ms),
            lookback: Duration::from_secs(lookback_days * 24 * 60 * 60),
            max_connections: parse_var(&lookup, "COHORT_MAX_CONNECTIONS", defaults.max_connections)?,
            cache_max_age: Duration::from_secs(cache_secs),
            data_dir: lookup("COHORT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir.clone()),
            ..defaults
        }
        .validate()?;

        tracing::info!(
            bind_addr = %bind_addr,
            token_count = api_tokens.len(),
            relays = aggregator.relays.len(),
            core = aggregator.core.len(),
            agency = aggregator.agency.len(),
            data_dir = %aggregator.data_dir.display(),
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            api_tokens,
            aggregator,
        })
    }
}

/// Shared application state available to all request handlers.
pub struct AppState<C = NostrConnector, S = JsonFileStore> {
    /// Application configuration.
    pub config: Arc<Config>,

    /// The aggregator owning the committed graph.
    pub aggregator: Arc<Aggregator<C, S>>,
}

impl<C, S> Clone for AppState<C, S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            aggregator: Arc::clone(&self.aggregator),
        }
    }
}

impl AppState {
    /// Create the production state: relays through nostr-sdk, documents in
    /// the configured data directory.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = JsonFileStore::in_dir(&config.aggregator.data_dir);
        Self::with_parts(config, NostrConnector::default(), store)
    }
}

impl<C: RelayConnector, S: GraphStore> AppState<C, S> {
    pub fn with_parts(config: Config, connector: C, store: S) -> anyhow::Result<Self> {
        let aggregator = Aggregator::new(config.aggregator.clone(), connector, store)?;
        Ok(Self {
            config: Arc::new(config),
            aggregator: Arc::new(aggregator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use nostr_sdk::Keys;

    fn lookup(vars: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn tokens_are_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("COHORT_API_TOKENS"));
    }

    #[test]
    fn loads_aggregation_settings() {
        let core = Keys::generate().public_key();
        let config = Config::from_lookup(lookup(&[
            ("COHORT_API_TOKENS", "a, b,,".to_string()),
            ("COHORT_CORE", format!("{},garbage", core.to_hex())),
            ("COHORT_RELAYS", "wss://relay.example.com/".to_string()),
            ("COHORT_QUERY_TIMEOUT_MS", "2500".to_string()),
            ("COHORT_CACHE_MAX_AGE_SECS", "60".to_string()),
        ]))
        .unwrap();

        assert_eq!(config.api_tokens.len(), 2);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.aggregator.core.len(), 1);
        assert_eq!(config.aggregator.relays, vec!["wss://relay.example.com"]);
        assert_eq!(config.aggregator.query_timeout, Duration::from_millis(2500));
        assert_eq!(config.aggregator.cache_max_age, Duration::from_secs(60));
        assert_eq!(config.aggregator.lookback, Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn rejects_bad_numbers_and_missing_seeds() {
        let core = Keys::generate().public_key().to_hex();
        let bad_number = Config::from_lookup(lookup(&[
            ("COHORT_API_TOKENS", "t".to_string()),
            ("COHORT_CORE", core),
            ("COHORT_MAX_CONNECTIONS", "many".to_string()),
        ]));
        assert!(bad_number.is_err());

        let no_seeds = Config::from_lookup(lookup(&[("COHORT_API_TOKENS", "t".to_string())]));
        assert!(no_seeds.is_err());
    }
}
