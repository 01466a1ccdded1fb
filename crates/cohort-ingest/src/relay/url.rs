//! Relay endpoint normalization.
//!
//! Configured endpoints are normalized so that cosmetic variants
//! (`wss://Relay.Example.com/` vs `wss://relay.example.com`) do not produce
//! duplicate connections for the same query.
//!
//! # Normalization Rules
//!
//! - Trim whitespace
//! - Require a websocket scheme (wss:// or ws://)
//! - Parse with nostr-sdk's `RelayUrl` (lowercases scheme and host)
//! - Remove trailing slashes, preserve ports and paths

use nostr_sdk::RelayUrl;

/// Result of URL normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeResult {
    /// URL is valid and normalized.
    Ok(String),
    /// URL is syntactically invalid.
    Invalid(String),
}

impl NormalizeResult {
    /// Returns the normalized URL if valid.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            Self::Invalid(_) => None,
        }
    }

    /// Returns true if the URL is valid.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Normalize a single relay URL.
pub fn normalize_relay_url(url: &str) -> NormalizeResult {
    let url = url.trim();

    if !url.starts_with("wss://") && !url.starts_with("ws://") {
        return NormalizeResult::Invalid("URL must start with wss:// or ws://".to_string());
    }

    let parsed = match RelayUrl::parse(url) {
        Ok(u) => u,
        Err(e) => return NormalizeResult::Invalid(format!("Invalid relay URL: {}", e)),
    };

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    NormalizeResult::Ok(normalized)
}

/// Normalize a list of endpoints, dropping invalid entries and duplicates.
///
/// Order of first occurrence is preserved. Invalid entries are logged.
pub fn normalize_endpoints<S: AsRef<str>>(urls: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(urls.len());
    for raw in urls {
        match normalize_relay_url(raw.as_ref()) {
            NormalizeResult::Ok(url) => {
                if !out.contains(&url) {
                    out.push(url);
                }
            }
            NormalizeResult::Invalid(reason) => {
                tracing::warn!(relay = raw.as_ref(), %reason, "ignoring relay endpoint");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(
            normalize_relay_url("wss://relay.example.com/").ok(),
            Some("wss://relay.example.com".to_string())
        );
        assert_eq!(
            normalize_relay_url("wss://relay.example.com///").ok(),
            Some("wss://relay.example.com".to_string())
        );
    }

    #[test]
    fn test_normalize_preserves_port() {
        assert_eq!(
            normalize_relay_url("ws://relay.example.com:7777").ok(),
            Some("ws://relay.example.com:7777".to_string())
        );
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(matches!(
            normalize_relay_url("https://relay.example.com"),
            NormalizeResult::Invalid(_)
        ));
        assert!(matches!(
            normalize_relay_url("relay.example.com"),
            NormalizeResult::Invalid(_)
        ));
    }

    #[test]
    fn test_valid_relays() {
        assert!(normalize_relay_url("wss://relay.damus.io").is_ok());
        assert!(normalize_relay_url("wss://nos.lol").is_ok());
        assert!(normalize_relay_url("  wss://relay.primal.net  ").is_ok());
        assert!(normalize_relay_url("ws://localhost:7777").is_ok());
    }

    #[test]
    fn test_normalize_endpoints_dedupes_and_drops_invalid() {
        let endpoints = normalize_endpoints(&[
            "wss://relay.damus.io",
            "wss://relay.damus.io/",
            "http://nope.example.com",
            "wss://nos.lol",
        ]);
        assert_eq!(endpoints, vec!["wss://relay.damus.io", "wss://nos.lol"]);
    }
}
