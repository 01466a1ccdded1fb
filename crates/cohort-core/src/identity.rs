//! Identity codec.
//!
//! An [`Identity`] is a 32-byte x-only public key. It has two lossless textual
//! encodings:
//!
//! - raw form: 64 lowercase hex characters (used in persisted documents)
//! - display form: NIP-19 bech32 (`npub1...`)

use std::fmt;
use std::str::FromStr;

use nostr::nips::nip19::FromBech32;
use nostr::{PublicKey, ToBech32};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// A network participant, identified by its public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(PublicKey);

impl Identity {
    /// Decode the 64-character hex form (case-insensitive).
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidIdentity {
                input: input.to_string(),
                reason: "expected 64 hex characters".to_string(),
            });
        }
        PublicKey::from_hex(&trimmed.to_ascii_lowercase())
            .map(Self)
            .map_err(|e| Error::InvalidIdentity {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }

    /// Decode the NIP-19 `npub1...` form.
    pub fn from_npub(input: &str) -> Result<Self> {
        PublicKey::from_bech32(input.trim())
            .map(Self)
            .map_err(|e| Error::InvalidIdentity {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }

    /// Decode either encoding.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.starts_with("npub1") {
            Self::from_npub(trimmed)
        } else {
            Self::from_hex(trimmed)
        }
    }

    /// Raw form: 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Display form (`npub1...`). Falls back to hex if encoding fails.
    pub fn to_npub(&self) -> String {
        self.0.to_bech32().unwrap_or_else(|_| self.to_hex())
    }

    /// Abbreviated display form, e.g. `npub1abcd…wxyz`.
    pub fn short(&self) -> String {
        let npub = self.to_npub();
        if npub.len() <= 17 {
            return npub;
        }
        format!("{}…{}", &npub[..9], &npub[npub.len() - 4..])
    }

    /// The underlying nostr public key.
    pub fn public_key(&self) -> PublicKey {
        self.0
    }
}

impl From<PublicKey> for Identity {
    fn from(pk: PublicKey) -> Self {
        Self(pk)
    }
}

impl From<Identity> for PublicKey {
    fn from(id: Identity) -> Self {
        id.0
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.short())
    }
}

// Persisted as hex so identities can be used as JSON object keys.
impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::Keys;

    fn random_identity() -> Identity {
        Identity::from(Keys::generate().public_key())
    }

    #[test]
    fn hex_and_npub_are_interconvertible() {
        let id = random_identity();
        let hex = id.to_hex();
        let npub = id.to_npub();

        assert_eq!(hex.len(), 64);
        assert!(npub.starts_with("npub1"));
        assert_eq!(Identity::from_hex(&hex).unwrap(), id);
        assert_eq!(Identity::from_npub(&npub).unwrap(), id);
    }

    #[test]
    fn parse_accepts_either_encoding() {
        let id = random_identity();
        assert_eq!(Identity::parse(&id.to_npub()).unwrap(), id);
        assert_eq!(Identity::parse(&id.to_hex()).unwrap(), id);
        assert_eq!(format!("  {}  ", id.to_hex()).parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn parse_is_case_insensitive_for_hex() {
        let id = random_identity();
        let upper = id.to_hex().to_uppercase();
        assert_eq!(Identity::parse(&upper).unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse("not-a-key").is_err());
        assert!(Identity::parse(&"g".repeat(64)).is_err());
        assert!(Identity::parse("npub1qqqqqqqq").is_err());

        let err = Identity::parse("abc").unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity { .. }));
    }

    #[test]
    fn short_form_is_abbreviated() {
        let id = random_identity();
        let short = id.short();
        assert!(short.starts_with("npub1"));
        assert!(short.contains('…'));
        assert!(short.chars().count() < id.to_npub().chars().count());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let id = random_identity();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));

        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<Identity>("\"zz\"").is_err());
    }

    #[test]
    fn identities_work_as_map_keys() {
        use std::collections::BTreeMap;

        let id = random_identity();
        let mut map = BTreeMap::new();
        map.insert(id, 7u32);

        let json = serde_json::to_string(&map).unwrap();
        let back: BTreeMap<Identity, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&id), Some(&7));
    }
}
