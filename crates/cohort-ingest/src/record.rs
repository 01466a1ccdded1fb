//! Record-kind dispatch.
//!
//! Every record returned by a relay query is decoded once into a
//! [`GraphRecord`]; the orchestrator's merge handlers match on the variant
//! instead of inspecting kinds and tags themselves.
//!
//! | Kind        | Variant                              |
//! |-------------|--------------------------------------|
//! | 0           | `Profile`                            |
//! | 3           | `FollowList`                         |
//! | 1           | `Interaction(Mention)`               |
//! | 6, 16       | `Interaction(Repost)`                |
//! | 7           | `Interaction(Reaction)`              |
//! | 9735        | `Zap`                                |
//! | anything    | `Unsupported`                        |

use cohort_core::{Identity, ProfileMetadata};
use nostr_sdk::{Event, Kind};
use serde::Deserialize;
use thiserror::Error;

/// Kinds fetched by the interaction stage.
pub const INTERACTION_KINDS: [Kind; 5] = [
    Kind::TextNote,
    Kind::Repost,
    Kind::GenericRepost,
    Kind::Reaction,
    Kind::ZapReceipt,
];

/// A record that could not be decoded. Logged and dropped, never fatal.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("malformed profile content in {id}: {reason}")]
    MalformedProfile { id: String, reason: String },

    #[error("{kind} record {id} references no identity")]
    NoReference { kind: Kind, id: String },
}

/// The kind of interaction an author had with a referenced identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Mention,
    Repost,
    Reaction,
}

/// A decoded zap receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapReceipt {
    /// Identities the payment was for (`p` tags).
    pub recipients: Vec<Identity>,
    /// Who paid, if the receipt says.
    pub sender: Option<Identity>,
    /// Amount in millisats, if it could be determined.
    pub amount_msats: Option<u64>,
    pub created_at: u64,
}

impl ZapReceipt {
    /// Whole sats, rounding down; 0 when the amount is unknown.
    pub fn amount_sats(&self) -> u64 {
        self.amount_msats.unwrap_or(0) / 1000
    }
}

/// A relay record, decoded by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphRecord {
    Profile {
        author: Identity,
        created_at: u64,
        metadata: ProfileMetadata,
    },
    FollowList {
        author: Identity,
        created_at: u64,
        follows: Vec<Identity>,
    },
    Interaction {
        kind: InteractionKind,
        author: Identity,
        referenced: Vec<Identity>,
    },
    Zap(ZapReceipt),
    Unsupported(Kind),
}

impl GraphRecord {
    /// Decode `event` according to its kind.
    pub fn from_event(event: &Event) -> Result<Self, RecordError> {
        let author = Identity::from(event.pubkey);
        let created_at = event.created_at.as_u64();

        let interaction = |kind: InteractionKind| -> Result<Self, RecordError> {
            let referenced = tagged_identities(event, "p");
            if referenced.is_empty() {
                return Err(RecordError::NoReference {
                    kind: event.kind,
                    id: event.id.to_hex(),
                });
            }
            Ok(Self::Interaction {
                kind,
                author,
                referenced,
            })
        };

        match event.kind {
            Kind::Metadata => {
                let metadata = ProfileMetadata::from_json(&event.content).map_err(|e| {
                    RecordError::MalformedProfile {
                        id: event.id.to_hex(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self::Profile {
                    author,
                    created_at,
                    metadata,
                })
            }
            Kind::ContactList => Ok(Self::FollowList {
                author,
                created_at,
                follows: tagged_identities(event, "p"),
            }),
            Kind::TextNote => interaction(InteractionKind::Mention),
            Kind::Repost | Kind::GenericRepost => interaction(InteractionKind::Repost),
            Kind::Reaction => interaction(InteractionKind::Reaction),
            Kind::ZapReceipt => {
                let recipients = tagged_identities(event, "p");
                if recipients.is_empty() {
                    return Err(RecordError::NoReference {
                        kind: event.kind,
                        id: event.id.to_hex(),
                    });
                }
                Ok(Self::Zap(decode_zap(event, recipients, created_at)))
            }
            other => Ok(Self::Unsupported(other)),
        }
    }
}

/// Decoded identities from every `name` tag, de-duplicated, in tag order.
/// Undecodable values are skipped.
fn tagged_identities(event: &Event, name: &str) -> Vec<Identity> {
    let mut out: Vec<Identity> = Vec::new();
    for value in tag_values(event, name) {
        match Identity::from_hex(value) {
            Ok(id) => {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
            Err(e) => {
                tracing::debug!(event = %event.id, "skipping {} tag: {}", name, e);
            }
        }
    }
    out
}

/// Second element of every tag whose first element is `name`.
fn tag_values<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    event.tags.iter().filter_map(move |tag| {
        let parts = tag.as_slice();
        (parts.len() >= 2 && parts[0] == name).then(|| parts[1].as_str())
    })
}

/// The zap request embedded in a receipt's `description` tag (NIP-57).
#[derive(Debug, Default, Deserialize)]
struct ZapRequest {
    #[serde(default)]
    pubkey: Option<String>,
    #[serde(default)]
    tags: Vec<Vec<String>>,
}

fn decode_zap(event: &Event, recipients: Vec<Identity>, created_at: u64) -> ZapReceipt {
    let request: ZapRequest = tag_values(event, "description")
        .next()
        .and_then(|desc| serde_json::from_str(desc).ok())
        .unwrap_or_default();

    let sender = tag_values(event, "P")
        .chain(request.pubkey.as_deref())
        .find_map(|value| Identity::from_hex(value).ok());

    let requested_amount = request
        .tags
        .iter()
        .find(|tag| tag.len() >= 2 && tag[0] == "amount")
        .and_then(|tag| tag[1].parse::<u64>().ok());

    let amount_msats =
        requested_amount.or_else(|| tag_values(event, "bolt11").find_map(bolt11_amount_msats));

    ZapReceipt {
        recipients,
        sender,
        amount_msats,
        created_at,
    }
}

/// Amount encoded in a BOLT-11 invoice's human-readable part, in millisats.
///
/// `lnbc2500u1...` → 250_000_000. Invoices without an amount, or with a
/// pico-bitcoin amount that is not a whole millisat, yield `None`.
pub fn bolt11_amount_msats(invoice: &str) -> Option<u64> {
    let lower = invoice.trim().to_ascii_lowercase();
    // The bech32 data part never contains '1', so the last one is the separator.
    let hrp = &lower[..lower.rfind('1')?];
    let rest = hrp.strip_prefix("ln")?;
    let amount = &rest[rest.find(|c: char| c.is_ascii_digit())?..];

    let (digits, multiplier) = match amount.char_indices().last()? {
        (i, c @ ('m' | 'u' | 'n' | 'p')) => (&amount[..i], Some(c)),
        _ => (amount, None),
    };
    let value: u64 = digits.parse().ok()?;

    match multiplier {
        None => value.checked_mul(100_000_000_000),
        Some('m') => value.checked_mul(100_000_000),
        Some('u') => value.checked_mul(100_000),
        Some('n') => value.checked_mul(100),
        Some('p') => (value % 10 == 0).then_some(value / 10),
        Some(_) => None,
    }
}

/// Newest record first; ties broken by id so the choice is stable.
pub fn newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
