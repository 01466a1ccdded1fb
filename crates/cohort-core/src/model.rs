//! Persisted graph model.
//!
//! Two logically independent documents make up the committed state:
//!
//! - [`Registry`]: every identity ever observed, with its group and
//!   first/last-seen timestamps.
//! - [`GraphSnapshot`]: per-identity follow edges, interactions and profile
//!   metadata.
//!
//! Both are merge-only. Nothing is ever removed; an aggregation run only adds
//! edges, interactions and identities, or refreshes metadata and timestamps.
//! Ordered collections keep serialized output stable across runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Identity, Result};

/// How an identity relates to the aggregation's seed configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    /// Seed identity the graph is anchored to.
    Core,
    /// Explicitly tracked, but not part of the core set.
    Agency,
    /// Discovered transitively.
    #[default]
    Other,
}

impl Group {
    /// Core and agency identities get a full per-identity pass.
    pub fn is_tracked(self) -> bool {
        matches!(self, Group::Core | Group::Agency)
    }
}

/// Registry value for a single identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownIdentityEntry {
    pub group: Group,
    pub first_seen: u64,
    pub last_seen: u64,
}

/// Mapping of every identity ever observed to its registry entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<Identity, KnownIdentityEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identity: &Identity) -> Option<&KnownIdentityEntry> {
        self.entries.get(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &KnownIdentityEntry)> {
        self.entries.iter()
    }

    /// Record a sighting. New identities join as [`Group::Other`].
    ///
    /// Returns `true` if the identity was not known before.
    pub fn observe(&mut self, identity: Identity, now: u64) -> bool {
        match self.entries.get_mut(&identity) {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(now);
                false
            }
            None => {
                self.entries.insert(
                    identity,
                    KnownIdentityEntry {
                        group: Group::Other,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Explicitly assign a group (seed configuration). Creates the entry if
    /// missing; an existing entry keeps its `first_seen`.
    pub fn assign(&mut self, identity: Identity, group: Group, now: u64) {
        self.entries
            .entry(identity)
            .and_modify(|entry| {
                entry.group = group;
                entry.last_seen = entry.last_seen.max(now);
            })
            .or_insert(KnownIdentityEntry {
                group,
                first_seen: now,
                last_seen: now,
            });
    }

    pub fn group_of(&self, identity: &Identity) -> Option<Group> {
        self.entries.get(identity).map(|e| e.group)
    }

    /// Identities currently assigned to `group`, in key order.
    pub fn members_of(&self, group: Group) -> impl Iterator<Item = Identity> + '_ {
        self.entries
            .iter()
            .filter(move |(_, e)| e.group == group)
            .map(|(id, _)| *id)
    }

    /// The core set used by the classifier.
    pub fn core_set(&self) -> BTreeSet<Identity> {
        self.members_of(Group::Core).collect()
    }

    /// Core identities first, then agency identities.
    pub fn tracked(&self) -> Vec<Identity> {
        self.members_of(Group::Core)
            .chain(self.members_of(Group::Agency))
            .collect()
    }
}

/// Profile metadata, as published in a kind-0 record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_handle: Option<String>,
}

/// Kind-0 content as clients publish it. Both `display_name` and the older
/// `displayName` show up in the wild, sometimes together.
#[derive(Deserialize)]
struct ProfileContent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default, rename = "displayName")]
    display_name_legacy: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    about: Option<String>,
    #[serde(default)]
    nip05: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl ProfileMetadata {
    /// Parse kind-0 record content. Unknown fields are ignored, blank
    /// strings are treated as absent.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: ProfileContent = serde_json::from_str(content)?;
        Ok(Self {
            name: non_blank(raw.name),
            display_name: non_blank(raw.display_name).or(non_blank(raw.display_name_legacy)),
            picture: non_blank(raw.picture),
            about: non_blank(raw.about),
            verified_handle: non_blank(raw.nip05),
        })
    }

    /// Best available human name: display name, then name.
    pub fn best_name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.name.as_deref())
    }
}

/// A payment notification recorded against an identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZapEntry {
    /// The zapped identity.
    pub target: Identity,
    /// Amount in sats (0 when the notification carried no amount).
    pub amount: u64,
    /// `created_at` of the notification.
    pub timestamp: u64,
    /// Who paid, when the notification says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Identity>,
}

/// Everything observed about a single identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(default)]
    pub follows: BTreeSet<Identity>,
    #[serde(default)]
    pub followers: BTreeSet<Identity>,
    #[serde(default)]
    pub mentions: BTreeSet<Identity>,
    #[serde(default)]
    pub likes: BTreeSet<Identity>,
    #[serde(default)]
    pub reposts: BTreeSet<Identity>,
    #[serde(default)]
    pub zaps: Vec<ZapEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProfileMetadata>,
}

impl MemberRecord {
    /// Append a zap unless an identical entry is already recorded.
    ///
    /// Returns `true` if the entry was added.
    pub fn record_zap(&mut self, zap: ZapEntry) -> bool {
        if self.zaps.contains(&zap) {
            return false;
        }
        self.zaps.push(zap);
        true
    }

    /// Every identity this record refers to.
    pub fn referenced(&self) -> impl Iterator<Item = Identity> + '_ {
        self.follows
            .iter()
            .chain(&self.followers)
            .chain(&self.mentions)
            .chain(&self.likes)
            .chain(&self.reposts)
            .copied()
            .chain(
                self.zaps
                    .iter()
                    .flat_map(|z| std::iter::once(z.target).chain(z.sender)),
            )
    }
}

/// The persisted, merge-only aggregate of all observed members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    /// Unix seconds of the last committed aggregation; 0 if never.
    #[serde(default)]
    pub last_updated: u64,
    #[serde(default)]
    pub members: BTreeMap<Identity, MemberRecord>,
}

impl GraphSnapshot {
    pub fn member(&self, identity: &Identity) -> Option<&MemberRecord> {
        self.members.get(identity)
    }

    /// Get or create the record for `identity`.
    pub fn member_mut(&mut self, identity: Identity) -> &mut MemberRecord {
        self.members.entry(identity).or_default()
    }

    /// Record `from` follows `to`, together with the `followers` back-edge.
    ///
    /// Returns `true` if the edge is new. Self-follows are ignored.
    pub fn add_follow(&mut self, from: Identity, to: Identity) -> bool {
        if from == to {
            return false;
        }
        let added = self.member_mut(from).follows.insert(to);
        self.member_mut(to).followers.insert(from);
        added
    }

    /// Pairs `(a, b)` where `b ∈ a.follows` but `a ∉ b.followers`.
    ///
    /// Empty for every snapshot built through [`GraphSnapshot::add_follow`].
    pub fn asymmetric_edges(&self) -> Vec<(Identity, Identity)> {
        let mut broken = Vec::new();
        for (a, record) in &self.members {
            for b in &record.follows {
                let ok = self
                    .members
                    .get(b)
                    .is_some_and(|target| target.followers.contains(a));
                if !ok {
                    broken.push((*a, *b));
                }
            }
        }
        broken
    }
}

/// Registry and snapshot, committed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub registry: Registry,
    pub snapshot: GraphSnapshot,
}

impl GraphState {
    /// Register every identity that appears anywhere in the snapshot but has
    /// no registry entry yet. Returns how many were added.
    pub fn register_referenced(&mut self, now: u64) -> usize {
        let mut seen: BTreeSet<Identity> = BTreeSet::new();
        for (id, record) in &self.snapshot.members {
            seen.insert(*id);
            seen.extend(record.referenced());
        }
        let missing: Vec<Identity> = seen
            .into_iter()
            .filter(|id| !self.registry.contains(id))
            .collect();
        for id in &missing {
            self.registry.observe(*id, now);
        }
        missing.len()
    }
}
