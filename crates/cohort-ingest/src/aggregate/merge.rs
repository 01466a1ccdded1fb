//! Merge handlers.
//!
//! Each handler takes records already decoded by [`GraphRecord::from_event`]
//! (newest first) and folds them into a working [`GraphState`]. Handlers only
//! ever add: edges, interactions and registry entries are never removed, so
//! applying the same records twice leaves the state unchanged.

use std::collections::{BTreeMap, BTreeSet};

use cohort_core::{GraphState, Identity, ProfileMetadata, ZapEntry};
use metrics::counter;
use nostr_sdk::Event;
use tracing::debug;

use crate::record::{GraphRecord, InteractionKind, newest_first};

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records decoded successfully.
    pub records: usize,
    /// Records dropped as malformed.
    pub dropped: usize,
    /// Identities added to the registry.
    pub new_identities: usize,
    /// Follow edges added.
    pub edges: usize,
    /// Interactions and zaps added.
    pub interactions: usize,
}

impl MergeStats {
    fn observe(&mut self, state: &mut GraphState, identity: Identity, now: u64) {
        if state.registry.observe(identity, now) {
            self.new_identities += 1;
        }
    }
}

/// Decode `events` newest first. Malformed records are logged and dropped.
pub(crate) fn decode_records(mut events: Vec<Event>, stats: &mut MergeStats) -> Vec<GraphRecord> {
    newest_first(&mut events);
    let mut records = Vec::with_capacity(events.len());
    for event in &events {
        match GraphRecord::from_event(event) {
            Ok(record) => {
                stats.records += 1;
                records.push(record);
            }
            Err(e) => {
                stats.dropped += 1;
                counter!("aggregation_records_dropped_total").increment(1);
                debug!(relay_record = %event.id, "dropping record: {}", e);
            }
        }
    }
    records
}

/// Newest profile authored by each identity in `records`.
fn newest_profiles(records: &[GraphRecord]) -> BTreeMap<Identity, &ProfileMetadata> {
    let mut newest: BTreeMap<Identity, (u64, &ProfileMetadata)> = BTreeMap::new();
    for record in records {
        if let GraphRecord::Profile {
            author,
            created_at,
            metadata,
        } = record
        {
            let entry = newest.entry(*author).or_insert((*created_at, metadata));
            if *created_at > entry.0 {
                *entry = (*created_at, metadata);
            }
        }
    }
    newest.into_iter().map(|(id, (_, m))| (id, m)).collect()
}

/// Newest follow list authored by each identity in `records`.
fn newest_follow_lists(records: &[GraphRecord]) -> BTreeMap<Identity, &[Identity]> {
    let mut newest: BTreeMap<Identity, (u64, &[Identity])> = BTreeMap::new();
    for record in records {
        if let GraphRecord::FollowList {
            author,
            created_at,
            follows,
        } = record
        {
            let entry = newest
                .entry(*author)
                .or_insert((*created_at, follows.as_slice()));
            if *created_at > entry.0 {
                *entry = (*created_at, follows.as_slice());
            }
        }
    }
    newest.into_iter().map(|(id, (_, f))| (id, f)).collect()
}

/// Replace `identity`'s metadata with its newest profile, if one was found.
///
/// Returns `true` if metadata was set.
pub(crate) fn apply_profile(
    state: &mut GraphState,
    identity: Identity,
    records: &[GraphRecord],
) -> bool {
    match newest_profiles(records).get(&identity) {
        Some(metadata) => {
            state.snapshot.member_mut(identity).metadata = Some((*metadata).clone());
            true
        }
        None => false,
    }
}

/// Union `identity`'s newest follow list into its follow set, registering
/// every followed identity and adding the back-edges.
pub(crate) fn apply_follow_list(
    state: &mut GraphState,
    identity: Identity,
    records: &[GraphRecord],
    now: u64,
    stats: &mut MergeStats,
) {
    let lists = newest_follow_lists(records);
    let Some(follows) = lists.get(&identity) else {
        return;
    };
    for followed in follows.iter().copied() {
        if followed == identity {
            continue;
        }
        stats.observe(state, followed, now);
        if state.snapshot.add_follow(identity, followed) {
            stats.edges += 1;
        }
    }
}

/// Record interactions that reference `identity` under its own record.
///
/// `mentions`, `likes` and `reposts` collect the interacting authors; zaps
/// become [`ZapEntry`]s targeting `identity`.
pub(crate) fn apply_interactions(
    state: &mut GraphState,
    identity: Identity,
    records: &[GraphRecord],
    now: u64,
    stats: &mut MergeStats,
) {
    for record in records {
        match record {
            GraphRecord::Interaction {
                kind,
                author,
                referenced,
            } => {
                if *author == identity || !referenced.contains(&identity) {
                    continue;
                }
                stats.observe(state, *author, now);
                let member = state.snapshot.member_mut(identity);
                let set = match kind {
                    InteractionKind::Mention => &mut member.mentions,
                    InteractionKind::Reaction => &mut member.likes,
                    InteractionKind::Repost => &mut member.reposts,
                };
                if set.insert(*author) {
                    stats.interactions += 1;
                }
            }
            GraphRecord::Zap(receipt) => {
                if !receipt.recipients.contains(&identity) {
                    continue;
                }
                if let Some(sender) = receipt.sender
                    && sender != identity
                {
                    stats.observe(state, sender, now);
                }
                let entry = ZapEntry {
                    target: identity,
                    amount: receipt.amount_sats(),
                    timestamp: receipt.created_at,
                    sender: receipt.sender,
                };
                if state.snapshot.member_mut(identity).record_zap(entry) {
                    stats.interactions += 1;
                }
            }
            GraphRecord::Profile { .. }
            | GraphRecord::FollowList { .. }
            | GraphRecord::Unsupported(_) => {}
        }
    }
}

/// Record every author whose newest returned follow list includes
/// `identity` as one of its followers.
pub(crate) fn apply_followers(
    state: &mut GraphState,
    identity: Identity,
    records: &[GraphRecord],
    now: u64,
    stats: &mut MergeStats,
) {
    for (author, follows) in newest_follow_lists(records) {
        if author == identity || !follows.contains(&identity) {
            continue;
        }
        stats.observe(state, author, now);
        if state.snapshot.add_follow(author, identity) {
            stats.edges += 1;
        }
    }
}

/// Set metadata for each identity in `wanted` that has a profile in
/// `records`. Returns how many were set.
pub(crate) fn apply_discovered_profiles(
    state: &mut GraphState,
    wanted: &BTreeSet<Identity>,
    records: &[GraphRecord],
) -> usize {
    let mut applied = 0;
    for (author, metadata) in newest_profiles(records) {
        if wanted.contains(&author) {
            state.snapshot.member_mut(author).metadata = Some(metadata.clone());
            applied += 1;
        }
    }
    applied
}
