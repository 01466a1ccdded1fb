//! Node classification relative to the core set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Identity, MemberRecord};

/// How an identity relates to the core set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Member of the core set.
    Core,
    /// Follows a core identity and is followed by one.
    Mutual,
    /// Follows at least one core identity.
    Follower,
    /// Followed by at least one core identity.
    Following,
    /// No follow edge to or from the core set.
    Unrelated,
}

impl Classification {
    /// Rendering hint: node fill color.
    pub fn color(self) -> &'static str {
        match self {
            Self::Core => "#f59e0b",
            Self::Mutual => "#10b981",
            Self::Follower => "#3b82f6",
            Self::Following => "#8b5cf6",
            Self::Unrelated => "#9ca3af",
        }
    }

    /// Rendering hint: node radius.
    pub fn size(self) -> u32 {
        match self {
            Self::Core => 12,
            Self::Mutual => 8,
            Self::Follower | Self::Following => 6,
            Self::Unrelated => 4,
        }
    }
}

/// Classify `identity` from its follow edges relative to `core`.
///
/// An identity with no record (never fetched, only registered) has no known
/// edges and is therefore `Unrelated` unless it is itself core.
pub fn classify(
    identity: &Identity,
    core: &BTreeSet<Identity>,
    record: Option<&MemberRecord>,
) -> Classification {
    if core.contains(identity) {
        return Classification::Core;
    }
    let Some(record) = record else {
        return Classification::Unrelated;
    };

    let follows_core = !record.follows.is_disjoint(core);
    let followed_by_core = !record.followers.is_disjoint(core);

    match (follows_core, followed_by_core) {
        (true, true) => Classification::Mutual,
        (true, false) => Classification::Follower,
        (false, true) => Classification::Following,
        (false, false) => Classification::Unrelated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::Keys;

    fn ident() -> Identity {
        Identity::from(Keys::generate().public_key())
    }

    fn record(follows: &[Identity], followers: &[Identity]) -> MemberRecord {
        MemberRecord {
            follows: follows.iter().copied().collect(),
            followers: followers.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn core_members_are_core_regardless_of_edges() {
        let x = ident();
        let core = BTreeSet::from([x]);
        assert_eq!(classify(&x, &core, None), Classification::Core);
        assert_eq!(
            classify(&x, &core, Some(&record(&[x], &[x]))),
            Classification::Core
        );
    }

    #[test]
    fn follows_core_only_is_follower() {
        let x = ident();
        let core = BTreeSet::from([x]);
        let y = ident();
        assert_eq!(
            classify(&y, &core, Some(&record(&[x], &[]))),
            Classification::Follower
        );
    }

    #[test]
    fn followed_by_core_only_is_following() {
        let x = ident();
        let core = BTreeSet::from([x]);
        let z = ident();
        assert_eq!(
            classify(&z, &core, Some(&record(&[], &[x]))),
            Classification::Following
        );
    }

    #[test]
    fn both_directions_is_mutual() {
        let x = ident();
        let core = BTreeSet::from([x]);
        let w = ident();
        assert_eq!(
            classify(&w, &core, Some(&record(&[x], &[x]))),
            Classification::Mutual
        );
    }

    #[test]
    fn no_core_edges_is_unrelated() {
        let x = ident();
        let core = BTreeSet::from([x]);
        let v = ident();
        let stranger = ident();

        assert_eq!(
            classify(&v, &core, Some(&record(&[], &[]))),
            Classification::Unrelated
        );
        assert_eq!(
            classify(&v, &core, Some(&record(&[stranger], &[stranger]))),
            Classification::Unrelated
        );
        assert_eq!(classify(&v, &core, None), Classification::Unrelated);
    }

    #[test]
    fn edges_to_any_core_member_count() {
        let (x1, x2) = (ident(), ident());
        let core = BTreeSet::from([x1, x2]);
        let y = ident();
        assert_eq!(
            classify(&y, &core, Some(&record(&[x2], &[x1]))),
            Classification::Mutual
        );
    }

    #[test]
    fn rendering_hints_are_distinct_per_class() {
        let all = [
            Classification::Core,
            Classification::Mutual,
            Classification::Follower,
            Classification::Following,
            Classification::Unrelated,
        ];
        let colors: BTreeSet<_> = all.iter().map(|c| c.color()).collect();
        assert_eq!(colors.len(), all.len());
        assert!(Classification::Core.size() > Classification::Unrelated.size());
        assert_eq!(
            serde_json::to_string(&Classification::Following).unwrap(),
            "\"following\""
        );
    }
}
