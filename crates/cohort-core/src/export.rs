//! Visualization export.
//!
//! Converts the committed snapshot and registry into a nodes/links structure
//! for the graph-rendering UI. The result is derived on every call and never
//! persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Classification, GraphSnapshot, Group, Identity, Registry, classify};

/// A single node in the exported graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Raw (hex) identity.
    pub id: String,
    /// Display (`npub`) identity.
    pub encoded: String,
    pub display_name: String,
    pub classification: Classification,
    pub group: Group,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub color: String,
    pub size: u32,
}

/// A directed follow edge, `source` follows `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
}

/// Node counts per classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCounts {
    pub core: usize,
    pub mutual: usize,
    pub follower: usize,
    pub following: usize,
    pub unrelated: usize,
}

impl ClassificationCounts {
    fn add(&mut self, class: Classification) {
        match class {
            Classification::Core => self.core += 1,
            Classification::Mutual => self.mutual += 1,
            Classification::Follower => self.follower += 1,
            Classification::Following => self.following += 1,
            Classification::Unrelated => self.unrelated += 1,
        }
    }
}

/// The graph consumed by the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationGraph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
    pub generated_at: u64,
    pub stats: ClassificationCounts,
}

impl VisualizationGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Build the visualization graph.
///
/// One node per identity in `snapshot.members` ∪ `registry`; one link per
/// follow edge whose both ends have a node. Ordering follows identity order,
/// so the output is deterministic for a given snapshot.
pub fn export(snapshot: &GraphSnapshot, registry: &Registry, now: u64) -> VisualizationGraph {
    let core = registry.core_set();
    let ids: BTreeSet<Identity> = snapshot
        .members
        .keys()
        .copied()
        .chain(registry.iter().map(|(id, _)| *id))
        .collect();

    let mut stats = ClassificationCounts::default();
    let nodes: Vec<GraphNode> = ids
        .iter()
        .map(|id| {
            let record = snapshot.member(id);
            let class = classify(id, &core, record);
            stats.add(class);

            let metadata = record.and_then(|r| r.metadata.as_ref());
            let display_name = metadata
                .and_then(|m| m.best_name())
                .map(str::to_string)
                .unwrap_or_else(|| id.short());

            GraphNode {
                id: id.to_hex(),
                encoded: id.to_npub(),
                display_name,
                classification: class,
                group: registry.group_of(id).unwrap_or_default(),
                picture: metadata.and_then(|m| m.picture.clone()),
                color: class.color().to_string(),
                size: class.size(),
            }
        })
        .collect();

    let node_ids = &ids;
    let links = snapshot
        .members
        .iter()
        .flat_map(move |(source, record)| {
            record
                .follows
                .iter()
                .filter(move |target| node_ids.contains(*target))
                .map(move |target| GraphLink {
                    source: source.to_hex(),
                    target: target.to_hex(),
                })
        })
        .collect();

    VisualizationGraph {
        nodes,
        links,
        generated_at: now,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemberRecord, ProfileMetadata};
    use nostr::Keys;
    use std::collections::HashSet;

    fn ident() -> Identity {
        Identity::from(Keys::generate().public_key())
    }

    #[test]
    fn empty_inputs_export_empty_graph() {
        let graph = export(&GraphSnapshot::default(), &Registry::new(), 10);
        assert!(graph.is_empty());
        assert!(graph.links.is_empty());
        assert_eq!(graph.generated_at, 10);
    }

    #[test]
    fn nodes_cover_members_and_registry() {
        let (core, followed, registered_only) = (ident(), ident(), ident());
        let mut registry = Registry::new();
        registry.assign(core, Group::Core, 1);
        registry.observe(followed, 1);
        registry.observe(registered_only, 1);

        let mut snapshot = GraphSnapshot::default();
        snapshot.add_follow(core, followed);

        let graph = export(&snapshot, &registry, 2);
        assert_eq!(graph.nodes.len(), 3);

        let by_id = |id: &Identity| {
            graph
                .nodes
                .iter()
                .find(|n| n.id == id.to_hex())
                .cloned()
                .unwrap()
        };
        assert_eq!(by_id(&core).classification, Classification::Core);
        assert_eq!(by_id(&core).group, Group::Core);
        assert_eq!(by_id(&followed).classification, Classification::Following);
        assert_eq!(
            by_id(&registered_only).classification,
            Classification::Unrelated
        );
        assert_eq!(graph.stats.core, 1);
        assert_eq!(graph.stats.following, 1);
        assert_eq!(graph.stats.unrelated, 1);
    }

    #[test]
    fn display_name_falls_back_through_metadata() {
        let (a, b, c) = (ident(), ident(), ident());
        let mut snapshot = GraphSnapshot::default();
        snapshot.members.insert(
            a,
            MemberRecord {
                metadata: Some(ProfileMetadata {
                    name: Some("alice".into()),
                    display_name: Some("Alice A.".into()),
                    picture: Some("https://example.com/a.png".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        snapshot.members.insert(
            b,
            MemberRecord {
                metadata: Some(ProfileMetadata {
                    name: Some("bob".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        snapshot.members.insert(c, MemberRecord::default());

        let graph = export(&snapshot, &Registry::new(), 0);
        let name_of = |id: &Identity| {
            graph
                .nodes
                .iter()
                .find(|n| n.id == id.to_hex())
                .map(|n| n.display_name.clone())
                .unwrap()
        };
        assert_eq!(name_of(&a), "Alice A.");
        assert_eq!(name_of(&b), "bob");
        assert_eq!(name_of(&c), c.short());

        let node_a = graph.nodes.iter().find(|n| n.id == a.to_hex()).unwrap();
        assert_eq!(node_a.picture.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(node_a.encoded, a.to_npub());
    }

    #[test]
    fn links_never_dangle() {
        let (core, x, y, z) = (ident(), ident(), ident(), ident());
        let mut registry = Registry::new();
        registry.assign(core, Group::Core, 1);

        let mut snapshot = GraphSnapshot::default();
        snapshot.add_follow(core, x);
        snapshot.add_follow(x, y);
        snapshot.add_follow(y, core);
        // Hand-inserted edge to an identity with neither record nor entry.
        let ghost = ident();
        snapshot.member_mut(z).follows.insert(ghost);

        let graph = export(&snapshot, &registry, 0);
        let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

        assert_eq!(graph.links.len(), 3);
        for link in &graph.links {
            assert!(node_ids.contains(link.source.as_str()));
            assert!(node_ids.contains(link.target.as_str()));
        }
    }

    #[test]
    fn export_is_deterministic() {
        let mut registry = Registry::new();
        let mut snapshot = GraphSnapshot::default();
        let core = ident();
        registry.assign(core, Group::Core, 1);
        for _ in 0..10 {
            let id = ident();
            registry.observe(id, 1);
            snapshot.add_follow(core, id);
            snapshot.add_follow(id, core);
        }

        let first = export(&snapshot, &registry, 5);
        let second = export(&snapshot, &registry, 5);
        assert_eq!(first, second);
        assert_eq!(first.stats.mutual, 10);
    }

    #[test]
    fn graph_json_shape() {
        let core = ident();
        let mut registry = Registry::new();
        registry.assign(core, Group::Core, 1);

        let graph = export(&GraphSnapshot::default(), &registry, 3);
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["generatedAt"], 3);
        assert_eq!(value["nodes"][0]["classification"], "core");
        assert_eq!(value["nodes"][0]["displayName"], core.short());
        assert!(value["nodes"][0].get("picture").is_none());
    }
}
