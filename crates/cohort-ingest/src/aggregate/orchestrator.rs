//! The aggregation pass.
//!
//! One pass, under the run lock:
//!
//! 1. Clone the committed state and (re)apply the seed groups.
//! 2. For each tracked identity, query metadata, follows and interactions
//!    (plus followers for core identities) concurrently, then merge.
//! 3. Fetch metadata for discovered identities that have none.
//! 4. Register every referenced identity, stamp `last_updated`, commit to the
//!    store and only then publish the new state to readers.
//!
//! Query failures are logged per identity and absorbed. Only a store failure
//! fails the pass, and then nothing is published.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cohort_core::{GraphState, Group, Identity, VisualizationGraph, unix_now};
use metrics::{counter, gauge, histogram};
use nostr_sdk::Kind;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::merge::{self, MergeStats};
use crate::config::AggregatorConfig;
use crate::record::INTERACTION_KINDS;
use crate::relay::{QueryOutcome, RecordQuery, RelayConnector, RelayQueryClient};
use crate::store::{GraphStore, SharedGraph};
use crate::{Error, Result};

/// What a single query was for, in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Metadata,
    Follows,
    Interactions,
    Followers,
    DiscoveredMetadata,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Metadata => "fetch_metadata",
            Operation::Follows => "fetch_follows",
            Operation::Interactions => "fetch_interactions",
            Operation::Followers => "fetch_followers",
            Operation::DiscoveredMetadata => "fetch_discovered_metadata",
        }
    }
}

/// Summary of a committed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Tracked identities processed.
    pub identities: usize,
    /// Tracked identities with at least one query that produced no answer.
    pub failed: usize,
    /// Identities added to the registry during the pass.
    pub new_identities: usize,
    /// Members in the committed snapshot.
    pub members: usize,
    /// Records decoded and merged.
    pub records: usize,
    /// Records dropped as malformed.
    pub dropped: usize,
    /// The committed `last_updated`.
    pub committed_at: u64,
    pub duration: Duration,
}

/// Clears the run flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::RunInProgress)?;
        gauge!("aggregation_running").set(1.0);
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
        gauge!("aggregation_running").set(0.0);
    }
}

/// Results of the per-identity queries.
struct IdentityFetch {
    metadata: QueryOutcome,
    follows: QueryOutcome,
    interactions: QueryOutcome,
    followers: Option<QueryOutcome>,
}

/// Drives aggregation passes and holds the committed graph.
pub struct Aggregator<C, S> {
    config: AggregatorConfig,
    client: RelayQueryClient<C>,
    store: S,
    shared: SharedGraph,
    running: AtomicBool,
    /// Last identity whose metadata the discovery scan asked for. The next
    /// scan resumes after it.
    discovery_cursor: Mutex<Option<Identity>>,
}

impl<C: RelayConnector, S: GraphStore> Aggregator<C, S> {
    /// Load the committed state from `store` and get ready to run.
    ///
    /// A store with nothing committed yet starts from an empty graph.
    pub fn new(config: AggregatorConfig, connector: C, store: S) -> Result<Self> {
        let state = store.load()?;
        let client =
            RelayQueryClient::new(connector, config.max_connections, config.connect_stagger);
        cohort_core::metrics::record_graph_size(
            state.snapshot.members.len(),
            state.registry.len(),
            state.snapshot.last_updated,
        );
        Ok(Self {
            config,
            client,
            store,
            shared: SharedGraph::new(state),
            running: AtomicBool::new(false),
            discovery_cursor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        self.client.connector()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The last committed state.
    pub fn current(&self) -> Arc<GraphState> {
        self.shared.load()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the committed snapshot is younger than `cache_max_age`.
    pub fn is_fresh(&self) -> bool {
        cohort_core::is_fresh(
            self.current().snapshot.last_updated,
            unix_now(),
            self.config.cache_max_age,
        )
    }

    /// Visualization graph of the committed state. Empty if nothing has
    /// been committed yet.
    pub fn export(&self) -> VisualizationGraph {
        let state = self.current();
        cohort_core::export(&state.snapshot, &state.registry, unix_now())
    }

    /// Run a pass unless the committed snapshot is still fresh.
    ///
    /// Returns `None` without querying anything when the snapshot is fresh
    /// or another pass is already running.
    pub async fn refresh_if_stale(&self) -> Result<Option<RunReport>> {
        if self.is_fresh() {
            debug!("Snapshot is fresh, skipping aggregation");
            return Ok(None);
        }
        match self.run_once().await {
            Ok(report) => Ok(Some(report)),
            Err(Error::RunInProgress) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run one full aggregation pass and commit the result.
    ///
    /// Fails with [`Error::RunInProgress`] if a pass is already running, and
    /// with a persistence error if the store rejects the commit. In both
    /// cases the previously committed state stays in place.
    pub async fn run_once(&self) -> Result<RunReport> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started = Instant::now();
        let now = unix_now();

        let result = self.run_pass(now).await;
        histogram!("aggregation_run_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok((state, stats, identities, failed)) => {
                let report = RunReport {
                    identities,
                    failed,
                    new_identities: stats.new_identities,
                    members: state.snapshot.members.len(),
                    records: stats.records,
                    dropped: stats.dropped,
                    committed_at: state.snapshot.last_updated,
                    duration: started.elapsed(),
                };
                cohort_core::metrics::record_graph_size(
                    report.members,
                    state.registry.len(),
                    report.committed_at,
                );
                counter!("aggregation_runs_total", "outcome" => "success").increment(1);
                counter!("aggregation_new_identities_total")
                    .increment(stats.new_identities as u64);
                info!(
                    "Aggregation committed: {} identities ({} with failures), {} members, {} new identities, {} records, {} dropped in {:.1}s",
                    report.identities,
                    report.failed,
                    report.members,
                    report.new_identities,
                    report.records,
                    report.dropped,
                    report.duration.as_secs_f64()
                );
                Ok(report)
            }
            Err(e) => {
                counter!("aggregation_runs_total", "outcome" => "failure").increment(1);
                warn!("Aggregation failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }

    async fn run_pass(&self, now: u64) -> Result<(Arc<GraphState>, MergeStats, usize, usize)> {
        let mut state = GraphState::clone(&self.current());
        let mut stats = MergeStats::default();

        for id in &self.config.core {
            state.registry.assign(*id, Group::Core, now);
        }
        for id in &self.config.agency {
            state.registry.assign(*id, Group::Agency, now);
        }

        let tracked = state.registry.tracked();
        info!(
            "Starting aggregation over {} tracked identities and {} relays",
            tracked.len(),
            self.config.relays.len()
        );

        let since = now.saturating_sub(self.config.lookback.as_secs());
        let mut failed = 0;
        for identity in &tracked {
            let is_core = state.registry.group_of(identity) == Some(Group::Core);
            let fetch = self.fetch_identity(*identity, is_core, since).await;
            if !self.merge_identity(&mut state, *identity, fetch, now, &mut stats) {
                failed += 1;
                counter!("aggregation_identity_failures_total").increment(1);
            }
        }

        self.fetch_discovered_metadata(&mut state, &mut stats).await;

        let registered = state.register_referenced(now);
        if registered > 0 {
            debug!("Registered {} referenced identities", registered);
            stats.new_identities += registered;
        }
        state.snapshot.last_updated = now;

        self.store.commit(&state)?;
        let state = Arc::new(state);
        self.shared.replace(Arc::clone(&state));
        Ok((state, stats, tracked.len(), failed))
    }

    async fn fetch_identity(&self, identity: Identity, is_core: bool, since: u64) -> IdentityFetch {
        let relays = &self.config.relays;
        let timeout = self.config.query_timeout;

        let metadata_query = RecordQuery::new([Kind::Metadata])
            .authors([identity])
            .limit(1);
        let follows_query = RecordQuery::new([Kind::ContactList])
            .authors([identity])
            .limit(1);
        let interactions_query = RecordQuery::new(INTERACTION_KINDS)
            .referencing(identity)
            .since(since)
            .limit(self.config.interaction_limit);
        let followers_query = RecordQuery::new([Kind::ContactList])
            .referencing(identity)
            .limit(self.config.follower_scan_limit);

        let followers = async {
            if is_core {
                Some(self.client.query(relays, &followers_query, timeout).await)
            } else {
                None
            }
        };

        let (metadata, follows, interactions, followers) = tokio::join!(
            self.client.query(relays, &metadata_query, timeout),
            self.client.query(relays, &follows_query, timeout),
            self.client.query(relays, &interactions_query, timeout),
            followers,
        );

        IdentityFetch {
            metadata,
            follows,
            interactions,
            followers,
        }
    }

    /// Merge one identity's query results. Returns `false` if any of its
    /// queries produced no answer at all.
    fn merge_identity(
        &self,
        state: &mut GraphState,
        identity: Identity,
        fetch: IdentityFetch,
        now: u64,
        stats: &mut MergeStats,
    ) -> bool {
        let mut ok = true;
        state.snapshot.member_mut(identity);

        ok &= self.check(Some(identity), Operation::Metadata, &fetch.metadata);
        let records = merge::decode_records(fetch.metadata.records, stats);
        merge::apply_profile(state, identity, &records);

        ok &= self.check(Some(identity), Operation::Follows, &fetch.follows);
        let records = merge::decode_records(fetch.follows.records, stats);
        merge::apply_follow_list(state, identity, &records, now, stats);

        ok &= self.check(Some(identity), Operation::Interactions, &fetch.interactions);
        let records = merge::decode_records(fetch.interactions.records, stats);
        merge::apply_interactions(state, identity, &records, now, stats);

        if let Some(followers) = fetch.followers {
            ok &= self.check(Some(identity), Operation::Followers, &followers);
            let records = merge::decode_records(followers.records, stats);
            merge::apply_followers(state, identity, &records, now, stats);
        }

        ok
    }

    /// Fill in metadata for registry identities that have none, in author
    /// batches. Failures only leave names missing.
    ///
    /// At most `discovered_metadata_limit` identities are asked for per pass.
    /// Each pass resumes where the previous one stopped, wrapping around, so
    /// identities that never publish a profile cannot crowd out the rest.
    async fn fetch_discovered_metadata(&self, state: &mut GraphState, stats: &mut MergeStats) {
        // Registry order, so `partition_point` below is valid.
        let candidates: Vec<Identity> = state
            .registry
            .iter()
            .filter(|(_, entry)| !entry.group.is_tracked())
            .map(|(id, _)| *id)
            .filter(|id| {
                state
                    .snapshot
                    .member(id)
                    .is_none_or(|record| record.metadata.is_none())
            })
            .collect();

        let missing: Vec<Identity> = {
            let mut cursor = self.discovery_cursor.lock();
            let start = cursor.map_or(0, |after| candidates.partition_point(|id| *id <= after));
            let missing: Vec<Identity> = candidates
                .iter()
                .cycle()
                .skip(start)
                .take(self.config.discovered_metadata_limit.min(candidates.len()))
                .copied()
                .collect();
            if let Some(last) = missing.last() {
                *cursor = Some(*last);
            }
            missing
        };
        if missing.is_empty() {
            return;
        }

        debug!("Fetching metadata for {} discovered identities", missing.len());
        let mut applied = 0;
        for batch in missing.chunks(self.config.metadata_batch_size.max(1)) {
            let query = RecordQuery::new([Kind::Metadata])
                .authors(batch.iter().copied())
                .limit(batch.len());
            let outcome = self
                .client
                .query(&self.config.relays, &query, self.config.query_timeout)
                .await;
            self.check(None, Operation::DiscoveredMetadata, &outcome);

            let wanted: BTreeSet<Identity> = batch.iter().copied().collect();
            let records = merge::decode_records(outcome.records, stats);
            applied += merge::apply_discovered_profiles(state, &wanted, &records);
        }
        debug!("Found metadata for {} of {} discovered identities", applied, missing.len());
    }

    /// Log a query that produced nothing because of relay trouble.
    fn check(&self, identity: Option<Identity>, operation: Operation, outcome: &QueryOutcome) -> bool {
        let who = identity.map(|id| id.to_npub()).unwrap_or_default();
        if outcome.is_total_failure() && (outcome.failed > 0 || outcome.timed_out > 0) {
            warn!(
                identity = %who,
                operation = operation.as_str(),
                relays = %self.config.relays.join(","),
                failed = outcome.failed,
                timed_out = outcome.timed_out,
                "query got no answer from any relay"
            );
            return false;
        }
        if outcome.hit_deadline() || outcome.failed > 0 {
            debug!(
                identity = %who,
                operation = operation.as_str(),
                completed = outcome.completed,
                failed = outcome.failed,
                timed_out = outcome.timed_out,
                "query answered by some relays"
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{SimulatedRelays, follow_list, ident_of, interaction, profile};
    use cohort_core::Classification;
    use nostr_sdk::Keys;

    const RELAYS: [&str; 2] = ["wss://relay0.test", "wss://relay1.test"];

    fn config(core: &[&Keys], agency: &[&Keys]) -> AggregatorConfig {
        AggregatorConfig {
            relays: RELAYS.iter().map(|r| r.to_string()).collect(),
            core: core.iter().map(|k| ident_of(k)).collect(),
            agency: agency.iter().map(|k| ident_of(k)).collect(),
            query_timeout: Duration::from_millis(300),
            connect_stagger: Duration::ZERO,
            ..Default::default()
        }
    }

    fn aggregator(
        relays: &SimulatedRelays,
        config: AggregatorConfig,
    ) -> Aggregator<SimulatedRelays, MemoryStore> {
        Aggregator::new(config, relays.clone(), MemoryStore::new()).unwrap()
    }

    fn classification_of(graph: &VisualizationGraph, keys: &Keys) -> Option<Classification> {
        let id = keys.public_key().to_hex();
        graph
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.classification)
    }

    #[tokio::test]
    async fn first_run_starts_from_empty_state() {
        let (x, y) = (Keys::generate(), Keys::generate());
        let (a, b) = (Keys::generate(), Keys::generate());
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(profile(&x, "Xavier", 10));
        relays.publish("wss://relay0.test", follow_list(&x, &[&a, &b], 10));

        let agg = aggregator(&relays, config(&[&x], &[&y]));
        assert!(agg.export().is_empty());
        assert_eq!(agg.current().snapshot.last_updated, 0);

        let report = agg.run_once().await.unwrap();
        assert_eq!(report.identities, 2);
        assert_eq!(report.failed, 0);

        let state = agg.current();
        assert!(state.snapshot.last_updated > 0);
        assert_eq!(state.registry.group_of(&ident_of(&x)), Some(Group::Core));
        assert_eq!(state.registry.group_of(&ident_of(&y)), Some(Group::Agency));
        assert_eq!(state.registry.group_of(&ident_of(&a)), Some(Group::Other));
        assert!(state.snapshot.asymmetric_edges().is_empty());

        let x_record = state.snapshot.member(&ident_of(&x)).unwrap();
        assert_eq!(x_record.follows.len(), 2);
        assert_eq!(
            x_record.metadata.as_ref().and_then(|m| m.display_name.as_deref()),
            Some("Xavier")
        );
        // Tracked identities get a record even with nothing published.
        assert!(state.snapshot.member(&ident_of(&y)).is_some());
        assert_eq!(agg.store().commits(), 1);
    }

    #[tokio::test]
    async fn followers_and_mutuals_are_discovered() {
        let x = Keys::generate();
        let (mutual, fan, followed, stranger) = (
            Keys::generate(),
            Keys::generate(),
            Keys::generate(),
            Keys::generate(),
        );
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(follow_list(&x, &[&mutual, &followed], 10));
        relays.publish_everywhere(follow_list(&mutual, &[&x], 10));
        relays.publish_everywhere(follow_list(&fan, &[&x, &stranger], 10));

        let agg = aggregator(&relays, config(&[&x], &[]));
        agg.run_once().await.unwrap();
        let graph = agg.export();

        assert_eq!(classification_of(&graph, &x), Some(Classification::Core));
        assert_eq!(classification_of(&graph, &mutual), Some(Classification::Mutual));
        assert_eq!(classification_of(&graph, &fan), Some(Classification::Follower));
        assert_eq!(classification_of(&graph, &followed), Some(Classification::Following));
        // Only the fan's edge to the core identity is recorded.
        assert_eq!(classification_of(&graph, &stranger), None);
        assert!(agg.current().snapshot.asymmetric_edges().is_empty());
    }

    #[tokio::test]
    async fn interactions_respect_the_lookback_window() {
        let x = Keys::generate();
        let (recent, ancient) = (Keys::generate(), Keys::generate());
        let now = unix_now();
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(interaction(&recent, Kind::Reaction, &x, now - 60));
        relays.publish_everywhere(interaction(&ancient, Kind::Reaction, &x, now - 30 * 86_400));

        let agg = aggregator(&relays, config(&[&x], &[]));
        agg.run_once().await.unwrap();

        let state = agg.current();
        let likes = &state.snapshot.member(&ident_of(&x)).unwrap().likes;
        assert!(likes.contains(&ident_of(&recent)));
        assert!(!likes.contains(&ident_of(&ancient)));
        assert!(state.registry.contains(&ident_of(&recent)));
    }

    #[tokio::test]
    async fn discovered_identities_get_metadata() {
        let x = Keys::generate();
        let friend = Keys::generate();
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(follow_list(&x, &[&friend], 10));
        relays.publish("wss://relay1.test", profile(&friend, "Friend", 5));

        let agg = aggregator(&relays, config(&[&x], &[]));
        agg.run_once().await.unwrap();

        let graph = agg.export();
        let node = graph
            .nodes
            .iter()
            .find(|n| n.id == friend.public_key().to_hex())
            .unwrap();
        assert_eq!(node.display_name, "Friend");
    }

    #[tokio::test]
    async fn hung_relay_does_not_starve_the_healthy_one() {
        let x = Keys::generate();
        let (a, fan) = (Keys::generate(), Keys::generate());
        let now = unix_now();
        let relays = SimulatedRelays::new();
        relays.hang("wss://relay0.test");
        relays.publish("wss://relay1.test", follow_list(&x, &[&a], 10));
        relays.publish("wss://relay1.test", follow_list(&fan, &[&x], 10));
        relays.publish("wss://relay1.test", interaction(&fan, Kind::Reaction, &x, now - 60));

        // Four concurrent queries, each with one endpoint that never answers.
        let agg = aggregator(&relays, config(&[&x], &[]));
        let report = agg.run_once().await.unwrap();
        assert_eq!(report.failed, 0);

        let state = agg.current();
        let record = state.snapshot.member(&ident_of(&x)).unwrap();
        assert!(record.follows.contains(&ident_of(&a)));
        assert!(record.followers.contains(&ident_of(&fan)));
        assert!(record.likes.contains(&ident_of(&fan)));
        assert_eq!(relays.unfinished(), 0);
    }

    #[tokio::test]
    async fn discovery_scan_rotates_past_silent_identities() {
        let x = Keys::generate();
        let (p, q) = (Keys::generate(), Keys::generate());
        let (silent, named) = if ident_of(&p) < ident_of(&q) { (p, q) } else { (q, p) };
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(follow_list(&x, &[&silent, &named], 10));
        relays.publish_everywhere(profile(&named, "Named", 5));

        let mut config = config(&[&x], &[]);
        config.discovered_metadata_limit = 1;
        let agg = aggregator(&relays, config);
        let metadata_of = |agg: &Aggregator<SimulatedRelays, MemoryStore>, k: &Keys| {
            agg.current()
                .snapshot
                .member(&ident_of(k))
                .and_then(|r| r.metadata.clone())
        };

        // The first pass only reaches the identity that sorts first.
        agg.run_once().await.unwrap();
        assert!(metadata_of(&agg, &named).is_none());

        agg.run_once().await.unwrap();
        assert_eq!(
            metadata_of(&agg, &named).and_then(|m| m.display_name),
            Some("Named".to_string())
        );
        assert!(metadata_of(&agg, &silent).is_none());
    }

    #[tokio::test]
    async fn rerun_without_new_data_is_idempotent() {
        let x = Keys::generate();
        let (a, fan, zapper) = (Keys::generate(), Keys::generate(), Keys::generate());
        let now = unix_now();
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(profile(&x, "X", 10));
        relays.publish_everywhere(follow_list(&x, &[&a], 10));
        relays.publish_everywhere(follow_list(&fan, &[&x], 10));
        relays.publish_everywhere(interaction(&fan, Kind::TextNote, &x, now - 10));
        relays.publish_everywhere(crate::testing::signed(
            &Keys::generate(),
            Kind::ZapReceipt,
            "",
            vec![
                vec!["p".to_string(), x.public_key().to_hex()],
                vec!["P".to_string(), zapper.public_key().to_hex()],
                vec!["bolt11".to_string(), "lnbc10u1pxyz".to_string()],
            ],
            now - 5,
        ));

        let agg = aggregator(&relays, config(&[&x], &[]));
        agg.run_once().await.unwrap();
        let mut first = agg.current().snapshot.clone();
        let second_report = agg.run_once().await.unwrap();
        let mut second = agg.current().snapshot.clone();

        assert_eq!(second_report.new_identities, 0);
        first.last_updated = 0;
        second.last_updated = 0;
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(second.member(&ident_of(&x)).unwrap().zaps.len(), 1);
    }

    #[tokio::test]
    async fn one_identity_timing_out_does_not_block_the_others() {
        let (a, b, c) = (Keys::generate(), Keys::generate(), Keys::generate());
        let (fa, fb, fc) = (Keys::generate(), Keys::generate(), Keys::generate());
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(follow_list(&a, &[&fa], 10));
        relays.publish_everywhere(follow_list(&b, &[&fb], 10));
        relays.publish_everywhere(follow_list(&c, &[&fc], 10));
        relays.hang_identity(ident_of(&b));

        let agg = aggregator(&relays, config(&[&a, &b, &c], &[]));
        let started = std::time::Instant::now();
        let report = agg.run_once().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.identities, 3);
        assert_eq!(report.failed, 1);

        let state = agg.current();
        let follows_of = |k: &Keys| {
            state
                .snapshot
                .member(&ident_of(k))
                .map(|r| r.follows.clone())
                .unwrap_or_default()
        };
        assert!(follows_of(&a).contains(&ident_of(&fa)));
        assert!(follows_of(&c).contains(&ident_of(&fc)));
        assert!(follows_of(&b).is_empty());
        assert_eq!(agg.store().commits(), 1);
    }

    #[tokio::test]
    async fn unreachable_relays_still_commit() {
        let x = Keys::generate();
        let relays = SimulatedRelays::new();
        for relay in RELAYS {
            relays.fail(relay);
        }

        let agg = aggregator(&relays, config(&[&x], &[]));
        let report = agg.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(agg.current().registry.contains(&ident_of(&x)));
        assert_eq!(agg.store().commits(), 1);
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let x = Keys::generate();
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(follow_list(&x, &[&Keys::generate()], 10));
        let agg = aggregator(&relays, config(&[&x], &[]));

        let (first, second) = tokio::join!(agg.run_once(), agg.run_once());
        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::RunInProgress)));
        assert!(!agg.is_running());

        // The lock is released once the pass ends.
        assert!(agg.run_once().await.is_ok());
        assert_eq!(agg.store().commits(), 2);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_the_previous_snapshot() {
        let x = Keys::generate();
        let relays = SimulatedRelays::new();
        relays.publish_everywhere(follow_list(&x, &[&Keys::generate()], 10));
        let agg = aggregator(&relays, config(&[&x], &[]));
        agg.run_once().await.unwrap();
        let before = agg.current();

        relays.publish_everywhere(follow_list(&x, &[&Keys::generate()], 20));
        agg.store().set_failing(true);
        let err = agg.run_once().await.unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));

        assert!(Arc::ptr_eq(&before, &agg.current()));
        assert!(!agg.is_running());
        assert_eq!(agg.store().commits(), 1);
    }

    #[tokio::test]
    async fn refresh_if_stale_skips_fresh_snapshots() {
        let x = Keys::generate();
        let relays = SimulatedRelays::new();
        let agg = aggregator(&relays, config(&[&x], &[]));

        assert!(!agg.is_fresh());
        assert!(agg.refresh_if_stale().await.unwrap().is_some());
        assert!(agg.is_fresh());

        let calls = relays.calls();
        assert!(agg.refresh_if_stale().await.unwrap().is_none());
        assert_eq!(relays.calls(), calls);
    }

    #[tokio::test]
    async fn aggregator_loads_previously_committed_state() {
        let x = Keys::generate();
        let mut state = GraphState::default();
        state.registry.assign(ident_of(&x), Group::Core, 1);
        state.snapshot.last_updated = 1;

        let agg = Aggregator::new(
            config(&[&x], &[]),
            SimulatedRelays::new(),
            MemoryStore::with_state(state.clone()),
        )
        .unwrap();
        assert_eq!(*agg.current(), state);
        assert!(!agg.is_fresh());
    }
}
