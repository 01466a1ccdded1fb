//! In-process relay simulation for tests.
//!
//! [`SimulatedRelays`] implements [`RelayConnector`] over an in-memory record
//! set per endpoint, with per-endpoint failure modes and per-identity hangs.
//! Clones share state, so a test can keep a handle while the query client
//! owns another.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cohort_core::Identity;
use nostr_sdk::{Event, EventBuilder, Keys, Kind, Tag, Timestamp};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::record::newest_first;
use crate::relay::{FrameSink, RecordQuery, RelayConnector};
use crate::{Error, Result};

/// How a simulated endpoint answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Serve,
    Delay(Duration),
    Hang,
    Fail,
}

#[derive(Debug, Default)]
struct State {
    stored: HashMap<String, Vec<Event>>,
    everywhere: Vec<Event>,
    behavior: HashMap<String, Behavior>,
    hung_identities: BTreeSet<Identity>,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    returned: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// A set of fake relay endpoints.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRelays {
    state: Arc<Mutex<State>>,
    counters: Arc<Counters>,
}

impl SimulatedRelays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event` on one endpoint.
    pub fn publish(&self, endpoint: &str, event: Event) {
        self.state
            .lock()
            .stored
            .entry(endpoint.to_string())
            .or_default()
            .push(event);
    }

    /// Store `event` on every endpoint.
    pub fn publish_everywhere(&self, event: Event) {
        self.state.lock().everywhere.push(event);
    }

    /// Make `endpoint` refuse every connection.
    pub fn fail(&self, endpoint: &str) {
        self.set(endpoint, Behavior::Fail);
    }

    /// Make `endpoint` accept connections and never answer. The simulated
    /// connection is closed once the query stops listening.
    pub fn hang(&self, endpoint: &str) {
        self.set(endpoint, Behavior::Hang);
    }

    /// Make `endpoint` answer after `delay`.
    pub fn delay(&self, endpoint: &str, delay: Duration) {
        self.set(endpoint, Behavior::Delay(delay));
    }

    /// Every query about `identity` (as author or referenced) hangs on every
    /// endpoint.
    pub fn hang_identity(&self, identity: Identity) {
        self.state.lock().hung_identities.insert(identity);
    }

    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Calls that have not returned on their own. A call that was aborted
    /// instead of hanging up stays counted here.
    pub fn unfinished(&self) -> usize {
        self.calls() - self.counters.returned.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open simulated connections.
    pub fn max_concurrent(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    fn set(&self, endpoint: &str, behavior: Behavior) {
        self.state
            .lock()
            .behavior
            .insert(endpoint.to_string(), behavior);
    }

    fn plan(&self, endpoint: &str, query: &RecordQuery) -> (Behavior, Vec<Event>) {
        let state = self.state.lock();
        let hung = query
            .authors
            .iter()
            .chain(query.referenced.iter())
            .any(|id| state.hung_identities.contains(id));
        let behavior = if hung {
            Behavior::Hang
        } else {
            state
                .behavior
                .get(endpoint)
                .copied()
                .unwrap_or(Behavior::Serve)
        };

        let mut events: Vec<Event> = state
            .stored
            .get(endpoint)
            .into_iter()
            .flatten()
            .chain(&state.everywhere)
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        newest_first(&mut events);
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        (behavior, events)
    }
}

struct ActiveGuard<'a>(&'a Counters);

impl<'a> ActiveGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.calls.fetch_add(1, Ordering::SeqCst);
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RelayConnector for SimulatedRelays {
    async fn fetch(
        &self,
        endpoint: &str,
        query: &RecordQuery,
        sink: FrameSink,
        _deadline: Instant,
    ) -> Result<()> {
        let _active = ActiveGuard::enter(&self.counters);
        let result = self.serve(endpoint, query, &sink).await;
        self.counters.returned.fetch_add(1, Ordering::SeqCst);
        result
    }
}

impl SimulatedRelays {
    async fn serve(&self, endpoint: &str, query: &RecordQuery, sink: &FrameSink) -> Result<()> {
        let (behavior, events) = self.plan(endpoint, query);

        match behavior {
            Behavior::Fail => return Err(Error::Relay(format!("{endpoint}: connection refused"))),
            Behavior::Hang => {
                sink.closed().await;
                return Ok(());
            }
            Behavior::Delay(delay) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = sink.closed() => return Ok(()),
                }
            }
            Behavior::Serve => {}
        }

        for event in events {
            if !sink.record(event).await {
                return Ok(());
            }
        }
        sink.end_of_stored().await;
        Ok(())
    }
}

pub fn ident_of(keys: &Keys) -> Identity {
    Identity::from(keys.public_key())
}

/// A signed record with explicit tags and timestamp.
pub fn signed(keys: &Keys, kind: Kind, content: &str, tags: Vec<Vec<String>>, created_at: u64) -> Event {
    let tags: Vec<Tag> = tags
        .into_iter()
        .map(|tag| Tag::parse(tag).expect("valid tag"))
        .collect();
    EventBuilder::new(kind, content)
        .tags(tags)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .expect("signing succeeds")
}

/// A kind-3 follow list.
pub fn follow_list(keys: &Keys, follows: &[&Keys], created_at: u64) -> Event {
    let tags = follows
        .iter()
        .map(|k| vec!["p".to_string(), k.public_key().to_hex()])
        .collect();
    signed(keys, Kind::ContactList, "", tags, created_at)
}

/// A kind-0 profile record with a display name.
pub fn profile(keys: &Keys, display_name: &str, created_at: u64) -> Event {
    let content = serde_json::json!({ "name": display_name.to_lowercase(), "display_name": display_name });
    signed(keys, Kind::Metadata, &content.to_string(), vec![], created_at)
}

/// An interaction of `kind` by `author` referencing `target`.
pub fn interaction(author: &Keys, kind: Kind, target: &Keys, created_at: u64) -> Event {
    signed(
        author,
        kind,
        "+",
        vec![vec!["p".to_string(), target.public_key().to_hex()]],
        created_at,
    )
}
