//! Best-effort fan-out queries across relay endpoints.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cohort_core::Identity;
use metrics::{counter, histogram};
use nostr_sdk::{Event, EventId, Filter, Kind, Timestamp};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::connector::{Delivery, FrameSink, RelayConnector};

/// A filtered query for stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub kinds: Vec<Kind>,
    pub authors: Vec<Identity>,
    /// Only records that reference this identity in a `p` tag.
    pub referenced: Option<Identity>,
    /// Only records created at or after this unix time.
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = Kind>,
    {
        Self {
            kinds: kinds.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn authors<I>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        self.authors.extend(authors);
        self
    }

    pub fn referencing(mut self, identity: Identity) -> Self {
        self.referenced = Some(identity);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The equivalent NIP-01 filter.
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new().kinds(self.kinds.iter().copied());
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().map(|a| a.public_key()));
        }
        if let Some(referenced) = self.referenced {
            filter = filter.pubkey(referenced.public_key());
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }

    /// Whether `event` satisfies every constraint except `limit`.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty()
            && !self
                .authors
                .iter()
                .any(|a| a.public_key() == event.pubkey)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at.as_u64() < since
        {
            return false;
        }
        if let Some(referenced) = self.referenced {
            let hex = referenced.to_hex();
            let tagged = event.tags.iter().any(|tag| {
                let parts = tag.as_slice();
                parts.len() >= 2 && parts[0] == "p" && parts[1].eq_ignore_ascii_case(&hex)
            });
            if !tagged {
                return false;
            }
        }
        true
    }
}

/// Result of a fan-out query.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    /// Unique records, in arrival order.
    pub records: Vec<Event>,
    /// Endpoints that signaled end of stored records.
    pub completed: usize,
    /// Endpoints that failed or closed without signaling.
    pub failed: usize,
    /// Endpoints still pending when the deadline passed.
    pub timed_out: usize,
    /// Records dropped because another endpoint already returned them.
    pub duplicates: usize,
}

impl QueryOutcome {
    /// True if no endpoint produced an answer at all.
    pub fn is_total_failure(&self) -> bool {
        self.completed == 0 && self.records.is_empty()
    }

    pub fn hit_deadline(&self) -> bool {
        self.timed_out > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointState {
    Pending,
    Completed,
    Failed,
}

/// How long endpoint tasks get to hang up after a query ends before they are
/// aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Issues queries against a set of relay endpoints.
///
/// Concurrent queries share `max_connections` permits. A query reserves its
/// share up front (one permit per endpoint, capped at `max_connections`) and
/// only then starts its clock, so an endpoint that hangs in one query can
/// never starve the endpoints of another. Endpoints of one query are
/// launched `stagger` apart.
pub struct RelayQueryClient<C> {
    connector: Arc<C>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    stagger: Duration,
}

impl<C: RelayConnector> RelayQueryClient<C> {
    pub fn new(connector: C, max_connections: usize, stagger: Duration) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            connector: Arc::new(connector),
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            stagger,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Query every endpoint and merge the results.
    ///
    /// Returns once every endpoint has signaled end of stored records (or
    /// failed), or once `timeout` has elapsed, whichever comes first. The
    /// timeout counts from the moment the query holds its connection permits.
    /// A failed endpoint is never retried within the call.
    ///
    /// When the query ends, every endpoint's [`FrameSink`] closes and the
    /// connectors get a short grace period to hang up; tasks still running
    /// after that are aborted.
    pub async fn query(
        &self,
        endpoints: &[String],
        query: &RecordQuery,
        timeout: Duration,
    ) -> QueryOutcome {
        let mut outcome = QueryOutcome::default();
        if endpoints.is_empty() {
            return outcome;
        }

        let share = endpoints.len().min(self.max_connections);
        let Ok(_reserved) = self.permits.acquire_many(share as u32).await else {
            return outcome;
        };

        let started = std::time::Instant::now();
        let deadline = Instant::now() + timeout;
        let local = Arc::new(Semaphore::new(share));
        let (tx, mut rx) = mpsc::channel::<Delivery>(256);
        let mut tasks = JoinSet::new();

        for (index, endpoint) in endpoints.iter().enumerate() {
            let connector = Arc::clone(&self.connector);
            let local = Arc::clone(&local);
            let endpoint = endpoint.clone();
            let query = query.clone();
            let tx = tx.clone();
            let delay = self.stagger * index as u32;

            tasks.spawn(async move {
                let waiting = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    local.acquire_owned().await
                };
                let permit = tokio::select! {
                    permit = waiting => permit,
                    () = tx.closed() => return,
                };
                let Ok(_permit) = permit else {
                    return;
                };

                let sink = FrameSink::new(index, tx.clone());
                let error = connector
                    .fetch(&endpoint, &query, sink, deadline)
                    .await
                    .err()
                    .map(|e| e.to_string());
                let _ = tx
                    .send(Delivery::Finished {
                        endpoint: index,
                        error,
                    })
                    .await;
            });
        }
        drop(tx);

        let mut states = vec![EndpointState::Pending; endpoints.len()];
        let mut pending = endpoints.len();
        let mut seen: HashSet<EventId> = HashSet::new();

        while pending > 0 {
            let delivery = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(_) => break,
            };

            match delivery {
                Delivery::Record { endpoint, event } => {
                    if states[endpoint] != EndpointState::Pending {
                        continue;
                    }
                    if seen.insert(event.id) {
                        outcome.records.push(*event);
                    } else {
                        outcome.duplicates += 1;
                    }
                }
                Delivery::EndOfStored { endpoint } => {
                    if states[endpoint] == EndpointState::Pending {
                        states[endpoint] = EndpointState::Completed;
                        pending -= 1;
                    }
                }
                Delivery::Finished { endpoint, error } => {
                    if states[endpoint] == EndpointState::Pending {
                        states[endpoint] = EndpointState::Failed;
                        pending -= 1;
                        let reason = error
                            .unwrap_or_else(|| "closed before end of stored records".to_string());
                        tracing::debug!(
                            relay = %endpoints[endpoint],
                            %reason,
                            "relay endpoint contributed no end of stored records"
                        );
                        counter!("relay_endpoint_failures_total").increment(1);
                    }
                }
            }
        }

        // Closing the receiver closes every sink; connectors hang up on that.
        drop(rx);
        let drained = tokio::time::timeout(CLOSE_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "relay endpoint tasks ignored close, aborting"
            );
            tasks.shutdown().await;
        }

        for state in &states {
            match state {
                EndpointState::Completed => outcome.completed += 1,
                EndpointState::Failed => outcome.failed += 1,
                EndpointState::Pending => outcome.timed_out += 1,
            }
        }

        let label = if outcome.hit_deadline() {
            "timeout"
        } else {
            "complete"
        };
        counter!("relay_query_total", "outcome" => label).increment(1);
        counter!("relay_query_records_total").increment(outcome.records.len() as u64);
        counter!("relay_query_duplicates_total").increment(outcome.duplicates as u64);
        histogram!("relay_query_duration_seconds").record(started.elapsed().as_secs_f64());

        outcome
    }
}
