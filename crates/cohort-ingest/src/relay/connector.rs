//! Per-endpoint transport.
//!
//! A [`RelayConnector`] runs one filtered query against one relay endpoint and
//! pushes what it receives into a [`FrameSink`]. The query client fans a query
//! out over several endpoints by running one connector call per endpoint.
//!
//! Connectors are stateless between calls: every call opens its own
//! connection and closes it before returning, including when the query ends
//! early and closes the sink.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::{Client, Event, RelayStatus};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::RecordQuery;
use crate::{Error, Result};

/// A message from an endpoint task to the query client.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// A matching stored record.
    Record { endpoint: usize, event: Box<Event> },
    /// The endpoint has no more stored records for this query.
    EndOfStored { endpoint: usize },
    /// The endpoint task returned. `error` is set if it failed.
    Finished {
        endpoint: usize,
        error: Option<String>,
    },
}

/// Where a connector delivers records for one endpoint.
#[derive(Debug, Clone)]
pub struct FrameSink {
    endpoint: usize,
    tx: mpsc::Sender<Delivery>,
}

impl FrameSink {
    pub(crate) fn new(endpoint: usize, tx: mpsc::Sender<Delivery>) -> Self {
        Self { endpoint, tx }
    }

    /// Deliver a record. Returns `false` once the query is over and the
    /// connector should stop.
    pub async fn record(&self, event: Event) -> bool {
        self.tx
            .send(Delivery::Record {
                endpoint: self.endpoint,
                event: Box::new(event),
            })
            .await
            .is_ok()
    }

    /// Signal end of stored records. Returns `false` once the query is over.
    pub async fn end_of_stored(&self) -> bool {
        self.tx
            .send(Delivery::EndOfStored {
                endpoint: self.endpoint,
            })
            .await
            .is_ok()
    }

    /// Resolves once the query client has stopped listening, either because
    /// the query finished or because its deadline passed.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Runs a single query against a single relay endpoint.
pub trait RelayConnector: Send + Sync + 'static {
    /// Connect to `endpoint`, send `query`, deliver matching records to
    /// `sink`, then signal end of stored records.
    ///
    /// Must not outlive `deadline` by more than the time needed to close the
    /// connection, and must hang up promptly once [`FrameSink::closed`]
    /// resolves. Calls that ignore the close are aborted after a short grace
    /// period. Returning `Err` marks the endpoint as failed for this query;
    /// the caller never retries.
    fn fetch(
        &self,
        endpoint: &str,
        query: &RecordQuery,
        sink: FrameSink,
        deadline: Instant,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Owns a per-call client and disconnects it when dropped.
///
/// The normal path calls [`ConnectionGuard::close`]. If the endpoint task is
/// aborted instead, `Drop` hands the disconnect to the runtime so the relay's
/// connection task does not keep reconnecting in the background.
struct ConnectionGuard {
    client: Arc<Client>,
    armed: bool,
}

impl ConnectionGuard {
    fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
            armed: true,
        }
    }

    async fn close(mut self) {
        self.client.disconnect().await;
        self.armed = false;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = Arc::clone(&self.client);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                client.disconnect().await;
            });
        }
    }
}

/// Production connector backed by a fresh nostr-sdk `Client` per call.
#[derive(Debug, Clone)]
pub struct NostrConnector {
    /// Upper bound on websocket connection establishment.
    connect_timeout: Duration,
}

impl Default for NostrConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl NostrConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn fetch_connected(
        &self,
        client: &Client,
        endpoint: &str,
        query: &RecordQuery,
        sink: &FrameSink,
        deadline: Instant,
    ) -> Result<()> {
        client.add_relay(endpoint).await?;
        client.connect().await;

        let relay = client.relay(endpoint).await?;
        let connect_deadline = deadline.min(Instant::now() + self.connect_timeout);
        while relay.status() != RelayStatus::Connected {
            if Instant::now() >= connect_deadline {
                return Err(Error::Relay(format!(
                    "{endpoint}: not connected after {:?}",
                    self.connect_timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let events = client.fetch_events(query.to_filter(), remaining).await?;

        for event in events.into_iter() {
            if !sink.record(event).await {
                return Ok(());
            }
        }

        // fetch_events also returns on timeout; only claim end of stored
        // records if the relay answered before the deadline.
        if Instant::now() < deadline {
            sink.end_of_stored().await;
        }
        Ok(())
    }
}

impl RelayConnector for NostrConnector {
    async fn fetch(
        &self,
        endpoint: &str,
        query: &RecordQuery,
        sink: FrameSink,
        deadline: Instant,
    ) -> Result<()> {
        let guard = ConnectionGuard::new(Client::builder().build());
        let result = tokio::select! {
            result = self.fetch_connected(&guard.client, endpoint, query, &sink, deadline) => result,
            () = sink.closed() => Ok(()),
        };
        guard.close().await;
        result
    }
}
