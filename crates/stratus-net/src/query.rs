//! Request/response correlation over the fire-and-forget packet channel.
//!
//! Flow:
//! 1. `query()` generates a fresh [`CorrelationId`] and registers a
//!    pending entry.
//! 2. The id is stamped into the request packet, which is sent.
//! 3. A [`QueryResponseListener`] on the reply channel completes the
//!    entry when a response with a matching id arrives.
//! 4. The caller's await resolves, or times out and evicts the entry —
//!    the map never grows unbounded from abandoned requests.

use crate::channel::NetworkChannel;
use crate::correlation::CorrelationId;
use crate::packet::Packet;
use crate::registry::{ListenerResult, PacketListener};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default timeout applied when the caller passes none.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure modes of a correlated query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// No response arrived within the caller's deadline.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    /// The channel closed while the query was pending.
    #[error("channel closed while query was pending")]
    ChannelClosed,
    /// The response body could not be decoded into the expected type.
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

struct PendingQuery {
    sender: oneshot::Sender<Packet>,
    created_at: Instant,
    timeout: Duration,
}

/// Counters over the lifetime of a [`QueryManager`].
#[derive(Debug, Default)]
pub struct QueryStats {
    /// Queries registered.
    pub registered: AtomicU64,
    /// Queries completed by a matched response.
    pub completed: AtomicU64,
    /// Queries evicted by timeout.
    pub timeouts: AtomicU64,
    /// Responses that matched no pending entry.
    pub unmatched: AtomicU64,
}

/// Concurrency-safe pending-query map.
///
/// Entries are removed exactly once: by the matching response, or by
/// the caller's timeout (with the interval sweep as a backstop). A
/// response arriving after eviction is unmatched and discarded.
pub struct QueryManager {
    pending: DashMap<CorrelationId, PendingQuery>,
    stats: QueryStats,
}

impl QueryManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { pending: DashMap::new(), stats: QueryStats::default() }
    }

    /// Send `packet` as a query on `channel` and await the response.
    ///
    /// The packet must not already carry a correlation id; a fresh one
    /// is stamped here.
    pub async fn query(
        &self,
        channel: &NetworkChannel,
        packet: Packet,
        timeout: Duration,
    ) -> Result<Packet, QueryError> {
        let (correlation_id, receiver) = self.register(timeout);
        channel.send(packet.with_correlation_id(correlation_id));

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Completion half dropped without a send: manager shut down.
                self.cancel(correlation_id);
                Err(QueryError::ChannelClosed)
            }
            Err(_) => {
                self.cancel(correlation_id);
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %correlation_id, ?timeout, "query timed out");
                Err(QueryError::Timeout(timeout))
            }
        }
    }

    /// Register a pending entry and return its id plus the receiver the
    /// response will arrive on.
    pub fn register(&self, timeout: Duration) -> (CorrelationId, oneshot::Receiver<Packet>) {
        let correlation_id = CorrelationId::new();
        let (sender, receiver) = oneshot::channel();

        self.pending.insert(
            correlation_id,
            PendingQuery { sender, created_at: Instant::now(), timeout },
        );
        self.stats.registered.fetch_add(1, Ordering::Relaxed);

        (correlation_id, receiver)
    }

    /// Complete the pending entry for `correlation_id` with `response`.
    ///
    /// Returns whether a pending entry was found and completed.
    pub fn complete(&self, correlation_id: CorrelationId, response: Packet) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                "discarding response for unknown or expired correlation id"
            );
            return false;
        };

        if pending.sender.send(response).is_err() {
            // Caller gave up between eviction check and completion.
            debug!(correlation_id = %correlation_id, "pending query receiver dropped");
            return false;
        }

        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop the pending entry for `correlation_id`, if any.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.pending.remove(&correlation_id).is_some()
    }

    /// Evict entries whose own timeout has elapsed. Returns how many
    /// were removed. Backstop for callers that abandoned the future
    /// without awaiting it.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed: usize = 0;

        self.pending.retain(|id, pending| {
            let elapsed = now.duration_since(pending.created_at);
            if elapsed > pending.timeout {
                warn!(correlation_id = %id, ?elapsed, "evicting expired pending query");
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.stats.timeouts.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Number of queries currently pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }
}

impl Default for QueryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic sweep evicting expired pending queries.
pub async fn cleanup_task(manager: Arc<QueryManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let removed = manager.remove_expired();
        if removed > 0 {
            debug!(removed, "cleaned up expired pending queries");
        }
    }
}

/// Packet listener adapting a reply channel to a [`QueryManager`].
///
/// Register one of these on each channel id that carries responses;
/// packets without a correlation id pass through untouched (they belong
/// to other listeners on the same id).
pub struct QueryResponseListener {
    manager: Arc<QueryManager>,
}

impl QueryResponseListener {
    /// Create a listener completing queries on `manager`.
    #[must_use]
    pub fn new(manager: Arc<QueryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PacketListener for QueryResponseListener {
    async fn handle(&self, _channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        if let Some(correlation_id) = packet.correlation_id() {
            self.manager.complete(correlation_id, packet.clone());
        }
        Ok(())
    }
}
