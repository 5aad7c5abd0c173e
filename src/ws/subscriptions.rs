//! Subscription keys, the subscription registry, and subscriber streams.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::shared::{Channel, MarketId};
use crate::ws::queue::{MessageQueue, OverflowPolicy};
use crate::ws::StreamMessage;

/// A server-side subscription: one channel for one market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub channel: Channel,
    pub market_id: MarketId,
}

impl SubscriptionKey {
    pub fn new(channel: Channel, market_id: MarketId) -> Self {
        Self { channel, market_id }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.market_id)
    }
}

/// Per-call overrides for a subscriber's output queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    pub capacity: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
}

impl SubscribeOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = Some(policy);
        self
    }
}

pub(crate) type SharedQueue = Arc<MessageQueue<StreamMessage>>;

#[derive(Default)]
struct Entry {
    queues: Vec<(u64, SharedQueue)>,
    maintain_book: bool,
}

/// Routing targets for one key, cloned out from under the registry lock.
pub(crate) struct Route {
    pub queues: Vec<SharedQueue>,
    pub maintain_book: bool,
}

/// Tracks active keys and the queues attached to each.
///
/// A key stays active (and is replayed on reconnect) until it is explicitly
/// removed, even when its last subscriber goes away.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Attach a queue. Returns `true` if the key was not active before.
    pub(crate) fn attach(&self, key: &SubscriptionKey, id: u64, queue: SharedQueue) -> bool {
        let mut entries = self.entries.lock();
        let is_new = !entries.contains_key(key);
        entries.entry(key.clone()).or_default().queues.push((id, queue));
        is_new
    }

    /// Mark an `orderbook` key as feeding a maintained book. Returns `true`
    /// if the key was not active before.
    pub(crate) fn maintain_book(&self, key: &SubscriptionKey) -> bool {
        let mut entries = self.entries.lock();
        let is_new = !entries.contains_key(key);
        entries.entry(key.clone()).or_default().maintain_book = true;
        is_new
    }

    /// Detach one subscriber; the key stays active.
    pub(crate) fn detach(&self, key: &SubscriptionKey, id: u64) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.queues.retain(|(qid, _)| *qid != id);
        }
    }

    /// Deactivate a key, returning the queues that were attached to it.
    pub(crate) fn remove(&self, key: &SubscriptionKey) -> Option<Vec<SharedQueue>> {
        self.entries
            .lock()
            .remove(key)
            .map(|entry| entry.queues.into_iter().map(|(_, q)| q).collect())
    }

    pub(crate) fn route(&self, key: &SubscriptionKey) -> Option<Route> {
        self.entries.lock().get(key).map(|entry| Route {
            queues: entry.queues.iter().map(|(_, q)| Arc::clone(q)).collect(),
            maintain_book: entry.maintain_book,
        })
    }

    pub(crate) fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub(crate) fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.entries.lock().get(key).map_or(0, |e| e.queues.len())
    }

    /// Active keys in a stable order, for resubscribing.
    pub(crate) fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Complete every subscriber stream. Keys stay active.
    pub(crate) fn close_all_queues(&self) -> usize {
        let queues: Vec<SharedQueue> = {
            let mut entries = self.entries.lock();
            entries
                .values_mut()
                .flat_map(|entry| entry.queues.drain(..).map(|(_, q)| q))
                .collect()
        };
        for queue in &queues {
            queue.close();
        }
        queues.len()
    }
}

// ─── Subscription stream ─────────────────────────────────────────────────────

/// One caller's view of a subscription key.
///
/// A `Stream` of [`StreamMessage`]s that ends when the subscription is
/// cancelled, the key is unsubscribed, reconnection gives up, or the client
/// is shut down. Dropping it detaches its queue; other subscribers of the
/// same key are unaffected.
pub struct Subscription {
    key: SubscriptionKey,
    id: u64,
    queue: SharedQueue,
    registry: Arc<SubscriptionRegistry>,
    inner: Pin<Box<dyn Stream<Item = StreamMessage> + Send>>,
}

impl Subscription {
    pub(crate) fn new(
        key: SubscriptionKey,
        id: u64,
        queue: SharedQueue,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let reader = Arc::clone(&queue);
        let inner = Box::pin(async_stream::stream! {
            while let Some(message) = reader.pop().await {
                yield message;
            }
        });
        Self {
            key,
            id,
            queue,
            registry,
            inner,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Next message, or `None` at end of stream. Cancelling `cancel` cancels
    /// this subscription.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Option<StreamMessage> {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            message = self.inner.next() => Some(message),
        };
        match next {
            Some(message) => message,
            None => {
                self.cancel();
                None
            }
        }
    }

    /// Stop routing to this subscriber and complete its stream.
    pub fn cancel(&self) {
        self.registry.detach(&self.key, self.id);
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Messages waiting to be read.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Messages discarded by the overflow policy.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped()
    }
}

impl Stream for Subscription {
    type Item = StreamMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}
