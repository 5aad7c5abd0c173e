//! Bounded per-subscriber output queue.
//!
//! Pushing never blocks: a full queue applies its [`OverflowPolicy`]. There is
//! exactly one consumer per queue, so `notify_one` permits are never lost.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// What to do when a subscriber falls behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    Dropped,
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub(crate) struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl<T> MessageQueue<T> {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        state.items.push_back(item);
                    }
                    OverflowPolicy::DropNewest => {}
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Stop accepting messages. Queued messages remain readable.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Next message, or `None` once closed and drained.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}
