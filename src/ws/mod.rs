//! WebSocket layer — wire messages, connection state, config.
//!
//! The socket itself sits behind the [`Transport`] trait:
//! - `ws-native` feature → `tokio-tungstenite` (native.rs)
//! - tests and custom stacks supply their own implementation
//!
//! [`StreamingClient`] owns the connection lifecycle, the subscription
//! registry, and the dispatcher that fans decoded frames out to subscribers
//! and maintained order books.

pub mod client;
mod dispatch;
pub mod queue;
pub mod subscriptions;
pub mod transport;

#[cfg(feature = "ws-native")]
pub mod native;

use crate::domain::orderbook::wire::OrderBookData;
use crate::domain::ticker::TickerData;
use crate::domain::trade::TradeData;
use crate::shared::{Channel, MarketId};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

pub use client::StreamingClient;
pub use queue::OverflowPolicy;
pub use subscriptions::{SubscribeOptions, Subscription, SubscriptionKey};
pub use transport::{FrameSink, FrameStream, Transport, TransportFrame};

#[cfg(feature = "ws-native")]
pub use native::TungsteniteTransport;

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageOut {
    Subscribe { subscription: SubscriptionParams },
    Unsubscribe { subscription: SubscriptionParams },
    Ping { timestamp: i64 },
}

impl MessageOut {
    pub fn subscribe(key: &SubscriptionKey, limit: Option<u32>) -> Self {
        MessageOut::Subscribe {
            subscription: SubscriptionParams::new(key, limit),
        }
    }

    pub fn unsubscribe(key: &SubscriptionKey) -> Self {
        MessageOut::Unsubscribe {
            subscription: SubscriptionParams::new(key, None),
        }
    }

    pub fn ping() -> Self {
        MessageOut::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// `subscription` object of subscribe/unsubscribe frames.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubscriptionParams {
    pub id: MarketId,
    pub name: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl SubscriptionParams {
    fn new(key: &SubscriptionKey, limit: Option<u32>) -> Self {
        Self {
            id: key.market_id.clone(),
            name: key.channel,
            limit: if key.channel == Channel::OrderBook { limit } else { None },
        }
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// A decoded market-data message delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Ticker {
        market_id: MarketId,
        timestamp: Option<u64>,
        data: TickerData,
    },
    Trade {
        market_id: MarketId,
        timestamp: Option<u64>,
        data: TradeData,
    },
    OrderBook {
        market_id: MarketId,
        timestamp: Option<u64>,
        data: OrderBookData,
    },
}

impl StreamMessage {
    pub fn channel(&self) -> Channel {
        match self {
            StreamMessage::Ticker { .. } => Channel::Ticker,
            StreamMessage::Trade { .. } => Channel::Trades,
            StreamMessage::OrderBook { .. } => Channel::OrderBook,
        }
    }

    pub fn market_id(&self) -> &MarketId {
        match self {
            StreamMessage::Ticker { market_id, .. }
            | StreamMessage::Trade { market_id, .. }
            | StreamMessage::OrderBook { market_id, .. } => market_id,
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.channel(), self.market_id().clone())
    }
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Streaming connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Closed = 4,
    /// Terminal until the caller connects again.
    Failed = 5,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Closed,
            5 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Connection lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection gave up; all subscription streams have ended.
    Failed { attempts: u32 },
}

// ─── Config ──────────────────────────────────────────────────────────────────

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Bound on the transport handshake.
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Missing pong after this long is treated as a lost connection.
    pub pong_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Fractional jitter applied to reconnect delays (0.25 = ±25%).
    pub reconnect_jitter: f64,
    /// Default per-subscription queue capacity.
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Depth requested on `orderbook` subscriptions.
    pub orderbook_limit: Option<u32>,
    /// Wait for a graceful close on disconnect.
    pub close_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            reconnect_jitter: 0.25,
            queue_capacity: 1000,
            overflow_policy: OverflowPolicy::DropOldest,
            orderbook_limit: None,
            close_timeout: Duration::from_secs(2),
            event_capacity: 64,
        }
    }
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    pub fn with_reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_orderbook_limit(mut self, limit: u32) -> Self {
        self.orderbook_limit = Some(limit);
        self
    }

    /// `min(initial * 2^(attempt-1), max)` before jitter.
    pub fn base_reconnect_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.initial_reconnect_delay
            .checked_mul(factor)
            .unwrap_or(self.max_reconnect_delay)
            .min(self.max_reconnect_delay)
    }

    /// Jittered delay before reconnect `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.base_reconnect_delay(attempt);
        if self.reconnect_jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng()
            .gen_range((1.0 - self.reconnect_jitter)..=(1.0 + self.reconnect_jitter));
        base.mul_f64(factor)
    }
}
