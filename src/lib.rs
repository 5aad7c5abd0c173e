//! # Mercado SDK
//!
//! Rust client core for the Mercado Bitcoin exchange API.
//!
//! ## Architecture
//!
//! The SDK is organized in layers:
//!
//! 1. **Core** — Shared newtypes, wire types, and the order book engine
//! 2. **Resilience** — Retry, circuit breaker, and rate limiter composed into a pipeline
//! 3. **HTTP API** — `HttpClient`, every call routed through the pipeline
//! 4. **Streaming** — `StreamingClient` with subscriptions, keep-alive, and reconnect
//! 5. **High-Level Client** — `MercadoClient` tying REST, streaming, and books together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mercado_sdk::prelude::*;
//!
//! let client = MercadoClient::builder().build()?;
//! let cancel = CancellationToken::new();
//!
//! client.stream().connect(&cancel).await?;
//! let book = client.track_orderbook("BTC-BRL", &cancel).await?;
//! println!("mid = {:?}", book.mid_price());
//!
//! let mut trades = client.stream().subscribe(Channel::Trades, "BTC-BRL").await?;
//! while let Some(msg) = trades.recv(&cancel).await {
//!     println!("{:?}", msg);
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes used across all domains.
pub mod shared;

/// Domain modules: order book engine, ticker and trade payloads.
pub mod domain;

/// Unified SDK error types.
pub mod error;

/// Network URL constants.
pub mod network;

// ── Layers 2–3: Resilience + HTTP API ────────────────────────────────────────

/// Resilience pipeline and (with `http`) the REST client.
pub mod http;

// ── Layer 4: Streaming ───────────────────────────────────────────────────────

/// Streaming client: messages, subscriptions, connection lifecycle.
pub mod ws;

// ── Layer 5: High-Level Client ───────────────────────────────────────────────

/// `MercadoClient` — the primary entry point.
#[cfg(feature = "http")]
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{Channel, MarketId, Side};

    // Domain types — orderbook
    pub use crate::domain::orderbook::book::{OrderBook, OrderBookRegistry};
    pub use crate::domain::orderbook::state::OrderBookState;
    pub use crate::domain::orderbook::{
        BookEvent, BookUpdate, OrderBookConfig, OrderBookDelta, OrderBookView, PriceLevel,
        UpdateKind, VwapResult,
    };

    // Domain types — ticker, trade
    pub use crate::domain::ticker::TickerData;
    pub use crate::domain::trade::TradeData;

    // Errors
    pub use crate::error::{HttpError, SdkError, WsError};

    // Network
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};

    // Resilience
    pub use crate::http::{
        CircuitBreakerConfig, CircuitState, RateLimiterConfig, ResiliencePipeline, RetryMode,
        RetryPolicy,
    };

    // HTTP client + high-level client
    #[cfg(feature = "http")]
    pub use crate::client::{MercadoClient, MercadoClientBuilder};
    #[cfg(feature = "http")]
    pub use crate::http::{HttpClient, StaticToken, TokenProvider};

    // Streaming types
    pub use crate::ws::{
        ConnectionEvent, ConnectionState, OverflowPolicy, StreamMessage, StreamingClient,
        SubscribeOptions, Subscription, SubscriptionKey, WsConfig,
    };

    pub use tokio_util::sync::CancellationToken;
}
