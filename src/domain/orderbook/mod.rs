//! Orderbook domain — price levels, deltas, analytics results, book events.

pub mod book;
mod convert;
pub mod state;
pub mod wire;

pub use book::{OrderBook, OrderBookRegistry};
pub use convert::BookUpdate;
pub use state::OrderBookState;

use crate::shared::MarketId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price level. Present levels always carry `quantity > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, quantity): (Decimal, Decimal)) -> Self {
        Self { price, quantity }
    }
}

/// Incremental book change. A `quantity` of zero removes the level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub update_id: u64,
    pub bid_changes: Vec<PriceLevel>,
    pub ask_changes: Vec<PriceLevel>,
}

/// Result of walking one side of the book for a target quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VwapResult {
    pub vwap: Decimal,
    /// Quantity actually available, `<=` the requested quantity.
    pub fillable_quantity: Decimal,
}

/// Immutable copy of a book, safe to hand to any thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBookView {
    pub market_id: MarketId,
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub spread: Option<Decimal>,
    pub mid_price: Option<Decimal>,
    pub last_update_id: u64,
    /// Full-depth totals, independent of any depth limit on `bids`/`asks`.
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub snapshot_count: u64,
    pub delta_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Snapshot,
    Delta,
}

/// State-change notifications published by an [`OrderBook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    Updated {
        market_id: MarketId,
        kind: UpdateKind,
        last_update_id: u64,
    },
    SpreadChanged {
        market_id: MarketId,
        previous: Decimal,
        current: Decimal,
        /// Absolute change relative to `previous`, in percent.
        change_pct: Decimal,
    },
}

/// Book engine configuration.
#[derive(Debug, Clone)]
pub struct OrderBookConfig {
    /// Levels kept per side; worse levels are dropped on every mutation.
    pub max_depth: Option<usize>,
    /// Spread move (percent of the previous spread) that raises `SpreadChanged`.
    pub spread_change_threshold_pct: Decimal,
    /// Capacity of each book's event broadcast channel.
    pub event_capacity: usize,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            spread_change_threshold_pct: Decimal::from(5),
            event_capacity: 256,
        }
    }
}

impl OrderBookConfig {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_spread_change_threshold_pct(mut self, pct: Decimal) -> Self {
        self.spread_change_threshold_pct = pct;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
