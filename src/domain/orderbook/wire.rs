//! Wire types for orderbook payloads (REST + WS).

use crate::shared::serde_util;
use rust_decimal::Decimal;
use serde::Deserialize;

// ─── WS wire types ───────────────────────────────────────────────────────────

/// `data` of an `orderbook` stream frame.
///
/// Frames are full snapshots unless `delta` is set, in which case the levels
/// are changes and a quantity of zero removes the price.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookData {
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default, alias = "update_id")]
    pub update_id: Option<u64>,
    #[serde(default)]
    pub delta: bool,
    #[serde(default, with = "serde_util::level_pairs")]
    pub bids: Vec<(Decimal, Decimal)>,
    #[serde(default, with = "serde_util::level_pairs")]
    pub asks: Vec<(Decimal, Decimal)>,
}

// ─── REST wire types ─────────────────────────────────────────────────────────

/// REST response for `GET /{symbol}/orderbook`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RestOrderBook {
    #[serde(default, with = "serde_util::level_pairs")]
    pub asks: Vec<(Decimal, Decimal)>,
    #[serde(default, with = "serde_util::level_pairs")]
    pub bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}
