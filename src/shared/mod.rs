//! Shared newtypes and utilities used across all domain modules.
//!
//! These types are serialization-transparent: they serialize/deserialize identically
//! to the raw format the exchange sends, so they can be used directly in wire types
//! without conversion overhead.

pub mod serde_util;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// ─── MarketId ────────────────────────────────────────────────────────────────

/// Streaming market identifier in `QUOTEBASE` notation (e.g. `"BRLBTC"`).
///
/// REST symbols use `BASE-QUOTE` (e.g. `"BTC-BRL"`); [`MarketId::from_symbol`]
/// performs the mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketId(String);

impl MarketId {
    /// Wrap a value that is already in market-id notation.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Map a REST symbol to a streaming market id.
    ///
    /// `"BTC-BRL"` becomes `"BRLBTC"`. Values without a hyphen are uppercased
    /// and passed through.
    pub fn from_symbol(symbol: &str) -> Self {
        Self(normalize_market_id(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Split a `BASE-QUOTE` symbol on `-`, reverse the parts, and join them uppercased.
pub fn normalize_market_id(symbol: &str) -> String {
    let trimmed = symbol.trim();
    if !trimmed.contains('-') {
        return trimmed.to_uppercase();
    }
    trimmed
        .split('-')
        .rev()
        .collect::<String>()
        .to_uppercase()
}

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MarketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for MarketId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MarketId::from_symbol(s))
    }
}

impl Serialize for MarketId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MarketId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(MarketId(s))
    }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// Streaming channel. The wire name doubles as the data frame `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "ticker")]
    Ticker,
    #[serde(rename = "trade")]
    Trades,
    #[serde(rename = "orderbook")]
    OrderBook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trades => "trade",
            Self::OrderBook => "orderbook",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ticker" => Some(Self::Ticker),
            "trade" | "trades" => Some(Self::Trades),
            "orderbook" => Some(Self::OrderBook),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Side ────────────────────────────────────────────────────────────────────

/// Taker side: `Buy` consumes asks, `Sell` consumes bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_id_from_symbol() {
        assert_eq!(MarketId::from_symbol("BTC-BRL").as_str(), "BRLBTC");
        assert_eq!(MarketId::from_symbol("eth-brl").as_str(), "BRLETH");
    }

    #[test]
    fn test_market_id_without_hyphen_passes_through_uppercased() {
        assert_eq!(MarketId::from_symbol("brlbtc").as_str(), "BRLBTC");
        assert_eq!(MarketId::from_symbol("BRLBTC").as_str(), "BRLBTC");
    }

    #[test]
    fn test_market_id_serde() {
        let id = MarketId::from("BRLBTC");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"BRLBTC\"");
        let back: MarketId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(serde_json::to_string(&Channel::Trades).unwrap(), "\"trade\"");
        assert_eq!(Channel::from_wire("orderbook"), Some(Channel::OrderBook));
        assert_eq!(Channel::from_wire("candles"), None);
    }

    #[test]
    fn test_side_serde() {
        let buy: Side = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(buy, Side::Buy);
        assert_eq!(Side::Sell.to_string(), "sell");
    }
}
