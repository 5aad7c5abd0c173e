//! Ticker stream payload.

use crate::shared::serde_util;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// `data` of a `ticker` stream frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TickerData {
    #[serde(default, with = "serde_util::flexible_decimal_opt")]
    pub high: Option<Decimal>,
    #[serde(default, with = "serde_util::flexible_decimal_opt")]
    pub low: Option<Decimal>,
    #[serde(default, alias = "volume", with = "serde_util::flexible_decimal_opt")]
    pub vol: Option<Decimal>,
    #[serde(default, with = "serde_util::flexible_decimal_opt")]
    pub last: Option<Decimal>,
    /// Best bid.
    #[serde(default, with = "serde_util::flexible_decimal_opt")]
    pub buy: Option<Decimal>,
    /// Best ask.
    #[serde(default, with = "serde_util::flexible_decimal_opt")]
    pub sell: Option<Decimal>,
    #[serde(default, with = "serde_util::flexible_decimal_opt")]
    pub open: Option<Decimal>,
    #[serde(default, with = "serde_util::timestamp_ms_opt")]
    pub date: Option<DateTime<Utc>>,
}

impl TickerData {
    /// Midpoint of `buy` and `sell`, when both are present.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.buy, self.sell) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}
