//! Trade stream payload.

use crate::shared::{serde_util, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// `data` of a `trade` stream frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeData {
    #[serde(alias = "trade_id")]
    pub tid: u64,
    #[serde(default, with = "serde_util::timestamp_ms_opt")]
    pub date: Option<DateTime<Utc>>,
    /// Taker side.
    #[serde(rename = "type", alias = "side")]
    pub side: Side,
    #[serde(with = "serde_util::flexible_decimal")]
    pub price: Decimal,
    #[serde(with = "serde_util::flexible_decimal")]
    pub amount: Decimal,
}

impl TradeData {
    pub fn notional(&self) -> Decimal {
        self.price * self.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_payload() {
        let trade: TradeData = serde_json::from_str(
            r#"{"tid": 981, "date": 1700000000000, "type": "sell", "price": 100000.5, "amount": "0.002"}"#,
        )
        .unwrap();
        assert_eq!(trade.tid, 981);
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.price, dec!(100000.5));
        assert_eq!(trade.notional(), dec!(200.001));
    }

    #[test]
    fn test_trade_requires_price() {
        let result = serde_json::from_str::<TradeData>(r#"{"tid": 1, "type": "buy", "amount": 1}"#);
        assert!(result.is_err());
    }
}
