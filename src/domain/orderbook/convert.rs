//! Conversion: wire orderbook payloads → engine updates.

use super::wire::{OrderBookData, RestOrderBook};
use super::{OrderBookDelta, PriceLevel};

/// A decoded book mutation, ready for [`super::OrderBook::apply_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum BookUpdate {
    Snapshot {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        update_id: u64,
    },
    Delta(OrderBookDelta),
}

impl BookUpdate {
    pub fn update_id(&self) -> u64 {
        match self {
            BookUpdate::Snapshot { update_id, .. } => *update_id,
            BookUpdate::Delta(delta) => delta.update_id,
        }
    }
}

fn levels(raw: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>) -> Vec<PriceLevel> {
    raw.into_iter().map(PriceLevel::from).collect()
}

impl From<OrderBookData> for BookUpdate {
    /// The update id is `updateId` when present, otherwise the frame timestamp.
    fn from(data: OrderBookData) -> Self {
        let update_id = data.update_id.or(data.timestamp).unwrap_or(0);
        if data.delta {
            BookUpdate::Delta(OrderBookDelta {
                update_id,
                bid_changes: levels(data.bids),
                ask_changes: levels(data.asks),
            })
        } else {
            BookUpdate::Snapshot {
                bids: levels(data.bids),
                asks: levels(data.asks),
                update_id,
            }
        }
    }
}

impl From<RestOrderBook> for BookUpdate {
    fn from(book: RestOrderBook) -> Self {
        BookUpdate::Snapshot {
            bids: levels(book.bids),
            asks: levels(book.asks),
            update_id: book.timestamp.unwrap_or(0),
        }
    }
}
