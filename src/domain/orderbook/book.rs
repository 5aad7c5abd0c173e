//! Shared orderbook handle and per-market registry.

use super::state::{OrderBookState, SideKind};
use super::{
    BookEvent, BookUpdate, OrderBookConfig, OrderBookDelta, OrderBookView, PriceLevel,
    UpdateKind, VwapResult,
};
use crate::shared::{MarketId, Side};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

struct BookInner {
    state: Mutex<OrderBookState>,
    events: broadcast::Sender<BookEvent>,
    config: OrderBookConfig,
}

/// A live orderbook for one market.
///
/// Cheap to clone; clones share state. Every mutation and every read runs
/// under one lock, so readers never see half of a snapshot. Events are
/// published after the lock is released.
#[derive(Clone)]
pub struct OrderBook {
    inner: Arc<BookInner>,
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("OrderBook")
            .field("market_id", state.market_id())
            .field("last_update_id", &state.last_update_id())
            .field("bids", &state.bid_count())
            .field("asks", &state.ask_count())
            .finish()
    }
}

impl OrderBook {
    pub fn new(market_id: MarketId, config: OrderBookConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(BookInner {
                state: Mutex::new(OrderBookState::new(market_id, config.max_depth)),
                events,
                config,
            }),
        }
    }

    pub fn market_id(&self) -> MarketId {
        self.inner.state.lock().market_id().clone()
    }

    /// Receive `Updated` and `SpreadChanged` events for this book.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BookEvent> {
        self.inner.events.subscribe()
    }

    /// Replace both sides. Levels with non-positive price or quantity are dropped.
    pub fn apply_snapshot(&self, bids: &[PriceLevel], asks: &[PriceLevel], update_id: u64) {
        self.install(bids, asks, update_id, false);
    }

    /// Install an out-of-band snapshot (a REST depth fetch) unless the book
    /// already holds data at or past `update_id`. Deltas apply as usual.
    pub fn seed(&self, update: &BookUpdate) -> bool {
        match update {
            BookUpdate::Snapshot {
                bids,
                asks,
                update_id,
            } => self.install(bids, asks, *update_id, true),
            BookUpdate::Delta(delta) => self.apply_delta(delta),
        }
    }

    fn install(
        &self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        update_id: u64,
        only_if_newer: bool,
    ) -> bool {
        let max_depth = self.inner.config.max_depth;
        let bids = OrderBookState::build_side(bids, SideKind::Bids, max_depth);
        let asks = OrderBookState::build_side(asks, SideKind::Asks, max_depth);

        let (market_id, previous, current) = {
            let mut state = self.inner.state.lock();
            let populated = state.last_update_id() > 0
                || state.bid_count() > 0
                || state.ask_count() > 0;
            if only_if_newer && populated && update_id <= state.last_update_id() {
                tracing::debug!(
                    market_id = %state.market_id(),
                    update_id,
                    current = state.last_update_id(),
                    "Skipping snapshot older than book"
                );
                return false;
            }
            let previous = state.install_snapshot(bids, asks, update_id);
            (state.market_id().clone(), previous, state.spread())
        };

        tracing::debug!(market_id = %market_id, update_id, "Applied orderbook snapshot");
        self.publish(BookEvent::Updated {
            market_id: market_id.clone(),
            kind: UpdateKind::Snapshot,
            last_update_id: update_id,
        });

        if let (Some(previous), Some(current)) = (previous, current) {
            if let Some(change_pct) = spread_change_pct(previous, current) {
                if change_pct > self.inner.config.spread_change_threshold_pct {
                    self.publish(BookEvent::SpreadChanged {
                        market_id,
                        previous,
                        current,
                        change_pct,
                    });
                }
            }
        }
        true
    }

    /// Merge a delta. Returns `false` for a stale update id.
    pub fn apply_delta(&self, delta: &OrderBookDelta) -> bool {
        let (applied, market_id) = {
            let mut state = self.inner.state.lock();
            (state.apply_delta(delta), state.market_id().clone())
        };

        if !applied {
            tracing::debug!(
                market_id = %market_id,
                update_id = delta.update_id,
                "Ignoring stale orderbook delta"
            );
            return false;
        }

        self.publish(BookEvent::Updated {
            market_id,
            kind: UpdateKind::Delta,
            last_update_id: delta.update_id,
        });
        true
    }

    /// Apply a decoded stream update. Snapshots always return `true`.
    pub fn apply_update(&self, update: &BookUpdate) -> bool {
        match update {
            BookUpdate::Snapshot {
                bids,
                asks,
                update_id,
            } => {
                self.apply_snapshot(bids, asks, *update_id);
                true
            }
            BookUpdate::Delta(delta) => self.apply_delta(delta),
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.inner.state.lock().best_bid()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.inner.state.lock().best_ask()
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.inner.state.lock().spread()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.inner.state.lock().mid_price()
    }

    pub fn spread_percent(&self) -> Option<Decimal> {
        self.inner.state.lock().spread_percent()
    }

    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.inner.state.lock().top_bids(n)
    }

    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.inner.state.lock().top_asks(n)
    }

    pub fn bid_volume(&self, levels: Option<usize>) -> Decimal {
        self.inner.state.lock().bid_volume(levels)
    }

    pub fn ask_volume(&self, levels: Option<usize>) -> Decimal {
        self.inner.state.lock().ask_volume(levels)
    }

    pub fn vwap(&self, quantity: Decimal, side: Side) -> Option<VwapResult> {
        self.inner.state.lock().vwap(quantity, side)
    }

    pub fn imbalance_ratio(&self) -> Option<Decimal> {
        self.inner.state.lock().imbalance_ratio()
    }

    pub fn bid_size_at(&self, price: Decimal) -> Option<Decimal> {
        self.inner.state.lock().bid_size_at(price)
    }

    pub fn ask_size_at(&self, price: Decimal) -> Option<Decimal> {
        self.inner.state.lock().ask_size_at(price)
    }

    pub fn bid_count(&self) -> usize {
        self.inner.state.lock().bid_count()
    }

    pub fn ask_count(&self) -> usize {
        self.inner.state.lock().ask_count()
    }

    pub fn last_update_id(&self) -> u64 {
        self.inner.state.lock().last_update_id()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().is_empty()
    }

    /// Immutable copy of the whole book, optionally depth-limited.
    pub fn view(&self, depth: Option<usize>) -> OrderBookView {
        self.inner.state.lock().view(depth)
    }

    pub fn clear(&self) {
        self.inner.state.lock().clear();
    }

    fn publish(&self, event: BookEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }
}

fn spread_change_pct(previous: Decimal, current: Decimal) -> Option<Decimal> {
    if previous <= Decimal::ZERO {
        return None;
    }
    Some(((current - previous) / previous * Decimal::ONE_HUNDRED).abs())
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Per-market orderbooks, created on first use.
#[derive(Clone, Default)]
pub struct OrderBookRegistry {
    books: Arc<RwLock<HashMap<MarketId, OrderBook>>>,
    config: OrderBookConfig,
}

impl OrderBookRegistry {
    pub fn new(config: OrderBookConfig) -> Self {
        Self {
            books: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn get(&self, market_id: &MarketId) -> Option<OrderBook> {
        self.books.read().get(market_id).cloned()
    }

    pub fn get_or_create(&self, market_id: &MarketId) -> OrderBook {
        if let Some(book) = self.books.read().get(market_id) {
            return book.clone();
        }
        self.books
            .write()
            .entry(market_id.clone())
            .or_insert_with(|| OrderBook::new(market_id.clone(), self.config.clone()))
            .clone()
    }

    pub fn remove(&self, market_id: &MarketId) -> Option<OrderBook> {
        self.books.write().remove(market_id)
    }

    pub fn contains(&self, market_id: &MarketId) -> bool {
        self.books.read().contains_key(market_id)
    }

    pub fn markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self.books.read().keys().cloned().collect();
        markets.sort();
        markets
    }

    /// Apply an update to an existing book. Returns `false` if the market is
    /// not maintained or the update was stale.
    pub fn apply_update(&self, market_id: &MarketId, update: &BookUpdate) -> bool {
        match self.get(market_id) {
            Some(book) => book.apply_update(update),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.books.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, quantity: Decimal) -> PriceLevel {
        PriceLevel::new(price, quantity)
    }

    fn book() -> OrderBook {
        OrderBook::new(MarketId::from("BRLBTC"), OrderBookConfig::default())
    }

    #[test]
    fn test_snapshot_publishes_updated_event() {
        let book = book();
        let mut events = book.subscribe_events();
        book.apply_snapshot(&[level(dec!(10), dec!(1))], &[level(dec!(11), dec!(1))], 5);

        assert_eq!(
            events.try_recv().unwrap(),
            BookEvent::Updated {
                market_id: MarketId::from("BRLBTC"),
                kind: UpdateKind::Snapshot,
                last_update_id: 5,
            }
        );
        // first snapshot has no previous spread
        assert!(events.try_recv().is_err());
    }

    fn snapshot(bid: Decimal, ask: Decimal, update_id: u64) -> BookUpdate {
        BookUpdate::Snapshot {
            bids: vec![level(bid, dec!(1))],
            asks: vec![level(ask, dec!(1))],
            update_id,
        }
    }

    #[test]
    fn test_seed_fills_fresh_book_then_stream_continues() {
        let book = book();
        assert!(book.seed(&snapshot(dec!(100), dec!(101), 10)));
        assert_eq!(book.last_update_id(), 10);

        let delta = OrderBookDelta {
            update_id: 11,
            bid_changes: vec![level(dec!(100.5), dec!(2))],
            ask_changes: vec![],
        };
        assert!(book.apply_update(&BookUpdate::Delta(delta)));
        assert_eq!(book.best_bid(), Some(level(dec!(100.5), dec!(2))));
        assert_eq!(book.last_update_id(), 11);
    }

    #[test]
    fn test_seed_does_not_replace_newer_stream_book() {
        let book = book();
        let mut events = book.subscribe_events();
        book.apply_update(&snapshot(dec!(200), dec!(201), 20));
        events.try_recv().unwrap();

        assert!(!book.seed(&snapshot(dec!(100), dec!(101), 15)));
        assert!(!book.seed(&snapshot(dec!(100), dec!(101), 20)));
        assert_eq!(book.last_update_id(), 20);
        assert_eq!(book.best_bid(), Some(level(dec!(200), dec!(1))));
        assert!(events.try_recv().is_err());

        assert!(book.seed(&snapshot(dec!(300), dec!(301), 21)));
        assert_eq!(book.best_ask(), Some(level(dec!(301), dec!(1))));
    }

    #[test]
    fn test_seed_without_timestamp_keeps_live_book() {
        let book = book();
        book.apply_update(&snapshot(dec!(200), dec!(201), 5));

        // a REST payload with no timestamp converts to update id 0
        assert!(!book.seed(&snapshot(dec!(100), dec!(101), 0)));
        assert_eq!(book.last_update_id(), 5);
        assert_eq!(book.best_bid(), Some(level(dec!(200), dec!(1))));

        let fresh = OrderBook::new(MarketId::from("BRLETH"), OrderBookConfig::default());
        assert!(fresh.seed(&snapshot(dec!(100), dec!(101), 0)));
        assert_eq!(fresh.best_bid(), Some(level(dec!(100), dec!(1))));
    }

    #[test]
    fn test_spread_change_over_threshold() {
        let book = book();
        book.apply_snapshot(&[level(dec!(100), dec!(1))], &[level(dec!(110), dec!(1))], 1);
        let mut events = book.subscribe_events();

        // 10 -> 10.4 is a 4% move, under the default 5% threshold
        book.apply_snapshot(&[level(dec!(100), dec!(1))], &[level(dec!(110.4), dec!(1))], 2);
        assert!(matches!(events.try_recv().unwrap(), BookEvent::Updated { .. }));
        assert!(events.try_recv().is_err());

        // 10.4 -> 20.8 doubles
        book.apply_snapshot(&[level(dec!(100), dec!(1))], &[level(dec!(120.8), dec!(1))], 3);
        assert!(matches!(events.try_recv().unwrap(), BookEvent::Updated { .. }));
        match events.try_recv().unwrap() {
            BookEvent::SpreadChanged {
                previous,
                current,
                change_pct,
                ..
            } => {
                assert_eq!(previous, dec!(10.4));
                assert_eq!(current, dec!(20.8));
                assert_eq!(change_pct, dec!(100));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_stale_delta_publishes_nothing() {
        let book = book();
        book.apply_snapshot(&[level(dec!(10), dec!(1))], &[level(dec!(11), dec!(1))], 7);
        let mut events = book.subscribe_events();

        let applied = book.apply_delta(&OrderBookDelta {
            update_id: 7,
            bid_changes: vec![level(dec!(10), dec!(0))],
            ask_changes: vec![],
        });
        assert!(!applied);
        assert!(events.try_recv().is_err());
        assert_eq!(book.best_bid(), Some(level(dec!(10), dec!(1))));

        assert!(book.apply_delta(&OrderBookDelta {
            update_id: 8,
            bid_changes: vec![level(dec!(10), dec!(0))],
            ask_changes: vec![],
        }));
        assert_eq!(
            events.try_recv().unwrap(),
            BookEvent::Updated {
                market_id: MarketId::from("BRLBTC"),
                kind: UpdateKind::Delta,
                last_update_id: 8,
            }
        );
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let book = book();
        let writer = book.clone();

        let handle = std::thread::spawn(move || {
            for i in 1..=500u64 {
                let offset = Decimal::from(i);
                writer.apply_snapshot(
                    &[level(dec!(1000) + offset, dec!(1))],
                    &[level(dec!(1010) + offset, dec!(1))],
                    i,
                );
            }
        });

        for _ in 0..500 {
            if let Some(spread) = book.spread() {
                assert_eq!(spread, dec!(10));
            }
        }
        handle.join().unwrap();
        assert_eq!(book.last_update_id(), 500);
    }

    #[test]
    fn test_registry_get_or_create_shares_handles() {
        let registry = OrderBookRegistry::new(OrderBookConfig::default().with_max_depth(1));
        let id = MarketId::from("BRLETH");
        assert!(registry.get(&id).is_none());

        let a = registry.get_or_create(&id);
        let b = registry.get_or_create(&id);
        a.apply_snapshot(
            &[level(dec!(5), dec!(1)), level(dec!(4), dec!(1))],
            &[level(dec!(6), dec!(1))],
            1,
        );
        assert_eq!(b.top_bids(5), vec![level(dec!(5), dec!(1))]);
        assert_eq!(registry.markets(), vec![id.clone()]);

        let update = BookUpdate::Delta(OrderBookDelta {
            update_id: 2,
            bid_changes: vec![],
            ask_changes: vec![level(dec!(6), dec!(0))],
        });
        assert!(registry.apply_update(&id, &update));
        assert!(!registry.apply_update(&MarketId::from("BRLSOL"), &update));
        assert!(registry.remove(&id).is_some());
        assert!(!registry.contains(&id));
    }
}
