//! Orderbook state container — snapshot/delta application and analytics.
//!
//! `OrderBookState` is a plain single-owner value. [`super::OrderBook`] wraps
//! it in a lock and is the type shared between the receive loop and readers.

use super::{OrderBookDelta, OrderBookView, PriceLevel, VwapResult};
use crate::shared::{MarketId, Side};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One side of the book, keyed by price (ascending in the map).
pub(crate) type BookSide = BTreeMap<Decimal, Decimal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SideKind {
    Bids,
    Asks,
}

/// Live orderbook state that can apply snapshots and deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBookState {
    market_id: MarketId,
    bids: BookSide,
    asks: BookSide,
    last_update_id: u64,
    snapshot_count: u64,
    delta_count: u64,
    max_depth: Option<usize>,
}

impl OrderBookState {
    pub fn new(market_id: MarketId, max_depth: Option<usize>) -> Self {
        Self {
            market_id,
            max_depth,
            ..Default::default()
        }
    }

    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    /// Build a sorted, filtered, truncated side from raw levels.
    ///
    /// Runs outside any lock so the critical section is a swap.
    pub(crate) fn build_side(levels: &[PriceLevel], kind: SideKind, max_depth: Option<usize>) -> BookSide {
        let mut side = BookSide::new();
        for level in levels {
            if level.quantity > Decimal::ZERO && level.price > Decimal::ZERO {
                side.insert(level.price, level.quantity);
            }
        }
        truncate_side(&mut side, kind, max_depth);
        side
    }

    /// Install pre-built sides. Returns the spread before the swap.
    pub(crate) fn install_snapshot(
        &mut self,
        bids: BookSide,
        asks: BookSide,
        update_id: u64,
    ) -> Option<Decimal> {
        let previous_spread = self.spread();
        self.bids = bids;
        self.asks = asks;
        self.last_update_id = update_id;
        self.snapshot_count += 1;
        previous_spread
    }

    /// Replace both sides wholesale. Malformed levels are dropped.
    pub fn apply_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], update_id: u64) {
        let bids = Self::build_side(bids, SideKind::Bids, self.max_depth);
        let asks = Self::build_side(asks, SideKind::Asks, self.max_depth);
        self.install_snapshot(bids, asks, update_id);
    }

    /// Merge a delta. Returns `false` and leaves the book untouched when
    /// `delta.update_id <= last_update_id`.
    pub fn apply_delta(&mut self, delta: &OrderBookDelta) -> bool {
        if delta.update_id <= self.last_update_id {
            return false;
        }

        apply_changes(&mut self.bids, &delta.bid_changes);
        apply_changes(&mut self.asks, &delta.ask_changes);
        truncate_side(&mut self.bids, SideKind::Bids, self.max_depth);
        truncate_side(&mut self.asks, SideKind::Asks, self.max_depth);

        self.last_update_id = delta.update_id;
        self.delta_count += 1;
        true
    }

    /// Highest bid.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
    }

    /// Lowest ask.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
    }

    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Mid price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Spread as a percentage of the mid price.
    pub fn spread_percent(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let mid = self.mid_price()?;
        if mid.is_zero() {
            return None;
        }
        Some(spread / mid * Decimal::ONE_HUNDRED)
    }

    /// Top N bids, best first.
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
            .collect()
    }

    /// Top N asks, best first.
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
            .collect()
    }

    /// Sum of quantities over the best `levels` bids (all when `None`).
    pub fn bid_volume(&self, levels: Option<usize>) -> Decimal {
        self.bids
            .values()
            .rev()
            .take(levels.unwrap_or(usize::MAX))
            .copied()
            .sum()
    }

    /// Sum of quantities over the best `levels` asks (all when `None`).
    pub fn ask_volume(&self, levels: Option<usize>) -> Decimal {
        self.asks
            .values()
            .take(levels.unwrap_or(usize::MAX))
            .copied()
            .sum()
    }

    /// Volume-weighted price for taking `quantity`.
    ///
    /// `Side::Buy` walks asks upward, `Side::Sell` walks bids downward.
    pub fn vwap(&self, quantity: Decimal, side: Side) -> Option<VwapResult> {
        if quantity <= Decimal::ZERO {
            return None;
        }

        let levels: Box<dyn Iterator<Item = (&Decimal, &Decimal)> + '_> = match side {
            Side::Buy => Box::new(self.asks.iter()),
            Side::Sell => Box::new(self.bids.iter().rev()),
        };

        let mut remaining = quantity;
        let mut notional = Decimal::ZERO;
        let mut filled = Decimal::ZERO;

        for (&price, &available) in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = available.min(remaining);
            notional += price * take;
            filled += take;
            remaining -= take;
        }

        if filled.is_zero() {
            return None;
        }

        Some(VwapResult {
            vwap: notional / filled,
            fillable_quantity: filled,
        })
    }

    /// `(bid_volume - ask_volume) / (bid_volume + ask_volume)` over full depth.
    pub fn imbalance_ratio(&self) -> Option<Decimal> {
        let bids = self.bid_volume(None);
        let asks = self.ask_volume(None);
        let total = bids + asks;
        if total.is_zero() {
            return None;
        }
        Some((bids - asks) / total)
    }

    /// Get size at a specific bid price.
    pub fn bid_size_at(&self, price: Decimal) -> Option<Decimal> {
        self.bids.get(&price).copied()
    }

    /// Get size at a specific ask price.
    pub fn ask_size_at(&self, price: Decimal) -> Option<Decimal> {
        self.asks.get(&price).copied()
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Value copy of the book, optionally limited to `depth` levels per side.
    pub fn view(&self, depth: Option<usize>) -> OrderBookView {
        let depth = depth.unwrap_or(usize::MAX);
        OrderBookView {
            market_id: self.market_id.clone(),
            bids: self.top_bids(depth),
            asks: self.top_asks(depth),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread: self.spread(),
            mid_price: self.mid_price(),
            last_update_id: self.last_update_id,
            bid_volume: self.bid_volume(None),
            ask_volume: self.ask_volume(None),
            snapshot_count: self.snapshot_count,
            delta_count: self.delta_count,
        }
    }

    /// Empty both sides and reset the update id.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
    }
}

fn apply_changes(side: &mut BookSide, changes: &[PriceLevel]) {
    for change in changes {
        if change.price <= Decimal::ZERO {
            continue;
        }
        if change.quantity.is_zero() {
            side.remove(&change.price);
        } else if change.quantity > Decimal::ZERO {
            side.insert(change.price, change.quantity);
        }
    }
}

/// Drop the worst levels beyond `max_depth`: lowest bids, highest asks.
fn truncate_side(side: &mut BookSide, kind: SideKind, max_depth: Option<usize>) {
    let Some(max) = max_depth else { return };
    while side.len() > max {
        match kind {
            SideKind::Bids => side.pop_first(),
            SideKind::Asks => side.pop_last(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;

    fn levels(raw: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
        raw.iter().map(|&l| PriceLevel::from(l)).collect()
    }

    fn reference_book() -> OrderBookState {
        let mut book = OrderBookState::new(MarketId::from("BRLBTC"), None);
        book.apply_snapshot(
            &levels(&[(dec!(100000), dec!(1.0)), (dec!(99900), dec!(2.0))]),
            &levels(&[(dec!(100100), dec!(1.0)), (dec!(100200), dec!(2.0))]),
            10,
        );
        book
    }

    fn assert_sorted(book: &OrderBookState) {
        let view = book.view(None);
        assert!(view.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(view.asks.windows(2).all(|w| w[0].price < w[1].price));
    }

    #[test]
    fn test_spread_mid_and_vwap_scenario() {
        let book = reference_book();
        assert_eq!(book.spread(), Some(dec!(100)));
        assert_eq!(book.mid_price(), Some(dec!(100050)));

        let fill = book.vwap(dec!(1.5), Side::Buy).unwrap();
        assert_eq!(fill.fillable_quantity, dec!(1.5));
        let expected = (dec!(100100) * dec!(1.0) + dec!(100200) * dec!(0.5)) / dec!(1.5);
        assert!((fill.vwap - expected).abs() < dec!(0.000001));
        assert_eq!(fill.vwap.round_dp(2), dec!(100133.33));
    }

    #[test]
    fn test_snapshot_filters_and_sorts() {
        let mut book = OrderBookState::new(MarketId::from("BRLBTC"), None);
        book.apply_snapshot(
            &levels(&[(dec!(10), dec!(1)), (dec!(12), dec!(0)), (dec!(11), dec!(-1)), (dec!(9), dec!(3))]),
            &levels(&[(dec!(15), dec!(1)), (dec!(13), dec!(2))]),
            1,
        );
        assert_eq!(book.bid_count(), 2);
        assert_eq!(book.best_bid().unwrap().price, dec!(10));
        assert_eq!(book.best_ask().unwrap().price, dec!(13));
        assert_sorted(&book);
    }

    #[test]
    fn test_stale_delta_is_rejected_without_change() {
        let mut book = reference_book();
        let before = book.clone();

        let stale = OrderBookDelta {
            update_id: 10,
            bid_changes: levels(&[(dec!(100000), dec!(0))]),
            ask_changes: vec![],
        };
        assert!(!book.apply_delta(&stale));
        assert_eq!(book, before);

        let older = OrderBookDelta { update_id: 3, ..stale };
        assert!(!book.apply_delta(&older));
        assert_eq!(book.view(None), before.view(None));
    }

    #[test]
    fn test_delta_upserts_and_removes() {
        let mut book = reference_book();
        let delta = OrderBookDelta {
            update_id: 11,
            bid_changes: levels(&[(dec!(100050), dec!(0.5)), (dec!(99900), dec!(0))]),
            ask_changes: levels(&[(dec!(100100), dec!(3.0)), (dec!(100500), dec!(0))]),
        };
        assert!(book.apply_delta(&delta));
        assert_eq!(book.last_update_id(), 11);
        assert_eq!(book.best_bid(), Some(PriceLevel::new(dec!(100050), dec!(0.5))));
        assert_eq!(book.bid_size_at(dec!(99900)), None);
        assert_eq!(book.ask_size_at(dec!(100100)), Some(dec!(3.0)));
        // removing an absent level is a no-op
        assert_eq!(book.ask_count(), 2);
        assert_sorted(&book);
    }

    #[test]
    fn test_max_depth_drops_worst_levels() {
        let mut book = OrderBookState::new(MarketId::from("BRLBTC"), Some(2));
        book.apply_snapshot(
            &levels(&[(dec!(10), dec!(1)), (dec!(9), dec!(1)), (dec!(8), dec!(1))]),
            &levels(&[(dec!(11), dec!(1)), (dec!(12), dec!(1)), (dec!(13), dec!(1))]),
            1,
        );
        assert_eq!(book.top_bids(10).iter().map(|l| l.price).collect::<Vec<_>>(), vec![dec!(10), dec!(9)]);
        assert_eq!(book.top_asks(10).iter().map(|l| l.price).collect::<Vec<_>>(), vec![dec!(11), dec!(12)]);

        book.apply_delta(&OrderBookDelta {
            update_id: 2,
            bid_changes: levels(&[(dec!(10.5), dec!(1))]),
            ask_changes: levels(&[(dec!(10.8), dec!(1))]),
        });
        assert_eq!(book.top_bids(10).iter().map(|l| l.price).collect::<Vec<_>>(), vec![dec!(10.5), dec!(10)]);
        assert_eq!(book.top_asks(10).iter().map(|l| l.price).collect::<Vec<_>>(), vec![dec!(10.8), dec!(11)]);
    }

    #[test]
    fn test_spread_absent_when_a_side_is_empty() {
        let mut book = OrderBookState::new(MarketId::from("BRLBTC"), None);
        assert_eq!(book.spread(), None);
        book.apply_snapshot(&levels(&[(dec!(10), dec!(1))]), &[], 1);
        assert_eq!(book.spread(), None);
        assert_eq!(book.mid_price(), None);
        assert_eq!(book.spread_percent(), None);
        assert_eq!(book.imbalance_ratio(), Some(dec!(1)));
    }

    #[test]
    fn test_volumes_and_imbalance() {
        let book = reference_book();
        assert_eq!(book.bid_volume(None), dec!(3.0));
        assert_eq!(book.bid_volume(Some(1)), dec!(1.0));
        assert_eq!(book.ask_volume(Some(5)), dec!(3.0));
        assert_eq!(book.imbalance_ratio(), Some(dec!(0)));
    }

    #[test]
    fn test_vwap_is_bounded_by_available_volume() {
        let book = reference_book();
        let fill = book.vwap(dec!(10), Side::Sell).unwrap();
        assert_eq!(fill.fillable_quantity, dec!(3.0));
        assert!(fill.vwap <= dec!(100000) && fill.vwap >= dec!(99900));

        assert!(book.vwap(dec!(0), Side::Buy).is_none());
        assert!(OrderBookState::default().vwap(dec!(1), Side::Buy).is_none());
    }

    #[test]
    fn test_view_depth_limit_keeps_full_volumes() {
        let book = reference_book();
        let view = book.view(Some(1));
        assert_eq!(view.bids.len(), 1);
        assert_eq!(view.asks.len(), 1);
        assert_eq!(view.bid_volume, dec!(3.0));
        assert_eq!(view.snapshot_count, 1);
    }

    fn random_levels(rng: &mut StdRng, max: usize) -> Vec<PriceLevel> {
        (0..rng.gen_range(0..=max))
            .map(|_| {
                PriceLevel::new(
                    Decimal::from(rng.gen_range(90..110)),
                    Decimal::from(rng.gen_range(0..=3)),
                )
            })
            .collect()
    }

    #[test]
    fn test_random_sequences_keep_sides_ordered_and_bounded() {
        for seed in 0..32u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let max_depth = if rng.gen_bool(0.25) {
                None
            } else {
                Some(rng.gen_range(1..=8))
            };
            let mut book = OrderBookState::new(MarketId::from("BRLBTC"), max_depth);
            let mut next_id = 0u64;

            for step in 0..200 {
                let before = book.view(None);
                let previous_id = book.last_update_id();
                // a zero step re-sends the last id
                next_id += rng.gen_range(0..3);

                if rng.gen_bool(0.1) {
                    let bids = random_levels(&mut rng, 12);
                    let asks = random_levels(&mut rng, 12);
                    book.apply_snapshot(&bids, &asks, next_id);
                    assert_eq!(book.last_update_id(), next_id);
                } else {
                    let delta = OrderBookDelta {
                        update_id: next_id,
                        bid_changes: random_levels(&mut rng, 4),
                        ask_changes: random_levels(&mut rng, 4),
                    };
                    let applied = book.apply_delta(&delta);
                    assert_eq!(applied, next_id > previous_id, "seed {} step {}", seed, step);
                    if !applied {
                        let after = book.view(None);
                        assert_eq!(after.bids, before.bids);
                        assert_eq!(after.asks, before.asks);
                    }
                }

                assert_sorted(&book);
                assert!(book.last_update_id() >= previous_id);
                if let Some(depth) = max_depth {
                    assert!(book.bid_count() <= depth, "seed {} step {}", seed, step);
                    assert!(book.ask_count() <= depth, "seed {} step {}", seed, step);
                }
                let view = book.view(None);
                assert!(view
                    .bids
                    .iter()
                    .chain(view.asks.iter())
                    .all(|l| l.quantity > Decimal::ZERO));
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut book = reference_book();
        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.last_update_id(), 0);
    }
}
