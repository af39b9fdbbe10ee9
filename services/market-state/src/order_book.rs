//! Per-symbol top-N order book aggregator
//!
//! Keeps the best N price levels per side for one symbol. Uses `BTreeMap`
//! keyed by price for deterministic sorted iteration; bids are read in
//! reverse so the best bid comes first. Sizes are `Decimal`-backed so
//! merged levels sum exactly.
//!
//! Three update paths:
//! - `apply_quote`: authoritative top-of-book, replaces the best level
//! - `apply_levels`: additive delta merge of multi-level updates
//! - `replace_levels`: full snapshot of both sides
//!
//! After every update empty levels are compressed and each side is
//! truncated back to N.

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;
use types::numeric::{Price, Quantity};
use types::time::duration_to_nanos;

/// A single aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    /// Total size resting at this price.
    pub size: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Whether a book view can be trusted for feature computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    /// No update within the TTL, or never updated at all.
    Stale,
}

/// Point-in-time copy of the top-N book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookView {
    pub symbol: Symbol,
    /// Descending by price, best first.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price, best first.
    pub asks: Vec<PriceLevel>,
    pub last_updated: Option<i64>,
    pub freshness: Freshness,
}

impl OrderBookView {
    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Summed size over the best `levels` levels of one side.
    pub fn depth(&self, side: BookSide, levels: usize) -> Decimal {
        let book = match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        };
        book.iter().take(levels).map(|l| l.size.as_decimal()).sum()
    }
}

/// Top-N order book for one symbol.
#[derive(Debug, Clone)]
pub struct OrderBookAggregator {
    symbol: Symbol,
    /// Ascending in the map; best bid is the last key.
    bids: BTreeMap<Price, Quantity>,
    /// Ascending in the map; best ask is the first key.
    asks: BTreeMap<Price, Quantity>,
    depth: usize,
    ttl_nanos: i64,
    last_updated: Option<i64>,
    update_count: u64,
}

impl OrderBookAggregator {
    /// Create an empty book holding at most `depth` levels per side.
    pub fn new(symbol: Symbol, depth: usize, ttl: Duration) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            depth: depth.max(1),
            ttl_nanos: duration_to_nanos(ttl),
            last_updated: None,
            update_count: 0,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Apply an authoritative top-of-book quote.
    ///
    /// On each side the former best level and any level priced at or
    /// better than the quote are removed, then the quoted level is
    /// inserted with exactly the quoted size. Deeper levels are kept. A
    /// zero size clears the top without inserting.
    pub fn apply_quote(
        &mut self,
        bid_price: Price,
        bid_size: Quantity,
        ask_price: Price,
        ask_size: Quantity,
        timestamp: i64,
    ) {
        self.bids.pop_last();
        self.bids.retain(|price, _| *price < bid_price);
        if !bid_size.is_zero() {
            self.bids.insert(bid_price, bid_size);
        }

        self.asks.pop_first();
        self.asks.retain(|price, _| *price > ask_price);
        if !ask_size.is_zero() {
            self.asks.insert(ask_price, ask_size);
        }

        self.finish_update(timestamp);
    }

    /// Merge a multi-level delta.
    ///
    /// Sizes add to whatever is already held at the same price, so
    /// replaying the same delta twice doubles those sizes.
    pub fn apply_levels(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], timestamp: i64) {
        Self::merge_into(&mut self.bids, bids);
        Self::merge_into(&mut self.asks, asks);
        self.finish_update(timestamp);
    }

    /// Replace both sides with a full snapshot.
    ///
    /// Duplicate prices inside the snapshot are summed. Applying the same
    /// snapshot twice leaves the book unchanged.
    pub fn replace_levels(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], timestamp: i64) {
        self.bids.clear();
        self.asks.clear();
        Self::merge_into(&mut self.bids, bids);
        Self::merge_into(&mut self.asks, asks);
        self.finish_update(timestamp);
    }

    /// Copy out the current book and classify its freshness at `now`.
    pub fn get_view(&self, now: i64) -> OrderBookView {
        OrderBookView {
            symbol: self.symbol.clone(),
            bids: self.bid_levels(),
            asks: self.ask_levels(),
            last_updated: self.last_updated,
            freshness: self.freshness(now),
        }
    }

    pub fn freshness(&self, now: i64) -> Freshness {
        match self.last_updated {
            Some(ts) if now.saturating_sub(ts) <= self.ttl_nanos => Freshness::Fresh,
            _ => Freshness::Stale,
        }
    }

    pub fn is_stale(&self, now: i64) -> bool {
        self.freshness(now) == Freshness::Stale
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
    }

    /// Mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some((bid.price.as_decimal() + ask.price.as_decimal()) / Decimal::from(2))
            }
            _ => None,
        }
    }

    /// Best ask minus best bid. Negative when the book is crossed.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price.as_decimal() - bid.price.as_decimal()),
            _ => None,
        }
    }

    /// Bid levels, best (highest) first.
    pub fn bid_levels(&self) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
            .collect()
    }

    /// Ask levels, best (lowest) first.
    pub fn ask_levels(&self) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
            .collect()
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn last_updated(&self) -> Option<i64> {
        self.last_updated
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Drop all levels and forget the last update time.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_updated = None;
    }

    fn merge_into(side: &mut BTreeMap<Price, Quantity>, levels: &[PriceLevel]) {
        for level in levels {
            side.entry(level.price)
                .and_modify(|size| *size = size.saturating_add(level.size))
                .or_insert(level.size);
        }
    }

    fn finish_update(&mut self, timestamp: i64) {
        self.compress_empty_levels();
        while self.bids.len() > self.depth {
            self.bids.pop_first();
        }
        while self.asks.len() > self.depth {
            self.asks.pop_last();
        }
        self.last_updated = Some(self.last_updated.map_or(timestamp, |ts| ts.max(timestamp)));
        self.update_count += 1;
    }

    fn compress_empty_levels(&mut self) {
        self.bids.retain(|_, size| !size.is_zero());
        self.asks.retain(|_, size| !size.is_zero());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::time::NANOS_PER_SECOND;

    fn make_book(depth: usize) -> OrderBookAggregator {
        OrderBookAggregator::new(Symbol::new("TEST"), depth, Duration::from_secs(10))
    }

    fn px(s: &str) -> Price {
        Price::from_str(s).unwrap()
    }

    fn lvl(price: &str, size: u64) -> PriceLevel {
        PriceLevel { price: px(price), size: Quantity::from_u64(size) }
    }

    #[test]
    fn test_empty_book() {
        let book = make_book(5);
        assert_eq!(book.bid_depth(), 0);
        assert_eq!(book.ask_depth(), 0);
        assert!(book.best_bid().is_none());
        assert!(book.mid_price().is_none());
        assert!(book.spread().is_none());
        assert_eq!(book.get_view(0).freshness, Freshness::Stale);
    }

    #[test]
    fn test_quote_sets_top_of_book() {
        let mut book = make_book(5);
        book.apply_quote(px("100"), Quantity::from_u64(500), px("101"), Quantity::from_u64(400), 1);

        assert_eq!(book.best_bid(), Some(lvl("100", 500)));
        assert_eq!(book.best_ask(), Some(lvl("101", 400)));
        assert_eq!(book.spread(), Some(Decimal::from(1)));
        assert_eq!(book.mid_price(), Some(Decimal::new(1005, 1)));
    }

    #[test]
    fn test_quote_replaces_rather_than_sums() {
        let mut book = make_book(5);
        book.apply_quote(px("100"), Quantity::from_u64(500), px("101"), Quantity::from_u64(400), 1);
        book.apply_quote(px("100"), Quantity::from_u64(200), px("101"), Quantity::from_u64(300), 2);

        assert_eq!(book.best_bid(), Some(lvl("100", 200)));
        assert_eq!(book.best_ask(), Some(lvl("101", 300)));
        assert_eq!(book.bid_depth(), 1);
    }

    #[test]
    fn test_quote_keeps_deeper_levels() {
        let mut book = make_book(5);
        book.replace_levels(
            &[lvl("100", 5), lvl("99", 7), lvl("98", 9)],
            &[lvl("101", 4), lvl("102", 6)],
            1,
        );

        // Bid steps down a tick: the old best is replaced, deeper levels stay.
        book.apply_quote(px("99.5"), Quantity::from_u64(3), px("101"), Quantity::from_u64(8), 2);

        let bids = book.bid_levels();
        assert_eq!(bids, vec![lvl("99.5", 3), lvl("99", 7), lvl("98", 9)]);
        assert_eq!(book.ask_levels(), vec![lvl("101", 8), lvl("102", 6)]);
    }

    #[test]
    fn test_improving_quote_drops_former_best() {
        let mut book = make_book(5);
        book.replace_levels(&[lvl("100", 5), lvl("99", 7)], &[lvl("102", 1)], 1);

        book.apply_quote(px("100.5"), Quantity::from_u64(2), px("101.5"), Quantity::from_u64(1), 2);

        assert_eq!(book.bid_levels(), vec![lvl("100.5", 2), lvl("99", 7)]);
        assert_eq!(book.ask_levels(), vec![lvl("101.5", 1)]);
    }

    #[test]
    fn test_zero_size_quote_clears_top() {
        let mut book = make_book(5);
        book.replace_levels(&[lvl("100", 5), lvl("99", 7)], &[lvl("101", 1)], 1);
        book.apply_quote(px("100"), Quantity::ZERO, px("101"), Quantity::ZERO, 2);

        assert_eq!(book.bid_levels(), vec![lvl("99", 7)]);
        assert_eq!(book.ask_depth(), 0);
    }

    #[test]
    fn test_levels_merge_additively() {
        let mut book = make_book(5);
        book.apply_levels(&[lvl("100", 500)], &[], 1);
        book.apply_levels(&[lvl("100", 250), lvl("99", 10)], &[lvl("101", 1)], 2);

        assert_eq!(book.bid_levels(), vec![lvl("100", 750), lvl("99", 10)]);
        assert_eq!(book.ask_levels(), vec![lvl("101", 1)]);
    }

    #[test]
    fn test_replaying_delta_doubles_sizes() {
        let mut book = make_book(5);
        let bids = [lvl("100", 500)];
        book.apply_levels(&bids, &[], 1);
        book.apply_levels(&bids, &[], 1);
        assert_eq!(book.best_bid(), Some(lvl("100", 1000)));
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut book = make_book(5);
        let bids = [lvl("100", 500), lvl("100", 100), lvl("99.5", 300)];
        let asks = [lvl("101", 400)];

        book.replace_levels(&bids, &asks, 1);
        let first = book.get_view(1);
        book.replace_levels(&bids, &asks, 1);
        let second = book.get_view(1);

        assert_eq!(first, second);
        assert_eq!(first.bids[0], lvl("100", 600));
    }

    #[test]
    fn test_truncates_to_depth() {
        let mut book = make_book(3);
        let bids: Vec<PriceLevel> = (90..100).map(|p| lvl(&p.to_string(), 1)).collect();
        let asks: Vec<PriceLevel> = (101..111).map(|p| lvl(&p.to_string(), 1)).collect();
        book.apply_levels(&bids, &asks, 1);

        let view = book.get_view(1);
        assert_eq!(view.bids.len(), 3);
        assert_eq!(view.asks.len(), 3);
        assert_eq!(view.bids[0].price, px("99"));
        assert_eq!(view.bids[2].price, px("97"));
        assert_eq!(view.asks[0].price, px("101"));
        assert_eq!(view.asks[2].price, px("103"));
    }

    #[test]
    fn test_view_is_sorted_best_first() {
        let mut book = make_book(5);
        book.apply_levels(
            &[lvl("98", 1), lvl("100", 1), lvl("99", 1)],
            &[lvl("103", 1), lvl("101", 1), lvl("102", 1)],
            1,
        );
        let view = book.get_view(1);
        assert!(view.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(view.asks.windows(2).all(|w| w[0].price < w[1].price));
    }

    #[test]
    fn test_zero_size_levels_are_compressed() {
        let mut book = make_book(5);
        book.apply_levels(&[lvl("100", 0)], &[lvl("101", 0)], 1);
        assert_eq!(book.bid_depth(), 0);
        assert_eq!(book.ask_depth(), 0);
    }

    #[test]
    fn test_staleness_after_ttl() {
        let mut book = make_book(5);
        let t0 = 1_000 * NANOS_PER_SECOND;
        book.apply_levels(&[lvl("100", 1)], &[], t0);

        assert!(book.get_view(t0 + 10 * NANOS_PER_SECOND).is_fresh());
        let stale = book.get_view(t0 + 11 * NANOS_PER_SECOND);
        assert_eq!(stale.freshness, Freshness::Stale);
        // Stale views still carry the last known levels.
        assert_eq!(stale.bids.len(), 1);
        assert!(book.is_stale(t0 + 11 * NANOS_PER_SECOND));

        book.apply_quote(
            px("100"),
            Quantity::from_u64(5),
            px("101"),
            Quantity::from_u64(5),
            t0 + 12 * NANOS_PER_SECOND,
        );
        assert!(!book.is_stale(t0 + 12 * NANOS_PER_SECOND));
    }

    #[test]
    fn test_view_depth_totals() {
        let mut book = make_book(5);
        book.replace_levels(&[lvl("100", 500), lvl("99", 200)], &[lvl("101", 1500)], 1);
        let view = book.get_view(1);
        assert_eq!(view.depth(BookSide::Bid, 1), Decimal::from(500));
        assert_eq!(view.depth(BookSide::Bid, 5), Decimal::from(700));
        assert_eq!(view.depth(BookSide::Ask, 5), Decimal::from(1500));
    }

    #[test]
    fn test_clear_resets_book() {
        let mut book = make_book(5);
        book.apply_levels(&[lvl("100", 1)], &[lvl("101", 1)], 1);
        book.clear();
        assert_eq!(book.bid_depth(), 0);
        assert!(book.last_updated().is_none());
    }

    #[test]
    fn test_view_serialization() {
        let mut book = make_book(5);
        book.apply_levels(&[lvl("100", 1)], &[lvl("101", 2)], 1);
        let view = book.get_view(1);
        let json = serde_json::to_string(&view).unwrap();
        let deserialized: OrderBookView = serde_json::from_str(&json).unwrap();
        assert_eq!(view, deserialized);
    }
}
