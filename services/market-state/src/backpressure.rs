//! Per-symbol coalescing of pending updates
//!
//! When events for a symbol arrive faster than its worker applies them,
//! they wait here instead of in an unbounded queue. Superseded updates are
//! coalesced away:
//!
//! - quotes: a quote replaces a pending quote only when no depth update
//!   arrived in between
//! - depth snapshots: the latest replaces every earlier depth update and
//!   any earlier quote; consecutive deltas are folded together
//! - bars: the latest per aligned timestamp is kept
//! - trades: FIFO up to a cap, oldest dropped beyond it
//!
//! Quotes and depth updates share one book queue so they keep their
//! relative order. Past the cap, a quote replaces the newest pending quote
//! and a delta folds into the newest pending delta.
//!
//! Each slot remembers its arrival number so `drain()` can hand the
//! survivors back in arrival order.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tracing::{debug, warn};
use types::numeric::{Price, Quantity};
use types::time::{align_down, duration_to_nanos};

use crate::events::{DepthKind, MarketEvent, MarketEventPayload};
use crate::order_book::PriceLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Replaced or merged into `n` earlier pending updates.
    Coalesced(u64),
    /// Queued, but the oldest pending trade had to be dropped.
    DroppedOldest,
}

#[derive(Debug, Clone)]
struct Slot {
    arrival: u64,
    event: MarketEvent,
}

impl Slot {
    fn is_quote(&self) -> bool {
        matches!(self.event.payload, MarketEventPayload::Quote { .. })
    }

    fn is_delta(&self) -> bool {
        matches!(self.event.payload, MarketEventPayload::Depth { kind: DepthKind::Delta, .. })
    }
}

#[derive(Debug)]
pub struct PendingUpdates {
    interval_nanos: i64,
    max_pending_trades: usize,
    next_arrival: u64,
    /// Quotes and depth updates, in arrival order.
    book: Vec<Slot>,
    bars: BTreeMap<i64, Slot>,
    trades: VecDeque<Slot>,
    coalesced: u64,
    dropped: u64,
}

impl PendingUpdates {
    pub fn new(bar_interval: Duration, max_pending_trades: usize) -> Self {
        Self {
            interval_nanos: duration_to_nanos(bar_interval).max(1),
            max_pending_trades: max_pending_trades.max(1),
            next_arrival: 0,
            book: Vec::new(),
            bars: BTreeMap::new(),
            trades: VecDeque::new(),
            coalesced: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: MarketEvent) -> PushOutcome {
        let arrival = self.next_arrival;
        self.next_arrival += 1;

        let outcome = match &event.payload {
            MarketEventPayload::Quote { .. } => self.push_quote(arrival, event),
            MarketEventPayload::Depth { kind: DepthKind::Snapshot, .. } => {
                let superseded = self.book.len() as u64;
                self.book.clear();
                self.book.push(Slot { arrival, event });
                if superseded > 0 {
                    PushOutcome::Coalesced(superseded)
                } else {
                    PushOutcome::Queued
                }
            }
            MarketEventPayload::Depth { kind: DepthKind::Delta, .. } => self.push_delta(arrival, event),
            MarketEventPayload::AggregateBar(_) => {
                let key = align_down(event.timestamp, self.interval_nanos);
                if self.bars.insert(key, Slot { arrival, event }).is_some() {
                    PushOutcome::Coalesced(1)
                } else {
                    PushOutcome::Queued
                }
            }
            MarketEventPayload::Trade { .. } => {
                self.trades.push_back(Slot { arrival, event });
                if self.trades.len() > self.max_pending_trades {
                    self.trades.pop_front();
                    PushOutcome::DroppedOldest
                } else {
                    PushOutcome::Queued
                }
            }
        };

        match outcome {
            PushOutcome::Coalesced(n) => {
                self.coalesced += n;
                debug!(coalesced = n, "pending update superseded");
            }
            PushOutcome::DroppedOldest => {
                self.dropped += 1;
                warn!(
                    max_pending_trades = self.max_pending_trades,
                    "pending trade queue full, dropping oldest"
                );
            }
            PushOutcome::Queued => {}
        }
        outcome
    }

    /// Take every pending update, in arrival order.
    pub fn drain(&mut self) -> Vec<MarketEvent> {
        let mut slots: Vec<Slot> = Vec::with_capacity(self.len());
        slots.append(&mut self.book);
        slots.extend(std::mem::take(&mut self.bars).into_values());
        slots.extend(self.trades.drain(..));
        slots.sort_by_key(|slot| slot.arrival);
        slots.into_iter().map(|slot| slot.event).collect()
    }

    pub fn len(&self) -> usize {
        self.book.len() + self.bars.len() + self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total updates superseded since creation.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Total trades dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn cap_reached(&self) -> bool {
        self.book.len() >= self.max_pending_trades
    }

    /// Replace the pending quote when it is the newest book update.
    fn push_quote(&mut self, arrival: u64, event: MarketEvent) -> PushOutcome {
        let slot = Slot { arrival, event };
        if let Some(last) = self.book.last_mut().filter(|last| last.is_quote()) {
            *last = slot;
            return PushOutcome::Coalesced(1);
        }
        if self.cap_reached() {
            if let Some(pos) = self.book.iter().rposition(Slot::is_quote) {
                self.book.remove(pos);
                self.book.push(slot);
                return PushOutcome::Coalesced(1);
            }
        }
        self.book.push(slot);
        PushOutcome::Queued
    }

    /// Fold a delta into the newest pending delta when no quote arrived
    /// after it, so the apply order stays equivalent.
    fn push_delta(&mut self, arrival: u64, event: MarketEvent) -> PushOutcome {
        let target = match self.book.last() {
            Some(last) if last.is_delta() => Some(self.book.len() - 1),
            _ if self.cap_reached() => self.book.iter().rposition(Slot::is_delta),
            _ => None,
        };

        if let Some(last) = target.and_then(|pos| self.book.get_mut(pos)) {
            if let (
                MarketEventPayload::Depth { bids, asks, .. },
                MarketEventPayload::Depth { bids: new_bids, asks: new_asks, .. },
            ) = (&mut last.event.payload, &event.payload)
            {
                *bids = merge_levels(bids, new_bids);
                *asks = merge_levels(asks, new_asks);
                last.event.timestamp = last.event.timestamp.max(event.timestamp);
                return PushOutcome::Coalesced(1);
            }
        }

        self.book.push(Slot { arrival, event });
        PushOutcome::Queued
    }
}

/// Sum sizes by price across two delta level lists.
fn merge_levels(existing: &[PriceLevel], incoming: &[PriceLevel]) -> Vec<PriceLevel> {
    let mut merged: BTreeMap<Price, Quantity> = BTreeMap::new();
    for level in existing.iter().chain(incoming) {
        merged
            .entry(level.price)
            .and_modify(|size| *size = size.saturating_add(level.size))
            .or_insert(level.size);
    }
    merged
        .into_iter()
        .map(|(price, size)| PriceLevel { price, size })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Ohlcv;
    use crate::events::EventKind;
    use crate::order_book::OrderBookAggregator;
    use types::ids::{EventId, Symbol};

    fn event(timestamp: i64, payload: MarketEventPayload) -> MarketEvent {
        MarketEvent {
            event_id: EventId::new(),
            symbol: Symbol::new("TEST"),
            timestamp,
            payload,
        }
    }

    fn px(v: u64) -> Price {
        Price::from_u64(v).unwrap()
    }

    fn quote(ts: i64, bid: u64) -> MarketEvent {
        event(
            ts,
            MarketEventPayload::Quote {
                bid_price: px(bid),
                bid_size: Quantity::from_u64(1),
                ask_price: px(bid + 1),
                ask_size: Quantity::from_u64(1),
            },
        )
    }

    fn depth(ts: i64, kind: DepthKind, bid: u64, size: u64) -> MarketEvent {
        event(
            ts,
            MarketEventPayload::Depth {
                kind,
                bids: vec![PriceLevel { price: px(bid), size: Quantity::from_u64(size) }],
                asks: vec![],
            },
        )
    }

    fn trade(ts: i64) -> MarketEvent {
        event(
            ts,
            MarketEventPayload::Trade {
                price: px(100),
                size: Quantity::from_u64(1),
                conditions: vec![],
                vwap: None,
            },
        )
    }

    fn bar(ts: i64, close: u64) -> MarketEvent {
        event(
            ts,
            MarketEventPayload::AggregateBar(Ohlcv {
                open: px(close),
                high: px(close),
                low: px(close),
                close: px(close),
                volume: Quantity::from_u64(1),
                vwap: px(close),
            }),
        )
    }

    fn apply_all(events: &[MarketEvent]) -> OrderBookAggregator {
        let mut book = OrderBookAggregator::new(Symbol::new("TEST"), 5, Duration::from_secs(10));
        for event in events {
            match &event.payload {
                MarketEventPayload::Quote { bid_price, bid_size, ask_price, ask_size } => {
                    book.apply_quote(*bid_price, *bid_size, *ask_price, *ask_size, event.timestamp)
                }
                MarketEventPayload::Depth { kind: DepthKind::Delta, bids, asks } => {
                    book.apply_levels(bids, asks, event.timestamp)
                }
                MarketEventPayload::Depth { kind: DepthKind::Snapshot, bids, asks } => {
                    book.replace_levels(bids, asks, event.timestamp)
                }
                MarketEventPayload::Trade { .. } | MarketEventPayload::AggregateBar(_) => {}
            }
        }
        book
    }

    fn assert_drain_matches_direct(p: &mut PendingUpdates, events: Vec<MarketEvent>) {
        for event in events.iter().cloned() {
            p.push(event);
        }
        let direct = apply_all(&events);
        let coalesced = apply_all(&p.drain());
        assert_eq!(coalesced.bid_levels(), direct.bid_levels());
        assert_eq!(coalesced.ask_levels(), direct.ask_levels());
    }

    fn pending() -> PendingUpdates {
        PendingUpdates::new(Duration::from_nanos(60), 3)
    }

    #[test]
    fn test_quotes_keep_latest() {
        let mut p = pending();
        assert_eq!(p.push(quote(1, 100)), PushOutcome::Queued);
        assert_eq!(p.push(quote(2, 101)), PushOutcome::Coalesced(1));

        let drained = p.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].timestamp, 2);
        assert!(p.is_empty());
    }

    #[test]
    fn test_trades_drop_oldest_beyond_cap() {
        let mut p = pending();
        for ts in 0..3 {
            assert_eq!(p.push(trade(ts)), PushOutcome::Queued);
        }
        assert_eq!(p.push(trade(3)), PushOutcome::DroppedOldest);
        let ts: Vec<i64> = p.drain().iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![1, 2, 3]);
        assert_eq!(p.dropped(), 1);
    }

    #[test]
    fn test_bars_keep_latest_per_interval() {
        let mut p = pending();
        p.push(bar(60, 10));
        p.push(bar(120, 11));
        assert_eq!(p.push(bar(61, 12)), PushOutcome::Coalesced(1));

        let drained = p.drain();
        assert_eq!(drained.len(), 2);
        match &drained[1].payload {
            MarketEventPayload::AggregateBar(ohlcv) => assert_eq!(ohlcv.close, px(12)),
            other => panic!("expected bar, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_supersedes_depth_and_quote() {
        let mut p = pending();
        p.push(quote(1, 100));
        p.push(depth(2, DepthKind::Delta, 99, 5));
        assert_eq!(p.push(depth(3, DepthKind::Snapshot, 98, 7)), PushOutcome::Coalesced(2));
        p.push(depth(4, DepthKind::Delta, 97, 1));

        let drained = p.drain();
        let kinds: Vec<&str> = drained.iter().map(|e| e.event_type_label()).collect();
        assert_eq!(kinds, vec!["DepthSnapshot", "DepthDelta"]);
    }

    #[test]
    fn test_consecutive_deltas_fold_and_sum() {
        let mut p = pending();
        p.push(depth(1, DepthKind::Delta, 100, 5));
        assert_eq!(p.push(depth(2, DepthKind::Delta, 100, 3)), PushOutcome::Coalesced(1));

        let drained = p.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].timestamp, 2);
        match &drained[0].payload {
            MarketEventPayload::Depth { bids, .. } => {
                assert_eq!(bids, &vec![PriceLevel { price: px(100), size: Quantity::from_u64(8) }]);
            }
            other => panic!("expected depth, got {:?}", other),
        }
    }

    #[test]
    fn test_delta_after_quote_is_not_folded() {
        let mut p = pending();
        p.push(depth(1, DepthKind::Delta, 100, 5));
        p.push(quote(2, 101));
        assert_eq!(p.push(depth(3, DepthKind::Delta, 99, 1)), PushOutcome::Queued);

        let kinds: Vec<EventKind> = p.drain().iter().map(MarketEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::Depth, EventKind::Quote, EventKind::Depth]);
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut p = pending();
        p.push(trade(1));
        p.push(bar(60, 10));
        p.push(quote(3, 100));
        p.push(trade(4));

        let ts: Vec<i64> = p.drain().iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![1, 60, 3, 4]);
    }

    #[test]
    fn test_quote_does_not_jump_over_delta() {
        let mut p = pending();
        let events = vec![quote(1, 100), depth(2, DepthKind::Delta, 99, 5), quote(3, 101)];
        assert_drain_matches_direct(&mut p, events);
        assert_eq!(p.coalesced(), 0);

        let book = apply_all(&[quote(1, 100), depth(2, DepthKind::Delta, 99, 5), quote(3, 101)]);
        let bids: Vec<Price> = book.bid_levels().iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![px(101), px(99)]);
    }

    #[test]
    fn test_interleaved_book_updates_drain_equivalently() {
        let mut p = PendingUpdates::new(Duration::from_nanos(60), 64);
        let events = vec![
            depth(1, DepthKind::Delta, 95, 2),
            quote(2, 100),
            quote(3, 100),
            depth(4, DepthKind::Delta, 98, 5),
            depth(5, DepthKind::Delta, 97, 1),
            trade(6),
            quote(7, 102),
            depth(8, DepthKind::Delta, 96, 4),
            quote(9, 103),
        ];
        assert_drain_matches_direct(&mut p, events);
        // One quote replaced, one delta folded.
        assert_eq!(p.coalesced(), 2);
    }
}
