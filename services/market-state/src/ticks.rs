//! Classified trade tick window
//!
//! Buffers the last K trades of one symbol, classifies each by aggressor
//! side and assigns it a monotonic sequence number. Sequence numbers order
//! ticks whose timestamps collide and are never reused after eviction.
//!
//! Buy/sell counts and sizes are maintained incrementally as ticks enter
//! and leave the window, so imbalance reads are O(1).

use std::collections::{HashSet, VecDeque};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;
use types::numeric::{Price, Quantity};

/// Default condition codes that mark a buyer-initiated trade.
pub const DEFAULT_BUY_CODES: [&str; 5] = ["B", "F", "T", "I", "G"];
/// Default condition codes that mark a seller-initiated trade.
pub const DEFAULT_SELL_CODES: [&str; 5] = ["S", "H", "E", "J", "K"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggressorSide {
    Buy,
    Sell,
    Unclassified,
}

/// An executed trade as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: i64,
    pub price: Price,
    pub size: Quantity,
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Per-trade reference price, preferred over the last close.
    #[serde(default)]
    pub vwap: Option<Price>,
}

/// A tick after classification, as stored in the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedTick {
    pub sequence: u64,
    #[serde(flatten)]
    pub tick: Tick,
    pub side: AggressorSide,
}

/// Aggressor-side classification by condition code, then by price.
#[derive(Debug, Clone)]
pub struct TickClassifier {
    buy_codes: HashSet<String>,
    sell_codes: HashSet<String>,
}

impl TickClassifier {
    pub fn new<I, S>(buy_codes: I, sell_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buy_codes: buy_codes.into_iter().map(Into::into).collect(),
            sell_codes: sell_codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Buy codes `B F T I G`, sell codes `S H E J K`.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUY_CODES, DEFAULT_SELL_CODES)
    }

    /// Classify a tick.
    ///
    /// A condition code from exactly one of the two sets decides the side.
    /// Otherwise the price is compared with the tick's own vwap, or with
    /// `reference_close` when the tick carries none.
    pub fn classify(&self, tick: &Tick, reference_close: Option<Price>) -> AggressorSide {
        let has_buy = tick.conditions.iter().any(|c| self.buy_codes.contains(c));
        let has_sell = tick.conditions.iter().any(|c| self.sell_codes.contains(c));
        match (has_buy, has_sell) {
            (true, false) => return AggressorSide::Buy,
            (false, true) => return AggressorSide::Sell,
            _ => {}
        }

        match tick.vwap.or(reference_close) {
            Some(reference) if tick.price > reference => AggressorSide::Buy,
            Some(reference) if tick.price < reference => AggressorSide::Sell,
            _ => AggressorSide::Unclassified,
        }
    }
}

impl Default for TickClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Count-bounded FIFO window of classified ticks for one symbol.
#[derive(Debug)]
pub struct TickWindow {
    symbol: Symbol,
    capacity: usize,
    classifier: TickClassifier,
    ticks: VecDeque<ClassifiedTick>,
    /// Next sequence number to hand out.
    next_sequence: u64,
    reference_close: Option<Price>,
    buy_count: usize,
    sell_count: usize,
    buy_volume: Decimal,
    sell_volume: Decimal,
}

impl TickWindow {
    pub fn new(symbol: Symbol, capacity: usize, classifier: TickClassifier) -> Self {
        let capacity = capacity.max(1);
        Self {
            symbol,
            capacity,
            classifier,
            ticks: VecDeque::with_capacity(capacity),
            next_sequence: 1,
            reference_close: None,
            buy_count: 0,
            sell_count: 0,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
        }
    }

    /// Window of 1000 ticks with the default classifier.
    pub fn with_defaults(symbol: Symbol) -> Self {
        Self::new(symbol, 1000, TickClassifier::with_defaults())
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Last known bar close, used when a tick carries no vwap.
    pub fn set_reference_close(&mut self, close: Price) {
        self.reference_close = Some(close);
    }

    pub fn reference_close(&self) -> Option<Price> {
        self.reference_close
    }

    /// Classify and append a tick, evicting the oldest beyond capacity.
    pub fn append_tick(&mut self, tick: Tick) -> ClassifiedTick {
        let side = self.classifier.classify(&tick, self.reference_close);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let classified = ClassifiedTick { sequence, tick, side };
        self.push(classified.clone());
        classified
    }

    /// Load previously persisted ticks, keeping their sequence numbers.
    ///
    /// Existing contents are discarded. Input is sorted by sequence and
    /// only the newest `capacity` entries are retained.
    pub fn restore(&mut self, mut ticks: Vec<ClassifiedTick>) {
        self.clear();
        ticks.sort_by_key(|t| t.sequence);
        ticks.dedup_by_key(|t| t.sequence);
        if let Some(last) = ticks.last() {
            self.next_sequence = self.next_sequence.max(last.sequence + 1);
        }
        for tick in ticks {
            self.push(tick);
        }
    }

    /// The `n` most recent ticks, most recent last.
    pub fn get_recent(&self, n: usize) -> Vec<ClassifiedTick> {
        let skip = self.ticks.len().saturating_sub(n);
        self.ticks.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ClassifiedTick> {
        self.ticks.iter()
    }

    /// `(buys - sells) / (buys + sells)` over tick counts.
    ///
    /// Unclassified ticks are excluded from the denominator. Returns 0
    /// when no tick is classified.
    pub fn order_flow_imbalance(&self) -> f64 {
        let classified = self.buy_count + self.sell_count;
        if classified == 0 {
            return 0.0;
        }
        (self.buy_count as f64 - self.sell_count as f64) / classified as f64
    }

    /// Size-weighted imbalance, `None` when classified size sums to zero.
    pub fn volume_order_flow_imbalance(&self) -> Option<f64> {
        let total = self.buy_volume + self.sell_volume;
        if total.is_zero() {
            return None;
        }
        ((self.buy_volume - self.sell_volume) / total).to_f64()
    }

    /// Size-weighted imbalance, falling back to tick counts.
    pub fn flow_imbalance(&self) -> f64 {
        self.volume_order_flow_imbalance()
            .unwrap_or_else(|| self.order_flow_imbalance())
    }

    pub fn buy_count(&self) -> usize {
        self.buy_count
    }

    pub fn sell_count(&self) -> usize {
        self.sell_count
    }

    pub fn unclassified_count(&self) -> usize {
        self.ticks.len() - self.buy_count - self.sell_count
    }

    /// Sequence number of the most recently appended tick, 0 if none ever.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empty the window. Sequence numbers keep counting up.
    pub fn clear(&mut self) {
        self.ticks.clear();
        self.buy_count = 0;
        self.sell_count = 0;
        self.buy_volume = Decimal::ZERO;
        self.sell_volume = Decimal::ZERO;
    }

    fn push(&mut self, tick: ClassifiedTick) {
        self.account(&tick, true);
        self.ticks.push_back(tick);
        while self.ticks.len() > self.capacity {
            if let Some(evicted) = self.ticks.pop_front() {
                self.account(&evicted, false);
            }
        }
    }

    fn account(&mut self, tick: &ClassifiedTick, entering: bool) {
        let size = tick.tick.size.as_decimal();
        match (tick.side, entering) {
            (AggressorSide::Buy, true) => {
                self.buy_count += 1;
                self.buy_volume += size;
            }
            (AggressorSide::Buy, false) => {
                self.buy_count -= 1;
                self.buy_volume -= size;
            }
            (AggressorSide::Sell, true) => {
                self.sell_count += 1;
                self.sell_volume += size;
            }
            (AggressorSide::Sell, false) => {
                self.sell_count -= 1;
                self.sell_volume -= size;
            }
            (AggressorSide::Unclassified, _) => {}
        }
    }
}
