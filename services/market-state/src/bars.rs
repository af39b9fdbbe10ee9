//! Rolling OHLCV bar window
//!
//! Holds the aggregate bars of one symbol for a trailing time window.
//! Bars are keyed by their interval-aligned timestamp in a `BTreeMap`, so
//! iteration is chronological and a timestamp appears at most once: a
//! second bar for the same interval replaces the first.
//!
//! Eviction is relative to the injected clock, not to the newest bar.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::errors::EventError;
use types::ids::Symbol;
use types::numeric::{Price, Quantity};
use types::time::{align_down, duration_to_nanos, Clock};

/// Open/high/low/close/volume plus volume-weighted average price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
    pub vwap: Price,
}

impl Ohlcv {
    /// (high + low + close) / 3, used when a feed omits vwap.
    pub fn typical_price(high: Price, low: Price, close: Price) -> Price {
        let sum = high.as_decimal() + low.as_decimal() + close.as_decimal();
        Price::try_new(sum / Decimal::from(3)).unwrap_or(close)
    }

    /// Check OHLC consistency. Positivity and non-negative volume are
    /// already guaranteed by `Price` and `Quantity`.
    pub fn validate(&self) -> Result<(), EventError> {
        let reason = if self.high < self.low {
            Some("high below low")
        } else if self.high < self.open || self.high < self.close {
            Some("high below open or close")
        } else if self.low > self.open || self.low > self.close {
            Some("low above open or close")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(EventError::InconsistentBar { reason: reason.to_string() }),
            None => Ok(()),
        }
    }
}

/// A bar held in the window, stamped with its aligned start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Interval-aligned Unix nanoseconds.
    pub timestamp: i64,
    #[serde(flatten)]
    pub ohlcv: Ohlcv,
}

impl Bar {
    pub fn open(&self) -> f64 {
        self.ohlcv.open.to_f64()
    }

    pub fn high(&self) -> f64 {
        self.ohlcv.high.to_f64()
    }

    pub fn low(&self) -> f64 {
        self.ohlcv.low.to_f64()
    }

    pub fn close(&self) -> f64 {
        self.ohlcv.close.to_f64()
    }

    pub fn volume(&self) -> f64 {
        self.ohlcv.volume.to_f64()
    }

    pub fn vwap(&self) -> f64 {
        self.ohlcv.vwap.to_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// A bar already existed at the aligned timestamp.
    Replaced,
}

/// Result of a successful `append_bar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    pub outcome: AppendOutcome,
    pub aligned_timestamp: i64,
    /// Bars dropped by the post-append eviction pass.
    pub evicted: usize,
}

/// Time-bounded bar window for one symbol.
pub struct BarWindow {
    symbol: Symbol,
    interval_nanos: i64,
    window_nanos: i64,
    bars: BTreeMap<i64, Bar>,
    clock: Arc<dyn Clock>,
}

impl BarWindow {
    pub fn new(symbol: Symbol, interval: Duration, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            symbol,
            interval_nanos: duration_to_nanos(interval).max(1),
            window_nanos: duration_to_nanos(window),
            bars: BTreeMap::new(),
            clock,
        }
    }

    /// Align a timestamp to this window's bar interval (floor).
    pub fn align(&self, timestamp: i64) -> i64 {
        align_down(timestamp, self.interval_nanos)
    }

    /// Validate and insert a bar, then evict anything older than the window.
    ///
    /// A bar whose aligned timestamp is already present replaces it.
    pub fn append_bar(&mut self, timestamp: i64, ohlcv: Ohlcv) -> Result<AppendReport, EventError> {
        ohlcv.validate()?;

        let aligned = self.align(timestamp);
        let previous = self.bars.insert(aligned, Bar { timestamp: aligned, ohlcv });
        let outcome = if previous.is_some() {
            AppendOutcome::Replaced
        } else {
            AppendOutcome::Inserted
        };
        let evicted = self.evict_expired(self.clock.now_nanos());

        debug!(
            symbol = %self.symbol,
            timestamp = aligned,
            replaced = previous.is_some(),
            evicted,
            "bar appended"
        );

        Ok(AppendReport { outcome, aligned_timestamp: aligned, evicted })
    }

    /// Drop bars with timestamp < now - window. Returns the number dropped.
    pub fn evict_expired(&mut self, now: i64) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.bars.len();
        self.bars = self.bars.split_off(&cutoff);
        before - self.bars.len()
    }

    /// Oldest timestamp still inside the window at `now`.
    pub fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.window_nanos)
    }

    /// All bars, ascending by timestamp.
    pub fn get_window(&self) -> Vec<Bar> {
        self.bars.values().copied().collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Bar> {
        self.bars.values()
    }

    /// Most recent bar, if any.
    pub fn get_latest(&self) -> Option<&Bar> {
        self.bars.values().next_back()
    }

    /// Closing prices, ascending by timestamp.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.values().map(Bar::close).collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }
}
