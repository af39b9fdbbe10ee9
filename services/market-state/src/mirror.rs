//! Mirrors per-symbol state into a [`StateStore`]
//!
//! Key layout:
//!
//! | key                      | score              | retention          |
//! |--------------------------|--------------------|--------------------|
//! | `orderbook:{sym}:bid`    | `-price`           | expires after TTL  |
//! | `orderbook:{sym}:ask`    | `price`            | expires after TTL  |
//! | `bars:{sym}`             | bar time in ms     | trimmed by cutoff  |
//! | `ticks:{sym}`            | tick sequence      | last K, expiring   |
//!
//! Members are JSON. Every store call runs under `op_timeout`; a read that
//! times out or fails falls back to the caller's in-memory value and only
//! reports `Unavailable` when the caller has none.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};
use types::ids::Symbol;
use types::time::NANOS_PER_MILLI;

use crate::bars::Bar;
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::order_book::{BookSide, OrderBookView, PriceLevel};
use crate::storage::{ScoreRange, StateStore, StorageError};
use crate::ticks::ClassifiedTick;

pub fn book_key(symbol: &Symbol, side: BookSide) -> String {
    match side {
        BookSide::Bid => format!("orderbook:{}:bid", symbol),
        BookSide::Ask => format!("orderbook:{}:ask", symbol),
    }
}

pub fn bars_key(symbol: &Symbol) -> String {
    format!("bars:{}", symbol)
}

pub fn ticks_key(symbol: &Symbol) -> String {
    format!("ticks:{}", symbol)
}

/// Bar score: aligned timestamp in milliseconds, exact in an f64.
fn bar_score(timestamp: i64) -> f64 {
    timestamp.div_euclid(NANOS_PER_MILLI) as f64
}

fn level_score(side: BookSide, level: &PriceLevel) -> f64 {
    let price = level.price.to_f64();
    match side {
        BookSide::Bid => -price,
        BookSide::Ask => price,
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Codec(e.to_string()))
}

fn decode_all<T: DeserializeOwned>(members: Vec<(f64, String)>) -> Result<Vec<T>, StorageError> {
    members
        .into_iter()
        .map(|(_, member)| {
            serde_json::from_str(&member).map_err(|e| StorageError::Codec(e.to_string()))
        })
        .collect()
}

pub struct StateMirror {
    store: Arc<dyn StateStore>,
    op_timeout: Duration,
    book_ttl: Duration,
    tick_capacity: usize,
    tick_retention: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl StateMirror {
    pub fn new(store: Arc<dyn StateStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            op_timeout: config.storage.op_timeout(),
            book_ttl: config.book.ttl(),
            tick_capacity: config.ticks.capacity.max(1),
            tick_retention: config.storage.tick_retention(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Overwrite both sides of the stored book with `view`.
    pub async fn persist_book(&self, view: &OrderBookView) -> Result<(), StorageError> {
        for (side, levels) in [(BookSide::Bid, &view.bids), (BookSide::Ask, &view.asks)] {
            let key = book_key(&view.symbol, side);
            self.guarded("del", self.store.del(&key)).await?;
            for level in levels {
                let member = encode(level)?;
                self.guarded("zadd", self.store.zadd(&key, level_score(side, level), member))
                    .await?;
            }
            if !levels.is_empty() {
                self.guarded("expire", self.store.expire(&key, self.book_ttl)).await?;
            }
        }
        Ok(())
    }

    /// Upsert a bar at its aligned timestamp and drop stored bars older
    /// than `cutoff` (nanoseconds).
    pub async fn persist_bar(
        &self,
        symbol: &Symbol,
        bar: &Bar,
        cutoff: i64,
    ) -> Result<(), StorageError> {
        let key = bars_key(symbol);
        let score = bar_score(bar.timestamp);
        let member = encode(bar)?;

        self.guarded("zremrangebyscore", self.store.zrem_range_by_score(&key, ScoreRange::at(score)))
            .await?;
        self.guarded("zadd", self.store.zadd(&key, score, member)).await?;
        let evicted = self
            .guarded(
                "zremrangebyscore",
                self.store.zrem_range_by_score(&key, ScoreRange::below(bar_score(cutoff))),
            )
            .await?;
        if evicted > 0 {
            debug!(symbol = %symbol, evicted, "stored bars evicted");
        }
        Ok(())
    }

    /// Append a tick and trim the stored window to the newest K.
    pub async fn persist_tick(
        &self,
        symbol: &Symbol,
        tick: &ClassifiedTick,
    ) -> Result<(), StorageError> {
        let key = ticks_key(symbol);
        let member = encode(tick)?;
        let keep = self.tick_capacity as i64;

        self.guarded("zadd", self.store.zadd(&key, tick.sequence as f64, member)).await?;
        self.guarded("zremrangebyrank", self.store.zrem_range_by_rank(&key, 0, -(keep + 1)))
            .await?;
        self.guarded("expire", self.store.expire(&key, self.tick_retention)).await?;
        Ok(())
    }

    /// Stored bars ascending by timestamp, or `fallback` if the read fails.
    pub async fn load_bars(
        &self,
        symbol: &Symbol,
        fallback: Option<Vec<Bar>>,
    ) -> Result<Vec<Bar>, StorageError> {
        let key = bars_key(symbol);
        let result = self.fetch_all(&key).await;
        self.or_fallback("load_bars", symbol, result, fallback)
    }

    /// Stored ticks ascending by sequence, or `fallback` if the read fails.
    pub async fn load_ticks(
        &self,
        symbol: &Symbol,
        fallback: Option<Vec<ClassifiedTick>>,
    ) -> Result<Vec<ClassifiedTick>, StorageError> {
        let key = ticks_key(symbol);
        let result = self.fetch_all(&key).await;
        self.or_fallback("load_ticks", symbol, result, fallback)
    }

    /// Stored levels for one side, best first.
    pub async fn load_book_levels(
        &self,
        symbol: &Symbol,
        side: BookSide,
        fallback: Option<Vec<PriceLevel>>,
    ) -> Result<Vec<PriceLevel>, StorageError> {
        let key = book_key(symbol, side);
        let result = self.fetch_all(&key).await;
        self.or_fallback("load_book_levels", symbol, result, fallback)
    }

    /// Drop the stored tick window for a symbol.
    pub async fn discard_ticks(&self, symbol: &Symbol) -> Result<(), StorageError> {
        self.guarded("del", self.store.del(&ticks_key(symbol))).await?;
        Ok(())
    }

    /// Remove everything stored for a symbol.
    pub async fn clear(&self, symbol: &Symbol) -> Result<(), StorageError> {
        let keys = [
            book_key(symbol, BookSide::Bid),
            book_key(symbol, BookSide::Ask),
            bars_key(symbol),
            ticks_key(symbol),
        ];
        for key in &keys {
            self.guarded("del", self.store.del(key)).await?;
        }
        Ok(())
    }

    async fn fetch_all<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StorageError> {
        let members = self
            .guarded("zrangebyscore", self.store.zrange_by_score(key, ScoreRange::all()))
            .await?;
        decode_all(members)
    }

    async fn guarded<T, F>(&self, op: &'static str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match timeout(self.op_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_storage_error();
                }
                warn!(op, error = %err, "storage operation failed");
                Err(err)
            }
            Err(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_storage_timeout();
                }
                let after_ms = self.op_timeout.as_millis() as u64;
                warn!(op, after_ms, "storage operation timed out");
                Err(StorageError::Timeout { op, after_ms })
            }
        }
    }

    fn or_fallback<T>(
        &self,
        op: &'static str,
        symbol: &Symbol,
        result: Result<T, StorageError>,
        fallback: Option<T>,
    ) -> Result<T, StorageError> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        match fallback {
            Some(value) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_storage_fallback();
                }
                warn!(op, symbol = %symbol, error = %err, "using in-memory state");
                Ok(value)
            }
            None => Err(StorageError::Unavailable(format!("{} for {}: {}", op, symbol, err))),
        }
    }
}
