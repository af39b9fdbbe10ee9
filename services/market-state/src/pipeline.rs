//! Per-symbol market state
//!
//! [`MarketState`] owns one [`SymbolState`] per symbol, created lazily on
//! the first event. Each symbol sits behind its own `RwLock`: `apply`
//! takes the write lock, reads take the read lock and copy out a
//! [`SymbolSnapshot`], so feature computation never sees a half-applied
//! event. Symbols never share a lock.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};
use types::errors::EventError;
use types::ids::Symbol;
use types::time::Clock;

use crate::bars::{AppendReport, Bar, BarWindow};
use crate::config::{ConfigError, PipelineConfig};
use crate::events::{DepthKind, MarketEvent, MarketEventPayload};
use crate::features::{FeatureEngine, FeatureReadiness, SymbolSnapshot};
use crate::order_book::{OrderBookAggregator, OrderBookView};
use crate::storage::StorageError;
use crate::ticks::{ClassifiedTick, Tick, TickWindow};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("state lock poisoned for {0}")]
    StatePoisoned(Symbol),
}

/// What an applied event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Book after a quote or depth update.
    Book(OrderBookView),
    /// Bar as stored, plus the window cutoff in force after the append.
    Bar { bar: Bar, report: AppendReport, cutoff: i64 },
    Tick(ClassifiedTick),
}

/// The three stores of one symbol.
pub struct SymbolState {
    symbol: Symbol,
    book: OrderBookAggregator,
    bars: BarWindow,
    ticks: TickWindow,
    clock: Arc<dyn Clock>,
}

impl SymbolState {
    pub fn new(symbol: Symbol, config: &PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            book: OrderBookAggregator::new(symbol.clone(), config.book.depth, config.book.ttl()),
            bars: BarWindow::new(
                symbol.clone(),
                config.bars.interval(),
                config.bars.window(),
                clock.clone(),
            ),
            ticks: TickWindow::new(symbol.clone(), config.ticks.capacity, config.ticks.classifier()),
            symbol,
            clock,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Route one event to the store it affects.
    pub fn apply(&mut self, event: &MarketEvent) -> Result<Applied, EventError> {
        match &event.payload {
            MarketEventPayload::Quote { bid_price, bid_size, ask_price, ask_size } => {
                self.book.apply_quote(*bid_price, *bid_size, *ask_price, *ask_size, event.timestamp);
                Ok(Applied::Book(self.book_view()))
            }
            MarketEventPayload::Depth { kind: DepthKind::Delta, bids, asks } => {
                self.book.apply_levels(bids, asks, event.timestamp);
                Ok(Applied::Book(self.book_view()))
            }
            MarketEventPayload::Depth { kind: DepthKind::Snapshot, bids, asks } => {
                self.book.replace_levels(bids, asks, event.timestamp);
                Ok(Applied::Book(self.book_view()))
            }
            MarketEventPayload::AggregateBar(ohlcv) => {
                let report = self.bars.append_bar(event.timestamp, *ohlcv)?;
                if let Some(latest) = self.bars.get_latest() {
                    self.ticks.set_reference_close(latest.ohlcv.close);
                }
                Ok(Applied::Bar {
                    bar: Bar { timestamp: report.aligned_timestamp, ohlcv: *ohlcv },
                    report,
                    cutoff: self.bars.cutoff(self.clock.now_nanos()),
                })
            }
            MarketEventPayload::Trade { price, size, conditions, vwap } => {
                let tick = self.ticks.append_tick(Tick {
                    timestamp: event.timestamp,
                    price: *price,
                    size: *size,
                    conditions: conditions.clone(),
                    vwap: *vwap,
                });
                Ok(Applied::Tick(tick))
            }
        }
    }

    /// Reload bars and ticks recovered from storage.
    ///
    /// Bars are re-appended (so they are re-aligned and re-evicted against
    /// the current clock); ticks keep their sequence numbers.
    pub fn restore(&mut self, bars: Vec<Bar>, ticks: Vec<ClassifiedTick>) -> Result<(), EventError> {
        for bar in bars {
            self.bars.append_bar(bar.timestamp, bar.ohlcv)?;
        }
        if let Some(latest) = self.bars.get_latest() {
            self.ticks.set_reference_close(latest.ohlcv.close);
        }
        self.ticks.restore(ticks);
        Ok(())
    }

    pub fn book_view(&self) -> OrderBookView {
        self.book.get_view(self.clock.now_nanos())
    }

    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.symbol.clone(),
            book: self.book_view(),
            bars: self.bars.get_window(),
            flow_imbalance: self.ticks.flow_imbalance(),
        }
    }

    pub fn book(&self) -> &OrderBookAggregator {
        &self.book
    }

    pub fn bars(&self) -> &BarWindow {
        &self.bars
    }

    pub fn ticks(&self) -> &TickWindow {
        &self.ticks
    }

    /// Drop bars that fell out of the window. Returns the number dropped.
    pub fn evict_expired(&mut self) -> usize {
        self.bars.evict_expired(self.clock.now_nanos())
    }

    pub fn clear(&mut self) {
        self.book.clear();
        self.bars.clear();
        self.ticks.clear();
    }
}

/// Every symbol's state.
pub struct MarketState {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    engine: FeatureEngine,
    symbols: DashMap<Symbol, Arc<RwLock<SymbolState>>>,
}

impl MarketState {
    pub fn new(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            book_depth = config.book.depth,
            bar_interval_ms = config.bars.interval_ms,
            bar_window_ms = config.bars.window_ms,
            tick_capacity = config.ticks.capacity,
            "MarketState initialized"
        );
        Self {
            engine: FeatureEngine::new(config.features.clone()),
            config,
            clock,
            symbols: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    /// Apply an event under the symbol's write lock, creating the symbol
    /// on first sight.
    pub fn apply(&self, event: &MarketEvent) -> Result<Applied, PipelineError> {
        let cell = self.cell_or_create(&event.symbol);
        let mut state = write(&cell, &event.symbol)?;
        let applied = state.apply(event)?;
        debug!(
            symbol = %event.symbol,
            event_type = event.event_type_label(),
            "event applied"
        );
        Ok(applied)
    }

    /// Consistent copy of a symbol's stores, `None` for an unknown symbol.
    pub fn snapshot(&self, symbol: &Symbol) -> Result<Option<SymbolSnapshot>, PipelineError> {
        let Some(cell) = self.cell(symbol) else {
            return Ok(None);
        };
        let state = read(&cell, symbol)?;
        Ok(Some(state.snapshot()))
    }

    /// Features for a symbol. An unknown symbol is simply not ready.
    pub fn compute_features(&self, symbol: &Symbol) -> Result<FeatureReadiness, PipelineError> {
        Ok(match self.snapshot(symbol)? {
            Some(snapshot) => self.engine.compute_features(&snapshot),
            None => FeatureReadiness::NotReady {
                bars: 0,
                required: self.config.features.atr_period.max(1),
            },
        })
    }

    pub fn book_view(&self, symbol: &Symbol) -> Result<Option<OrderBookView>, PipelineError> {
        let Some(cell) = self.cell(symbol) else {
            return Ok(None);
        };
        let state = read(&cell, symbol)?;
        Ok(Some(state.book_view()))
    }

    pub fn bar_window(&self, symbol: &Symbol) -> Result<Vec<Bar>, PipelineError> {
        let Some(cell) = self.cell(symbol) else {
            return Ok(Vec::new());
        };
        let state = read(&cell, symbol)?;
        Ok(state.bars().get_window())
    }

    pub fn recent_ticks(&self, symbol: &Symbol, n: usize) -> Result<Vec<ClassifiedTick>, PipelineError> {
        let Some(cell) = self.cell(symbol) else {
            return Ok(Vec::new());
        };
        let state = read(&cell, symbol)?;
        Ok(state.ticks().get_recent(n))
    }

    /// Count-based order flow imbalance of a symbol's tick window.
    pub fn order_flow_imbalance(&self, symbol: &Symbol) -> Result<f64, PipelineError> {
        let Some(cell) = self.cell(symbol) else {
            return Ok(0.0);
        };
        let state = read(&cell, symbol)?;
        Ok(state.ticks().order_flow_imbalance())
    }

    pub fn restore(
        &self,
        symbol: &Symbol,
        bars: Vec<Bar>,
        ticks: Vec<ClassifiedTick>,
    ) -> Result<(), PipelineError> {
        let cell = self.cell_or_create(symbol);
        let mut state = write(&cell, symbol)?;
        let (bar_count, tick_count) = (bars.len(), ticks.len());
        state.restore(bars, ticks)?;
        info!(symbol = %symbol, bars = bar_count, ticks = tick_count, "symbol state restored");
        Ok(())
    }

    /// Reset a symbol's stores. Returns false for an unknown symbol.
    pub fn clear(&self, symbol: &Symbol) -> Result<bool, PipelineError> {
        let Some(cell) = self.cell(symbol) else {
            return Ok(false);
        };
        write(&cell, symbol)?.clear();
        info!(symbol = %symbol, "symbol state cleared");
        Ok(true)
    }

    /// Run bar eviction for every symbol. Returns the number of bars dropped.
    pub fn evict_expired(&self) -> Result<usize, PipelineError> {
        let mut evicted = 0;
        for symbol in self.symbols() {
            if let Some(cell) = self.cell(&symbol) {
                evicted += write(&cell, &symbol)?.evict_expired();
            }
        }
        Ok(evicted)
    }

    /// Known symbols, sorted.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbols.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    fn cell(&self, symbol: &Symbol) -> Option<Arc<RwLock<SymbolState>>> {
        self.symbols.get(symbol).map(|e| e.value().clone())
    }

    fn cell_or_create(&self, symbol: &Symbol) -> Arc<RwLock<SymbolState>> {
        self.symbols
            .entry(symbol.clone())
            .or_insert_with(|| {
                debug!(symbol = %symbol, "creating symbol state");
                Arc::new(RwLock::new(SymbolState::new(
                    symbol.clone(),
                    &self.config,
                    self.clock.clone(),
                )))
            })
            .value()
            .clone()
    }
}

fn read<'a>(
    cell: &'a RwLock<SymbolState>,
    symbol: &Symbol,
) -> Result<RwLockReadGuard<'a, SymbolState>, PipelineError> {
    cell.read().map_err(|_| PipelineError::StatePoisoned(symbol.clone()))
}

fn write<'a>(
    cell: &'a RwLock<SymbolState>,
    symbol: &Symbol,
) -> Result<RwLockWriteGuard<'a, SymbolState>, PipelineError> {
    cell.write().map_err(|_| PipelineError::StatePoisoned(symbol.clone()))
}
