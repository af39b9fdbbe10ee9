//! Feature derivation from a consistent symbol snapshot
//!
//! The engine reads a [`SymbolSnapshot`] (book view, bar window copy,
//! tick-flow imbalance) taken under the symbol's read lock and produces the
//! six-field [`FeatureVector`]. With fewer bars than the ATR period it
//! reports [`FeatureReadiness::NotReady`]; that is a normal state, not an
//! error.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;

use crate::bars::Bar;
use crate::config::FeatureConfig;
use crate::indicators::{average_true_range, mean_std, rsi, sma, z_score};
use crate::order_book::{BookSide, OrderBookView};

/// Raw (un-normalized) model inputs for one symbol at one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub symbol: Symbol,
    /// Aligned timestamp of the latest bar.
    pub timestamp: i64,
    pub atr5: f64,
    pub order_book_imbalance: f64,
    pub rsi3: f64,
    pub vwap_deviation: f64,
    pub volume_spike: bool,
    pub order_flow_imbalance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureReadiness {
    Ready(FeatureVector),
    /// Not enough bar history yet.
    NotReady { bars: usize, required: usize },
}

impl FeatureReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, FeatureReadiness::Ready(_))
    }

    pub fn into_vector(self) -> Option<FeatureVector> {
        match self {
            FeatureReadiness::Ready(vector) => Some(vector),
            FeatureReadiness::NotReady { .. } => None,
        }
    }
}

/// Read-only copy of one symbol's stores.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: Symbol,
    pub book: OrderBookView,
    /// Ascending by timestamp.
    pub bars: Vec<Bar>,
    /// Tick-window flow imbalance (size-weighted, count fallback).
    pub flow_imbalance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn compute_features(&self, snapshot: &SymbolSnapshot) -> FeatureReadiness {
        let bars = &snapshot.bars;
        let required = self.config.atr_period.max(1);
        let (Some(latest), Some(atr)) = (bars.last(), average_true_range(bars, required)) else {
            return FeatureReadiness::NotReady { bars: bars.len(), required };
        };

        let closes: Vec<f64> = bars.iter().map(Bar::close).collect();

        FeatureReadiness::Ready(FeatureVector {
            symbol: snapshot.symbol.clone(),
            timestamp: latest.timestamp,
            atr5: atr,
            order_book_imbalance: book_imbalance(&snapshot.book, self.config.imbalance_depth),
            rsi3: rsi(&closes, self.config.rsi_period),
            vwap_deviation: vwap_deviation(bars, required),
            volume_spike: volume_spike(
                bars,
                self.config.volume_period,
                self.config.volume_z_threshold,
            ),
            order_flow_imbalance: snapshot.flow_imbalance,
        })
    }
}

/// `(bid - ask) / (bid + ask)` over the best `levels` levels per side.
///
/// 0 when either side is empty.
pub fn book_imbalance(book: &OrderBookView, levels: usize) -> f64 {
    if book.bids.is_empty() || book.asks.is_empty() {
        return 0.0;
    }
    let levels = levels.max(1);
    let bid = book.depth(BookSide::Bid, levels);
    let ask = book.depth(BookSide::Ask, levels);
    let total = bid + ask;
    if total.is_zero() {
        return 0.0;
    }
    ((bid - ask) / total).to_f64().unwrap_or(0.0)
}

/// `(close - SMA(vwap)) / SMA(vwap)` over the last `period` bars.
pub fn vwap_deviation(bars: &[Bar], period: usize) -> f64 {
    let Some(latest) = bars.last() else {
        return 0.0;
    };
    let start = bars.len().saturating_sub(period.max(1));
    let vwaps: Vec<f64> = bars[start..].iter().map(Bar::vwap).collect();
    match sma(&vwaps) {
        Some(avg) if avg != 0.0 => (latest.close() - avg) / avg,
        _ => 0.0,
    }
}

/// Whether the latest bar's volume z-score exceeds `threshold`.
///
/// Compared against up to `period` bars before the latest one. Fewer than
/// two trailing bars, or zero deviation, is never a spike.
pub fn volume_spike(bars: &[Bar], period: usize, threshold: f64) -> bool {
    let Some((latest, history)) = bars.split_last() else {
        return false;
    };
    let start = history.len().saturating_sub(period);
    let trailing: Vec<f64> = history[start..].iter().map(Bar::volume).collect();
    if trailing.len() < 2 {
        return false;
    }
    mean_std(&trailing)
        .and_then(|(mean, std)| z_score(latest.volume(), mean, std))
        .is_some_and(|z| z > threshold)
}
