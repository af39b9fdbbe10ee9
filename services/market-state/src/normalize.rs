//! Model-ready normalization of feature vectors
//!
//! Each raw field is mapped into a bounded range:
//!
//! ```text
//! atr5                log1p(max(0.0001, atr5)) / 10
//! orderBookImbalance  clamp(x, -1, 1)
//! rsi3                1 / (1 + e^(-(rsi3 - 50) / 10))
//! vwapDeviation       clamp(x / 0.01, -3, 3)
//! volumeSpike         false -> 0, true -> 1
//! orderFlowImbalance  tanh(2x)
//! ```
//!
//! Non-finite inputs are replaced by the field's neutral value first, so
//! the output never contains NaN or infinity.

use serde::{Deserialize, Serialize};
use types::ids::Symbol;

use crate::features::FeatureVector;

/// Canonical field order of the model contract.
pub const FIELD_ORDER: [&str; 6] = [
    "atr5",
    "orderBookImbalance",
    "rsi3",
    "vwapDeviation",
    "volumeSpike",
    "orderFlowImbalance",
];

const ATR_FLOOR: f64 = 0.0001;
const RSI_CENTER: f64 = 50.0;
const RSI_SCALE: f64 = 10.0;
const VWAP_UNIT: f64 = 0.01;
const VWAP_LIMIT: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedFeatureVector {
    pub symbol: Symbol,
    pub timestamp: i64,
    pub atr5: f64,
    pub order_book_imbalance: f64,
    pub rsi3: f64,
    pub vwap_deviation: f64,
    pub volume_spike: f64,
    pub order_flow_imbalance: f64,
}

impl NormalizedFeatureVector {
    /// Values in [`FIELD_ORDER`].
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.atr5,
            self.order_book_imbalance,
            self.rsi3,
            self.vwap_deviation,
            self.volume_spike,
            self.order_flow_imbalance,
        ]
    }
}

/// Stateless feature normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureNormalizer;

impl FeatureNormalizer {
    pub fn field_order() -> [&'static str; 6] {
        FIELD_ORDER
    }

    pub fn normalize(&self, features: &FeatureVector) -> NormalizedFeatureVector {
        let atr = finite_or(features.atr5, 0.0);
        let imbalance = finite_or(features.order_book_imbalance, 0.0);
        let rsi = finite_or(features.rsi3, RSI_CENTER);
        let vwap = finite_or(features.vwap_deviation, 0.0);
        let flow = finite_or(features.order_flow_imbalance, 0.0);

        NormalizedFeatureVector {
            symbol: features.symbol.clone(),
            timestamp: features.timestamp,
            atr5: atr.max(ATR_FLOOR).ln_1p() / 10.0,
            order_book_imbalance: imbalance.clamp(-1.0, 1.0),
            rsi3: 1.0 / (1.0 + (-(rsi - RSI_CENTER) / RSI_SCALE).exp()),
            vwap_deviation: (vwap / VWAP_UNIT).clamp(-VWAP_LIMIT, VWAP_LIMIT),
            volume_spike: if features.volume_spike { 1.0 } else { 0.0 },
            order_flow_imbalance: (flow * 2.0).tanh(),
        }
    }
}

fn finite_or(value: f64, neutral: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        neutral
    }
}
