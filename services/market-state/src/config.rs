//! Pipeline configuration
//!
//! Every section has a `Default` matching the documented defaults. A
//! config can be read from JSON or from `MARKET_STATE_*` environment
//! variables layered over the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::ticks::{TickClassifier, DEFAULT_BUY_CODES, DEFAULT_SELL_CODES};

const ENV_PREFIX: &str = "MARKET_STATE_";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("bar window ({window_ms}ms) is shorter than one interval ({interval_ms}ms)")]
    WindowShorterThanInterval { window_ms: u64, interval_ms: u64 },

    #[error("volume z-score threshold must be finite and positive, got {0}")]
    InvalidThreshold(String),

    #[error("invalid config JSON: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    /// Levels kept per side.
    pub depth: usize,
    pub ttl_ms: u64,
}

impl BookConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for BookConfig {
    fn default() -> Self {
        Self { depth: 5, ttl_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    pub interval_ms: u64,
    pub window_ms: u64,
}

impl BarConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            window_ms: 60 * 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Maximum ticks retained (K).
    pub capacity: usize,
    pub buy_codes: Vec<String>,
    pub sell_codes: Vec<String>,
}

impl TickConfig {
    pub fn classifier(&self) -> TickClassifier {
        TickClassifier::new(self.buy_codes.clone(), self.sell_codes.clone())
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            buy_codes: DEFAULT_BUY_CODES.iter().map(|c| c.to_string()).collect(),
            sell_codes: DEFAULT_SELL_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub volume_period: usize,
    pub volume_z_threshold: f64,
    /// Levels per side summed for book imbalance.
    pub imbalance_depth: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            atr_period: 5,
            rsi_period: 3,
            volume_period: 20,
            volume_z_threshold: 3.0,
            imbalance_depth: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub op_timeout_ms: u64,
    pub tick_retention_secs: u64,
}

impl StorageConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn tick_retention(&self) -> Duration {
        Duration::from_secs(self.tick_retention_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            op_timeout_ms: 250,
            tick_retention_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pending trades held per symbol before the oldest is dropped.
    pub max_pending_trades: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_pending_trades: 4096 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub book: BookConfig,
    pub bars: BarConfig,
    pub ticks: TickConfig,
    pub features: FeatureConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    /// Defaults overridden by `MARKET_STATE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`] with an injectable variable source.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let env = EnvReader { lookup };

        env.parse("BOOK_DEPTH", &mut cfg.book.depth);
        env.parse("BOOK_TTL_MS", &mut cfg.book.ttl_ms);
        env.parse("BAR_INTERVAL_MS", &mut cfg.bars.interval_ms);
        env.parse("BAR_WINDOW_MS", &mut cfg.bars.window_ms);
        env.parse("TICK_CAPACITY", &mut cfg.ticks.capacity);
        env.codes("BUY_CODES", &mut cfg.ticks.buy_codes);
        env.codes("SELL_CODES", &mut cfg.ticks.sell_codes);
        env.parse("ATR_PERIOD", &mut cfg.features.atr_period);
        env.parse("RSI_PERIOD", &mut cfg.features.rsi_period);
        env.parse("VOLUME_PERIOD", &mut cfg.features.volume_period);
        env.parse("VOLUME_Z_THRESHOLD", &mut cfg.features.volume_z_threshold);
        env.parse("IMBALANCE_DEPTH", &mut cfg.features.imbalance_depth);
        env.parse("STORAGE_ENABLED", &mut cfg.storage.enabled);
        env.parse("STORAGE_TIMEOUT_MS", &mut cfg.storage.op_timeout_ms);
        env.parse("TICK_RETENTION_SECS", &mut cfg.storage.tick_retention_secs);
        env.parse("MAX_PENDING_TRADES", &mut cfg.worker.max_pending_trades);

        cfg
    }

    /// Parse a JSON document; missing sections and fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("book.depth", self.book.depth as u64),
            ("book.ttl_ms", self.book.ttl_ms),
            ("bars.interval_ms", self.bars.interval_ms),
            ("ticks.capacity", self.ticks.capacity as u64),
            ("features.atr_period", self.features.atr_period as u64),
            ("features.rsi_period", self.features.rsi_period as u64),
            ("features.volume_period", self.features.volume_period as u64),
            ("features.imbalance_depth", self.features.imbalance_depth as u64),
            ("storage.op_timeout_ms", self.storage.op_timeout_ms),
            ("worker.max_pending_trades", self.worker.max_pending_trades as u64),
        ];
        if let Some((field, _)) = nonzero.into_iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }

        if self.bars.window_ms < self.bars.interval_ms {
            return Err(ConfigError::WindowShorterThanInterval {
                window_ms: self.bars.window_ms,
                interval_ms: self.bars.interval_ms,
            });
        }

        let threshold = self.features.volume_z_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(threshold.to_string()));
        }

        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<(String, String)> {
        let key = format!("{}{}", ENV_PREFIX, name);
        (self.lookup)(&key).map(|value| (key, value))
    }

    fn parse<T: std::str::FromStr>(&self, name: &str, target: &mut T) {
        if let Some((key, value)) = self.get(name) {
            match value.trim().parse() {
                Ok(parsed) => *target = parsed,
                Err(_) => warn!(key = %key, value = %value, "ignoring unparsable config value"),
            }
        }
    }

    /// Comma-separated condition codes; blank entries are skipped.
    fn codes(&self, name: &str, target: &mut Vec<String>) {
        if let Some((_, value)) = self.get(name) {
            *target = value
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.book.depth, 5);
        assert_eq!(cfg.book.ttl(), Duration::from_secs(10));
        assert_eq!(cfg.bars.interval(), Duration::from_secs(60));
        assert_eq!(cfg.bars.window(), Duration::from_secs(3600));
        assert_eq!(cfg.ticks.capacity, 1000);
        assert_eq!(cfg.ticks.buy_codes, vec!["B", "F", "T", "I", "G"]);
        assert_eq!(cfg.features.atr_period, 5);
        assert_eq!(cfg.features.rsi_period, 3);
        assert!(!cfg.storage.enabled);
        assert_eq!(cfg.storage.tick_retention(), Duration::from_secs(604_800));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            ("MARKET_STATE_BOOK_DEPTH", "10"),
            ("MARKET_STATE_TICK_CAPACITY", " 500 "),
            ("MARKET_STATE_BUY_CODES", "B, X ,,"),
            ("MARKET_STATE_STORAGE_ENABLED", "true"),
            ("MARKET_STATE_VOLUME_Z_THRESHOLD", "2.5"),
        ]));
        assert_eq!(cfg.book.depth, 10);
        assert_eq!(cfg.ticks.capacity, 500);
        assert_eq!(cfg.ticks.buy_codes, vec!["B", "X"]);
        assert!(cfg.storage.enabled);
        assert_eq!(cfg.features.volume_z_threshold, 2.5);
        assert_eq!(cfg.ticks.sell_codes.len(), 5);
    }

    #[test]
    fn test_unparsable_value_keeps_default() {
        let cfg = PipelineConfig::from_lookup(lookup(&[("MARKET_STATE_ATR_PERIOD", "five")]));
        assert_eq!(cfg.features.atr_period, 5);
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = PipelineConfig::from_json_str(r#"{"book":{"depth":3},"features":{"rsi_period":14}}"#)
            .unwrap();
        assert_eq!(cfg.book.depth, 3);
        assert_eq!(cfg.book.ttl_ms, 10_000);
        assert_eq!(cfg.features.rsi_period, 14);
        assert_eq!(cfg.features.atr_period, 5);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            PipelineConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut cfg = PipelineConfig::default();
        cfg.ticks.capacity = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { field: "ticks.capacity" }));
    }

    #[test]
    fn test_validate_rejects_short_window() {
        let mut cfg = PipelineConfig::default();
        cfg.bars.window_ms = 1_000;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::WindowShorterThanInterval { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut cfg = PipelineConfig::default();
        cfg.features.volume_z_threshold = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), cfg);
    }
}
