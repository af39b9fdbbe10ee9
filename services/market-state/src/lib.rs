//! Market State Service
//!
//! Consumes per-symbol market events (trades, quotes, depth updates and
//! aggregate bars) and maintains bounded real-time state per symbol:
//! - Top-N aggregated order book with TTL-based freshness
//! - Time-bounded OHLCV bar window
//! - Count-bounded window of aggressor-classified trade ticks
//!
//! On every bar, a six-field feature vector is derived from the three
//! stores, normalized into a stable field order and published downstream.
//!
//! # Architecture
//!
//! ```text
//!   Raw feed events (JSON)
//!          │
//!      ┌───▼───┐
//!      │Ingest │  ← Validates, dedupes
//!      └───┬───┘
//!          │
//!   ┌──────▼──────┐
//!   │ Dispatcher  │  ← One mailbox + worker per symbol, coalescing
//!   └──────┬──────┘
//!          │
//!   ┌──────┴─────┬────────────┐
//!   │            │            │
//! ┌─▼──┐    ┌────▼───┐   ┌────▼───┐
//! │Book│    │ Bars   │   │ Ticks  │ ──► StateMirror ──► StateStore
//! └─┬──┘    └────┬───┘   └────┬───┘
//!   │            │            │
//! ┌─▼────────────▼────────────▼──┐
//! │ FeatureEngine → Normalizer   │
//! └──────────────┬───────────────┘
//!                │
//!          FeatureSink
//! ```

pub mod backpressure;
pub mod bars;
pub mod config;
pub mod events;
pub mod features;
pub mod indicators;
pub mod ingestion;
pub mod metrics;
pub mod mirror;
pub mod normalize;
pub mod order_book;
pub mod pipeline;
pub mod publish;
pub mod storage;
pub mod ticks;
pub mod worker;

pub use config::PipelineConfig;
pub use events::{MarketEvent, MarketEventPayload, RawMarketEvent};
pub use features::{FeatureEngine, FeatureReadiness, FeatureVector};
pub use ingestion::{EventIngester, IngestionResult};
pub use normalize::{FeatureNormalizer, NormalizedFeatureVector};
pub use pipeline::{MarketState, PipelineError};
pub use publish::{ChannelSink, FeatureSink, PublishedFeatures};
pub use worker::Dispatcher;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
