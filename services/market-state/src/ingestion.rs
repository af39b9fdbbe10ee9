//! Event ingestion boundary
//!
//! Turns raw feed payloads into validated [`MarketEvent`]s. Malformed
//! payloads and duplicates are counted, logged and dropped here; nothing
//! past this point sees an invalid event.
//!
//! Duplicates are detected by `event_id` within a bounded window of the
//! most recently accepted ids.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};
use types::errors::EventError;
use types::ids::EventId;

use crate::events::{MarketEvent, RawMarketEvent};
use crate::metrics::PipelineMetrics;

/// Outcome of ingesting one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestionResult {
    Accepted(MarketEvent),
    /// Already seen within the dedup window.
    Duplicate(EventId),
    Rejected(EventError),
}

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Number of recent event ids remembered for deduplication.
    pub dedup_window: usize,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self { dedup_window: 10_000 }
    }
}

pub struct EventIngester {
    config: IngesterConfig,
    seen_order: VecDeque<EventId>,
    seen: HashSet<EventId>,
    metrics: Option<Arc<PipelineMetrics>>,
    events_accepted: u64,
    events_duplicate: u64,
    events_rejected: u64,
}

impl EventIngester {
    pub fn new(config: IngesterConfig) -> Self {
        info!(dedup_window = config.dedup_window, "EventIngester initialized");
        Self {
            seen_order: VecDeque::with_capacity(config.dedup_window),
            seen: HashSet::with_capacity(config.dedup_window),
            config,
            metrics: None,
            events_accepted: 0,
            events_duplicate: 0,
            events_rejected: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(IngesterConfig::default())
    }

    /// Also report duplicates and rejections to shared pipeline metrics.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parse and ingest one JSON document.
    pub fn ingest_json(&mut self, line: &str) -> IngestionResult {
        match serde_json::from_str::<RawMarketEvent>(line) {
            Ok(raw) => self.ingest_raw(raw),
            Err(e) => self.reject(EventError::Malformed(e.to_string())),
        }
    }

    /// Validate a raw payload, then deduplicate it.
    pub fn ingest_raw(&mut self, raw: RawMarketEvent) -> IngestionResult {
        match MarketEvent::try_from(raw) {
            Ok(event) => self.ingest(event),
            Err(err) => self.reject(err),
        }
    }

    /// Deduplicate an already typed event.
    pub fn ingest(&mut self, event: MarketEvent) -> IngestionResult {
        if self.seen.contains(&event.event_id) {
            self.events_duplicate += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_duplicate();
            }
            debug!(
                event_id = %event.event_id,
                event_type = event.event_type_label(),
                "Dropping duplicate event"
            );
            return IngestionResult::Duplicate(event.event_id);
        }

        self.remember(event.event_id);
        self.events_accepted += 1;
        debug!(
            event_id = %event.event_id,
            symbol = %event.symbol,
            event_type = event.event_type_label(),
            "Event accepted"
        );
        IngestionResult::Accepted(event)
    }

    pub fn events_accepted(&self) -> u64 {
        self.events_accepted
    }

    pub fn events_duplicate(&self) -> u64 {
        self.events_duplicate
    }

    pub fn events_rejected(&self) -> u64 {
        self.events_rejected
    }

    fn reject(&mut self, err: EventError) -> IngestionResult {
        self.events_rejected += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_rejected();
        }
        warn!(reason = err.kind(), error = %err, "Dropping malformed event");
        IngestionResult::Rejected(err)
    }

    fn remember(&mut self, id: EventId) {
        if self.config.dedup_window == 0 {
            return;
        }
        if self.seen_order.len() >= self.config.dedup_window {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen_order.push_back(id);
        self.seen.insert(id);
    }
}
