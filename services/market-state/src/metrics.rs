//! Pipeline counters and latency tracking
//!
//! Counters are relaxed atomics shared by every worker. `export()` gives a
//! sorted snapshot suitable for a metrics endpoint or a shutdown log line.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct PipelineMetrics {
    pub events_applied: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_duplicate: AtomicU64,
    pub events_coalesced: AtomicU64,
    pub events_dropped: AtomicU64,
    pub features_published: AtomicU64,
    pub features_not_ready: AtomicU64,
    pub publish_failures: AtomicU64,
    pub storage_timeouts: AtomicU64,
    pub storage_errors: AtomicU64,
    pub storage_fallbacks: AtomicU64,
    pub apply_latency_ns: Mutex<LatencyTracker>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            events_applied: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            events_coalesced: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            features_published: AtomicU64::new(0),
            features_not_ready: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            storage_timeouts: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            storage_fallbacks: AtomicU64::new(0),
            apply_latency_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }

    pub fn record_applied(&self, latency_ns: u64) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.apply_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.events_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self, count: u64) {
        self.events_coalesced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.features_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_ready(&self) {
        self.features_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_timeout(&self) {
        self.storage_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_fallback(&self) {
        self.storage_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("events_applied", &self.events_applied),
            ("events_rejected", &self.events_rejected),
            ("events_duplicate", &self.events_duplicate),
            ("events_coalesced", &self.events_coalesced),
            ("events_dropped", &self.events_dropped),
            ("features_published", &self.features_published),
            ("features_not_ready", &self.features_not_ready),
            ("publish_failures", &self.publish_failures),
            ("storage_timeouts", &self.storage_timeouts),
            ("storage_errors", &self.storage_errors),
            ("storage_fallbacks", &self.storage_fallbacks),
        ];
        let mut m: BTreeMap<String, u64> = counters
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect();

        if let Ok(tracker) = self.apply_latency_ns.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("apply_latency_p50_ns".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("apply_latency_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded ring of latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
