//! Per-symbol workers
//!
//! The [`Dispatcher`] gives every symbol a mailbox and a dedicated task.
//! Events for one symbol are applied by that task alone, in arrival
//! order; different symbols run in parallel. A mailbox is a
//! [`PendingUpdates`] buffer, so a symbol that falls behind coalesces
//! superseded updates instead of growing an unbounded queue.
//!
//! After each event the worker mirrors the changed store when a
//! [`StateMirror`] is configured, and after each bar it computes and
//! publishes features. Storage and publish failures are counted and
//! logged; they never stop the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::ids::Symbol;

use crate::backpressure::{PendingUpdates, PushOutcome};
use crate::events::MarketEvent;
use crate::features::FeatureReadiness;
use crate::metrics::PipelineMetrics;
use crate::mirror::StateMirror;
use crate::normalize::FeatureNormalizer;
use crate::pipeline::{Applied, MarketState, PipelineError};
use crate::publish::{FeatureSink, PublishedFeatures};

struct Mailbox {
    pending: Mutex<PendingUpdates>,
    notify: Notify,
    closed: AtomicBool,
}

impl Mailbox {
    fn new(pending: PendingUpdates) -> Self {
        Self {
            pending: Mutex::new(pending),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn take(&self) -> Option<Vec<MarketEvent>> {
        self.pending.lock().ok().map(|mut pending| pending.drain())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct Dispatcher {
    state: Arc<MarketState>,
    mirror: Option<Arc<StateMirror>>,
    sink: Arc<dyn FeatureSink>,
    metrics: Arc<PipelineMetrics>,
    mailboxes: DashMap<Symbol, Arc<Mailbox>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        state: Arc<MarketState>,
        sink: Arc<dyn FeatureSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        info!(
            max_pending_trades = state.config().worker.max_pending_trades,
            "Dispatcher initialized"
        );
        Self {
            state,
            mirror: None,
            sink,
            metrics,
            mailboxes: DashMap::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Mirror state into storage and warm-start new symbols from it.
    pub fn with_mirror(mut self, mirror: Arc<StateMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn state(&self) -> &Arc<MarketState> {
        &self.state
    }

    /// Hand an event to its symbol's worker, starting the worker on first
    /// sight of the symbol. Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: MarketEvent) -> Result<PushOutcome, PipelineError> {
        let symbol = event.symbol.clone();
        let mailbox = self.mailbox_for(&symbol);

        let outcome = mailbox
            .pending
            .lock()
            .map_err(|_| PipelineError::StatePoisoned(symbol.clone()))?
            .push(event);
        match outcome {
            PushOutcome::Coalesced(n) => self.metrics.record_coalesced(n),
            PushOutcome::DroppedOldest => self.metrics.record_dropped(1),
            PushOutcome::Queued => {}
        }
        mailbox.notify.notify_one();
        Ok(outcome)
    }

    pub fn worker_count(&self) -> usize {
        self.mailboxes.len()
    }

    /// Reset a symbol in memory and in storage.
    pub async fn clear_symbol(&self, symbol: &Symbol) -> Result<bool, PipelineError> {
        let known = self.state.clear(symbol)?;
        if let Some(mirror) = &self.mirror {
            mirror.clear(symbol).await?;
        }
        Ok(known)
    }

    /// Let every worker drain its mailbox, then wait for all of them.
    pub async fn shutdown(&self) {
        for entry in self.mailboxes.iter() {
            entry.value().close();
        }
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => {
                error!("worker handle list poisoned");
                return;
            }
        };
        let workers = handles.len();
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "symbol worker panicked");
            }
        }
        info!(workers, "Dispatcher shut down");
    }

    fn mailbox_for(&self, symbol: &Symbol) -> Arc<Mailbox> {
        let (mailbox, created) = match self.mailboxes.entry(symbol.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let config = self.state.config();
                let mailbox = Arc::new(Mailbox::new(PendingUpdates::new(
                    config.bars.interval(),
                    config.worker.max_pending_trades,
                )));
                entry.insert(mailbox.clone());
                (mailbox, true)
            }
        };
        if created {
            self.spawn_worker(symbol.clone(), mailbox.clone());
        }
        mailbox
    }

    fn spawn_worker(&self, symbol: Symbol, mailbox: Arc<Mailbox>) {
        let worker = SymbolWorker {
            symbol,
            mailbox,
            state: self.state.clone(),
            mirror: self.mirror.clone(),
            sink: self.sink.clone(),
            normalizer: FeatureNormalizer,
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(worker.run());
        match self.handles.lock() {
            Ok(mut handles) => handles.push(handle),
            Err(_) => error!("worker handle list poisoned"),
        }
    }
}

struct SymbolWorker {
    symbol: Symbol,
    mailbox: Arc<Mailbox>,
    state: Arc<MarketState>,
    mirror: Option<Arc<StateMirror>>,
    sink: Arc<dyn FeatureSink>,
    normalizer: FeatureNormalizer,
    metrics: Arc<PipelineMetrics>,
}

impl SymbolWorker {
    async fn run(self) {
        info!(symbol = %self.symbol, "symbol worker started");
        self.warm_start().await;

        loop {
            let Some(batch) = self.mailbox.take() else {
                error!(symbol = %self.symbol, "mailbox poisoned, stopping worker");
                break;
            };
            if batch.is_empty() {
                if self.mailbox.is_closed() {
                    break;
                }
                self.mailbox.notify.notified().await;
                continue;
            }
            for event in batch {
                self.process(event).await;
            }
        }

        info!(symbol = %self.symbol, "symbol worker stopped");
    }

    /// Load bars and ticks persisted by an earlier run.
    async fn warm_start(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let bars = match mirror.load_bars(&self.symbol, None).await {
            Ok(bars) => bars,
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "stored bars unavailable, starting empty");
                Vec::new()
            }
        };
        let ticks = match mirror.load_ticks(&self.symbol, None).await {
            Ok(ticks) => ticks,
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "stored ticks unavailable, starting empty");
                // Sequences restart at 1, so old entries would outrank new ones in the rank trim.
                if let Err(err) = mirror.discard_ticks(&self.symbol).await {
                    warn!(symbol = %self.symbol, error = %err, "stored ticks could not be discarded");
                }
                Vec::new()
            }
        };
        if bars.is_empty() && ticks.is_empty() {
            return;
        }
        if let Err(err) = self.state.restore(&self.symbol, bars, ticks) {
            warn!(symbol = %self.symbol, error = %err, "stored state could not be restored");
        }
    }

    async fn process(&self, event: MarketEvent) {
        let started = Instant::now();
        let applied = match self.state.apply(&event) {
            Ok(applied) => applied,
            Err(err) => {
                self.metrics.record_rejected();
                warn!(
                    symbol = %self.symbol,
                    event_id = %event.event_id,
                    event_type = event.event_type_label(),
                    error = %err,
                    "event not applied"
                );
                return;
            }
        };
        self.metrics.record_applied(started.elapsed().as_nanos() as u64);

        if let Some(mirror) = &self.mirror {
            // Failures are already counted and logged by the mirror.
            let persisted = match &applied {
                Applied::Book(view) => mirror.persist_book(view).await,
                Applied::Bar { bar, cutoff, .. } => mirror.persist_bar(&self.symbol, bar, *cutoff).await,
                Applied::Tick(tick) => mirror.persist_tick(&self.symbol, tick).await,
            };
            if persisted.is_err() {
                debug!(symbol = %self.symbol, "in-memory state ahead of storage");
            }
        }

        if matches!(applied, Applied::Bar { .. }) {
            self.publish().await;
        }
    }

    async fn publish(&self) {
        let snapshot = match self.state.snapshot(&self.symbol) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(err) => {
                error!(symbol = %self.symbol, error = %err, "cannot read symbol state");
                return;
            }
        };

        let raw = match self.state.engine().compute_features(&snapshot) {
            FeatureReadiness::Ready(raw) => raw,
            FeatureReadiness::NotReady { bars, required } => {
                self.metrics.record_not_ready();
                debug!(symbol = %self.symbol, bars, required, "features not ready");
                return;
            }
        };

        let features = PublishedFeatures {
            symbol: self.symbol.clone(),
            timestamp: raw.timestamp,
            normalized: self.normalizer.normalize(&raw),
            raw,
            book_freshness: snapshot.book.freshness,
        };
        match self.sink.publish(features).await {
            Ok(()) => self.metrics.record_published(),
            Err(err) => {
                self.metrics.record_publish_failure();
                warn!(symbol = %self.symbol, error = %err, "feature publish failed");
            }
        }
    }
}
