use std::sync::Arc;

use market_state::ingestion::{EventIngester, IngestionResult};
use market_state::metrics::PipelineMetrics;
use market_state::mirror::StateMirror;
use market_state::storage::MemoryStore;
use market_state::{ChannelSink, Dispatcher, MarketState, PipelineConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use types::time::{Clock, SystemClock};

/// Reads newline-delimited JSON events on stdin and writes published
/// feature vectors as JSON lines on stdout. Logs go to stderr.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = PipelineConfig::from_env();
    config.validate()?;
    info!(
        storage = config.storage.enabled,
        version = market_state::SERVICE_VERSION,
        "Starting market-state service"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(PipelineMetrics::new());
    let state = Arc::new(MarketState::new(config.clone(), clock.clone()));
    let (sink, mut features_rx) = ChannelSink::new(1024);

    let mut dispatcher = Dispatcher::new(state.clone(), Arc::new(sink), metrics.clone());
    if config.storage.enabled {
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let mirror = StateMirror::new(store, &config).with_metrics(metrics.clone());
        dispatcher = dispatcher.with_mirror(Arc::new(mirror));
    }

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(features) = features_rx.recv().await {
            match serde_json::to_string(&features) {
                Ok(line) => {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                Err(err) => warn!(error = %err, "cannot encode features"),
            }
        }
        stdout.flush().await?;
        Ok::<(), std::io::Error>(())
    });

    let evictor = {
        let state = state.clone();
        let period = config.bars.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match state.evict_expired() {
                    Ok(0) => {}
                    Ok(evicted) => info!(evicted, "expired bars evicted"),
                    Err(err) => warn!(error = %err, "bar eviction failed"),
                }
            }
        })
    };

    let mut ingester = EventIngester::with_defaults().with_metrics(metrics.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let IngestionResult::Accepted(event) = ingester.ingest_json(&line) {
            if let Err(err) = dispatcher.dispatch(event) {
                warn!(error = %err, "event not dispatched");
            }
        }
    }

    dispatcher.shutdown().await;
    evictor.abort();
    // Last sink handle goes with the dispatcher, which ends the writer.
    drop(dispatcher);
    writer.await??;

    info!(
        accepted = ingester.events_accepted(),
        duplicates = ingester.events_duplicate(),
        rejected = ingester.events_rejected(),
        metrics = ?metrics.export(),
        "market-state finished"
    );
    Ok(())
}
