//! Outbound feature publishing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use types::ids::Symbol;

use crate::features::FeatureVector;
use crate::normalize::NormalizedFeatureVector;
use crate::order_book::Freshness;

/// Features for one symbol at one bar, raw and normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedFeatures {
    pub symbol: Symbol,
    /// Aligned timestamp of the bar the features were computed at.
    pub timestamp: i64,
    pub raw: FeatureVector,
    pub normalized: NormalizedFeatureVector,
    /// Freshness of the book the imbalance was read from.
    pub book_freshness: Freshness,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("feature consumer is not keeping up")]
    Full,

    #[error("feature consumer has gone away")]
    Closed,
}

/// Downstream consumer of computed features.
#[async_trait]
pub trait FeatureSink: Send + Sync {
    async fn publish(&self, features: PublishedFeatures) -> Result<(), PublishError>;
}

/// Publishes onto a bounded mpsc channel without waiting.
///
/// A full channel is reported, not awaited: a slow consumer loses
/// vectors rather than stalling a symbol worker.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PublishedFeatures>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PublishedFeatures>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<PublishedFeatures>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FeatureSink for ChannelSink {
    async fn publish(&self, features: PublishedFeatures) -> Result<(), PublishError> {
        self.tx.try_send(features).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}
