//! Error types for the ingestion boundary
//!
//! Malformed inbound payloads are described here. They are logged and
//! dropped where they enter the pipeline; they never reach a store.

use thiserror::Error;

/// Why an inbound event was rejected at the boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("invalid price for {field}: {value}")]
    InvalidPrice { field: &'static str, value: String },

    #[error("invalid size for {field}: {value}")]
    InvalidSize { field: &'static str, value: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("inconsistent bar: {reason}")]
    InconsistentBar { reason: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl EventError {
    /// Short label for structured logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EventError::MissingField { .. } => "missing_field",
            EventError::InvalidSymbol(_) => "invalid_symbol",
            EventError::InvalidPrice { .. } => "invalid_price",
            EventError::InvalidSize { .. } => "invalid_size",
            EventError::InvalidTimestamp(_) => "invalid_timestamp",
            EventError::InconsistentBar { .. } => "inconsistent_bar",
            EventError::Malformed(_) => "malformed",
        }
    }
}
