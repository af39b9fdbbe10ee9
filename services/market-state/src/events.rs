//! Inbound event definitions for the market-state pipeline
//!
//! Two layers live here. `RawMarketEvent` is the wire shape delivered by the
//! ingestion collaborator: JSON tagged by `ev`, every field optional, with
//! aliases for feed-style short names (`sym`, `p`, `bp`, `vw`, ...).
//! Timestamps come either as `timestamp` in Unix nanoseconds or as the
//! feed-style `t` in Unix milliseconds, which is scaled on conversion.
//! `MarketEvent` is the validated, typed form that the stores consume.
//! Conversion happens once, at the boundary, via `TryFrom`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::EventError;
use types::ids::{EventId, Symbol};
use types::numeric::{Price, Quantity};
use types::time::NANOS_PER_MILLI;
use uuid::Uuid;

use crate::bars::Ohlcv;
use crate::order_book::PriceLevel;

/// Validated market event for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// Unique event identifier (UUID v7), used for deduplication
    pub event_id: EventId,
    /// Instrument the event belongs to
    pub symbol: Symbol,
    /// Unix nanoseconds timestamp from the feed
    pub timestamp: i64,
    /// Event-specific payload
    pub payload: MarketEventPayload,
}

/// Typed payloads, one per store-affecting event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum MarketEventPayload {
    /// An executed trade; routed to the tick window
    Trade {
        price: Price,
        size: Quantity,
        conditions: Vec<String>,
        vwap: Option<Price>,
    },

    /// Authoritative top-of-book quote; routed to the order book
    Quote {
        bid_price: Price,
        bid_size: Quantity,
        ask_price: Price,
        ask_size: Quantity,
    },

    /// A closed (or updating) aggregate bar; routed to the bar window
    AggregateBar(Ohlcv),

    /// Multi-level depth update; routed to the order book
    Depth {
        kind: DepthKind,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
}

/// How a depth update combines with the levels already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthKind {
    /// Sizes are added to the existing size at each price.
    #[default]
    Delta,
    /// Levels replace the side wholesale.
    Snapshot,
}

/// Coarse event classification used by routing and coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Trade,
    Quote,
    AggregateBar,
    Depth,
}

impl MarketEvent {
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            MarketEventPayload::Trade { .. } => EventKind::Trade,
            MarketEventPayload::Quote { .. } => EventKind::Quote,
            MarketEventPayload::AggregateBar(_) => EventKind::AggregateBar,
            MarketEventPayload::Depth { .. } => EventKind::Depth,
        }
    }

    /// Get the event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match &self.payload {
            MarketEventPayload::Trade { .. } => "Trade",
            MarketEventPayload::Quote { .. } => "Quote",
            MarketEventPayload::AggregateBar(_) => "AggregateBar",
            MarketEventPayload::Depth { kind: DepthKind::Delta, .. } => "DepthDelta",
            MarketEventPayload::Depth { kind: DepthKind::Snapshot, .. } => "DepthSnapshot",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Unvalidated event as received from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ev")]
pub enum RawMarketEvent {
    #[serde(rename = "T")]
    Trade(RawTrade),
    #[serde(rename = "Q")]
    Quote(RawQuote),
    #[serde(rename = "A")]
    AggregateBar(RawBar),
    #[serde(rename = "D")]
    Depth(RawDepth),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrade {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default, alias = "sym")]
    pub symbol: Option<String>,
    /// Unix nanoseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Unix milliseconds, used when `timestamp` is absent.
    #[serde(default, rename = "t")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, alias = "p")]
    pub price: Option<Decimal>,
    #[serde(default, alias = "s")]
    pub size: Option<Decimal>,
    #[serde(default, alias = "c", alias = "conditionCodes")]
    pub conditions: Option<Vec<String>>,
    #[serde(default, alias = "vw")]
    pub vwap: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default, alias = "sym")]
    pub symbol: Option<String>,
    /// Unix nanoseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Unix milliseconds, used when `timestamp` is absent.
    #[serde(default, rename = "t")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, alias = "bp", alias = "bidPrice")]
    pub bid_price: Option<Decimal>,
    #[serde(default, alias = "bs", alias = "bidSize")]
    pub bid_size: Option<Decimal>,
    #[serde(default, alias = "ap", alias = "askPrice")]
    pub ask_price: Option<Decimal>,
    #[serde(default, alias = "as", alias = "askSize")]
    pub ask_size: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default, alias = "sym")]
    pub symbol: Option<String>,
    /// Unix nanoseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Bar start in Unix milliseconds, used when `timestamp` is absent.
    #[serde(default, rename = "t", alias = "s")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, alias = "o")]
    pub open: Option<Decimal>,
    #[serde(default, alias = "h")]
    pub high: Option<Decimal>,
    #[serde(default, alias = "l")]
    pub low: Option<Decimal>,
    #[serde(default, alias = "c")]
    pub close: Option<Decimal>,
    #[serde(default, alias = "v")]
    pub volume: Option<Decimal>,
    #[serde(default, alias = "vw")]
    pub vwap: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDepth {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default, alias = "sym")]
    pub symbol: Option<String>,
    /// Unix nanoseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Unix milliseconds, used when `timestamp` is absent.
    #[serde(default, rename = "t")]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub kind: Option<DepthKind>,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
}

/// A depth level given either as `[price, size]` or `{ "price", "size" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLevel {
    Pair([Decimal; 2]),
    Object { price: Decimal, size: Decimal },
}

impl RawLevel {
    fn parts(&self) -> (Decimal, Decimal) {
        match self {
            RawLevel::Pair([price, size]) => (*price, *size),
            RawLevel::Object { price, size } => (*price, *size),
        }
    }
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, EventError> {
    value.ok_or(EventError::MissingField { field })
}

fn price(value: Decimal, field: &'static str) -> Result<Price, EventError> {
    Price::try_new(value).ok_or_else(|| EventError::InvalidPrice {
        field,
        value: value.to_string(),
    })
}

fn size(value: Decimal, field: &'static str) -> Result<Quantity, EventError> {
    Quantity::try_new(value).ok_or_else(|| EventError::InvalidSize {
        field,
        value: value.to_string(),
    })
}

/// Shared envelope fields every raw variant carries.
fn envelope(
    event_id: Option<Uuid>,
    symbol: Option<String>,
    timestamp: Option<i64>,
    timestamp_ms: Option<i64>,
) -> Result<(EventId, Symbol, i64), EventError> {
    let raw_symbol = require(symbol, "symbol")?;
    let symbol =
        Symbol::try_new(&raw_symbol).ok_or_else(|| EventError::InvalidSymbol(raw_symbol.clone()))?;
    let timestamp =
        timestamp.or_else(|| timestamp_ms.map(|ms| ms.saturating_mul(NANOS_PER_MILLI)));
    let timestamp = require(timestamp, "timestamp")?;
    if timestamp < 0 {
        return Err(EventError::InvalidTimestamp(timestamp));
    }
    let event_id = event_id.map(EventId::from_uuid).unwrap_or_default();
    Ok((event_id, symbol, timestamp))
}

fn levels(raw: &[RawLevel], side: &'static str) -> Result<Vec<PriceLevel>, EventError> {
    raw.iter()
        .map(|level| {
            let (p, s) = level.parts();
            Ok(PriceLevel {
                price: price(p, side)?,
                size: size(s, side)?,
            })
        })
        .collect()
}

impl TryFrom<RawMarketEvent> for MarketEvent {
    type Error = EventError;

    fn try_from(raw: RawMarketEvent) -> Result<Self, Self::Error> {
        match raw {
            RawMarketEvent::Trade(t) => {
                let (event_id, symbol, timestamp) = envelope(t.event_id, t.symbol, t.timestamp, t.timestamp_ms)?;
                let payload = MarketEventPayload::Trade {
                    price: price(require(t.price, "price")?, "price")?,
                    size: size(require(t.size, "size")?, "size")?,
                    conditions: t.conditions.unwrap_or_default(),
                    vwap: t.vwap.map(|v| price(v, "vwap")).transpose()?,
                };
                Ok(MarketEvent { event_id, symbol, timestamp, payload })
            }
            RawMarketEvent::Quote(q) => {
                let (event_id, symbol, timestamp) = envelope(q.event_id, q.symbol, q.timestamp, q.timestamp_ms)?;
                let payload = MarketEventPayload::Quote {
                    bid_price: price(require(q.bid_price, "bid_price")?, "bid_price")?,
                    bid_size: size(require(q.bid_size, "bid_size")?, "bid_size")?,
                    ask_price: price(require(q.ask_price, "ask_price")?, "ask_price")?,
                    ask_size: size(require(q.ask_size, "ask_size")?, "ask_size")?,
                };
                Ok(MarketEvent { event_id, symbol, timestamp, payload })
            }
            RawMarketEvent::AggregateBar(b) => {
                let (event_id, symbol, timestamp) = envelope(b.event_id, b.symbol, b.timestamp, b.timestamp_ms)?;
                let open = price(require(b.open, "open")?, "open")?;
                let high = price(require(b.high, "high")?, "high")?;
                let low = price(require(b.low, "low")?, "low")?;
                let close = price(require(b.close, "close")?, "close")?;
                let volume = size(require(b.volume, "volume")?, "volume")?;
                let vwap = match b.vwap {
                    Some(v) => price(v, "vwap")?,
                    None => Ohlcv::typical_price(high, low, close),
                };
                let ohlcv = Ohlcv { open, high, low, close, volume, vwap };
                ohlcv.validate()?;
                Ok(MarketEvent {
                    event_id,
                    symbol,
                    timestamp,
                    payload: MarketEventPayload::AggregateBar(ohlcv),
                })
            }
            RawMarketEvent::Depth(d) => {
                let (event_id, symbol, timestamp) = envelope(d.event_id, d.symbol, d.timestamp, d.timestamp_ms)?;
                if d.bids.is_empty() && d.asks.is_empty() {
                    return Err(EventError::Malformed("depth update with no levels".to_string()));
                }
                let payload = MarketEventPayload::Depth {
                    kind: d.kind.unwrap_or_default(),
                    bids: levels(&d.bids, "bids")?,
                    asks: levels(&d.asks, "asks")?,
                };
                Ok(MarketEvent { event_id, symbol, timestamp, payload })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<MarketEvent, EventError> {
        let raw: RawMarketEvent = serde_json::from_str(json).unwrap();
        MarketEvent::try_from(raw)
    }

    #[test]
    fn test_trade_with_short_field_names() {
        let event = parse(
            r#"{"ev":"T","sym":"aapl","t":1000,"p":150.25,"s":100,"c":["B"],"vw":150.2}"#,
        )
        .unwrap();

        assert_eq!(event.symbol.as_str(), "AAPL");
        assert_eq!(event.kind(), EventKind::Trade);
        match event.payload {
            MarketEventPayload::Trade { price, size, conditions, vwap } => {
                assert_eq!(price, Price::from_str("150.25").unwrap());
                assert_eq!(size, Quantity::from_u64(100));
                assert_eq!(conditions, vec!["B".to_string()]);
                assert_eq!(vwap, Price::from_str("150.2"));
            }
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_quote_with_long_field_names() {
        let event = parse(
            r#"{"ev":"Q","symbol":"MSFT","timestamp":5,"bidPrice":"99.5","bidSize":"300","askPrice":"100","askSize":"200"}"#,
        )
        .unwrap();
        assert_eq!(event.event_type_label(), "Quote");
    }

    #[test]
    fn test_bar_missing_close_is_rejected() {
        let err = parse(r#"{"ev":"A","sym":"AAPL","t":0,"o":1,"h":2,"l":1,"v":10,"vw":1.5}"#)
            .unwrap_err();
        assert_eq!(err, EventError::MissingField { field: "close" });
    }

    #[test]
    fn test_bar_without_vwap_uses_typical_price() {
        let event = parse(r#"{"ev":"A","sym":"AAPL","t":0,"o":10,"h":12,"l":9,"c":12,"v":10}"#)
            .unwrap();
        match event.payload {
            MarketEventPayload::AggregateBar(ohlcv) => {
                assert_eq!(ohlcv.vwap, Price::from_str("11").unwrap());
            }
            other => panic!("expected bar, got {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_bar_is_rejected() {
        let err = parse(r#"{"ev":"A","sym":"AAPL","t":0,"o":10,"h":9,"l":8,"c":9,"v":1}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "inconsistent_bar");
    }

    #[test]
    fn test_depth_accepts_pairs_and_objects() {
        let event = parse(
            r#"{"ev":"D","sym":"TEST","t":1,"kind":"snapshot","bids":[[100,500],{"price":99.5,"size":300}],"asks":[[101,400]]}"#,
        )
        .unwrap();
        match event.payload {
            MarketEventPayload::Depth { kind, bids, asks } => {
                assert_eq!(kind, DepthKind::Snapshot);
                assert_eq!(bids.len(), 2);
                assert_eq!(asks.len(), 1);
                assert_eq!(bids[1].size, Quantity::from_u64(300));
            }
            other => panic!("expected depth, got {:?}", other),
        }
    }

    #[test]
    fn test_depth_kind_defaults_to_delta() {
        let event = parse(r#"{"ev":"D","sym":"TEST","t":1,"bids":[[100,5]]}"#).unwrap();
        assert_eq!(event.event_type_label(), "DepthDelta");
    }

    #[test]
    fn test_negative_size_is_rejected() {
        let err = parse(r#"{"ev":"T","sym":"AAPL","t":1,"p":10,"s":-1}"#).unwrap_err();
        assert_eq!(err.kind(), "invalid_size");
    }

    #[test]
    fn test_blank_symbol_is_rejected() {
        let err = parse(r#"{"ev":"T","sym":"  ","t":1,"p":10,"s":1}"#).unwrap_err();
        assert_eq!(err, EventError::InvalidSymbol("  ".to_string()));
    }

    #[test]
    fn test_explicit_event_id_is_kept() {
        let id = Uuid::now_v7();
        let json = format!(r#"{{"ev":"T","event_id":"{}","sym":"AAPL","t":1,"p":10,"s":1}}"#, id);
        let event = parse(&json).unwrap();
        assert_eq!(event.event_id.as_uuid(), &id);
    }

    #[test]
    fn test_short_timestamp_is_milliseconds() {
        let event = parse(r#"{"ev":"A","sym":"AAPL","t":1700000040000,"o":10,"h":12,"l":9,"c":11,"v":10}"#)
            .unwrap();
        assert_eq!(event.timestamp, 1_700_000_040_000 * NANOS_PER_MILLI);

        // Bar start under its feed name.
        let event = parse(r#"{"ev":"A","sym":"AAPL","s":60000,"o":10,"h":12,"l":9,"c":11,"v":10}"#)
            .unwrap();
        assert_eq!(event.timestamp, 60_000 * NANOS_PER_MILLI);
    }

    #[test]
    fn test_full_timestamp_is_nanoseconds_and_wins() {
        let event =
            parse(r#"{"ev":"Q","sym":"AAPL","timestamp":123,"t":5,"bp":1,"bs":1,"ap":2,"as":1}"#)
                .unwrap();
        assert_eq!(event.timestamp, 123);
    }

    #[test]
    fn test_missing_timestamp_is_rejected() {
        let err = parse(r#"{"ev":"T","sym":"AAPL","p":10,"s":1}"#).unwrap_err();
        assert_eq!(err, EventError::MissingField { field: "timestamp" });
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = parse(r#"{"ev":"T","sym":"AAPL","t":1,"p":10,"s":1}"#).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: MarketEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
