//! Raw Feed Codec
//!
//! JSON wire format emitted by the synthetic exchange and any adapter
//! speaking the same dialect.
//!
//! # Wire Format
//!
//! ```json
//! {"type":"TRADE","symbol":"AAPL","price":185.5,"qty":100,"side":"BUY","timestamp":"2026-01-02T15:04:05Z","tradeId":"T1a2b3c4d"}
//! {"type":"QUOTE","symbol":"AAPL","bidPrice":185.48,"bidSize":100,"askPrice":185.52,"askSize":200,"timestamp":"2026-01-02T15:04:05Z"}
//! ```
//!
//! Prices travel as JSON numbers and are read into `Decimal` through
//! their shortest decimal representation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::events::{EventPayload, EventType, MarketEvent, Quote, Trade};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Buyer-initiated.
    Buy,
    /// Seller-initiated.
    Sell,
}

/// Trade print as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    /// Instrument symbol.
    pub symbol: String,
    /// Trade price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Trade quantity.
    pub qty: u64,
    /// Aggressor side.
    pub side: Side,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Venue trade id.
    pub trade_id: String,
}

/// Top-of-book quote as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuote {
    /// Instrument symbol.
    pub symbol: String,
    /// Best bid.
    #[serde(with = "rust_decimal::serde::float")]
    pub bid_price: Decimal,
    /// Size at the best bid.
    pub bid_size: u64,
    /// Best ask.
    #[serde(with = "rust_decimal::serde::float")]
    pub ask_price: Decimal,
    /// Size at the best ask.
    pub ask_size: u64,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
}

/// A decoded raw feed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RawFeedMessage {
    /// Trade print.
    Trade(RawTrade),
    /// Quote update.
    Quote(RawQuote),
}

impl RawFeedMessage {
    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(t) => &t.symbol,
            Self::Quote(q) => &q.symbol,
        }
    }

    /// Canonical event type of this message.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Trade(_) => EventType::Trade,
            Self::Quote(_) => EventType::Quote,
        }
    }

    /// Build the unvalidated raw event for this message.
    ///
    /// Payload invariants are left to the normalizer.
    #[must_use]
    pub fn to_raw_event(&self, receive_timestamp: DateTime<Utc>) -> MarketEvent {
        let (payload, exchange_timestamp) = match self {
            Self::Trade(t) => (
                EventPayload::Trade(Trade {
                    price: t.price,
                    size: Decimal::from(t.qty),
                    conditions: None,
                }),
                t.timestamp,
            ),
            Self::Quote(q) => (
                EventPayload::Quote(Quote {
                    bid_price: q.bid_price,
                    bid_size: Decimal::from(q.bid_size),
                    ask_price: q.ask_price,
                    ask_size: Decimal::from(q.ask_size),
                }),
                q.timestamp,
            ),
        };

        MarketEvent::raw(
            self.symbol(),
            self.event_type(),
            payload,
            exchange_timestamp,
            receive_timestamp,
        )
    }
}

/// Encode a message to JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode(message: &RawFeedMessage) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode JSON bytes into a message.
///
/// # Errors
///
/// Returns `CodecError::Json` for malformed JSON, an unknown `type` or
/// missing fields.
pub fn decode(payload: &[u8]) -> Result<RawFeedMessage, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}
