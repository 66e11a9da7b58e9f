//! Market Event Types
//!
//! The event shape that flows through the backbone. Feed ingestion
//! produces raw events (no publish timestamp, possibly incomplete);
//! the normalizer validates them and stamps canonical metadata.
//!
//! # Wire Format
//!
//! Events serialize to camelCase JSON. Decimal values are emitted as
//! strings to preserve precision:
//!
//! ```json
//! {
//!   "eventId": "0b7c...",
//!   "instrumentId": "AAPL",
//!   "eventType": "TRADE",
//!   "exchangeTimestamp": "2026-01-05T14:30:00Z",
//!   "receiveTimestamp": "2026-01-05T14:30:00.002Z",
//!   "publishTimestamp": "2026-01-05T14:30:00.003Z",
//!   "schemaVersion": 1,
//!   "payload": { "price": "185.50", "size": "100" }
//! }
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version stamped on raw events before normalization.
pub const RAW_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Event Type
// =============================================================================

/// Kind of market event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Executed trade.
    Trade,
    /// Top-of-book quote.
    Quote,
    /// Full order book snapshot.
    BookSnapshot,
    /// Incremental order book change.
    BookDelta,
    /// Instrument or venue status change.
    Status,
}

impl EventType {
    /// Get the wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "TRADE",
            Self::Quote => "QUOTE",
            Self::BookSnapshot => "BOOK_SNAPSHOT",
            Self::BookDelta => "BOOK_DELTA",
            Self::Status => "STATUS",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Trade payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub size: Decimal,
    /// Venue trade conditions, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
}

impl Trade {
    /// Create a validated trade payload.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::NonPositive` if price or size is not
    /// strictly positive.
    pub fn new(
        price: Decimal,
        size: Decimal,
        conditions: Option<String>,
    ) -> Result<Self, PayloadError> {
        let trade = Self {
            price,
            size,
            conditions,
        };
        trade.validate()?;
        Ok(trade)
    }

    /// Check the trade invariants.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::NonPositive` naming the offending field.
    pub fn validate(&self) -> Result<(), PayloadError> {
        ensure_positive("price", self.price)?;
        ensure_positive("size", self.size)
    }
}

/// Top-of-book quote payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Best bid price.
    pub bid_price: Decimal,
    /// Quantity at the best bid.
    pub bid_size: Decimal,
    /// Best ask price.
    pub ask_price: Decimal,
    /// Quantity at the best ask.
    pub ask_size: Decimal,
}

impl Quote {
    /// Create a validated quote payload.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` if any field is not strictly positive or the
    /// bid is not below the ask.
    pub fn new(
        bid_price: Decimal,
        bid_size: Decimal,
        ask_price: Decimal,
        ask_size: Decimal,
    ) -> Result<Self, PayloadError> {
        let quote = Self {
            bid_price,
            bid_size,
            ask_price,
            ask_size,
        };
        quote.validate()?;
        Ok(quote)
    }

    /// Check the quote invariants.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::NonPositive` for a non-positive field and
    /// `PayloadError::CrossedQuote` when `bid_price >= ask_price`.
    pub fn validate(&self) -> Result<(), PayloadError> {
        ensure_positive("bidPrice", self.bid_price)?;
        ensure_positive("bidSize", self.bid_size)?;
        ensure_positive("askPrice", self.ask_price)?;
        ensure_positive("askSize", self.ask_size)?;

        if self.bid_price >= self.ask_price {
            return Err(PayloadError::CrossedQuote {
                bid_price: self.bid_price,
                ask_price: self.ask_price,
            });
        }

        Ok(())
    }
}

/// Event payload. The variant must agree with the event's `EventType`.
///
/// Serialized without a tag; the event type travels alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Payload of a `TRADE` event.
    Trade(Trade),
    /// Payload of a `QUOTE` event.
    Quote(Quote),
    /// Unstructured payload for book and status events.
    Opaque(serde_json::Value),
}

impl EventPayload {
    /// Whether this payload variant is the one `event_type` requires.
    #[must_use]
    pub const fn matches(&self, event_type: EventType) -> bool {
        matches!(
            (self, event_type),
            (Self::Trade(_), EventType::Trade)
                | (Self::Quote(_), EventType::Quote)
                | (
                    Self::Opaque(_),
                    EventType::BookSnapshot | EventType::BookDelta | EventType::Status
                )
        )
    }

    /// Check the invariants of the contained payload.
    ///
    /// # Errors
    ///
    /// Returns the trade or quote validation error. Opaque payloads
    /// always pass.
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            Self::Trade(trade) => trade.validate(),
            Self::Quote(quote) => quote.validate(),
            Self::Opaque(_) => Ok(()),
        }
    }
}

fn ensure_positive(field: &'static str, value: Decimal) -> Result<(), PayloadError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(PayloadError::NonPositive { field, value })
    }
}

// =============================================================================
// Market Event
// =============================================================================

/// A market event as carried on the backbone.
///
/// Raw events may lack an event type or payload; such events are
/// rejected by the normalizer. Canonical events always carry both, plus
/// a publish timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEvent {
    /// Unique event identifier.
    pub event_id: String,
    /// Instrument symbol.
    pub instrument_id: String,
    /// Event kind.
    pub event_type: Option<EventType>,
    /// Time the venue produced the event.
    pub exchange_timestamp: DateTime<Utc>,
    /// Time the feed adapter received the event.
    pub receive_timestamp: DateTime<Utc>,
    /// Time the normalizer published the canonical event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_timestamp: Option<DateTime<Utc>>,
    /// Schema version of the event shape.
    pub schema_version: u32,
    /// Event body.
    pub payload: Option<EventPayload>,
}

impl MarketEvent {
    /// Build a raw event with a fresh event id.
    #[must_use]
    pub fn raw(
        instrument_id: impl Into<String>,
        event_type: EventType,
        payload: EventPayload,
        exchange_timestamp: DateTime<Utc>,
        receive_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            instrument_id: instrument_id.into(),
            event_type: Some(event_type),
            exchange_timestamp,
            receive_timestamp,
            publish_timestamp: None,
            schema_version: RAW_SCHEMA_VERSION,
            payload: Some(payload),
        }
    }

    /// Copy this event into its canonical form.
    ///
    /// Every field is kept except the publish timestamp and schema version,
    /// which are replaced.
    #[must_use]
    pub fn to_canonical(&self, schema_version: u32, published_at: DateTime<Utc>) -> Self {
        Self {
            publish_timestamp: Some(published_at),
            schema_version,
            ..self.clone()
        }
    }

    /// Trade payload, if this event carries one.
    #[must_use]
    pub const fn trade(&self) -> Option<&Trade> {
        match &self.payload {
            Some(EventPayload::Trade(trade)) => Some(trade),
            _ => None,
        }
    }

    /// Quote payload, if this event carries one.
    #[must_use]
    pub const fn quote(&self) -> Option<&Quote> {
        match &self.payload {
            Some(EventPayload::Quote(quote)) => Some(quote),
            _ => None,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Payload invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// A price or size was zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositive {
        /// Wire name of the field.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },

    /// Bid at or above ask.
    #[error("crossed quote: bid {bid_price} >= ask {ask_price}")]
    CrossedQuote {
        /// Bid price.
        bid_price: Decimal,
        /// Ask price.
        ask_price: Decimal,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sample_trade_event() -> MarketEvent {
        let now = Utc::now();
        MarketEvent::raw(
            "AAPL",
            EventType::Trade,
            EventPayload::Trade(Trade::new(dec("185.50"), dec("100"), None).unwrap()),
            now,
            now,
        )
    }

    #[test]
    fn event_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventType::BookSnapshot).unwrap(),
            "\"BOOK_SNAPSHOT\""
        );
        assert_eq!(EventType::BookDelta.as_str(), "BOOK_DELTA");
        assert_eq!(EventType::Trade.to_string(), "TRADE");

        let parsed: EventType = serde_json::from_str("\"STATUS\"").unwrap();
        assert_eq!(parsed, EventType::Status);
    }

    #[test]
    fn trade_rejects_non_positive_values() {
        assert!(Trade::new(dec("1.00"), dec("1"), None).is_ok());
        assert_eq!(
            Trade::new(dec("0"), dec("1"), None),
            Err(PayloadError::NonPositive {
                field: "price",
                value: Decimal::ZERO
            })
        );
        assert!(matches!(
            Trade::new(dec("10"), dec("-5"), None),
            Err(PayloadError::NonPositive { field: "size", .. })
        ));
    }

    #[test]
    fn quote_rejects_crossed_and_locked_books() {
        assert!(Quote::new(dec("10.00"), dec("100"), dec("10.01"), dec("100")).is_ok());
        assert!(matches!(
            Quote::new(dec("10.01"), dec("100"), dec("10.00"), dec("100")),
            Err(PayloadError::CrossedQuote { .. })
        ));
        assert!(matches!(
            Quote::new(dec("10.00"), dec("100"), dec("10.00"), dec("100")),
            Err(PayloadError::CrossedQuote { .. })
        ));
        assert!(matches!(
            Quote::new(dec("10.00"), dec("0"), dec("10.01"), dec("100")),
            Err(PayloadError::NonPositive {
                field: "bidSize",
                ..
            })
        ));
    }

    #[test]
    fn payload_variant_must_match_event_type() {
        let trade = EventPayload::Trade(Trade::new(dec("1"), dec("1"), None).unwrap());
        let opaque = EventPayload::Opaque(serde_json::json!({"halted": true}));

        assert!(trade.matches(EventType::Trade));
        assert!(!trade.matches(EventType::Quote));
        assert!(opaque.matches(EventType::Status));
        assert!(opaque.matches(EventType::BookDelta));
        assert!(!opaque.matches(EventType::Trade));
    }

    #[test]
    fn raw_event_has_fresh_id_and_no_publish_timestamp() {
        let a = sample_trade_event();
        let b = sample_trade_event();

        assert_ne!(a.event_id, b.event_id);
        assert!(a.publish_timestamp.is_none());
        assert_eq!(a.schema_version, RAW_SCHEMA_VERSION);
        assert!(a.trade().is_some());
        assert!(a.quote().is_none());
    }

    #[test]
    fn canonical_copy_keeps_fields_and_stamps_metadata() {
        let raw = sample_trade_event();
        let published_at = Utc::now();

        let canonical = raw.to_canonical(3, published_at);

        assert_eq!(canonical.event_id, raw.event_id);
        assert_eq!(canonical.instrument_id, raw.instrument_id);
        assert_eq!(canonical.exchange_timestamp, raw.exchange_timestamp);
        assert_eq!(canonical.payload, raw.payload);
        assert_eq!(canonical.publish_timestamp, Some(published_at));
        assert_eq!(canonical.schema_version, 3);
    }

    #[test]
    fn event_serializes_camel_case_with_string_decimals() {
        let event = sample_trade_event().to_canonical(1, Utc::now());
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["instrumentId"], "AAPL");
        assert_eq!(json["eventType"], "TRADE");
        assert_eq!(json["schemaVersion"], 1);
        assert!(json.get("publishTimestamp").is_some());
        assert_eq!(json["payload"]["price"], "185.50");
        assert!(json["payload"].get("conditions").is_none());
    }

    #[test]
    fn untagged_payload_deserializes_to_the_right_variant() {
        let quote: EventPayload = serde_json::from_str(
            r#"{"bidPrice":"10.00","bidSize":"100","askPrice":"10.02","askSize":"200"}"#,
        )
        .unwrap();
        assert!(matches!(quote, EventPayload::Quote(_)));

        let trade: EventPayload =
            serde_json::from_str(r#"{"price":"5.25","size":"10","conditions":"@"}"#).unwrap();
        assert!(matches!(trade, EventPayload::Trade(ref t) if t.conditions.as_deref() == Some("@")));

        let other: EventPayload = serde_json::from_str(r#"{"levels":[]}"#).unwrap();
        assert!(matches!(other, EventPayload::Opaque(_)));
    }
}
