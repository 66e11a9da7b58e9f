//! Normalizer Service
//!
//! Subscribes to the raw topics, validates each event and republishes it
//! to the canonical topic with a publish timestamp and the configured
//! schema version. Invalid events are counted and dropped; nothing is
//! retried or forwarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;

use crate::application::ports::{
    BackboneConsumer, BackbonePublisher, CANONICAL_EVENTS_TOPIC, EventHandler, RAW_QUOTES_TOPIC,
    RAW_TRADES_TOPIC,
};
use crate::domain::events::{EventType, MarketEvent, PayloadError};
use crate::infrastructure::metrics;

/// Normalized events between progress log lines.
const LOG_EVERY: u64 = 1_000;

// =============================================================================
// Configuration
// =============================================================================

/// Normalizer configuration.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Schema version stamped on canonical events.
    pub schema_version: u32,
    /// Raw topics to consume.
    pub raw_topics: Vec<String>,
    /// Topic canonical events are published to.
    pub canonical_topic: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            raw_topics: vec![RAW_TRADES_TOPIC.to_string(), RAW_QUOTES_TOPIC.to_string()],
            canonical_topic: CANONICAL_EVENTS_TOPIC.to_string(),
        }
    }
}

impl NormalizerConfig {
    /// Default topics with a specific schema version.
    #[must_use]
    pub fn with_schema_version(schema_version: u32) -> Self {
        Self {
            schema_version,
            ..Self::default()
        }
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Raw-to-canonical normalization stage.
pub struct Normalizer {
    config: NormalizerConfig,
    publisher: Arc<dyn BackbonePublisher>,
    consumer: Arc<dyn BackboneConsumer>,
    normalized: AtomicU64,
    errors: AtomicU64,
    running: AtomicBool,
}

impl Normalizer {
    /// Create a stopped normalizer.
    #[must_use]
    pub fn new(
        config: NormalizerConfig,
        publisher: Arc<dyn BackbonePublisher>,
        consumer: Arc<dyn BackboneConsumer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            publisher,
            consumer,
            normalized: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Subscribe to the configured raw topics. Idempotent.
    ///
    /// Handlers hold a weak reference, so dropping the normalizer without
    /// calling `stop` leaves inert handlers behind rather than a cycle.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        for topic in &self.config.raw_topics {
            let weak: Weak<Self> = Arc::downgrade(self);
            let handler: EventHandler = Arc::new(move |event: &MarketEvent| {
                if let Some(normalizer) = weak.upgrade() {
                    let _ = normalizer.process(event);
                }
            });
            self.consumer.subscribe(topic, handler);
        }

        tracing::info!(
            topics = ?self.config.raw_topics,
            canonical_topic = %self.config.canonical_topic,
            schema_version = self.config.schema_version,
            "Normalizer started"
        );
    }

    /// Unsubscribe from the raw topics. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for topic in &self.config.raw_topics {
            self.consumer.unsubscribe(topic);
        }

        tracing::info!(
            normalized = self.normalized_count(),
            errors = self.error_count(),
            "Normalizer stopped"
        );
    }

    /// Whether `start` has been called without a matching `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validate one raw event and publish its canonical form.
    ///
    /// # Errors
    ///
    /// Returns the `ValidationError` that caused the event to be dropped.
    /// The error counter has already been incremented.
    pub fn process(&self, event: &MarketEvent) -> Result<(), ValidationError> {
        let event_type = match validate(event) {
            Ok(event_type) => event_type,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_rejected(e.reason());
                tracing::warn!(
                    event_id = %event.event_id,
                    instrument_id = %event.instrument_id,
                    error = %e,
                    "Dropping invalid event"
                );
                return Err(e);
            }
        };

        let published_at = Utc::now();
        let canonical = event.to_canonical(self.config.schema_version, published_at);
        metrics::record_event_latency(
            (published_at - event.receive_timestamp)
                .to_std()
                .unwrap_or_default(),
        );
        self.publisher.publish(
            &self.config.canonical_topic,
            &event.instrument_id,
            canonical,
        );

        let count = self.normalized.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_event_normalized(event_type);
        if count % LOG_EVERY == 0 {
            tracing::info!(normalized = count, "Normalizer progress");
        }

        Ok(())
    }

    /// Events published to the canonical topic.
    #[must_use]
    pub fn normalized_count(&self) -> u64 {
        self.normalized.load(Ordering::Relaxed)
    }

    /// Events dropped by validation.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Snapshot of both counters.
    #[must_use]
    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            running: self.is_running(),
            normalized: self.normalized_count(),
            errors: self.error_count(),
        }
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("config", &self.config)
            .field("normalized", &self.normalized_count())
            .field("errors", &self.error_count())
            .finish_non_exhaustive()
    }
}

/// Normalizer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct NormalizerStats {
    /// Whether the normalizer is subscribed.
    pub running: bool,
    /// Events published to the canonical topic.
    pub normalized: u64,
    /// Events dropped by validation.
    pub errors: u64,
}

fn validate(event: &MarketEvent) -> Result<EventType, ValidationError> {
    if event.event_id.trim().is_empty() {
        return Err(ValidationError::EmptyEventId);
    }
    if event.instrument_id.trim().is_empty() {
        return Err(ValidationError::EmptyInstrumentId);
    }
    let event_type = event.event_type.ok_or(ValidationError::MissingEventType)?;
    let payload = event
        .payload
        .as_ref()
        .ok_or(ValidationError::MissingPayload)?;

    if !payload.matches(event_type) {
        return Err(ValidationError::PayloadMismatch(event_type));
    }
    payload.validate()?;

    Ok(event_type)
}

// =============================================================================
// Errors
// =============================================================================

/// Reasons a raw event is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Blank event id.
    #[error("event id is empty")]
    EmptyEventId,

    /// Blank instrument id.
    #[error("instrument id is empty")]
    EmptyInstrumentId,

    /// No event type.
    #[error("event type is missing")]
    MissingEventType,

    /// No payload.
    #[error("payload is missing")]
    MissingPayload,

    /// Payload variant does not fit the event type.
    #[error("payload does not match event type {0}")]
    PayloadMismatch(EventType),

    /// Payload violates its invariants.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
}

impl ValidationError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::EmptyEventId => "empty_event_id",
            Self::EmptyInstrumentId => "empty_instrument_id",
            Self::MissingEventType => "missing_event_type",
            Self::MissingPayload => "missing_payload",
            Self::PayloadMismatch(_) => "payload_mismatch",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
