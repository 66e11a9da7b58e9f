//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feeds**: Raw messages, decode errors, feed errors, heartbeat timeouts
//! - **Normalizer**: Normalized and rejected events, ingest-to-publish latency
//! - **Backbone**: Handler panics
//! - **Gateway**: Sessions, deliveries, delivery failures, rejected requests
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::events::EventType;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every metric.
///
/// Returns the existing handle if already initialized.
///
/// # Errors
///
/// Returns `MetricsError::Install` if another global recorder is
/// already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Metrics setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed ingestion
    describe_counter!(
        "market_hub_raw_messages_total",
        "Raw messages received from feed adapters"
    );
    describe_counter!(
        "market_hub_decode_errors_total",
        "Raw messages that could not be decoded"
    );
    describe_counter!(
        "market_hub_feed_errors_total",
        "Non-fatal errors reported by feed adapters"
    );
    describe_counter!(
        "market_hub_heartbeat_timeouts_total",
        "Heartbeat probes that went unanswered"
    );
    describe_gauge!(
        "market_hub_connected_feeds",
        "Feed adapters currently connected"
    );

    // Normalizer
    describe_counter!(
        "market_hub_events_normalized_total",
        "Events published to the canonical topic"
    );
    describe_counter!(
        "market_hub_events_rejected_total",
        "Raw events dropped by validation"
    );
    describe_histogram!(
        "market_hub_event_latency_seconds",
        "Time from adapter receipt to canonical publish"
    );

    // Backbone
    describe_counter!(
        "market_hub_backbone_handler_panics_total",
        "Backbone handler invocations that panicked"
    );

    // Gateway
    describe_gauge!("market_hub_gateway_sessions", "Open client sessions");
    describe_counter!(
        "market_hub_gateway_messages_delivered_total",
        "Canonical events enqueued for client sessions"
    );
    describe_counter!(
        "market_hub_gateway_delivery_failures_total",
        "Messages dropped for a closed or slow session"
    );
    describe_counter!(
        "market_hub_gateway_requests_rejected_total",
        "Client requests rejected without acknowledgement"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for raw message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Trade print.
    Trade,
    /// Quote update.
    Quote,
}

impl MessageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
        }
    }
}

/// Record a decoded raw message.
pub fn record_raw_message(kind: MessageKind) {
    counter!(
        "market_hub_raw_messages_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a raw message that failed to decode.
pub fn record_decode_error() {
    counter!("market_hub_decode_errors_total").increment(1);
}

/// Record a non-fatal feed error.
pub fn record_feed_error() {
    counter!("market_hub_feed_errors_total").increment(1);
}

/// Record an unanswered heartbeat.
pub fn record_heartbeat_timeout() {
    counter!("market_hub_heartbeat_timeouts_total").increment(1);
}

/// Update the connected feed count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_feeds(count: usize) {
    gauge!("market_hub_connected_feeds").set(count as f64);
}

/// Record an event published to the canonical topic.
pub fn record_event_normalized(event_type: EventType) {
    counter!(
        "market_hub_events_normalized_total",
        "event_type" => event_type.as_str()
    )
    .increment(1);
}

/// Record an event dropped by validation.
pub fn record_event_rejected(reason: &'static str) {
    counter!(
        "market_hub_events_rejected_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record time from adapter receipt to canonical publish.
pub fn record_event_latency(latency: Duration) {
    histogram!("market_hub_event_latency_seconds").record(latency.as_secs_f64());
}

/// Record a panicking backbone handler.
pub fn record_backbone_handler_panic(topic: &str) {
    counter!(
        "market_hub_backbone_handler_panics_total",
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// Update the open session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_gateway_sessions(count: usize) {
    gauge!("market_hub_gateway_sessions").set(count as f64);
}

/// Record events enqueued for sessions.
pub fn record_gateway_delivered(count: u64) {
    if count > 0 {
        counter!("market_hub_gateway_messages_delivered_total").increment(count);
    }
}

/// Record a message dropped for one session.
pub fn record_gateway_delivery_failure(kind: &'static str) {
    counter!(
        "market_hub_gateway_delivery_failures_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a rejected client request.
pub fn record_gateway_request_rejected() {
    counter!("market_hub_gateway_requests_rejected_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_as_str() {
        assert_eq!(MessageKind::Trade.as_str(), "trade");
        assert_eq!(MessageKind::Quote.as_str(), "quote");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_raw_message(MessageKind::Trade);
        record_event_normalized(EventType::Quote);
        record_event_latency(Duration::from_millis(3));
        set_gateway_sessions(2);
        record_gateway_delivered(0);
    }
}
