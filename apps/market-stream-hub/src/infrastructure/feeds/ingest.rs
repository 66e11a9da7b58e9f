//! Ingest Bridge
//!
//! `FeedEventHandler` that turns adapter callbacks into raw backbone
//! events. Payloads are decoded with the raw feed codec and published to
//! `raw.trades` or `raw.quotes` keyed by instrument id. Undecodable
//! payloads are counted and dropped.
//!
//! Per-adapter activity is tracked for the health endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::codec::{self, RawFeedMessage};
use crate::application::ports::{
    BackbonePublisher, FeedError, FeedEventHandler, RAW_QUOTES_TOPIC, RAW_TRADES_TOPIC, RawMessage,
};
use crate::infrastructure::metrics::{self, MessageKind};

#[derive(Debug, Default)]
struct FeedActivity {
    connected: AtomicBool,
    messages: AtomicU64,
    decode_errors: AtomicU64,
    feed_errors: AtomicU64,
    heartbeat_timeouts: AtomicU64,
    last_disconnect_reason: RwLock<Option<String>>,
}

/// Activity counters of one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedActivitySnapshot {
    /// Adapter id.
    pub adapter_id: String,
    /// Whether the last lifecycle callback was `on_connected`.
    pub connected: bool,
    /// Messages published to a raw topic.
    pub messages: u64,
    /// Messages dropped as undecodable.
    pub decode_errors: u64,
    /// Errors reported through `on_error`.
    pub feed_errors: u64,
    /// Unanswered heartbeats.
    pub heartbeat_timeouts: u64,
    /// Reason given by the most recent `on_disconnected`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect_reason: Option<String>,
}

/// Bridge from feed adapters onto the raw topics.
pub struct IngestHandler {
    publisher: Arc<dyn BackbonePublisher>,
    feeds: RwLock<HashMap<String, Arc<FeedActivity>>>,
}

impl IngestHandler {
    /// Create a handler publishing through `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<dyn BackbonePublisher>) -> Self {
        Self {
            publisher,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Activity of every adapter seen so far, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FeedActivitySnapshot> {
        let mut snapshots: Vec<_> = self
            .feeds
            .read()
            .iter()
            .map(|(id, activity)| FeedActivitySnapshot {
                adapter_id: id.clone(),
                connected: activity.connected.load(Ordering::Relaxed),
                messages: activity.messages.load(Ordering::Relaxed),
                decode_errors: activity.decode_errors.load(Ordering::Relaxed),
                feed_errors: activity.feed_errors.load(Ordering::Relaxed),
                heartbeat_timeouts: activity.heartbeat_timeouts.load(Ordering::Relaxed),
                last_disconnect_reason: activity.last_disconnect_reason.read().clone(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        snapshots
    }

    /// Number of adapters whose last lifecycle callback was `on_connected`.
    #[must_use]
    pub fn connected_feeds(&self) -> usize {
        self.feeds
            .read()
            .values()
            .filter(|a| a.connected.load(Ordering::Relaxed))
            .count()
    }

    fn activity(&self, adapter_id: &str) -> Arc<FeedActivity> {
        if let Some(activity) = self.feeds.read().get(adapter_id) {
            return Arc::clone(activity);
        }
        Arc::clone(
            self.feeds
                .write()
                .entry(adapter_id.to_string())
                .or_default(),
        )
    }
}

impl FeedEventHandler for IngestHandler {
    fn on_connected(&self, adapter_id: &str) {
        self.activity(adapter_id)
            .connected
            .store(true, Ordering::Relaxed);
        metrics::set_connected_feeds(self.connected_feeds());
        tracing::info!(adapter_id, "Feed ingest started");
    }

    fn on_disconnected(&self, adapter_id: &str, reason: &str) {
        let activity = self.activity(adapter_id);
        activity.connected.store(false, Ordering::Relaxed);
        *activity.last_disconnect_reason.write() = Some(reason.to_string());
        metrics::set_connected_feeds(self.connected_feeds());
        tracing::info!(adapter_id, reason, "Feed ingest stopped");
    }

    fn on_message(&self, adapter_id: &str, message: RawMessage) {
        let activity = self.activity(adapter_id);

        let decoded = match codec::decode(message.payload()) {
            Ok(decoded) => decoded,
            Err(e) => {
                activity.decode_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_error();
                tracing::warn!(
                    adapter_id,
                    sequence = ?message.sequence_number(),
                    error = %e,
                    "Dropping undecodable feed message"
                );
                return;
            }
        };

        let (topic, kind) = match decoded {
            RawFeedMessage::Trade(_) => (RAW_TRADES_TOPIC, MessageKind::Trade),
            RawFeedMessage::Quote(_) => (RAW_QUOTES_TOPIC, MessageKind::Quote),
        };
        let event = decoded.to_raw_event(message.receive_timestamp());
        let key = event.instrument_id.clone();

        self.publisher.publish(topic, &key, event);
        activity.messages.fetch_add(1, Ordering::Relaxed);
        metrics::record_raw_message(kind);
    }

    fn on_error(&self, adapter_id: &str, error: &FeedError) {
        self.activity(adapter_id)
            .feed_errors
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_feed_error();
        tracing::warn!(adapter_id, error = %error, "Feed reported an error");
    }

    fn on_heartbeat_timeout(&self, adapter_id: &str) {
        self.activity(adapter_id)
            .heartbeat_timeouts
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_heartbeat_timeout();
        tracing::warn!(adapter_id, "Feed heartbeat timed out");
    }
}

impl std::fmt::Debug for IngestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestHandler")
            .field("feeds", &self.feeds.read().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
