//! In-Memory Backbone
//!
//! Topic-keyed publish/subscribe within one process.
//!
//! # Dispatch
//!
//! `publish` runs every handler registered on the topic synchronously on
//! the caller's task, in registration order. A publish therefore costs
//! the sum of its handlers: one slow subscriber delays every other
//! subscriber of the same topic and the publisher itself. Handlers must
//! stay fast and non-blocking.
//!
//! # Concurrency
//!
//! Handler lists are copy-on-write. `subscribe` and `unsubscribe` swap in
//! a new list under a short write lock; an in-flight publish keeps
//! iterating the snapshot it started with.
//!
//! # Failure Isolation
//!
//! A panicking handler is caught per invocation. The remaining handlers of
//! the same publish still run, the publisher never sees the panic, and the
//! handler stays registered.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::application::ports::{BackboneConsumer, BackbonePublisher, EventHandler};
use crate::domain::events::MarketEvent;
use crate::infrastructure::metrics;

/// Shared backbone reference.
pub type SharedBackbone = Arc<InMemoryBackbone>;

/// In-process backbone implementing both port traits.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use chrono::Utc;
/// use market_stream_hub::application::ports::{BackboneConsumer, BackbonePublisher};
/// use market_stream_hub::domain::events::{EventPayload, EventType, MarketEvent};
/// use market_stream_hub::infrastructure::backbone::InMemoryBackbone;
///
/// let backbone = InMemoryBackbone::new();
/// let seen = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&seen);
/// backbone.subscribe("demo", Arc::new(move |_event: &MarketEvent| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// let now = Utc::now();
/// let event = MarketEvent::raw(
///     "AAPL",
///     EventType::Status,
///     EventPayload::Opaque(serde_json::json!({"open": true})),
///     now,
///     now,
/// );
/// backbone.publish("demo", "AAPL", event);
///
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct InMemoryBackbone {
    topics: RwLock<HashMap<String, Arc<Vec<EventHandler>>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    handler_panics: AtomicU64,
}

impl InMemoryBackbone {
    /// Create an empty backbone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backbone behind an `Arc`.
    #[must_use]
    pub fn shared() -> SharedBackbone {
        Arc::new(Self::new())
    }

    /// Number of handlers registered on `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |handlers| handlers.len())
    }

    /// Get backbone statistics.
    #[must_use]
    pub fn stats(&self) -> BackboneStats {
        let topics = self.topics.read();
        BackboneStats {
            topics: topics.len(),
            handlers: topics.values().map(|handlers| handlers.len()).sum(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }

    fn snapshot(&self, topic: &str) -> Option<Arc<Vec<EventHandler>>> {
        self.topics.read().get(topic).cloned()
    }
}

impl BackbonePublisher for InMemoryBackbone {
    fn publish(&self, topic: &str, key: &str, event: MarketEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);

        let Some(handlers) = self.snapshot(topic) else {
            return;
        };

        let mut delivered = 0u64;
        for handler in handlers.iter() {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    self.handler_panics.fetch_add(1, Ordering::Relaxed);
                    metrics::record_backbone_handler_panic(topic);
                    tracing::error!(
                        topic,
                        key,
                        event_id = %event.event_id,
                        panic = panic_message(panic.as_ref()),
                        "Backbone handler panicked"
                    );
                }
            }
        }

        self.delivered.fetch_add(delivered, Ordering::Relaxed);
    }
}

impl BackboneConsumer for InMemoryBackbone {
    fn subscribe(&self, topic: &str, handler: EventHandler) {
        let mut topics = self.topics.write();
        let current = topics.get(topic).map(|h| h.as_slice()).unwrap_or_default();

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(handler);

        let count = next.len();
        topics.insert(topic.to_string(), Arc::new(next));
        drop(topics);

        tracing::debug!(topic, handlers = count, "Handler subscribed");
    }

    fn unsubscribe(&self, topic: &str) {
        if let Some(removed) = self.topics.write().remove(topic) {
            tracing::debug!(topic, handlers = removed.len(), "Topic unsubscribed");
        }
    }
}

impl std::fmt::Debug for InMemoryBackbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackbone")
            .field("stats", &self.stats())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Backbone statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackboneStats {
    /// Topics with at least one handler.
    pub topics: usize,
    /// Registered handlers across all topics.
    pub handlers: usize,
    /// Publish calls, including those with no subscribers.
    pub published: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::events::{EventPayload, EventType};

    fn status_event(instrument: &str) -> MarketEvent {
        let now = Utc::now();
        MarketEvent::raw(
            instrument,
            EventType::Status,
            EventPayload::Opaque(serde_json::json!({"halted": false})),
            now,
            now,
        )
    }

    fn recorder() -> (EventHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler = Arc::new(move |event: &MarketEvent| {
            sink.lock().push(event.instrument_id.clone());
        });
        (handler, seen)
    }

    #[test]
    fn publish_reaches_subscriber() {
        let backbone = InMemoryBackbone::new();
        let (handler, seen) = recorder();
        backbone.subscribe("test.topic", handler);

        backbone.publish("test.topic", "AAPL", status_event("AAPL"));

        assert_eq!(*seen.lock(), vec!["AAPL".to_string()]);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let backbone = InMemoryBackbone::new();

        backbone.publish("nobody.listens", "AAPL", status_event("AAPL"));

        let stats = backbone.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn every_subscriber_gets_exactly_one_copy() {
        let backbone = InMemoryBackbone::new();
        let counters: Vec<Arc<AtomicUsize>> = (0..5).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        for counter in &counters {
            let counter = Arc::clone(counter);
            backbone.subscribe(
                "fanout.topic",
                Arc::new(move |_: &MarketEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        backbone.publish("fanout.topic", "GOOG", status_event("GOOG"));

        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
        assert_eq!(backbone.stats().delivered, 5);
    }

    #[test]
    fn unsubscribe_removes_every_handler_on_topic() {
        let backbone = InMemoryBackbone::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        let (other, other_seen) = recorder();
        backbone.subscribe("unsub.topic", first);
        backbone.subscribe("unsub.topic", second);
        backbone.subscribe("other.topic", other);

        backbone.unsubscribe("unsub.topic");
        backbone.unsubscribe("unsub.topic");
        backbone.publish("unsub.topic", "MSFT", status_event("MSFT"));
        backbone.publish("other.topic", "MSFT", status_event("MSFT"));

        assert!(first_seen.lock().is_empty());
        assert!(second_seen.lock().is_empty());
        assert_eq!(other_seen.lock().len(), 1);
        assert_eq!(backbone.handler_count("unsub.topic"), 0);
    }

    #[test]
    fn delivery_preserves_publish_order() {
        let backbone = InMemoryBackbone::new();
        let (handler, seen) = recorder();
        backbone.subscribe("ordered", handler);

        for symbol in ["A", "B", "C", "D"] {
            backbone.publish("ordered", symbol, status_event(symbol));
        }

        assert_eq!(*seen.lock(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let backbone = InMemoryBackbone::new();
        let (before, before_seen) = recorder();
        let (after, after_seen) = recorder();

        backbone.subscribe("fragile", before);
        backbone.subscribe(
            "fragile",
            Arc::new(|_: &MarketEvent| panic!("handler exploded")),
        );
        backbone.subscribe("fragile", after);

        backbone.publish("fragile", "AAPL", status_event("AAPL"));
        backbone.publish("fragile", "MSFT", status_event("MSFT"));

        assert_eq!(before_seen.lock().len(), 2);
        assert_eq!(after_seen.lock().len(), 2);
        assert_eq!(backbone.handler_count("fragile"), 3);

        let stats = backbone.stats();
        assert_eq!(stats.handler_panics, 2);
        assert_eq!(stats.delivered, 4);
    }

    #[test]
    fn subscribe_during_publish_applies_to_next_publish() {
        let backbone = Arc::new(InMemoryBackbone::new());
        let (late, late_seen) = recorder();
        let late = Arc::new(Mutex::new(Some(late)));

        let weak = Arc::downgrade(&backbone);
        backbone.subscribe(
            "dynamic",
            Arc::new(move |_: &MarketEvent| {
                if let (Some(backbone), Some(handler)) = (weak.upgrade(), late.lock().take()) {
                    backbone.subscribe("dynamic", handler);
                }
            }),
        );

        backbone.publish("dynamic", "A", status_event("A"));
        assert!(late_seen.lock().is_empty());

        backbone.publish("dynamic", "B", status_event("B"));
        assert_eq!(*late_seen.lock(), vec!["B".to_string()]);
    }

    #[test]
    fn stats_track_topics_and_handlers() {
        let backbone = InMemoryBackbone::new();
        backbone.subscribe("a", recorder().0);
        backbone.subscribe("a", recorder().0);
        backbone.subscribe("b", recorder().0);

        let stats = backbone.stats();
        assert_eq!(stats.topics, 2);
        assert_eq!(stats.handlers, 3);
    }

    #[test]
    fn concurrent_publish_and_subscribe() {
        use std::thread;

        let backbone = Arc::new(InMemoryBackbone::new());
        let total = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..4 {
            let b = Arc::clone(&backbone);
            let t = Arc::clone(&total);
            handles.push(thread::spawn(move || {
                b.subscribe(
                    "busy",
                    Arc::new(move |_: &MarketEvent| {
                        t.fetch_add(1, Ordering::SeqCst);
                    }),
                );
                for _ in 0..100 {
                    b.publish("busy", "X", status_event("X"));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(backbone.handler_count("busy"), 4);
        assert_eq!(backbone.stats().published, 400);
        assert!(total.load(Ordering::SeqCst) >= 400);
    }
}
