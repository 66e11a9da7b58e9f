//! Backbone Ports
//!
//! Topic-keyed publish/subscribe contract shared by every pipeline stage.
//! The in-process implementation lives in `infrastructure::backbone`; a
//! broker-backed transport would implement the same two traits.

use std::sync::Arc;

use crate::domain::events::MarketEvent;

/// Topic carrying raw trade events from feed ingestion.
pub const RAW_TRADES_TOPIC: &str = "raw.trades";

/// Topic carrying raw quote events from feed ingestion.
pub const RAW_QUOTES_TOPIC: &str = "raw.quotes";

/// Topic carrying normalized events for client fan-out.
pub const CANONICAL_EVENTS_TOPIC: &str = "canonical.events";

/// Callback invoked for each event published on a subscribed topic.
pub type EventHandler = Arc<dyn Fn(&MarketEvent) + Send + Sync>;

/// Publishing side of the backbone.
#[cfg_attr(test, mockall::automock)]
pub trait BackbonePublisher: Send + Sync {
    /// Deliver `event` to every handler currently registered on `topic`.
    ///
    /// `key` is a partition hint for partitioned transports. Publishing to
    /// a topic with no handlers is a no-op.
    fn publish(&self, topic: &str, key: &str, event: MarketEvent);
}

/// Subscribing side of the backbone.
#[cfg_attr(test, mockall::automock)]
pub trait BackboneConsumer: Send + Sync {
    /// Register `handler` on `topic`. Every registration receives every
    /// event published on the topic.
    fn subscribe(&self, topic: &str, handler: EventHandler);

    /// Remove every handler registered on `topic`.
    fn unsubscribe(&self, topic: &str);
}
