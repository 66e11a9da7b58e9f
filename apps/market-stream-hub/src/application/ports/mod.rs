//! Port Interfaces
//!
//! Defines the interfaces (ports) between pipeline stages following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BackbonePublisher`: Publish events to a topic
//! - `FeedEventHandler`: Receive lifecycle callbacks from a feed adapter
//!
//! ## Driver Ports (Inbound)
//!
//! - `BackboneConsumer`: Register handlers on a topic
//! - `FeedAdapter`: Connect, disconnect and probe a market data source

mod backbone;
mod feed;

pub use backbone::{
    BackboneConsumer, BackbonePublisher, CANONICAL_EVENTS_TOPIC, EventHandler, RAW_QUOTES_TOPIC,
    RAW_TRADES_TOPIC,
};
pub use feed::{
    ConnectionState, FeedAdapter, FeedError, FeedEventHandler, RawMessage,
    SharedFeedEventHandler, TransportType,
};

#[cfg(test)]
pub use backbone::{MockBackboneConsumer, MockBackbonePublisher};
#[cfg(test)]
pub use feed::MockFeedEventHandler;
