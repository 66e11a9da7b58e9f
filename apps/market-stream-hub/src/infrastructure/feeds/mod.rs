//! Feed Adapters
//!
//! Concrete market data sources and the bridge that publishes their raw
//! messages onto the backbone.
//!
//! - `lifecycle`: connection state machine and worker management shared
//!   by adapters
//! - `synthetic`: random-walk reference exchange
//! - `codec`: raw JSON wire format
//! - `ingest`: `FeedEventHandler` publishing decoded messages to the raw
//!   topics
//! - `events`: channel-backed `FeedEventHandler`

pub mod codec;
pub mod events;
pub mod heartbeat;
pub mod ingest;
pub mod lifecycle;
pub mod synthetic;

pub use codec::{CodecError, RawFeedMessage, RawQuote, RawTrade, Side};
pub use events::{ChannelEventHandler, FeedEvent};
pub use heartbeat::HeartbeatState;
pub use ingest::{FeedActivitySnapshot, IngestHandler};
pub use lifecycle::{ConnectionLifecycle, DISCONNECT_GRACE, DISCONNECT_REASON, EpochContext};
pub use synthetic::{BurstConfig, SyntheticConfigError, SyntheticFeedAdapter, SyntheticFeedConfig};
