#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Hub - Market Data Ingest and Fan-out
//!
//! An in-process pipeline that connects market data feeds, normalizes
//! their raw messages into canonical events, and fans those events out to
//! WebSocket clients filtered by instrument.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `events`: Raw and canonical market events, trade and quote payloads
//!   - `subscription`: Per-session instrument subscriptions
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Backbone publish/subscribe and feed adapter contracts
//!   - `services`: Normalizer, fan-out gateway, feed supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `backbone`: In-memory topic bus
//!   - `feeds`: Connection lifecycle, synthetic exchange, ingest bridge
//!   - `websocket`: Client session endpoint
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Feed A ──┐                 ┌────────────┐                 ┌─────────┐──► Session 1
//!          ├─► raw.trades ──►│ Normalizer │─► canonical ───►│ Gateway │──► Session 2
//! Feed B ──┘   raw.quotes    └────────────┘     .events     └─────────┘──► Session N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core event and subscription types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{EventPayload, EventType, MarketEvent, PayloadError, Quote, Trade};
pub use domain::subscription::{
    ClientSubscription, SessionId, SubscriptionError, SubscriptionRegistry, WILDCARD,
};

// Ports
pub use application::ports::{
    BackboneConsumer, BackbonePublisher, CANONICAL_EVENTS_TOPIC, ConnectionState, EventHandler,
    FeedAdapter, FeedError, FeedEventHandler, RAW_QUOTES_TOPIC, RAW_TRADES_TOPIC, RawMessage,
    SharedFeedEventHandler, TransportType,
};

// Pipeline stages
pub use application::services::{
    ClientAck, FanoutGateway, FeedSupervisor, GatewayConfig, GatewayStats, Normalizer,
    NormalizerConfig, NormalizerStats, SupervisorConfig,
};

// Backbone
pub use infrastructure::backbone::{BackboneStats, InMemoryBackbone, SharedBackbone};

// Feeds
pub use infrastructure::feeds::{
    BurstConfig, ChannelEventHandler, FeedEvent, IngestHandler, RawFeedMessage,
    SyntheticFeedAdapter, SyntheticFeedConfig,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, HeartbeatSettings, HubConfig, PipelineSettings, ServerSettings,
    SyntheticSettings,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::websocket::{GatewayServer, GatewayServerError, MARKET_DATA_PATH};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
