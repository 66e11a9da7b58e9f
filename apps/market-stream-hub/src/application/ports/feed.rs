//! Feed Adapter Ports
//!
//! Lifecycle contract between a market data source and its supervisor.
//!
//! # State Machine
//!
//! ```text
//! DISCONNECTED --connect()--> CONNECTING --worker started--> CONNECTED
//!      ^                                                         |
//!      +------------- disconnect() or fatal error ---------------+
//! ```
//!
//! Callbacks for one adapter are delivered sequentially from that adapter's
//! own worker task and never overlap. `on_message` is never delivered
//! before `on_connected`, and nothing but the single `on_disconnected`
//! follows a disconnect.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Raw Message
// =============================================================================

/// Transport-delivered payload, before any decoding.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    payload: Vec<u8>,
    receive_timestamp: DateTime<Utc>,
    sequence_number: Option<u64>,
}

impl RawMessage {
    /// Create a sequenced message.
    #[must_use]
    pub const fn new(
        payload: Vec<u8>,
        receive_timestamp: DateTime<Utc>,
        sequence_number: u64,
    ) -> Self {
        Self {
            payload,
            receive_timestamp,
            sequence_number: Some(sequence_number),
        }
    }

    /// Create a message from a signed wire sequence where negative values
    /// mean "unknown".
    #[must_use]
    pub fn from_wire_sequence(
        payload: Vec<u8>,
        receive_timestamp: DateTime<Utc>,
        wire_sequence: i64,
    ) -> Self {
        Self {
            payload,
            receive_timestamp,
            sequence_number: u64::try_from(wire_sequence).ok(),
        }
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Time the adapter received the message.
    #[must_use]
    pub const fn receive_timestamp(&self) -> DateTime<Utc> {
        self.receive_timestamp
    }

    /// Sequence number within the current connection epoch, if known.
    #[must_use]
    pub const fn sequence_number(&self) -> Option<u64> {
        self.sequence_number
    }
}

// =============================================================================
// Adapter Metadata
// =============================================================================

/// Transport used by an adapter. Metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportType {
    /// Raw TCP stream.
    Tcp,
    /// UDP (typically multicast).
    Udp,
    /// WebSocket stream.
    Websocket,
    /// Vendor-provided client library.
    VendorSdk,
}

impl TransportType {
    /// Get the transport name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Websocket => "WEBSOCKET",
            Self::VendorSdk => "VENDOR_SDK",
        }
    }
}

/// Adapter connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected. Initial and terminal state.
    Disconnected = 0,
    /// Connect requested, worker not yet running.
    Connecting = 1,
    /// Worker running and emitting.
    Connected = 2,
}

impl ConnectionState {
    /// Decode a state stored in an atomic.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    /// Encode the state for storage in an atomic.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Receiver of adapter lifecycle callbacks.
///
/// Implementations run on the adapter's hot path and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait FeedEventHandler: Send + Sync {
    /// The adapter reached `CONNECTED`. Delivered once per epoch.
    fn on_connected(&self, adapter_id: &str);

    /// The adapter returned to `DISCONNECTED`. Delivered once per epoch.
    fn on_disconnected(&self, adapter_id: &str, reason: &str);

    /// A raw message was received.
    fn on_message(&self, adapter_id: &str, message: RawMessage);

    /// A non-fatal error occurred while producing a message.
    fn on_error(&self, adapter_id: &str, error: &FeedError);

    /// A heartbeat probe went unanswered within the configured timeout.
    fn on_heartbeat_timeout(&self, adapter_id: &str);
}

/// Shared handle to a callback receiver.
pub type SharedFeedEventHandler = Arc<dyn FeedEventHandler>;

// =============================================================================
// Adapter
// =============================================================================

/// A market data source with a connect/disconnect/heartbeat lifecycle.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Stable adapter identifier, used in every callback.
    fn id(&self) -> &str;

    /// Transport metadata.
    fn transport_type(&self) -> TransportType;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Whether the adapter is `CONNECTED`.
    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Start a connection epoch, delivering callbacks to `handler`.
    ///
    /// Returns once the worker is scheduled; `on_connected` follows
    /// asynchronously.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::AlreadyConnected` unless the adapter is
    /// `DISCONNECTED`, and `FeedError::NoRuntime` when called outside a
    /// Tokio runtime.
    fn connect(&self, handler: SharedFeedEventHandler) -> Result<(), FeedError>;

    /// End the current epoch. Idempotent.
    ///
    /// Cancels emission, waits a bounded grace period for the worker, then
    /// delivers `on_disconnected` once.
    async fn disconnect(&self);

    /// Issue a liveness probe.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::NotConnected` unless the adapter is `CONNECTED`.
    fn send_heartbeat(&self) -> Result<(), FeedError>;
}

// =============================================================================
// Errors
// =============================================================================

/// Feed adapter errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// `connect` called while not disconnected.
    #[error("adapter {0} is already connected")]
    AlreadyConnected(String),

    /// Operation requires a connected adapter.
    #[error("adapter {0} is not connected")]
    NotConnected(String),

    /// `connect` called outside a Tokio runtime.
    #[error("adapter {0} cannot start outside a Tokio runtime")]
    NoRuntime(String),

    /// Producing a message failed. Reported via `on_error`.
    #[error("emission failed: {0}")]
    Emission(String),
}

// =============================================================================
// Tests
// =============================================================================
