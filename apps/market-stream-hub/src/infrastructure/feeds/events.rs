//! Channel-backed feed events
//!
//! Adapts the callback contract to a bounded Tokio channel for consumers
//! that prefer to `recv().await` lifecycle events. Sends never block; a
//! full channel drops the event and counts it.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::application::ports::{FeedError, FeedEventHandler, RawMessage};

/// Lifecycle event of one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The adapter reached `CONNECTED`.
    Connected {
        /// Adapter id.
        adapter_id: String,
    },
    /// The adapter returned to `DISCONNECTED`.
    Disconnected {
        /// Adapter id.
        adapter_id: String,
        /// Why the epoch ended.
        reason: String,
    },
    /// A raw message arrived.
    Message {
        /// Adapter id.
        adapter_id: String,
        /// The message.
        message: RawMessage,
    },
    /// A non-fatal error occurred.
    Error {
        /// Adapter id.
        adapter_id: String,
        /// The error.
        error: FeedError,
    },
    /// A heartbeat probe went unanswered.
    HeartbeatTimeout {
        /// Adapter id.
        adapter_id: String,
    },
}

impl FeedEvent {
    /// Adapter that produced the event.
    #[must_use]
    pub fn adapter_id(&self) -> &str {
        match self {
            Self::Connected { adapter_id }
            | Self::Disconnected { adapter_id, .. }
            | Self::Message { adapter_id, .. }
            | Self::Error { adapter_id, .. }
            | Self::HeartbeatTimeout { adapter_id } => adapter_id,
        }
    }
}

/// `FeedEventHandler` that forwards every callback into a bounded channel.
#[derive(Debug)]
pub struct ChannelEventHandler {
    tx: mpsc::Sender<FeedEvent>,
    dropped: AtomicU64,
}

impl ChannelEventHandler {
    /// Create a handler and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Create a handler whose events are consumed as a `Stream`.
    #[must_use]
    pub fn with_stream(capacity: usize) -> (Self, ReceiverStream<FeedEvent>) {
        let (handler, rx) = Self::new(capacity);
        (handler, ReceiverStream::new(rx))
    }

    /// Events dropped because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: FeedEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "Feed event dropped");
        }
    }
}

impl FeedEventHandler for ChannelEventHandler {
    fn on_connected(&self, adapter_id: &str) {
        self.forward(FeedEvent::Connected {
            adapter_id: adapter_id.to_string(),
        });
    }

    fn on_disconnected(&self, adapter_id: &str, reason: &str) {
        self.forward(FeedEvent::Disconnected {
            adapter_id: adapter_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_message(&self, adapter_id: &str, message: RawMessage) {
        self.forward(FeedEvent::Message {
            adapter_id: adapter_id.to_string(),
            message,
        });
    }

    fn on_error(&self, adapter_id: &str, error: &FeedError) {
        self.forward(FeedEvent::Error {
            adapter_id: adapter_id.to_string(),
            error: error.clone(),
        });
    }

    fn on_heartbeat_timeout(&self, adapter_id: &str) {
        self.forward(FeedEvent::HeartbeatTimeout {
            adapter_id: adapter_id.to_string(),
        });
    }
}
