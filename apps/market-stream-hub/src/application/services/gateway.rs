//! Fan-out Gateway
//!
//! Routes canonical events to client sessions by instrument.
//!
//! # Sessions
//!
//! Each session owns a bounded outbound queue of serialized JSON text.
//! The transport (see `infrastructure::websocket`) drains the queue into
//! the socket. Enqueueing never blocks: a full or closed queue is a
//! delivery failure for that session only and the event is dropped for it.
//!
//! # Client Protocol
//!
//! ```json
//! {"action": "subscribe", "instrumentId": "AAPL"}
//! {"action": "unsubscribe", "instrumentId": "*"}
//! ```
//!
//! Each accepted request is acknowledged on the same queue:
//!
//! ```json
//! {"status": "subscribed", "instrumentId": "AAPL"}
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{BackboneConsumer, CANONICAL_EVENTS_TOPIC, EventHandler};
use crate::domain::events::MarketEvent;
use crate::domain::subscription::{SessionId, SubscriptionError, SubscriptionRegistry};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Capacity of each session's outbound queue.
    pub session_buffer: usize,
    /// Topic carrying canonical events.
    pub canonical_topic: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_buffer: 1024,
            canonical_topic: CANONICAL_EVENTS_TOPIC.to_string(),
        }
    }
}

// =============================================================================
// Client Messages
// =============================================================================

/// Inbound client request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    /// `subscribe` or `unsubscribe`, any case.
    pub action: String,
    /// Instrument symbol or `"*"`.
    pub instrument_id: String,
}

/// Parsed request action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    /// Add the instrument to the session's set.
    Subscribe,
    /// Remove the instrument from the session's set.
    Unsubscribe,
}

impl ClientAction {
    /// Parse an action name case-insensitively.
    #[must_use]
    pub fn parse(action: &str) -> Option<Self> {
        if action.eq_ignore_ascii_case("subscribe") {
            Some(Self::Subscribe)
        } else if action.eq_ignore_ascii_case("unsubscribe") {
            Some(Self::Unsubscribe)
        } else {
            None
        }
    }
}

/// Acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Subscribe request applied.
    Subscribed,
    /// Unsubscribe request applied.
    Unsubscribed,
}

/// Outbound acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAck {
    /// Applied action.
    pub status: AckStatus,
    /// Instrument the request named, trimmed as stored.
    pub instrument_id: String,
}

// =============================================================================
// Gateway
// =============================================================================

/// Per-session fan-out of canonical events.
pub struct FanoutGateway {
    config: GatewayConfig,
    registry: SubscriptionRegistry,
    outbound: RwLock<HashMap<SessionId, mpsc::Sender<String>>>,
    next_session: AtomicU64,
    attached: AtomicBool,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
    rejected_requests: AtomicU64,
}

impl FanoutGateway {
    /// Create a gateway with no sessions.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: SubscriptionRegistry::new(),
            outbound: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            attached: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
        })
    }

    /// Subscribe to the canonical topic. Idempotent.
    pub fn attach(self: &Arc<Self>, consumer: &dyn BackboneConsumer) {
        if self.attached.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let handler: EventHandler = Arc::new(move |event: &MarketEvent| {
            if let Some(gateway) = weak.upgrade() {
                gateway.broadcast(event);
            }
        });
        consumer.subscribe(&self.config.canonical_topic, handler);

        tracing::info!(topic = %self.config.canonical_topic, "Gateway attached");
    }

    /// Unsubscribe from the canonical topic. Idempotent.
    pub fn detach(&self, consumer: &dyn BackboneConsumer) {
        if self.attached.swap(false, Ordering::SeqCst) {
            consumer.unsubscribe(&self.config.canonical_topic);
            tracing::info!(topic = %self.config.canonical_topic, "Gateway detached");
        }
    }

    /// Register a new session with an empty subscription set.
    ///
    /// Returns the session id and the receiving end of its outbound queue.
    pub fn open_session(&self) -> (SessionId, mpsc::Receiver<String>) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.session_buffer.max(1));

        self.outbound.write().insert(session, tx);
        self.registry.open_session(session);

        let sessions = self.session_count();
        metrics::set_gateway_sessions(sessions);
        tracing::info!(session_id = session, sessions, "Session opened");

        (session, rx)
    }

    /// Remove a session and its subscription set.
    ///
    /// Returns `false` for an unknown session.
    pub fn close_session(&self, session: SessionId) -> bool {
        let sender = self.outbound.write().remove(&session);
        let subscription = self.registry.close_session(session);

        if sender.is_none() && subscription.is_none() {
            return false;
        }

        let sessions = self.session_count();
        metrics::set_gateway_sessions(sessions);
        tracing::info!(
            session_id = session,
            instruments = subscription.map_or(0, |s| s.len()),
            sessions,
            "Session closed"
        );
        true
    }

    /// Apply one inbound client message and enqueue its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` for malformed JSON, an unknown action, an
    /// unknown session or a blank instrument. No acknowledgement is sent
    /// in that case.
    pub fn handle_client_message(
        &self,
        session: SessionId,
        text: &str,
    ) -> Result<ClientAck, GatewayError> {
        let result = self.apply_request(session, text);

        match &result {
            Ok(ack) => {
                tracing::debug!(
                    session_id = session,
                    status = ?ack.status,
                    instrument_id = %ack.instrument_id,
                    "Client request applied"
                );
                match serde_json::to_string(ack) {
                    Ok(json) => {
                        if let Err(e) = self.deliver(session, json) {
                            self.record_delivery_failure(&e);
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to serialize ack"),
                }
            }
            Err(e) => {
                self.rejected_requests.fetch_add(1, Ordering::Relaxed);
                metrics::record_gateway_request_rejected();
                tracing::warn!(session_id = session, error = %e, "Rejected client request");
            }
        }

        result
    }

    fn apply_request(&self, session: SessionId, text: &str) -> Result<ClientAck, GatewayError> {
        let request: ClientRequest = serde_json::from_str(text)
            .map_err(|e| GatewayError::MalformedRequest(e.to_string()))?;

        let action = ClientAction::parse(&request.action)
            .ok_or_else(|| GatewayError::UnknownAction(request.action.clone()))?;

        let instrument_id = request.instrument_id.trim();
        let status = match action {
            ClientAction::Subscribe => {
                self.registry.subscribe(session, instrument_id)?;
                AckStatus::Subscribed
            }
            ClientAction::Unsubscribe => {
                self.registry.unsubscribe(session, instrument_id)?;
                AckStatus::Unsubscribed
            }
        };

        Ok(ClientAck {
            status,
            instrument_id: instrument_id.to_string(),
        })
    }

    /// Push one canonical event to every matching session.
    ///
    /// The event is serialized once. Returns the number of sessions it was
    /// enqueued for.
    pub fn broadcast(&self, event: &MarketEvent) -> usize {
        let targets = self.registry.matching_sessions(&event.instrument_id);
        if targets.is_empty() {
            return 0;
        }

        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(event_id = %event.event_id, error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        for session in targets {
            match self.deliver(session, json.clone()) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::UnknownSession(_)) => {}
                Err(e) => self.record_delivery_failure(&e),
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        metrics::record_gateway_delivered(delivered as u64);
        delivered
    }

    fn deliver(&self, session: SessionId, text: String) -> Result<(), DeliveryError> {
        let outbound = self.outbound.read();
        let sender = outbound
            .get(&session)
            .ok_or(DeliveryError::UnknownSession(session))?;

        sender.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::SlowConsumer(session),
            TrySendError::Closed(_) => DeliveryError::SessionClosed(session),
        })
    }

    fn record_delivery_failure(&self, error: &DeliveryError) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_gateway_delivery_failure(error.kind());
        tracing::warn!(error = %error, "Dropped message for session");
    }

    /// Snapshot of a session's subscribed instruments, sorted.
    #[must_use]
    pub fn session_instruments(&self, session: SessionId) -> Option<Vec<String>> {
        self.registry
            .subscription(session)
            .map(|subscription| subscription.instruments())
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.outbound.read().len()
    }

    /// Gateway counters and registry statistics.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        let registry = self.registry.stats();
        GatewayStats {
            sessions: registry.session_count,
            instruments: registry.instrument_count,
            wildcard_sessions: registry.wildcard_sessions,
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FanoutGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutGateway")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Gateway statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Open sessions.
    pub sessions: usize,
    /// Distinct instruments with at least one subscriber.
    pub instruments: usize,
    /// Sessions subscribed to everything.
    pub wildcard_sessions: usize,
    /// Messages enqueued for sessions.
    pub delivered: u64,
    /// Messages dropped for a closed or full session.
    pub delivery_failures: u64,
    /// Client requests rejected without acknowledgement.
    pub rejected_requests: u64,
}

// =============================================================================
// Errors
// =============================================================================

/// Client request errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The message was not a valid request object.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The action was neither subscribe nor unsubscribe.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The subscription change was rejected.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Failure to enqueue a message for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session's receiver is gone.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The session's outbound queue is full.
    #[error("session {0} outbound queue is full")]
    SlowConsumer(SessionId),

    /// The session is not registered.
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),
}

impl DeliveryError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::SessionClosed(_) => "closed",
            Self::SlowConsumer(_) => "slow_consumer",
            Self::UnknownSession(_) => "unknown_session",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::events::{EventPayload, EventType, Trade};
    use crate::domain::subscription::WILDCARD;

    fn canonical_trade(instrument: &str) -> MarketEvent {
        let now = Utc::now();
        let trade = Trade::new(Decimal::new(10_025, 2), Decimal::from(100), None).unwrap();
        MarketEvent::raw(
            instrument,
            EventType::Trade,
            EventPayload::Trade(trade),
            now,
            now,
        )
        .to_canonical(1, now)
    }

    fn request(action: &str, instrument: &str) -> String {
        serde_json::json!({ "action": action, "instrumentId": instrument }).to_string()
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn client_action_is_case_insensitive() {
        assert_eq!(ClientAction::parse("subscribe"), Some(ClientAction::Subscribe));
        assert_eq!(ClientAction::parse("SUBSCRIBE"), Some(ClientAction::Subscribe));
        assert_eq!(ClientAction::parse("UnSubscribe"), Some(ClientAction::Unsubscribe));
        assert_eq!(ClientAction::parse("watch"), None);
    }

    #[test]
    fn ack_wire_shape() {
        let ack = ClientAck {
            status: AckStatus::Subscribed,
            instrument_id: "AAPL".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&ack).unwrap(),
            r#"{"status":"subscribed","instrumentId":"AAPL"}"#
        );
    }

    #[test]
    fn open_session_starts_empty_and_close_removes_it() {
        let gateway = FanoutGateway::new(GatewayConfig::default());

        let (session, _rx) = gateway.open_session();
        assert_eq!(gateway.session_count(), 1);
        assert_eq!(gateway.session_instruments(session), Some(vec![]));

        assert!(gateway.close_session(session));
        assert!(!gateway.close_session(session));
        assert_eq!(gateway.session_count(), 0);
        assert_eq!(gateway.session_instruments(session), None);
    }

    #[test]
    fn subscribe_enqueues_ack_and_updates_set() {
        let gateway = FanoutGateway::new(GatewayConfig::default());
        let (session, mut rx) = gateway.open_session();

        let ack = gateway
            .handle_client_message(session, &request("Subscribe", "AAPL"))
            .unwrap();

        assert_eq!(ack.status, AckStatus::Subscribed);
        assert_eq!(ack.instrument_id, "AAPL");
        assert_eq!(
            drain(&mut rx),
            vec![r#"{"status":"subscribed","instrumentId":"AAPL"}"#.to_string()]
        );
        assert_eq!(
            gateway.session_instruments(session),
            Some(vec!["AAPL".to_string()])
        );

        let ack = gateway
            .handle_client_message(session, &request("unsubscribe", "AAPL"))
            .unwrap();
        assert_eq!(ack.status, AckStatus::Unsubscribed);
        assert_eq!(gateway.session_instruments(session), Some(vec![]));
    }

    #[test]
    fn ack_names_the_stored_instrument() {
        let gateway = FanoutGateway::new(GatewayConfig::default());
        let (session, mut rx) = gateway.open_session();

        let ack = gateway
            .handle_client_message(session, &request("subscribe", "  AAPL "))
            .unwrap();

        assert_eq!(ack.instrument_id, "AAPL");
        assert_eq!(
            drain(&mut rx),
            vec![r#"{"status":"subscribed","instrumentId":"AAPL"}"#.to_string()]
        );
        assert_eq!(
            gateway.session_instruments(session),
            Some(vec!["AAPL".to_string()])
        );

        let ack = gateway
            .handle_client_message(session, &request("unsubscribe", "AAPL\t"))
            .unwrap();
        assert_eq!(ack.instrument_id, "AAPL");
        assert_eq!(gateway.session_instruments(session), Some(vec![]));
    }

    #[test]
    fn rejected_requests_get_no_ack() {
        let gateway = FanoutGateway::new(GatewayConfig::default());
        let (session, mut rx) = gateway.open_session();

        assert!(matches!(
            gateway.handle_client_message(session, "not json"),
            Err(GatewayError::MalformedRequest(_))
        ));
        assert_eq!(
            gateway.handle_client_message(session, &request("watch", "AAPL")),
            Err(GatewayError::UnknownAction("watch".to_string()))
        );
        assert_eq!(
            gateway.handle_client_message(99, &request("subscribe", "AAPL")),
            Err(GatewayError::Subscription(SubscriptionError::UnknownSession(99)))
        );

        assert!(drain(&mut rx).is_empty());
        assert_eq!(gateway.stats().rejected_requests, 3);
    }

    #[test]
    fn broadcast_filters_by_instrument_and_wildcard() {
        let gateway = FanoutGateway::new(GatewayConfig::default());
        let (aapl_only, mut aapl_rx) = gateway.open_session();
        let (everything, mut all_rx) = gateway.open_session();
        let (_idle, mut idle_rx) = gateway.open_session();

        gateway
            .handle_client_message(aapl_only, &request("subscribe", "AAPL"))
            .unwrap();
        gateway
            .handle_client_message(everything, &request("subscribe", WILDCARD))
            .unwrap();
        drain(&mut aapl_rx);
        drain(&mut all_rx);

        assert_eq!(gateway.broadcast(&canonical_trade("AAPL")), 2);
        assert_eq!(gateway.broadcast(&canonical_trade("GOOG")), 1);

        let aapl_msgs = drain(&mut aapl_rx);
        assert_eq!(aapl_msgs.len(), 1);
        assert!(aapl_msgs[0].contains(r#""instrumentId":"AAPL""#));

        let all_msgs = drain(&mut all_rx);
        assert_eq!(all_msgs.len(), 2);
        assert!(all_msgs[1].contains(r#""instrumentId":"GOOG""#));

        assert!(drain(&mut idle_rx).is_empty());
        assert_eq!(gateway.stats().delivered, 3);
    }

    #[test]
    fn closed_session_does_not_affect_others() {
        let gateway = FanoutGateway::new(GatewayConfig::default());
        let (gone, gone_rx) = gateway.open_session();
        let (alive, mut alive_rx) = gateway.open_session();

        gateway
            .handle_client_message(gone, &request("subscribe", "AAPL"))
            .unwrap();
        gateway
            .handle_client_message(alive, &request("subscribe", "AAPL"))
            .unwrap();
        drain(&mut alive_rx);
        drop(gone_rx);

        assert_eq!(gateway.broadcast(&canonical_trade("AAPL")), 1);
        assert_eq!(drain(&mut alive_rx).len(), 1);
        assert_eq!(gateway.stats().delivery_failures, 1);
    }

    #[test]
    fn full_session_queue_drops_only_for_that_session() {
        let gateway = FanoutGateway::new(GatewayConfig {
            session_buffer: 2,
            ..GatewayConfig::default()
        });
        let (slow, _slow_rx) = gateway.open_session();
        let (fast, mut fast_rx) = gateway.open_session();

        // The ack takes one of the two slots.
        gateway
            .handle_client_message(slow, &request("subscribe", "AAPL"))
            .unwrap();
        gateway
            .handle_client_message(fast, &request("subscribe", "AAPL"))
            .unwrap();

        for _ in 0..3 {
            gateway.broadcast(&canonical_trade("AAPL"));
            drain(&mut fast_rx);
        }

        let stats = gateway.stats();
        assert_eq!(stats.delivery_failures, 2);
        assert_eq!(stats.delivered, 4);
    }

    #[test]
    fn broadcast_without_sessions_is_a_no_op() {
        let gateway = FanoutGateway::new(GatewayConfig::default());
        assert_eq!(gateway.broadcast(&canonical_trade("AAPL")), 0);
        assert_eq!(gateway.stats(), GatewayStats::default());
    }
}
