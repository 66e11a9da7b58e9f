//! Feed Supervisor
//!
//! Owns the statically configured adapter list. Connects every adapter
//! with failure isolation, drives periodic heartbeats and disconnects
//! everything on shutdown.
//!
//! Heartbeat timeouts are delivered to the shared `FeedEventHandler`.
//! The supervisor applies no reconnection policy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ConnectionState, FeedAdapter, FeedError, SharedFeedEventHandler, TransportType,
};

/// Supervisor configuration.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    /// Adapter id.
    pub id: String,
    /// Transport metadata.
    pub transport: TransportType,
    /// Connection state.
    pub state: ConnectionState,
}

/// Lifecycle owner for a fixed set of feed adapters.
pub struct FeedSupervisor {
    config: SupervisorConfig,
    adapters: Vec<Arc<dyn FeedAdapter>>,
    handler: SharedFeedEventHandler,
}

impl FeedSupervisor {
    /// Create a supervisor. Nothing is connected until `connect_all`.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        adapters: Vec<Arc<dyn FeedAdapter>>,
        handler: SharedFeedEventHandler,
    ) -> Self {
        Self {
            config,
            adapters,
            handler,
        }
    }

    /// Connect every adapter. A failing adapter is logged and skipped.
    ///
    /// Returns the failures keyed by adapter id.
    pub fn connect_all(&self) -> Vec<(String, FeedError)> {
        let mut failures = Vec::new();

        for adapter in &self.adapters {
            match adapter.connect(Arc::clone(&self.handler)) {
                Ok(()) => tracing::info!(
                    adapter_id = %adapter.id(),
                    transport = adapter.transport_type().as_str(),
                    "Feed connect requested"
                ),
                Err(e) => {
                    tracing::error!(adapter_id = %adapter.id(), error = %e, "Feed connect failed");
                    failures.push((adapter.id().to_string(), e));
                }
            }
        }

        failures
    }

    /// Probe every connected adapter each heartbeat interval until
    /// cancelled.
    pub async fn run_heartbeats(&self, cancel: CancellationToken) {
        let period = self.config.heartbeat_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Heartbeat loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.heartbeat_once();
                }
            }
        }
    }

    /// Send one heartbeat to each connected adapter.
    ///
    /// Returns the number of probes issued.
    pub fn heartbeat_once(&self) -> usize {
        let mut sent = 0;
        for adapter in self.adapters.iter().filter(|a| a.is_connected()) {
            match adapter.send_heartbeat() {
                Ok(()) => sent += 1,
                // Lost a race with disconnect.
                Err(FeedError::NotConnected(_)) => {}
                Err(e) => {
                    tracing::warn!(adapter_id = %adapter.id(), error = %e, "Heartbeat failed");
                }
            }
        }
        sent
    }

    /// Disconnect every adapter concurrently.
    pub async fn disconnect_all(&self) {
        futures::future::join_all(self.adapters.iter().map(|adapter| adapter.disconnect())).await;
        tracing::info!(feeds = self.adapters.len(), "All feeds disconnected");
    }

    /// Snapshot of every adapter's state.
    #[must_use]
    pub fn snapshots(&self) -> Vec<FeedSnapshot> {
        self.adapters
            .iter()
            .map(|adapter| FeedSnapshot {
                id: adapter.id().to_string(),
                transport: adapter.transport_type(),
                state: adapter.connection_state(),
            })
            .collect()
    }

    /// Number of adapters currently `CONNECTED`.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.adapters.iter().filter(|a| a.is_connected()).count()
    }

    /// Number of supervised adapters.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.adapters.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::MockFeedEventHandler;

    struct StubAdapter {
        id: String,
        state: AtomicU8,
        refuse: bool,
        heartbeats: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl StubAdapter {
        fn new(id: &str, refuse: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                refuse,
                heartbeats: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FeedAdapter for StubAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        fn transport_type(&self) -> TransportType {
            TransportType::Tcp
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
        }

        fn connect(&self, _handler: SharedFeedEventHandler) -> Result<(), FeedError> {
            if self.refuse {
                return Err(FeedError::AlreadyConnected(self.id.clone()));
            }
            self.state
                .store(ConnectionState::Connected.as_u8(), Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.state
                .store(ConnectionState::Disconnected.as_u8(), Ordering::SeqCst);
        }

        fn send_heartbeat(&self) -> Result<(), FeedError> {
            if !self.is_connected() {
                return Err(FeedError::NotConnected(self.id.clone()));
            }
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn supervisor(adapters: &[Arc<StubAdapter>], interval: Duration) -> FeedSupervisor {
        FeedSupervisor::new(
            SupervisorConfig {
                heartbeat_interval: interval,
            },
            adapters
                .iter()
                .map(|a| Arc::clone(a) as Arc<dyn FeedAdapter>)
                .collect(),
            Arc::new(MockFeedEventHandler::new()),
        )
    }

    #[test]
    fn connect_all_isolates_failures() {
        let good = StubAdapter::new("good", false);
        let bad = StubAdapter::new("bad", true);
        let sup = supervisor(&[Arc::clone(&bad), Arc::clone(&good)], Duration::from_secs(1));

        let failures = sup.connect_all();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
        assert!(good.is_connected());
        assert_eq!(sup.connected_count(), 1);
        assert_eq!(sup.feed_count(), 2);
    }

    #[test]
    fn heartbeat_skips_disconnected_adapters() {
        let good = StubAdapter::new("good", false);
        let bad = StubAdapter::new("bad", true);
        let sup = supervisor(&[Arc::clone(&good), Arc::clone(&bad)], Duration::from_secs(1));
        sup.connect_all();

        assert_eq!(sup.heartbeat_once(), 1);
        assert_eq!(good.heartbeats.load(Ordering::SeqCst), 1);
        assert_eq!(bad.heartbeats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn heartbeat_loop_runs_until_cancelled() {
        let feed = StubAdapter::new("feed", false);
        let sup = Arc::new(supervisor(&[Arc::clone(&feed)], Duration::from_millis(20)));
        sup.connect_all();

        let cancel = CancellationToken::new();
        let task = {
            let sup = Arc::clone(&sup);
            let cancel = cancel.clone();
            tokio::spawn(async move { sup.run_heartbeats(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(110)).await;
        cancel.cancel();
        task.await.unwrap();

        let sent = feed.heartbeats.load(Ordering::SeqCst);
        assert!(sent >= 2, "expected periodic heartbeats, got {sent}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(feed.heartbeats.load(Ordering::SeqCst), sent);
    }

    #[tokio::test]
    async fn disconnect_all_reaches_every_adapter() {
        let a = StubAdapter::new("a", false);
        let b = StubAdapter::new("b", false);
        let sup = supervisor(&[Arc::clone(&a), Arc::clone(&b)], Duration::from_secs(1));
        sup.connect_all();

        sup.disconnect_all().await;

        assert_eq!(a.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(b.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(sup.connected_count(), 0);
        assert!(
            sup.snapshots()
                .iter()
                .all(|s| s.state == ConnectionState::Disconnected)
        );
    }
}
