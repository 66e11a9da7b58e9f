//! Synthetic Exchange Adapter
//!
//! Reference `FeedAdapter` generating random-walk trades and quotes as raw
//! JSON payloads. Useful for demos, load tests and exercising the whole
//! pipeline without a vendor connection.
//!
//! # Emission
//!
//! One message per tick at `message_rate_per_second`. The tick period is
//! `1 s / rate` but never shorter than 1 ms, so rates above 1 000/s are
//! capped at 1 000 ticks per second. Inside a burst window every tick
//! emits `multiplier` messages.
//! Every `(trade_to_quote_ratio + 1)`-th message is a trade.
//!
//! # Heartbeats
//!
//! The simulated peer answers probes immediately unless
//! `respond_to_heartbeats` is off, in which case the worker reports
//! `on_heartbeat_timeout` once the probe is older than
//! `heartbeat_timeout`.

mod config;
mod price;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

pub use config::{BurstConfig, DEFAULT_SYMBOLS, SyntheticConfigError, SyntheticFeedConfig};
pub use price::{PriceBook, base_price, quote_sides};

use super::codec::{self, RawFeedMessage, RawQuote, RawTrade, Side};
use super::heartbeat::HeartbeatState;
use super::lifecycle::{ConnectionLifecycle, EpochContext};
use crate::application::ports::{
    ConnectionState, FeedAdapter, FeedError, SharedFeedEventHandler, TransportType,
};

/// Prefix of generated adapter ids.
pub const ADAPTER_ID_PREFIX: &str = "synthetic-exchange-";

/// Random-walk market data source.
pub struct SyntheticFeedAdapter {
    config: Arc<SyntheticFeedConfig>,
    lifecycle: Arc<ConnectionLifecycle>,
    heartbeat: Arc<HeartbeatState>,
}

impl SyntheticFeedAdapter {
    /// Create an adapter with a generated id.
    ///
    /// # Errors
    ///
    /// Returns the first constraint `config` violates.
    pub fn new(config: SyntheticFeedConfig) -> Result<Self, SyntheticConfigError> {
        let simple = Uuid::new_v4().simple().to_string();
        Self::with_id(format!("{ADAPTER_ID_PREFIX}{}", &simple[..8]), config)
    }

    /// Create an adapter with an explicit id.
    ///
    /// # Errors
    ///
    /// Returns the first constraint `config` violates.
    pub fn with_id(
        id: impl Into<String>,
        config: SyntheticFeedConfig,
    ) -> Result<Self, SyntheticConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            lifecycle: ConnectionLifecycle::new(id),
            heartbeat: Arc::new(HeartbeatState::new()),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SyntheticFeedConfig {
        &self.config
    }
}

#[async_trait]
impl FeedAdapter for SyntheticFeedAdapter {
    fn id(&self) -> &str {
        self.lifecycle.adapter_id()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::VendorSdk
    }

    fn connection_state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    fn connect(&self, handler: SharedFeedEventHandler) -> Result<(), FeedError> {
        if !self.config.enabled {
            tracing::info!(adapter_id = %self.id(), "Synthetic feed disabled, not starting");
            return Ok(());
        }

        self.heartbeat.reset();
        let config = Arc::clone(&self.config);
        let heartbeat = Arc::clone(&self.heartbeat);
        self.lifecycle
            .start(handler, move |ctx| generate(ctx, config, heartbeat))?;

        tracing::info!(
            adapter_id = %self.id(),
            symbols = ?self.config.symbols,
            rate = self.config.message_rate_per_second,
            burst = self.config.burst.enabled,
            "Synthetic feed connecting"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        self.lifecycle.stop().await;
    }

    fn send_heartbeat(&self) -> Result<(), FeedError> {
        self.lifecycle.ensure_connected()?;
        self.heartbeat.probe_sent();
        if self.config.respond_to_heartbeats {
            self.heartbeat.answered();
        }
        tracing::trace!(adapter_id = %self.id(), "Heartbeat sent");
        Ok(())
    }
}

impl std::fmt::Debug for SyntheticFeedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticFeedAdapter")
            .field("id", &self.id())
            .field("state", &self.connection_state())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn generate(
    ctx: EpochContext,
    config: Arc<SyntheticFeedConfig>,
    heartbeat: Arc<HeartbeatState>,
) {
    let mut generator = MessageGenerator::new(&config);
    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel_token().cancelled() => break,
            _ = ticker.tick() => {}
        }

        if heartbeat.take_overdue(config.heartbeat_timeout) {
            tracing::warn!(adapter_id = %ctx.adapter_id(), "Synthetic peer missed a heartbeat");
            ctx.report_heartbeat_timeout();
        }

        let batch = if config.burst.is_active(started.elapsed()) {
            config.burst.multiplier
        } else {
            1
        };

        for _ in 0..batch {
            let Some(message) = generator.next_message() else {
                return;
            };
            let delivered = match codec::encode(&message) {
                Ok(payload) => ctx.emit(payload),
                Err(e) => ctx.report_error(&FeedError::Emission(e.to_string())),
            };
            if !delivered {
                return;
            }
        }
    }
}

/// Produces the next trade or quote from the price book.
struct MessageGenerator {
    book: PriceBook,
    rng: StdRng,
    count: u64,
    trade_every: u64,
}

impl MessageGenerator {
    fn new(config: &SyntheticFeedConfig) -> Self {
        Self {
            book: PriceBook::new(&config.symbols),
            rng: StdRng::from_os_rng(),
            count: 0,
            trade_every: u64::from(config.trade_to_quote_ratio) + 1,
        }
    }

    fn next_message(&mut self) -> Option<RawFeedMessage> {
        let (symbol, price) = self.book.advance_random(&mut self.rng)?;
        self.count += 1;
        let timestamp = Utc::now();

        let message = if self.count % self.trade_every == 0 {
            RawFeedMessage::Trade(RawTrade {
                symbol,
                price,
                qty: self.round_lot(),
                side: if self.rng.random_bool(0.5) {
                    Side::Buy
                } else {
                    Side::Sell
                },
                timestamp,
                trade_id: format!("T{:08x}", self.rng.random::<u32>()),
            })
        } else {
            let (bid_price, ask_price) = quote_sides(price);
            RawFeedMessage::Quote(RawQuote {
                symbol,
                bid_price,
                bid_size: self.round_lot(),
                ask_price,
                ask_size: self.round_lot(),
                timestamp,
            })
        };
        Some(message)
    }

    /// Round lot of 100 to 10 000 shares.
    fn round_lot(&mut self) -> u64 {
        self.rng.random_range(1..=100) * 100
    }
}

/// Heartbeat and lifecycle tests need a short grace period.
#[cfg(test)]
impl SyntheticFeedAdapter {
    fn with_grace(config: SyntheticFeedConfig, grace: std::time::Duration) -> Self {
        Self {
            config: Arc::new(config),
            lifecycle: ConnectionLifecycle::with_grace("synthetic-test", grace),
            heartbeat: Arc::new(HeartbeatState::new()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
