//! Synthetic feed configuration.

use std::time::Duration;

/// Default instruments.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["AAPL", "GOOGL", "MSFT"];

/// Shortest emission tick; the runtime timer has millisecond resolution.
const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Burst pattern: each `interval` period starts with a `duration` window
/// during which every tick emits `multiplier` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstConfig {
    /// Whether bursts are generated.
    pub enabled: bool,
    /// Messages per tick inside a burst window.
    pub multiplier: u32,
    /// Length of the burst window.
    pub duration: Duration,
    /// Period between burst starts.
    pub interval: Duration,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            multiplier: 5,
            duration: Duration::from_millis(1_000),
            interval: Duration::from_millis(10_000),
        }
    }
}

impl BurstConfig {
    /// Whether a burst window is open `elapsed` after the epoch started.
    #[must_use]
    pub fn is_active(&self, elapsed: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        let interval = self.interval.as_millis().max(1);
        elapsed.as_millis() % interval < self.duration.as_millis()
    }
}

/// Synthetic exchange settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticFeedConfig {
    /// When false, `connect` succeeds without starting anything.
    pub enabled: bool,
    /// Instruments to generate.
    pub symbols: Vec<String>,
    /// Base message rate.
    pub message_rate_per_second: u32,
    /// Burst pattern.
    pub burst: BurstConfig,
    /// Quotes generated per trade.
    pub trade_to_quote_ratio: u32,
    /// How long a heartbeat may go unanswered.
    pub heartbeat_timeout: Duration,
    /// Whether the simulated peer answers heartbeats.
    pub respond_to_heartbeats: bool,
}

impl Default for SyntheticFeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            symbols: DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
            message_rate_per_second: 10,
            burst: BurstConfig::default(),
            trade_to_quote_ratio: 5,
            heartbeat_timeout: Duration::from_secs(5),
            respond_to_heartbeats: true,
        }
    }
}

impl SyntheticFeedConfig {
    /// Default configuration for `symbols`.
    #[must_use]
    pub fn for_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check every field.
    ///
    /// Burst settings are only checked when bursts are enabled, symbols
    /// only when the feed is enabled.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), SyntheticConfigError> {
        if self.enabled {
            if self.symbols.is_empty() {
                return Err(SyntheticConfigError::NoSymbols);
            }
            if self.symbols.iter().any(|s| s.trim().is_empty()) {
                return Err(SyntheticConfigError::BlankSymbol);
            }
        }

        if self.message_rate_per_second == 0 {
            return Err(SyntheticConfigError::NonPositiveRate);
        }

        let burst = &self.burst;
        if burst.enabled {
            if burst.multiplier <= 1 {
                return Err(SyntheticConfigError::BurstMultiplier(burst.multiplier));
            }
            if burst.duration.is_zero() {
                return Err(SyntheticConfigError::BurstDuration);
            }
            if burst.interval <= burst.duration {
                return Err(SyntheticConfigError::BurstInterval {
                    interval: burst.interval,
                    duration: burst.duration,
                });
            }
        }

        if self.trade_to_quote_ratio < 1 {
            return Err(SyntheticConfigError::TradeToQuoteRatio(
                self.trade_to_quote_ratio,
            ));
        }

        if self.heartbeat_timeout.is_zero() {
            return Err(SyntheticConfigError::HeartbeatTimeout);
        }

        Ok(())
    }

    /// Time between emission ticks: `1 s / rate` at nanosecond precision,
    /// never below one millisecond. Rates above 1 000/s therefore emit at
    /// most 1 000 ticks per second.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        let rate = self.message_rate_per_second.max(1);
        (Duration::from_secs(1) / rate).max(MIN_TICK_PERIOD)
    }
}

/// Invalid synthetic feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntheticConfigError {
    /// Enabled feed without symbols.
    #[error("symbols cannot be empty when the feed is enabled")]
    NoSymbols,

    /// A symbol is empty or whitespace.
    #[error("symbols cannot be blank")]
    BlankSymbol,

    /// Zero message rate.
    #[error("message rate must be positive")]
    NonPositiveRate,

    /// Burst multiplier of 0 or 1.
    #[error("burst multiplier must be > 1: {0}")]
    BurstMultiplier(u32),

    /// Zero-length burst window.
    #[error("burst duration must be positive")]
    BurstDuration,

    /// Burst window does not fit in its period.
    #[error("burst interval must be > duration: interval={interval:?}, duration={duration:?}")]
    BurstInterval {
        /// Period between bursts.
        interval: Duration,
        /// Burst window.
        duration: Duration,
    },

    /// Ratio below one.
    #[error("trade to quote ratio must be >= 1: {0}")]
    TradeToQuoteRatio(u32),

    /// Zero heartbeat timeout.
    #[error("heartbeat timeout must be positive")]
    HeartbeatTimeout,
}
