//! Hub Configuration Settings
//!
//! Configuration types for the hub, loaded from environment variables.
//! Unparsable values fall back to their defaults; values that parse but
//! make no sense fail the load.

use std::time::Duration;

use crate::application::services::{GatewayConfig, NormalizerConfig, SupervisorConfig};
use crate::infrastructure::feeds::{SyntheticConfigError, SyntheticFeedConfig};

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Client WebSocket gateway port.
    pub gateway_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            gateway_port: 8090,
            health_port: 8082,
        }
    }
}

/// Normalizer and gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Schema version stamped on canonical events.
    pub schema_version: u32,
    /// Outbound queue capacity per client session.
    pub session_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            session_buffer: 1024,
        }
    }
}

/// Feed heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Interval between probes.
    pub interval: Duration,
    /// How long a probe may go unanswered.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Synthetic feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSettings {
    /// Number of independent synthetic adapters to run.
    pub instances: usize,
    /// Configuration shared by every instance.
    pub feed: SyntheticFeedConfig,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            instances: 1,
            feed: SyntheticFeedConfig::default(),
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Normalizer and gateway settings.
    pub pipeline: PipelineSettings,
    /// Feed heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Synthetic feed settings.
    pub synthetic: SyntheticSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is out of range.
    pub fn from_lookup<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            gateway_port: parse_env_u16(&env, "HUB_GATEWAY_PORT", defaults.server.gateway_port),
            health_port: parse_env_u16(&env, "HUB_HEALTH_PORT", defaults.server.health_port),
        };

        let pipeline = PipelineSettings {
            schema_version: parse_env_u32(
                &env,
                "HUB_SCHEMA_VERSION",
                defaults.pipeline.schema_version,
            ),
            session_buffer: parse_env_usize(
                &env,
                "HUB_SESSION_BUFFER",
                defaults.pipeline.session_buffer,
            ),
        };

        let heartbeat = HeartbeatSettings {
            interval: parse_env_duration_millis(
                &env,
                "HUB_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat.interval,
            ),
            timeout: parse_env_duration_millis(
                &env,
                "HUB_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat.timeout,
            ),
        };

        let base = defaults.synthetic.feed;
        let symbols = env("SYNTHETIC_SYMBOLS").map_or(base.symbols, |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_uppercase)
                .collect()
        });
        let feed = SyntheticFeedConfig {
            enabled: parse_env_bool(&env, "SYNTHETIC_ENABLED", base.enabled),
            symbols,
            message_rate_per_second: parse_env_u32(
                &env,
                "SYNTHETIC_RATE",
                base.message_rate_per_second,
            ),
            burst: crate::infrastructure::feeds::BurstConfig {
                enabled: parse_env_bool(&env, "SYNTHETIC_BURST_ENABLED", base.burst.enabled),
                multiplier: parse_env_u32(
                    &env,
                    "SYNTHETIC_BURST_MULTIPLIER",
                    base.burst.multiplier,
                ),
                duration: parse_env_duration_millis(
                    &env,
                    "SYNTHETIC_BURST_DURATION_MS",
                    base.burst.duration,
                ),
                interval: parse_env_duration_millis(
                    &env,
                    "SYNTHETIC_BURST_INTERVAL_MS",
                    base.burst.interval,
                ),
            },
            trade_to_quote_ratio: parse_env_u32(
                &env,
                "SYNTHETIC_TRADE_TO_QUOTE_RATIO",
                base.trade_to_quote_ratio,
            ),
            heartbeat_timeout: heartbeat.timeout,
            respond_to_heartbeats: parse_env_bool(
                &env,
                "SYNTHETIC_RESPOND_TO_HEARTBEATS",
                base.respond_to_heartbeats,
            ),
        };

        let synthetic = SyntheticSettings {
            instances: parse_env_usize(
                &env,
                "SYNTHETIC_FEED_INSTANCES",
                defaults.synthetic.instances,
            ),
            feed,
        };

        let config = Self {
            server,
            pipeline,
            heartbeat,
            synthetic,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.schema_version == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUB_SCHEMA_VERSION",
                reason: "must be at least 1",
            });
        }
        if self.pipeline.session_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUB_SESSION_BUFFER",
                reason: "must be at least 1",
            });
        }
        if self.heartbeat.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "HUB_HEARTBEAT_INTERVAL_MS",
                reason: "must be positive",
            });
        }
        self.synthetic.feed.validate()?;
        Ok(())
    }

    /// Normalizer settings.
    #[must_use]
    pub fn normalizer(&self) -> NormalizerConfig {
        NormalizerConfig::with_schema_version(self.pipeline.schema_version)
    }

    /// Gateway settings.
    #[must_use]
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            session_buffer: self.pipeline.session_buffer,
            ..GatewayConfig::default()
        }
    }

    /// Feed supervisor settings.
    #[must_use]
    pub const fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            heartbeat_interval: self.heartbeat.interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value parsed but is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Environment variable.
        key: &'static str,
        /// Violated constraint.
        reason: &'static str,
    },
    /// Synthetic feed settings are inconsistent.
    #[error("invalid synthetic feed configuration: {0}")]
    Synthetic(#[from] SyntheticConfigError),
}

fn parse_env_u16(env: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    env(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_env_u32(env: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    env(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_env_usize(env: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    env(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_env_bool(env: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    env(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_millis(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    env(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
