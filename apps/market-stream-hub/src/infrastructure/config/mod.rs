//! Configuration Module
//!
//! Environment-driven configuration for the hub.

mod settings;

pub use settings::{
    ConfigError, HeartbeatSettings, HubConfig, PipelineSettings, ServerSettings, SyntheticSettings,
};
