//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Normalizer`: Validates raw events and republishes them as canonical
//! - `FanoutGateway`: Routes canonical events to subscribed sessions
//! - `FeedSupervisor`: Connects adapters and drives their heartbeats

mod gateway;
mod normalizer;
mod supervisor;

pub use gateway::{
    AckStatus, ClientAck, ClientAction, ClientRequest, DeliveryError, FanoutGateway, GatewayConfig,
    GatewayError, GatewayStats,
};
pub use normalizer::{Normalizer, NormalizerConfig, NormalizerStats, ValidationError};
pub use supervisor::{FeedSnapshot, FeedSupervisor, SupervisorConfig};
