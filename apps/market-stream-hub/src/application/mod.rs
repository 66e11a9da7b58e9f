//! Application Layer - Pipeline stages and port definitions.
//!
//! This layer contains the pipeline services and the port interfaces
//! that decouple them from concrete transports.

/// Port interfaces for the backbone and feed adapters.
pub mod ports;

/// Normalization, fan-out and feed supervision services.
pub mod services;
