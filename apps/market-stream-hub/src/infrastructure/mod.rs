//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// In-process event bus.
pub mod backbone;

/// Feed adapters and the ingest bridge onto the raw topics.
pub mod feeds;

/// Client-facing WebSocket server.
pub mod websocket;

/// Shared HTTP listener.
pub mod http;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
