//! Domain Layer - Core market event types and subscription state.
//!
//! This layer contains the canonical event model and per-session
//! subscription tracking. Nothing here touches I/O or the runtime.

/// Market events, trade and quote payloads.
pub mod events;

/// Client session subscription tracking.
pub mod subscription;
