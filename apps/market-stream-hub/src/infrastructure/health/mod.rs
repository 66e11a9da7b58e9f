//! Health and Metrics Endpoint
//!
//! Operational HTTP surface on its own port, separate from client traffic.
//!
//! - `/health`: JSON report of feeds and stage counters, 503 when no feed is up
//! - `/healthz`: liveness, always `OK`
//! - `/readyz`: `READY` once at least one feed is connected
//! - `/metrics`: Prometheus text exposition

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectionState, TransportType};
use crate::application::services::{
    FanoutGateway, FeedSupervisor, GatewayStats, Normalizer, NormalizerStats,
};
use crate::infrastructure::backbone::{BackboneStats, SharedBackbone};
use crate::infrastructure::feeds::{FeedActivitySnapshot, IngestHandler};
use crate::infrastructure::http::{self, ServeError};
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Health server errors.
pub type HealthServerError = ServeError;

// =============================================================================
// Report
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Aggregate status.
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Seconds since the state was created.
    pub uptime_secs: u64,
    /// Report time.
    pub current_time: DateTime<Utc>,
    /// One entry per supervised feed.
    pub feeds: Vec<FeedInfo>,
    /// Normalizer counters.
    pub normalizer: NormalizerStats,
    /// Gateway counters.
    pub gateway: GatewayStats,
    /// Backbone counters.
    pub backbone: BackboneStats,
}

/// Aggregate status derived from feed connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every feed is connected.
    Healthy,
    /// Some feeds are connected, or none are configured.
    Degraded,
    /// Feeds are configured and none is connected.
    Unhealthy,
}

impl HealthStatus {
    /// Classify a set of feeds.
    #[must_use]
    pub fn from_feeds(feeds: &[FeedInfo]) -> Self {
        let connected = feeds.iter().filter(|f| f.connected).count();
        if feeds.is_empty() {
            Self::Degraded
        } else if connected == feeds.len() {
            Self::Healthy
        } else if connected > 0 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }

    /// HTTP status answered for this health.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Healthy | Self::Degraded => StatusCode::OK,
        }
    }
}

/// One supervised feed, merged with its ingest counters.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Adapter id.
    pub id: String,
    /// Transport metadata.
    pub transport: TransportType,
    /// Adapter connection state.
    pub state: ConnectionState,
    /// Shorthand for `state == connected`.
    pub connected: bool,
    /// Messages published to a raw topic.
    pub messages_received: u64,
    /// Messages dropped as undecodable.
    pub decode_errors: u64,
    /// Unanswered heartbeats.
    pub heartbeat_timeouts: u64,
    /// Reason given by the last disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect_reason: Option<String>,
}

impl FeedInfo {
    fn new(
        id: String,
        transport: TransportType,
        state: ConnectionState,
        activity: Option<&FeedActivitySnapshot>,
    ) -> Self {
        Self {
            id,
            transport,
            state,
            connected: state == ConnectionState::Connected,
            messages_received: activity.map_or(0, |a| a.messages),
            decode_errors: activity.map_or(0, |a| a.decode_errors),
            heartbeat_timeouts: activity.map_or(0, |a| a.heartbeat_timeouts),
            last_disconnect_reason: activity.and_then(|a| a.last_disconnect_reason.clone()),
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Everything the health endpoint reports on.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    supervisor: Arc<FeedSupervisor>,
    ingest: Arc<IngestHandler>,
    normalizer: Arc<Normalizer>,
    gateway: Arc<FanoutGateway>,
    backbone: SharedBackbone,
}

impl HealthServerState {
    /// Capture the pipeline handles. Uptime counts from here.
    #[must_use]
    pub fn new(
        version: String,
        supervisor: Arc<FeedSupervisor>,
        ingest: Arc<IngestHandler>,
        normalizer: Arc<Normalizer>,
        gateway: Arc<FanoutGateway>,
        backbone: SharedBackbone,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            supervisor,
            ingest,
            normalizer,
            gateway,
            backbone,
        }
    }

    /// Build the current report.
    #[must_use]
    pub fn report(&self) -> HealthResponse {
        let activity = self.ingest.snapshot();
        let feeds: Vec<FeedInfo> = self
            .supervisor
            .snapshots()
            .into_iter()
            .map(|feed| {
                let seen = activity.iter().find(|a| a.adapter_id == feed.id);
                FeedInfo::new(feed.id, feed.transport, feed.state, seen)
            })
            .collect();

        HealthResponse {
            status: HealthStatus::from_feeds(&feeds),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feeds,
            normalizer: self.normalizer.stats(),
            gateway: self.gateway.stats(),
            backbone: self.backbone.stats(),
        }
    }

    fn is_ready(&self) -> bool {
        self.supervisor.connected_count() > 0
    }
}

// =============================================================================
// Server
// =============================================================================

/// Routes of the health endpoint.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

/// Health endpoint bound to its own port.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the port cannot be bound or the
    /// server fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        http::serve("health", self.port, router(self.state), self.cancel).await
    }
}

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> Response {
    if state.is_ready() {
        "READY".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response()
    }
}

async fn prometheus() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
}
