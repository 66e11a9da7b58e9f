//! Market Stream Hub Binary
//!
//! Starts the market data pipeline: synthetic feeds, normalizer, WebSocket
//! gateway and health endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! - `HUB_GATEWAY_PORT`: WebSocket gateway port (default: 8090)
//! - `HUB_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `HUB_SCHEMA_VERSION`: Canonical schema version (default: 1)
//! - `HUB_SESSION_BUFFER`: Per-session outbound queue (default: 1024)
//! - `HUB_HEARTBEAT_INTERVAL_MS`: Heartbeat period (default: 5000)
//! - `HUB_HEARTBEAT_TIMEOUT_MS`: Heartbeat deadline (default: 5000)
//! - `SYNTHETIC_ENABLED`: Run synthetic feeds (default: true)
//! - `SYNTHETIC_FEED_INSTANCES`: Number of synthetic feeds (default: 1)
//! - `SYNTHETIC_SYMBOLS`: Comma-separated symbols (default: AAPL,GOOGL,MSFT)
//! - `SYNTHETIC_RATE`: Messages per second (default: 10)
//! - `SYNTHETIC_TRADE_TO_QUOTE_RATIO`: Quotes per trade (default: 5)
//! - `SYNTHETIC_BURST_*`: Burst pattern
//! - `SYNTHETIC_RESPOND_TO_HEARTBEATS`: Answer heartbeats (default: true)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream_hub::application::ports::{FeedAdapter, SharedFeedEventHandler};
use market_stream_hub::infrastructure::telemetry;
use market_stream_hub::{
    FanoutGateway, FeedSupervisor, GatewayServer, HealthServer, HealthServerState, HubConfig,
    InMemoryBackbone, IngestHandler, Normalizer, SyntheticFeedAdapter, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init().context("telemetry initialization failed")?;

    tracing::info!("Starting Market Stream Hub");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("metrics initialization failed")?;

    let config = HubConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Pipeline stages
    let backbone = InMemoryBackbone::shared();

    let normalizer = Normalizer::new(config.normalizer(), backbone.clone(), backbone.clone());
    normalizer.start();

    let gateway = FanoutGateway::new(config.gateway());
    gateway.attach(&*backbone);

    let ingest = Arc::new(IngestHandler::new(backbone.clone()));

    // Feeds
    let mut adapters: Vec<Arc<dyn FeedAdapter>> = Vec::with_capacity(config.synthetic.instances);
    for _ in 0..config.synthetic.instances {
        let adapter = SyntheticFeedAdapter::new(config.synthetic.feed.clone())
            .context("invalid synthetic feed configuration")?;
        adapters.push(Arc::new(adapter));
    }

    let supervisor = Arc::new(FeedSupervisor::new(
        config.supervisor(),
        adapters,
        Arc::clone(&ingest) as SharedFeedEventHandler,
    ));

    let failures = supervisor.connect_all();
    if !failures.is_empty() {
        tracing::warn!(
            failed = failures.len(),
            feeds = supervisor.feed_count(),
            "Some feeds failed to connect"
        );
    }

    let heartbeat_supervisor = Arc::clone(&supervisor);
    let heartbeat_shutdown = shutdown_token.clone();
    let heartbeat_task = tokio::spawn(async move {
        heartbeat_supervisor.run_heartbeats(heartbeat_shutdown).await;
    });

    // Servers
    let gateway_server = GatewayServer::new(
        config.server.gateway_port,
        Arc::clone(&gateway),
        shutdown_token.clone(),
    );
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway_server.run().await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&supervisor),
        Arc::clone(&ingest),
        Arc::clone(&normalizer),
        Arc::clone(&gateway),
        backbone.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(feeds = supervisor.feed_count(), "Market stream hub ready");

    await_shutdown(shutdown_token).await;

    // Stop the sources first so nothing is published into stopped stages.
    supervisor.disconnect_all().await;
    normalizer.stop();
    gateway.detach(&*backbone);

    let drained = tokio::time::timeout(
        SHUTDOWN_TIMEOUT,
        futures::future::join_all([heartbeat_task, gateway_task, health_task]),
    )
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Tasks did not finish before shutdown timeout"
        );
    }

    tracing::info!(stats = ?backbone.stats(), "Market stream hub stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        gateway_port = config.server.gateway_port,
        health_port = config.server.health_port,
        schema_version = config.pipeline.schema_version,
        synthetic_enabled = config.synthetic.feed.enabled,
        synthetic_instances = config.synthetic.instances,
        "Configuration loaded"
    );
    tracing::debug!(
        symbols = ?config.synthetic.feed.symbols,
        rate = config.synthetic.feed.message_rate_per_second,
        burst = config.synthetic.feed.burst.enabled,
        heartbeat_interval_ms = config.heartbeat.interval.as_millis(),
        "Synthetic feed settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
