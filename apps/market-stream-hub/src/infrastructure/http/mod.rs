//! HTTP listener shared by the gateway and health servers.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Bind `0.0.0.0:port` and serve `app` until `cancel` fires.
///
/// # Errors
///
/// Returns `ServeError::BindFailed` if the port cannot be bound and
/// `ServeError::ServerFailed` if the server stops abnormally.
pub async fn serve(
    name: &'static str,
    port: u16,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| ServeError::BindFailed(port, e.to_string()))?;

    tracing::info!(server = name, port, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ServeError::ServerFailed(e.to_string()))?;

    tracing::info!(server = name, "HTTP server stopped");
    Ok(())
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
