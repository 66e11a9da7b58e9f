//! WebSocket Client Endpoint
//!
//! Exposes the fan-out gateway at `GET /ws/market-data`. Each socket is one
//! gateway session: inbound text frames are subscription requests, outbound
//! text frames are acknowledgements and canonical events.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::application::services::FanoutGateway;
use crate::domain::subscription::SessionId;
use crate::infrastructure::http::{self, ServeError};

/// Path clients connect to.
pub const MARKET_DATA_PATH: &str = "/ws/market-data";

#[derive(Clone)]
struct SocketState {
    gateway: Arc<FanoutGateway>,
    cancel: CancellationToken,
}

/// Build the WebSocket router.
///
/// Open sockets are closed when `cancel` fires.
pub fn router(gateway: Arc<FanoutGateway>, cancel: CancellationToken) -> Router {
    Router::new()
        .route(MARKET_DATA_PATH, get(upgrade_handler))
        .with_state(SocketState { gateway, cancel })
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<SocketState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_session(socket, state))
}

async fn serve_session(socket: WebSocket, state: SocketState) {
    let SocketState { gateway, cancel } = state;
    let (session, mut outbound) = gateway.open_session();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(json) = outbound.recv().await {
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = gateway.handle_client_message(session, text.as_str());
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    end_session(&gateway, session);
    // The writer drains whatever was queued, then closes the sink.
    let _ = writer.await;
}

fn end_session(gateway: &FanoutGateway, session: SessionId) {
    if !gateway.close_session(session) {
        tracing::debug!(session_id = session, "Session already closed by gateway");
    }
}

// =============================================================================
// Gateway Server
// =============================================================================

/// WebSocket server for client sessions.
pub struct GatewayServer {
    port: u16,
    gateway: Arc<FanoutGateway>,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a new gateway server.
    #[must_use]
    pub const fn new(port: u16, gateway: Arc<FanoutGateway>, cancel: CancellationToken) -> Self {
        Self {
            port,
            gateway,
            cancel,
        }
    }

    /// Serve WebSocket sessions until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayServerError` if the port cannot be bound or the
    /// server fails.
    pub async fn run(self) -> Result<(), GatewayServerError> {
        let app = router(self.gateway, self.cancel.clone());
        http::serve("gateway", self.port, app, self.cancel).await
    }
}

/// Gateway server errors.
pub type GatewayServerError = ServeError;
