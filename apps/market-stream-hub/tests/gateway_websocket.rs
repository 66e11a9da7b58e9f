//! Gateway WebSocket Integration Tests
//!
//! Runs the WebSocket router on an ephemeral port and talks to it with a
//! real client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use market_stream_hub::application::ports::BackbonePublisher;
use market_stream_hub::infrastructure::websocket::router;
use market_stream_hub::{
    CANONICAL_EVENTS_TOPIC, EventPayload, EventType, FanoutGateway, GatewayConfig,
    InMemoryBackbone, MARKET_DATA_PATH, MarketEvent, Quote, SharedBackbone,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    url: String,
    backbone: SharedBackbone,
    gateway: Arc<FanoutGateway>,
    cancel: CancellationToken,
}

async fn start() -> Harness {
    let backbone = InMemoryBackbone::shared();
    let gateway = FanoutGateway::new(GatewayConfig::default());
    gateway.attach(&*backbone);

    let cancel = CancellationToken::new();
    let app = router(Arc::clone(&gateway), cancel.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });

    Harness {
        url: format!("ws://{addr}{MARKET_DATA_PATH}"),
        backbone,
        gateway,
        cancel,
    }
}

async fn send(client: &mut Client, text: &str) {
    client.send(Message::Text(text.into())).await.unwrap();
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_sessions(gateway: &FanoutGateway, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while gateway.session_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count never settled");
}

fn quote_event(instrument: &str) -> MarketEvent {
    let quote = Quote::new(
        Decimal::from_str("185.48").unwrap(),
        Decimal::from(100),
        Decimal::from_str("185.52").unwrap(),
        Decimal::from(200),
    )
    .unwrap();
    MarketEvent::raw(
        instrument,
        EventType::Quote,
        EventPayload::Quote(quote),
        Utc::now(),
        Utc::now(),
    )
    .to_canonical(1, Utc::now())
}

#[tokio::test]
async fn subscribe_then_receive_matching_events() {
    let harness = start().await;
    let (mut client, _) = connect_async(&harness.url).await.unwrap();

    send(&mut client, r#"{"action":"subscribe","instrumentId":"AAPL"}"#).await;
    let ack = next_json(&mut client).await;
    assert_eq!(ack["status"], "subscribed");
    assert_eq!(ack["instrumentId"], "AAPL");

    harness
        .backbone
        .publish(CANONICAL_EVENTS_TOPIC, "GOOG", quote_event("GOOG"));
    harness
        .backbone
        .publish(CANONICAL_EVENTS_TOPIC, "AAPL", quote_event("AAPL"));

    let event = next_json(&mut client).await;
    assert_eq!(event["instrumentId"], "AAPL");
    assert_eq!(event["eventType"], "QUOTE");
    assert_eq!(event["payload"]["bidPrice"], "185.48");
    assert_eq!(event["payload"]["askPrice"], "185.52");

    harness.cancel.cancel();
}

#[tokio::test]
async fn rejected_requests_get_no_ack() {
    let harness = start().await;
    let (mut client, _) = connect_async(&harness.url).await.unwrap();

    send(&mut client, "not json").await;
    send(&mut client, r#"{"action":"explode","instrumentId":"AAPL"}"#).await;
    send(&mut client, r#"{"action":"UNSUBSCRIBE","instrumentId":"*"}"#).await;

    let ack = next_json(&mut client).await;
    assert_eq!(ack["status"], "unsubscribed");
    assert_eq!(ack["instrumentId"], "*");
    assert_eq!(harness.gateway.stats().rejected_requests, 2);

    harness.cancel.cancel();
}

#[tokio::test]
async fn closing_the_socket_ends_the_session() {
    let harness = start().await;
    let (mut client, _) = connect_async(&harness.url).await.unwrap();

    send(&mut client, r#"{"action":"subscribe","instrumentId":"*"}"#).await;
    next_json(&mut client).await;
    assert_eq!(harness.gateway.session_count(), 1);

    client.close(None).await.unwrap();
    wait_for_sessions(&harness.gateway, 0).await;
    assert_eq!(harness.gateway.stats().wildcard_sessions, 0);

    harness.cancel.cancel();
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let harness = start().await;
    let (mut client, _) = connect_async(&harness.url).await.unwrap();

    send(&mut client, r#"{"action":"subscribe","instrumentId":"AAPL"}"#).await;
    next_json(&mut client).await;

    harness.cancel.cancel();

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    wait_for_sessions(&harness.gateway, 0).await;
}
