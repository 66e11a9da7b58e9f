//! Pipeline Integration Tests
//!
//! Wires the ingest bridge, normalizer and gateway onto one in-memory
//! backbone and follows events from raw payload to client session.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use market_stream_hub::application::ports::{
    BackboneConsumer, BackbonePublisher, FeedAdapter, FeedEventHandler, SharedFeedEventHandler,
};
use market_stream_hub::infrastructure::feeds::codec::encode;
use market_stream_hub::infrastructure::feeds::{RawQuote, RawTrade, Side};
use market_stream_hub::{
    CANONICAL_EVENTS_TOPIC, EventPayload, EventType, FanoutGateway, FeedSupervisor, GatewayConfig,
    InMemoryBackbone, IngestHandler, MarketEvent, Normalizer, NormalizerConfig, RAW_TRADES_TOPIC,
    RawFeedMessage, RawMessage, SessionId, SharedBackbone, SupervisorConfig, SyntheticFeedAdapter,
    SyntheticFeedConfig, Trade,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;

struct Hub {
    backbone: SharedBackbone,
    normalizer: Arc<Normalizer>,
    gateway: Arc<FanoutGateway>,
    ingest: Arc<IngestHandler>,
}

fn hub() -> Hub {
    let backbone = InMemoryBackbone::shared();
    let normalizer = Normalizer::new(
        NormalizerConfig::with_schema_version(3),
        backbone.clone(),
        backbone.clone(),
    );
    normalizer.start();

    let gateway = FanoutGateway::new(GatewayConfig::default());
    gateway.attach(&*backbone);

    let ingest = Arc::new(IngestHandler::new(backbone.clone()));

    Hub {
        backbone,
        normalizer,
        gateway,
        ingest,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn trade_payload(symbol: &str) -> Vec<u8> {
    encode(&RawFeedMessage::Trade(RawTrade {
        symbol: symbol.to_string(),
        price: dec("185.5"),
        qty: 100,
        side: Side::Buy,
        timestamp: Utc::now(),
        trade_id: "T0000beef".to_string(),
    }))
    .unwrap()
}

fn quote_payload(symbol: &str) -> Vec<u8> {
    encode(&RawFeedMessage::Quote(RawQuote {
        symbol: symbol.to_string(),
        bid_price: dec("140.10"),
        bid_size: 300,
        ask_price: dec("140.14"),
        ask_size: 200,
        timestamp: Utc::now(),
    }))
    .unwrap()
}

fn subscribe(gateway: &FanoutGateway, session: SessionId, instrument: &str) {
    let request = format!(r#"{{"action":"subscribe","instrumentId":"{instrument}"}}"#);
    gateway.handle_client_message(session, &request).unwrap();
}

/// Split queued frames into acknowledgements and canonical events.
fn frames(rx: &mut mpsc::Receiver<String>) -> (Vec<Value>, Vec<Value>) {
    let mut acks = Vec::new();
    let mut events = Vec::new();
    while let Ok(text) = rx.try_recv() {
        let value: Value = serde_json::from_str(&text).unwrap();
        if value.get("eventId").is_some() {
            events.push(value);
        } else {
            acks.push(value);
        }
    }
    (acks, events)
}

#[test]
fn sessions_receive_only_their_instruments() {
    let hub = hub();

    let (aapl_session, mut aapl_rx) = hub.gateway.open_session();
    let (all_session, mut all_rx) = hub.gateway.open_session();
    subscribe(&hub.gateway, aapl_session, "AAPL");
    subscribe(&hub.gateway, all_session, "*");

    hub.ingest
        .on_message("feed-1", RawMessage::new(trade_payload("AAPL"), Utc::now(), 0));
    hub.ingest
        .on_message("feed-1", RawMessage::new(quote_payload("GOOG"), Utc::now(), 1));

    let (acks, aapl_events) = frames(&mut aapl_rx);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["status"], "subscribed");
    assert_eq!(acks[0]["instrumentId"], "AAPL");
    assert_eq!(aapl_events.len(), 1);
    assert_eq!(aapl_events[0]["instrumentId"], "AAPL");
    assert_eq!(aapl_events[0]["eventType"], "TRADE");

    let (_, all_events) = frames(&mut all_rx);
    let instruments: Vec<&str> = all_events
        .iter()
        .map(|e| e["instrumentId"].as_str().unwrap())
        .collect();
    assert_eq!(instruments, vec!["AAPL", "GOOG"]);

    assert_eq!(hub.normalizer.normalized_count(), 2);
    assert_eq!(hub.gateway.stats().delivered, 3);
}

#[test]
fn canonical_events_carry_metadata_and_string_decimals() {
    let hub = hub();
    let (session, mut rx) = hub.gateway.open_session();
    subscribe(&hub.gateway, session, "AAPL");

    hub.ingest
        .on_message("feed-1", RawMessage::new(trade_payload("AAPL"), Utc::now(), 0));

    let (_, events) = frames(&mut rx);
    let event = &events[0];
    assert_eq!(event["schemaVersion"], 3);
    assert!(event["publishTimestamp"].is_string());
    assert!(event["exchangeTimestamp"].is_string());
    assert!(!event["eventId"].as_str().unwrap().is_empty());
    assert_eq!(event["payload"]["price"], "185.5");
    assert_eq!(event["payload"]["size"], "100");
}

#[test]
fn empty_event_id_is_counted_and_not_published() {
    let hub = hub();

    let canonical = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&canonical);
    hub.backbone.subscribe(
        CANONICAL_EVENTS_TOPIC,
        Arc::new(move |_: &MarketEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let mut event = MarketEvent::raw(
        "AAPL",
        EventType::Trade,
        EventPayload::Trade(Trade::new(dec("185.5"), dec("100"), None).unwrap()),
        Utc::now(),
        Utc::now(),
    );
    event.event_id = String::new();

    hub.backbone.publish(RAW_TRADES_TOPIC, "AAPL", event);

    assert_eq!(hub.normalizer.error_count(), 1);
    assert_eq!(hub.normalizer.normalized_count(), 0);
    assert_eq!(canonical.load(Ordering::SeqCst), 0);
}

#[test]
fn undecodable_payload_is_dropped_at_ingest() {
    let hub = hub();
    let (session, mut rx) = hub.gateway.open_session();
    subscribe(&hub.gateway, session, "*");

    hub.ingest
        .on_message("feed-1", RawMessage::new(b"not json".to_vec(), Utc::now(), 0));

    let (_, events) = frames(&mut rx);
    assert!(events.is_empty());
    assert_eq!(hub.backbone.stats().published, 0);
    assert_eq!(hub.ingest.snapshot()[0].decode_errors, 1);
}

#[test]
fn stopped_normalizer_publishes_nothing() {
    let hub = hub();
    let (session, mut rx) = hub.gateway.open_session();
    subscribe(&hub.gateway, session, "*");

    hub.normalizer.stop();
    hub.ingest
        .on_message("feed-1", RawMessage::new(trade_payload("AAPL"), Utc::now(), 0));

    let (_, events) = frames(&mut rx);
    assert!(events.is_empty());
    assert!(!hub.normalizer.is_running());
}

#[tokio::test]
async fn synthetic_feed_reaches_wildcard_session() {
    let hub = hub();
    let (session, mut rx) = hub.gateway.open_session();
    subscribe(&hub.gateway, session, "*");

    let adapter: Arc<dyn FeedAdapter> = Arc::new(
        SyntheticFeedAdapter::with_id(
            "synthetic-exchange-e2e",
            SyntheticFeedConfig {
                message_rate_per_second: 100,
                ..SyntheticFeedConfig::for_symbols(["AAPL", "MSFT"])
            },
        )
        .unwrap(),
    );
    let supervisor = FeedSupervisor::new(
        SupervisorConfig::default(),
        vec![adapter],
        Arc::clone(&hub.ingest) as SharedFeedEventHandler,
    );

    assert!(supervisor.connect_all().is_empty());
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.disconnect_all().await;

    let (_, events) = frames(&mut rx);
    assert!(events.len() >= 10, "got {} events", events.len());
    assert!(events.iter().all(|e| {
        let instrument = e["instrumentId"].as_str().unwrap();
        instrument == "AAPL" || instrument == "MSFT"
    }));

    let activity = &hub.ingest.snapshot()[0];
    assert_eq!(activity.adapter_id, "synthetic-exchange-e2e");
    assert!(!activity.connected);
    assert_eq!(activity.messages, hub.normalizer.normalized_count());
}
