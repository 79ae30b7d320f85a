//! Native transport against a local `tokio-tungstenite` server.
//!
//! Exercises the full connect → subscribe → snapshot → disconnect lifecycle
//! over a real socket on 127.0.0.1.

#![cfg(feature = "ws-native")]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_hdr_async;

use orderbook_feed::prelude::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn snapshot_frame() -> Value {
    json!({
        "type": "orderbook",
        "symbol": "EUR/USD",
        "request_id": "OB_EUR/USD_1",
        "timestamp": "2024-01-15 12:30:45.123",
        "data": {
            "symbol": "EUR/USD",
            "timestamp": "20240115-12:30:45.120",
            "tick_id": "T-1",
            "is_indicative": false,
            "best_bid": 1.0851,
            "best_ask": 1.0853,
            "mid_price": 1.0852,
            "spread": 0.0002,
            "spread_bps": 1.84,
            "bids": [{"price": 1.0851, "size": 1000000, "level": 1}],
            "asks": [{"price": 1.0853, "size": 500000, "level": 1}],
            "latest_price": {"price": 1.0852, "source": "trade"},
            "levels": {"bid_levels": 1, "ask_levels": 1, "trade_count": 3},
            "metadata": {"total_entries": 2, "has_trades": true, "book_depth": 5}
        }
    })
}

/// Wait for the next event of `kind`, ignoring others.
async fn next_of(events: &mut EventStream, kind: EventKind) -> FeedEvent {
    timeout(TEST_TIMEOUT, async {
        while let Some(ev) = events.next().await {
            if ev.kind() == kind {
                return ev;
            }
        }
        panic!("event stream ended without {kind:?}");
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_full_lifecycle_over_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
            uri = req.uri().to_string();
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let subscribe: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();

        ws.send(Message::Text(snapshot_frame().to_string().into()))
            .await
            .unwrap();

        let mut close_code = None;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(Some(frame)) = msg {
                close_code = Some(u16::from(frame.code));
            }
        }
        (uri, subscribe, close_code)
    });

    let client = FeedClient::builder()
        .url(&format!("ws://{addr}/ws"))
        .build()
        .unwrap();
    let mut events = client.events();

    client.subscribe("EUR/USD").unwrap();
    client.connect("abc token").await.expect("connect should succeed");
    assert!(client.is_connected());

    match next_of(&mut events, EventKind::OrderBook).await {
        FeedEvent::OrderBook(msg) => {
            assert_eq!(msg.data.symbol, "EUR/USD");
            assert!(msg.data.meta.as_ref().unwrap().has_trades);
        }
        _ => unreachable!(),
    }
    let book = client.get_snapshot("EUR/USD").expect("snapshot cached");
    assert_eq!(book.tick_id.as_deref(), Some("T-1"));
    assert!(book.server_time().is_some());

    timeout(TEST_TIMEOUT, client.disconnect())
        .await
        .expect("disconnect timed out")
        .unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert!(client.get_snapshot("EUR/USD").is_none());

    let (uri, subscribe, close_code) = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(uri, "/ws/orderbook?token=abc%20token");
    assert_eq!(
        subscribe,
        json!({"type": "subscribe", "symbol": "EUR/USD", "levels": 5})
    );
    assert_eq!(close_code, Some(1000));
}

#[tokio::test]
async fn test_dropped_socket_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: drop without a close handshake.
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        // Second connection: stay until the client closes.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = FeedClient::builder()
        .url(&format!("ws://{addr}/ws"))
        .base_reconnect_delay(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut events = client.events();

    client.connect("token").await.unwrap();
    next_of(&mut events, EventKind::Connected).await;

    match next_of(&mut events, EventKind::Disconnected).await {
        FeedEvent::Disconnected {
            code,
            reconnect_in,
            ..
        } => {
            assert_eq!(code, 1006);
            assert_eq!(reconnect_in, Some(Duration::from_millis(50)));
        }
        _ => unreachable!(),
    }

    next_of(&mut events, EventKind::Connected).await;
    assert!(client.is_connected());

    timeout(TEST_TIMEOUT, client.disconnect())
        .await
        .expect("disconnect timed out")
        .unwrap();
    timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
}
