//! WebSocket transport against a local `tokio-tungstenite` server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use market_feed_proxy::application::ports::{StreamTransport, TransportEvent};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use market_feed_proxy::infrastructure::upstream::ReqwestUpstreamClient;
use market_feed_proxy::infrastructure::websocket::WebSocketTransport;
use market_feed_proxy::{
    AppState, CredentialPrecedence, CredentialRouter, ForwardingGateway, MissingCredentialPolicy,
    StreamConfig, StreamConnectionManager, StreamManagerConfig, router,
};
use serde_json::Value;
use tower::ServiceExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

const TRADE: &str =
    r#"{"e":"trade","E":1700000000123,"s":"BTCUSDT","t":1,"p":"37000.10","q":"0.005"}"#;

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn text_and_binary_frames_become_messages() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Message::text(TRADE)).await.unwrap();
        ws.send(Message::Ping(Default::default())).await.unwrap();
        ws.send(Message::binary(TRADE.as_bytes().to_vec()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
    });

    let mut session = WebSocketTransport::new()
        .open(&format!("ws://{addr}/ws"))
        .await
        .unwrap();

    assert_eq!(
        session.next_event().await,
        TransportEvent::Message(TRADE.to_string())
    );
    assert_eq!(
        session.next_event().await,
        TransportEvent::Message(TRADE.to_string())
    );
    assert_eq!(session.next_event().await, TransportEvent::Closed);

    session.close().await;
    assert_eq!(session.next_event().await, TransportEvent::Closed);
}

#[tokio::test]
async fn client_close_reaches_server() {
    let (listener, addr) = listener().await;
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut saw_close = false;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                saw_close = true;
            }
        }
        let _ = done_tx.send(saw_close);
    });

    let mut session = WebSocketTransport::new()
        .open(&format!("ws://{addr}/ws"))
        .await
        .unwrap();
    session.close().await;

    let saw_close = tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(saw_close);
}

#[tokio::test]
async fn manager_delivers_from_live_socket() {
    let (listener, addr) = listener().await;
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Message::text(TRADE)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
        let _ = done_tx.send(());
    });

    let manager = StreamConnectionManager::start(
        Arc::new(WebSocketTransport::new()),
        StreamManagerConfig::default(),
        StreamConfig::new(format!("ws://{addr}/ws")),
    )
    .await;

    let mut rx = manager.subscribe();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|snap| snap.data.is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let message = snapshot.data.unwrap();
    assert_eq!(message.symbol.as_deref(), Some("BTCUSDT"));
    assert_eq!(message.price.as_deref(), Some("37000.10"));
    assert!(manager.is_connected());

    manager.teardown().await;
    assert!(!manager.is_connected());
    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn health_reports_last_delivered_trade() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Message::text(TRADE)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let manager = Arc::new(
        StreamConnectionManager::start(
            Arc::new(WebSocketTransport::new()),
            StreamManagerConfig::default(),
            StreamConfig::new(format!("ws://{addr}/ws?token=secret")),
        )
        .await,
    );
    let mut rx = manager.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|snap| snap.data.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    let credentials = CredentialRouter::new(
        vec![],
        |_| None,
        CredentialPrecedence::CallerFirst,
        MissingCredentialPolicy::Reject,
    );
    let client = ReqwestUpstreamClient::new(None).unwrap();
    let gateway = ForwardingGateway::new(Arc::new(client), credentials);
    let app = router(Arc::new(AppState::new(
        gateway,
        Some(Arc::clone(&manager)),
        "test",
    )));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["stream"]["connected"], true);
    assert_eq!(body["stream"]["last_symbol"], "BTCUSDT");
    assert_eq!(body["stream"]["last_price"], "37000.10");
    assert_eq!(body["stream"]["last_event_time"], 1_700_000_000_123_i64);

    manager.teardown().await;
}
