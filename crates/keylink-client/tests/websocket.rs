//! End-to-end tests against a real WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use keylink_client::{Client, ClientConfig, ConnectionState};
use keylink_proto::channels::{self, LatencyStats};
use keylink_proto::{BroadcastKind, ClientFrame, Handshake, ResponseFrame, ServerFrame};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Bind a loopback listener and return it with its `ws://` URL.
async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/ws-rpc"))
}

/// Accept one connection and greet it like the daemon does.
async fn accept(listener: &TcpListener) -> WsStream {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(tcp).await.unwrap();
    let hello = ServerFrame::Connected(Handshake {
        version: "0.9.0".into(),
        timestamp: 1,
    });
    ws.send(Message::Text(hello.to_json().unwrap().into()))
        .await
        .unwrap();
    ws
}

async fn next_client_frame(ws: &mut WsStream) -> ClientFrame {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return ClientFrame::parse(&text).unwrap();
        }
    }
}

async fn send(ws: &mut WsStream, frame: &ServerFrame) {
    ws.send(Message::Text(frame.to_json().unwrap().into()))
        .await
        .unwrap();
}

fn config(url: String) -> ClientConfig {
    let mut config = ClientConfig::with_url(url);
    config.reconnect.max_attempts = 5;
    config.reconnect.backoff = keylink_client::Backoff::Fixed { delay_ms: 50 };
    config
}

#[tokio::test]
async fn query_and_broadcast_over_websocket() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let ClientFrame::Query(req) = next_client_frame(&mut ws).await else {
            panic!("expected query");
        };
        assert_eq!(req.method, "get_latency");
        // Broadcast first, then answer: the client sees both
        let stats = json!({"min": 1, "avg": 2, "max": 3, "p95": 3, "p99": 3, "timestamp": 9});
        send(
            &mut ws,
            &ServerFrame::broadcast(BroadcastKind::Latency, channels::LATENCY, stats.clone(), 1),
        )
        .await;
        send(&mut ws, &ServerFrame::Response(ResponseFrame::success(req.id, stats))).await;

        // Keep the socket open until the client closes it
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    let client = timeout(TIMEOUT, Client::connect_websocket(config(url)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.server_version().as_deref(), Some("0.9.0"));

    let seen: Arc<Mutex<Vec<LatencyStats>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = client.subscribe(channels::LATENCY, {
        let seen = Arc::clone(&seen);
        move |frame| {
            if let Ok(stats) = frame.decode::<LatencyStats>() {
                seen.lock().push(stats);
            }
        }
    });

    let result: LatencyStats = timeout(TIMEOUT, client.query_as("get_latency", json!(null)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.timestamp, 9);
    assert_eq!(seen.lock().len(), 1);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnects_after_server_closes_socket() {
    let (listener, url) = bind().await;
    let (second_tx, second_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(async move {
        // First connection: close straight after the handshake
        let mut ws = accept(&listener).await;
        ws.close(None).await.unwrap();

        // Second connection: answer one command
        let mut ws = accept(&listener).await;
        let _ = second_tx.send(());
        let ClientFrame::Command(req) = next_client_frame(&mut ws).await else {
            panic!("expected command");
        };
        send(
            &mut ws,
            &ServerFrame::Response(ResponseFrame::success(req.id, json!({"success": true}))),
        )
        .await;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    let client = timeout(TIMEOUT, Client::connect_websocket(config(url)))
        .await
        .unwrap()
        .unwrap();
    // The server only accepts a second socket if the client reconnected
    timeout(TIMEOUT, second_rx).await.unwrap().unwrap();
    let mut watch = client.state_watch();
    timeout(TIMEOUT, watch.wait_for(|s| s.is_open()))
        .await
        .unwrap()
        .unwrap();

    timeout(TIMEOUT, client.command("reload_config", json!(null)))
        .await
        .unwrap()
        .unwrap();
    client.disconnect().await;
    timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn undecodable_binary_frame_keeps_link_open() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let ClientFrame::Query(req) = next_client_frame(&mut ws).await else {
            panic!("expected query");
        };
        assert_eq!(req.method, "get_profiles");
        ws.send(Message::Binary(vec![0xff, 0xfe].into()))
            .await
            .unwrap();
        send(
            &mut ws,
            &ServerFrame::Response(ResponseFrame::success(req.id, json!("answer"))),
        )
        .await;

        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    let client = timeout(TIMEOUT, Client::connect_websocket(config(url)))
        .await
        .unwrap()
        .unwrap();
    let mut events = client.events();

    let answer = timeout(TIMEOUT, client.query("get_profiles", json!(null)))
        .await
        .unwrap();
    assert_eq!(answer, Ok(json!("answer")));
    assert_eq!(client.state(), ConnectionState::Open);
    // No transition at all: the link never dropped
    assert!(events.try_recv().is_err());

    client.disconnect().await;
    timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn nothing_listening_fails_initial_connect() {
    let (listener, url) = bind().await;
    drop(listener);
    let err = Client::connect_websocket(config(url)).await.unwrap_err();
    assert!(matches!(err, keylink_client::ClientError::Transport(_)));
}
