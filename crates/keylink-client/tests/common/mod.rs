//! Shared helpers for client integration tests.

#![allow(dead_code)]

use std::time::Duration;

use keylink_client::{
    Backoff, Client, ClientConfig, ConnectionState, MemoryConnector, ReconnectPolicy, ServerEnd,
};

/// Upper bound for anything that should happen "promptly".
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Config with fast fixed backoff and no liveness check.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        url: "mem://daemon".into(),
        handshake_timeout_ms: 1000,
        request_timeout_ms: 10_000,
        liveness_timeout_ms: None,
        announce_subscriptions: false,
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed { delay_ms: 100 },
        },
    }
}

/// Connect a client to a fresh in-memory daemon.
pub async fn connect(config: ClientConfig) -> (Client, ServerEnd, MemoryConnector) {
    let connector = MemoryConnector::new();
    let client = Client::connect(config, connector.clone()).await.unwrap();
    let server = connector.accept().await.unwrap();
    (client, server, connector)
}

/// Wait until the client reaches `state`.
pub async fn wait_for_state(client: &Client, state: ConnectionState) {
    let mut watch = client.state_watch();
    tokio::time::timeout(TIMEOUT, watch.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("state never became {state}; now {}", client.state()))
        .unwrap();
}

/// Round-trip one query so every frame sent before it has been routed.
pub async fn barrier(client: &Client, server: &mut ServerEnd) {
    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.query("ping", serde_json::Value::Null).await })
    };
    let req = server.next_request().await.unwrap();
    assert_eq!(req.method, "ping");
    server.respond(req.id, serde_json::json!("pong"));
    let _ = call.await.unwrap().unwrap();
}
