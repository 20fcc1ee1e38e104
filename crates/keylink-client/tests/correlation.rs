//! Request/response correlation over the in-memory transport.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use keylink_client::{ClientError, ConnectionState};
use keylink_proto::errors::PROFILE_NOT_FOUND;
use serde_json::{Value, json};

use common::{connect, test_config, wait_for_state};

#[tokio::test]
async fn concurrent_queries_pair_by_id_regardless_of_order() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { (i, client.query("echo", json!({"n": i})).await) })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..8 {
        requests.push(server.next_request().await.unwrap());
    }
    assert_eq!(client.pending_requests(), 8);

    // Answer in a scrambled order
    let order = [5, 2, 7, 0, 3, 6, 1, 4];
    for &idx in &order {
        let req = &requests[idx];
        server.respond(req.id.clone(), json!({"echo": req.params["n"]}));
    }

    for call in calls {
        let (i, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), json!({"echo": i}));
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn query_returns_result_payload() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.query("get_profiles", Value::Null).await }
    });
    let req = server.next_request().await.unwrap();
    assert_eq!(req.method, "get_profiles");
    assert!(req.params.is_null());
    server.respond(req.id, json!([{"name": "default"}]));

    assert_eq!(call.await.unwrap().unwrap(), json!([{"name": "default"}]));
}

#[tokio::test]
async fn query_as_decodes_typed_result() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.query_as::<Vec<String>>("list_layers", Value::Null).await }
    });
    let req = server.next_request().await.unwrap();
    server.respond(req.id, json!(["base", "nav"]));
    assert_eq!(call.await.unwrap().unwrap(), vec!["base", "nav"]);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.query_as::<Vec<String>>("list_layers", Value::Null).await }
    });
    let req = server.next_request().await.unwrap();
    server.respond(req.id, json!({"unexpected": true}));
    assert_matches!(call.await.unwrap(), Err(ClientError::Protocol(_)));
}

#[tokio::test]
async fn command_resolves_on_ack() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .command("activate_profile", json!({"name": "default"}))
                .await
        }
    });
    let req = server.next_request().await.unwrap();
    assert_eq!(req.params["name"], "default");
    server.respond(req.id, json!({"success": true}));
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn server_error_rejects_only_that_call() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let failing = tokio::spawn({
        let client = client.clone();
        async move { client.command("activate_profile", json!({"name": "nope"})).await }
    });
    let ok = tokio::spawn({
        let client = client.clone();
        async move { client.query("get_profiles", Value::Null).await }
    });

    let first = server.next_request().await.unwrap();
    let second = server.next_request().await.unwrap();
    let (bad, good) = if first.method == "activate_profile" {
        (first, second)
    } else {
        (second, first)
    };
    server.reject(bad.id, PROFILE_NOT_FOUND, "profile nope not found");
    server.respond(good.id, json!([]));

    assert_matches!(
        failing.await.unwrap(),
        Err(ClientError::Server { kind, message })
            if kind == PROFILE_NOT_FOUND && message.contains("nope")
    );
    assert_eq!(ok.await.unwrap().unwrap(), json!([]));
    assert!(client.is_connected());
}

#[tokio::test]
async fn request_while_disconnected_fails_fast_without_sending() {
    let (client, mut server, _connector) = connect(test_config()).await;
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    assert_eq!(
        client.query("get_profiles", Value::Null).await,
        Err(ClientError::NotConnected)
    );
    assert_eq!(
        client.command("reload", Value::Null).await,
        Err(ClientError::NotConnected)
    );
    // The link was closed with nothing written to it
    assert!(server.next_frame().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn unanswered_query_times_out_and_late_response_is_dropped() {
    let mut config = test_config();
    config.request_timeout_ms = 2000;
    let (client, mut server, _connector) = connect(config).await;

    let started = tokio::time::Instant::now();
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.query("get_devices", Value::Null).await }
    });
    let req = server.next_request().await.unwrap();

    assert_eq!(
        call.await.unwrap(),
        Err(ClientError::Timeout {
            method: "get_devices".into(),
            timeout_ms: 2000,
        })
    );
    assert!(started.elapsed() >= Duration::from_millis(2000));
    assert_eq!(client.pending_requests(), 0);

    // Late response for the expired id resolves nothing and breaks nothing
    server.respond(req.id, json!(["late"]));
    common::barrier(&client, &mut server).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn connection_loss_rejects_every_pending_request_once() {
    let mut config = test_config();
    config.reconnect.max_attempts = 0;
    let (client, mut server, _connector) = connect(config).await;

    let calls: Vec<_> = (0..4)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.query("slow", json!(i)).await })
        })
        .collect();
    for _ in 0..4 {
        let _ = server.next_request().await.unwrap();
    }
    assert_eq!(client.pending_requests(), 4);

    server.hang_up();
    for call in calls {
        assert_eq!(call.await.unwrap(), Err(ClientError::ConnectionLost));
    }
    assert_eq!(client.pending_requests(), 0);
    wait_for_state(&client, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn malformed_frames_do_not_disturb_pending_requests() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.query("get_config", Value::Null).await }
    });
    let req = server.next_request().await.unwrap();

    server.send_text("{definitely not json");
    server.send_text(r#"{"type":"telemetry","value":1}"#);
    server.send_text(r#"{"type":"response","ok":true}"#);
    server.respond(req.id, json!({"layers": 2}));

    assert_eq!(call.await.unwrap().unwrap(), json!({"layers": 2}));
    assert!(client.is_connected());
}

#[tokio::test]
async fn correlation_ids_are_unique_uuids() {
    let (client, mut server, _connector) = connect(test_config()).await;

    let mut seen = std::collections::HashSet::new();
    for _ in 0..20 {
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.command("noop", Value::Null).await }
        });
        let req = server.next_request().await.unwrap();
        assert_eq!(req.id.as_str().len(), 36);
        assert!(seen.insert(req.id.clone()));
        server.respond(req.id, Value::Null);
        call.await.unwrap().unwrap();
    }
}
