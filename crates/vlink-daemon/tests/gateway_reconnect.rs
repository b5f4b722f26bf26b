//! Gateway client: handshake, reconnect backoff, invoke dispatch, and
//! event replay after reconnect.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use vlink_core::error::VlinkResult;
use vlink_daemon::gateway::{GatewayClient, GatewayConfig, InvokeHandler};

fn client_for(url: String, handler: InvokeHandler) -> GatewayClient {
    let device_key = ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]);
    GatewayClient::new(
        GatewayConfig {
            url,
            token: None,
            client_id: "vlink-test".to_string(),
            vin: "5YJ3E1EA1NF000000".to_string(),
        },
        device_key,
        handler,
    )
}

fn echo_handler() -> InvokeHandler {
    Arc::new(|method, params| {
        Box::pin(async move {
            let result: VlinkResult<Value> = Ok(json!({ "method": method, "echo": params }));
            result
        })
    })
}

async fn serve_handshake(ws: &mut WebSocketStream<TcpStream>) -> Value {
    let challenge = json!({
        "type": "event",
        "event": "connect.challenge",
        "payload": { "nonce": "test-nonce" },
    });
    ws.send(Message::Text(challenge.to_string()))
        .await
        .expect("send challenge");

    let connect = loop {
        match ws.next().await.expect("connect frame").expect("read") {
            Message::Text(raw) => break serde_json::from_str::<Value>(&raw).expect("json"),
            _ => continue,
        }
    };
    assert_eq!(connect["type"], "req");
    assert_eq!(connect["method"], "connect");
    assert_eq!(connect["params"]["role"], "node");
    assert_eq!(connect["params"]["device"]["nonce"], "test-nonce");

    let hello_ok = json!({ "type": "event", "event": "hello-ok", "payload": {} });
    ws.send(Message::Text(hello_ok.to_string()))
        .await
        .expect("send hello-ok");
    connect
}

#[tokio::test]
async fn reconnect_backoff_doubles_from_one_second() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let server_attempts = attempts.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            server_attempts.lock().push(Instant::now());
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            serve_handshake(&mut ws).await;
            // Forced close right after a successful handshake.
            let _ = ws.close(None).await;
        }
    });

    let client = client_for(format!("ws://{addr}"), echo_handler());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = {
        let client = client.clone();
        tokio::spawn(async move { client.run(shutdown_rx).await })
    };

    // Three attempts: t0, then ~+1s, then ~+2s.
    for _ in 0..200 {
        if attempts.lock().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let _ = shutdown_tx.send(true);
    let _ = run.await;

    let timestamps = attempts.lock().clone();
    assert!(timestamps.len() >= 3, "saw {} attempts", timestamps.len());
    let first = timestamps[1].duration_since(timestamps[0]);
    let second = timestamps[2].duration_since(timestamps[1]);
    assert!(
        (Duration::from_millis(950)..Duration::from_millis(1400)).contains(&first),
        "first backoff was {first:?}"
    );
    assert!(
        (Duration::from_millis(1900)..Duration::from_millis(2600)).contains(&second),
        "second backoff was {second:?}"
    );
}

#[tokio::test]
async fn invoke_request_round_trips_through_handler() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("ws");
        serve_handshake(&mut ws).await;

        let invoke = json!({
            "type": "event",
            "event": "node.invoke.request",
            "payload": {
                "id": "inv-1",
                "command": "battery.get",
                "paramsJSON": "{\"unit\":\"percent\"}",
            },
        });
        ws.send(Message::Text(invoke.to_string()))
            .await
            .expect("send invoke");

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(raw) = message {
                let frame: Value = serde_json::from_str(&raw).expect("json");
                if frame["method"] == "node.invoke.result" {
                    let _ = result_tx.send(frame);
                    return;
                }
            }
        }
    });

    let client = client_for(format!("ws://{addr}"), echo_handler());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = {
        let client = client.clone();
        tokio::spawn(async move { client.run(shutdown_rx).await })
    };

    let result = tokio::time::timeout(Duration::from_secs(5), result_rx.recv())
        .await
        .expect("invoke result in time")
        .expect("result frame");
    assert_eq!(result["params"]["id"], "inv-1");
    assert_eq!(result["params"]["ok"], true);
    let payload: Value =
        serde_json::from_str(result["params"]["payloadJSON"].as_str().expect("payloadJSON"))
            .expect("payload json");
    assert_eq!(payload["method"], "battery.get");
    assert_eq!(payload["echo"]["unit"], "percent");

    run.abort();
}

#[tokio::test]
async fn queued_events_replay_after_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("ws");
        serve_handshake(&mut ws).await;
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(raw) = message {
                let frame: Value = serde_json::from_str(&raw).expect("json");
                if frame["method"] == "vlink.trigger.fired" {
                    let _ = event_tx.send(frame);
                    return;
                }
            }
        }
    });

    let client = client_for(format!("ws://{addr}"), echo_handler());
    // Queued while disconnected; must arrive after the handshake.
    client.send_event_or_queue(json!({
        "method": "vlink.trigger.fired",
        "params": { "trigger_id": "abc123def456" },
    }));
    assert!(!client.is_connected());

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = {
        let client = client.clone();
        tokio::spawn(async move { client.run(shutdown_rx).await })
    };

    let replayed = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("replayed event in time")
        .expect("event frame");
    assert_eq!(replayed["params"]["trigger_id"], "abc123def456");
    assert_eq!(replayed["type"], "req");

    run.abort();
}

#[tokio::test]
async fn plain_events_drop_while_disconnected() {
    let client = client_for("ws://127.0.0.1:9".to_string(), echo_handler());
    assert_eq!(client.dropped(), 0);
    client.send_event(json!({ "method": "req:agent", "params": {} }));
    assert_eq!(client.dropped(), 1);
}
