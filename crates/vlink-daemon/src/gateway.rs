// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Agent gateway client.
//!
//! Maintains one JSON-RPC WebSocket connection to the gateway in the
//! node role: challenge/response handshake signed with the Ed25519
//! device key, request-id correlated calls, inbound invoke dispatch,
//! and exponential-backoff reconnection (1 s base, ×2 to a 60 s cap,
//! plus up to 10 % jitter). Outbound events are dropped and counted
//! while disconnected; trigger notifications queue for replay.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::now_ms;
use ed25519_dalek::SigningKey;
use vlink_core::error::{VlinkError, VlinkResult};
use vlink_protocol::gateway::{
    auth_payload, device_id, public_key_b64url, sign_auth_payload, Frame, InvokeRequest,
    NODE_SCOPES, PROTOCOL_VERSION,
};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
/// A connection surviving this long resets the backoff ladder.
const STABLE_AFTER: Duration = Duration::from_secs(60);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const INVOKE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_QUEUED_EVENTS: usize = 1000;

/// Handler for inbound `node.invoke.request` commands.
pub type InvokeHandler =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, VlinkResult<Value>> + Send + Sync>;

pub struct GatewayConfig {
    pub url: String,
    pub token: Option<String>,
    pub client_id: String,
    pub vin: String,
}

struct Inner {
    config: GatewayConfig,
    device_key: SigningKey,
    node_id: String,
    connected: AtomicBool,
    next_id: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending_calls: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    queued_events: Mutex<VecDeque<Value>>,
    on_invoke: InvokeHandler,
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(config: GatewayConfig, device_key: SigningKey, on_invoke: InvokeHandler) -> Self {
        let node_id = device_id(&device_key);
        GatewayClient {
            inner: Arc::new(Inner {
                config,
                device_key,
                node_id,
                connected: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                outbound: Mutex::new(None),
                pending_calls: Mutex::new(HashMap::new()),
                queued_events: Mutex::new(VecDeque::new()),
                on_invoke,
                sent: AtomicU64::new(0),
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    #[must_use]
    pub fn sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> String {
        (self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Send an event-style request. Dropped (and counted) when the
    /// gateway is down.
    pub fn send_event(&self, event: Value) {
        if !self.is_connected() {
            self.count_drop();
            return;
        }
        self.write_frame(self.wrap_event(event));
    }

    /// Send an event, queueing it for replay after reconnect instead of
    /// dropping. Used for trigger notifications.
    pub fn send_event_or_queue(&self, event: Value) {
        if self.is_connected() {
            self.write_frame(self.wrap_event(event));
            return;
        }
        let mut queue = self.inner.queued_events.lock();
        if queue.len() >= MAX_QUEUED_EVENTS {
            queue.pop_front();
            self.count_drop();
        }
        queue.push_back(event);
    }

    fn wrap_event(&self, event: Value) -> String {
        let mut frame = event;
        if frame.get("type").is_none() {
            frame["type"] = json!("req");
            frame["id"] = json!(self.next_id());
        }
        frame.to_string()
    }

    fn write_frame(&self, raw: String) {
        let sender = self.inner.outbound.lock().clone();
        match sender {
            Some(tx) if tx.send(raw).is_ok() => {
                self.inner.sent.fetch_add(1, Ordering::Relaxed);
            }
            _ => self.count_drop(),
        }
    }

    fn count_drop(&self) {
        let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 100 == 0 {
            tracing::warn!(total=%dropped, "gateway events dropped while disconnected");
        }
    }

    /// Issue a request and await its response by id.
    pub async fn call(&self, method: &str, params: Value) -> VlinkResult<Frame> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.lock().insert(id.clone(), tx);
        let frame = Frame::Req {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let raw = frame
            .encode()
            .map_err(|e| VlinkError::Internal(format!("encode frame: {e}")))?;
        self.write_frame(raw);

        // On timeout the correlator slot stays put; the server's answer
        // or a connection reset clears it.
        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(VlinkError::Transport("gateway connection reset".into())),
            Err(_) => Err(VlinkError::Transport(format!("call {method} timed out"))),
        }
    }

    fn lifecycle_event(&self, event_type: &str) -> Value {
        json!({
            "method": "req:agent",
            "params": {
                "event_type": event_type,
                "source": self.inner.config.client_id,
                "vin": self.inner.config.vin,
                "timestamp_ms": now_ms(),
                "data": {},
            }
        })
    }

    /// Run the connection state machine until shutdown flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BACKOFF_BASE;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = tokio::time::Instant::now();
            match self.connect_and_serve(&mut shutdown).await {
                Ok(()) => break, // clean shutdown
                Err(err) => {
                    tracing::info!(error=%err, "gateway connection lost");
                }
            }
            if started.elapsed() >= STABLE_AFTER {
                backoff = BACKOFF_BASE;
            }
            let jitter = backoff.mul_f64(rand::random::<f64>() * 0.1);
            let wait = backoff + jitter;
            tracing::info!(wait_ms=%wait.as_millis(), "gateway reconnect scheduled");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() { break; }
                }
            }
            backoff = std::cmp::min(backoff * 2, BACKOFF_MAX);
        }
        self.disconnect("shutdown");
    }

    async fn connect_and_serve(&self, shutdown: &mut watch::Receiver<bool>) -> VlinkResult<()> {
        let mut request = self
            .inner
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| VlinkError::Transport(format!("gateway url: {e}")))?;
        if let Some(token) = &self.inner.config.token {
            let header = format!("Bearer {token}")
                .parse()
                .map_err(|_| VlinkError::Auth("gateway token not header-safe".into()))?;
            request.headers_mut().insert("Authorization", header);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VlinkError::Transport(format!("gateway connect: {e}")))?;
        let (mut write, mut read) = ws.split();

        // --- Handshake: challenge -> connect -> hello-ok ---
        let challenge = read_frame(&mut read, HANDSHAKE_TIMEOUT).await?;
        let nonce = match &challenge {
            Frame::Event { event, payload } if event == "connect.challenge" => payload
                .get("nonce")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            other => {
                return Err(VlinkError::HandshakeFailed(format!(
                    "expected connect.challenge, got {other:?}"
                )))
            }
        };

        let signed_at_ms = now_ms();
        let payload = auth_payload(
            &self.inner.node_id,
            &self.inner.config.client_id,
            "node",
            "node",
            &NODE_SCOPES,
            signed_at_ms,
            self.inner.config.token.as_deref(),
            if nonce.is_empty() { None } else { Some(&nonce) },
        );
        let signature = sign_auth_payload(&self.inner.device_key, &payload);

        let connect = Frame::Req {
            id: self.next_id(),
            method: "connect".to_string(),
            params: json!({
                "role": "node",
                "scopes": NODE_SCOPES,
                "minProtocol": PROTOCOL_VERSION,
                "maxProtocol": PROTOCOL_VERSION,
                "client": {
                    "id": self.inner.config.client_id,
                    "platform": "vlink",
                    "mode": "node",
                    "modelIdentifier": self.inner.config.vin,
                },
                "device": {
                    "id": self.inner.node_id,
                    "publicKey": public_key_b64url(&self.inner.device_key),
                    "signature": signature,
                    "signedAt": signed_at_ms,
                    "nonce": nonce,
                },
            }),
        };
        let raw = connect
            .encode()
            .map_err(|e| VlinkError::Internal(format!("encode connect: {e}")))?;
        write
            .send(Message::Text(raw))
            .await
            .map_err(|e| VlinkError::Transport(format!("send connect: {e}")))?;

        match read_frame(&mut read, HANDSHAKE_TIMEOUT).await? {
            Frame::Event { event, .. } if event == "hello-ok" => {}
            Frame::Res { ok: true, .. } => {}
            Frame::Res { ok: false, error, .. } => {
                return Err(VlinkError::HandshakeFailed(error.to_string()))
            }
            other => {
                return Err(VlinkError::HandshakeFailed(format!(
                    "unexpected handshake reply {other:?}"
                )))
            }
        }

        // --- Authenticated. Wire the writer and flush the backlog. ---
        let (tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *self.inner.outbound.lock() = Some(tx);
        self.inner.connected.store(true, Ordering::SeqCst);
        tracing::info!(url=%self.inner.config.url, node=%self.inner.node_id, "gateway connected");

        self.send_event(self.lifecycle_event("node.connected"));
        let backlog: Vec<Value> = self.inner.queued_events.lock().drain(..).collect();
        for event in backlog {
            self.write_frame(self.wrap_event(event));
        }

        let writer = tokio::spawn(async move {
            while let Some(raw) = outbound_rx.recv().await {
                if write.send(Message::Text(raw)).await.is_err() {
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        let result = loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(raw))) => self.handle_inbound(&raw),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        break Err(VlinkError::Transport("gateway closed connection".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Err(VlinkError::Transport(format!("gateway read: {e}")));
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.send_event(self.lifecycle_event("node.disconnecting"));
                        break Ok(());
                    }
                }
            }
        };

        self.disconnect("connection ended");
        writer.abort();
        result
    }

    fn disconnect(&self, reason: &str) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            tracing::info!(%reason, "gateway disconnected");
        }
        *self.inner.outbound.lock() = None;
        // Connection reset frees every pending correlator slot.
        self.inner.pending_calls.lock().clear();
    }

    fn handle_inbound(&self, raw: &str) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error=%err, "ignoring malformed gateway frame");
                return;
            }
        };
        self.inner.received.fetch_add(1, Ordering::Relaxed);
        match frame {
            Frame::Res { ref id, .. } => {
                if let Some(tx) = self.inner.pending_calls.lock().remove(id) {
                    let _ = tx.send(frame);
                }
            }
            Frame::Event { event, payload } => match event.as_str() {
                "node.invoke.request" => self.spawn_invoke(payload),
                "ping" | "pong" | "" => {}
                other => tracing::debug!(event=%other, "unhandled gateway event"),
            },
            Frame::Req { id, method, .. } => {
                tracing::debug!(%id, %method, "ignoring inbound request frame");
            }
        }
    }

    fn spawn_invoke(&self, payload: Value) {
        let request: InvokeRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error=%err, "malformed node.invoke.request");
                return;
            }
        };
        let client = self.clone();
        tokio::spawn(async move {
            let params: Value = if request.params_json.is_empty() {
                json!({})
            } else {
                serde_json::from_str(&request.params_json).unwrap_or_else(|_| {
                    tracing::warn!(id=%request.id, command=%request.command,
                        "malformed paramsJSON, using empty params");
                    json!({})
                })
            };
            tracing::info!(id=%request.id, command=%request.command, "invoke request");

            let handler = client.inner.on_invoke.clone();
            let outcome = tokio::time::timeout(
                INVOKE_TIMEOUT,
                handler(request.command.clone(), params),
            )
            .await;

            let mut result_params = json!({
                "id": request.id,
                "nodeId": client.inner.node_id,
            });
            match outcome {
                Ok(Ok(payload)) => {
                    result_params["ok"] = json!(true);
                    result_params["payloadJSON"] = json!(payload.to_string());
                }
                Ok(Err(err)) => {
                    result_params["ok"] = json!(false);
                    result_params["error"] =
                        json!({ "code": err.code(), "message": err.to_string() });
                }
                Err(_) => {
                    result_params["ok"] = json!(false);
                    result_params["error"] = json!({
                        "code": "Transport",
                        "message": format!("handler timeout ({}s)", INVOKE_TIMEOUT.as_secs()),
                    });
                }
            }
            let frame = Frame::Req {
                id: client.next_id(),
                method: "node.invoke.result".to_string(),
                params: result_params,
            };
            if let Ok(raw) = frame.encode() {
                client.write_frame(raw);
            }
        });
    }
}

async fn read_frame<S>(read: &mut S, timeout: Duration) -> VlinkResult<Frame>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(timeout, read.next())
            .await
            .map_err(|_| VlinkError::Transport("gateway handshake timed out".into()))?
            .ok_or_else(|| VlinkError::Transport("gateway closed during handshake".into()))?
            .map_err(|e| VlinkError::Transport(format!("gateway read: {e}")))?;
        match message {
            Message::Text(raw) => {
                return Frame::decode(&raw)
                    .map_err(|e| VlinkError::Decode(format!("gateway frame: {e}")))
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                return Err(VlinkError::Transport(
                    "gateway closed during handshake".into(),
                ))
            }
            _ => continue,
        }
    }
}
