// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Telemetry receiver: WebSocket server terminating the vehicle's push
//! stream.
//!
//! TLS ends at the external tunnel; this server speaks plain WebSocket
//! on a local port. Each connection starts with a nonce challenge the
//! vehicle answers with a `HelloRequest` (claimed VIN plus a Schnorr
//! signature over the nonce). A failed handshake closes with 1008.
//! After authentication, every binary message decodes into one
//! [`TelemetryFrame`]; malformed frames are counted and skipped, never
//! fatal.

use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::fanout::FrameFanout;
use crate::now_ms;
use vlink_core::error::{VlinkError, VlinkResult};
use vlink_core::TelemetryFrame;
use vlink_protocol::schnorr;
use vlink_protocol::vehicle::{HelloChallenge, HelloRequest};

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub connections: AtomicI64,
    pub frames: AtomicU64,
    pub decode_errors: AtomicU64,
    pub auth_failures: AtomicU64,
}

pub struct TelemetryReceiver {
    listener: TcpListener,
    local_addr: SocketAddr,
    vin: String,
    vehicle_key: Option<p256::PublicKey>,
    fanout: Arc<FrameFanout>,
    stats: Arc<ReceiverStats>,
}

impl TelemetryReceiver {
    /// Bind the listener. Port 0 picks an ephemeral port; see
    /// [`Self::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        vin: impl Into<String>,
        vehicle_key: Option<p256::PublicKey>,
        fanout: Arc<FrameFanout>,
    ) -> VlinkResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| VlinkError::Transport(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| VlinkError::Transport(e.to_string()))?;
        if vehicle_key.is_none() {
            tracing::warn!("no vehicle public key configured; accepting unauthenticated pushes");
        }
        Ok(TelemetryReceiver {
            listener,
            local_addr,
            vin: vin.into(),
            vehicle_key,
            fanout,
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Accept loop; returns when shutdown flips. Socket errors on one
    /// connection never stop the listener.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(addr=%self.local_addr, "telemetry receiver listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = Connection {
                            vin: self.vin.clone(),
                            vehicle_key: self.vehicle_key,
                            fanout: self.fanout.clone(),
                            stats: self.stats.clone(),
                        };
                        tokio::spawn(async move {
                            conn.serve(stream, peer).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error=%err, "accept failed");
                    }
                },
                changed = shutdown.changed() => {
                    // A dropped sender means the runtime is going away.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("telemetry receiver stopping");
                        return;
                    }
                }
            }
        }
    }
}

struct Connection {
    vin: String,
    vehicle_key: Option<p256::PublicKey>,
    fanout: Arc<FrameFanout>,
    stats: Arc<ReceiverStats>,
}

impl Connection {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        let mut ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                tracing::warn!(%peer, error=%err, "websocket upgrade failed");
                return;
            }
        };

        let live = self.stats.connections.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(%peer, total=%live, "vehicle connected");

        if let Err(reason) = self.authenticate(&mut ws).await {
            self.stats.auth_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%peer, %reason, "telemetry handshake rejected");
            let _ = ws
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: reason.into(),
                })))
                .await;
            self.stats.connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Binary(raw)) => match TelemetryFrame::decode(&raw, now_ms()) {
                    Ok(frame) => {
                        self.stats.frames.fetch_add(1, Ordering::Relaxed);
                        self.fanout.publish(frame);
                    }
                    Err(err) => {
                        self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(%peer, bytes=%raw.len(), error=%err,
                            "failed to decode telemetry frame");
                    }
                },
                Ok(Message::Text(raw)) => {
                    tracing::debug!(%peer, preview=%raw.chars().take(120).collect::<String>(),
                        "unexpected text frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(%peer, error=%err, "connection error");
                    break;
                }
            }
        }

        let remaining = self.stats.connections.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::info!(%peer, remaining=%remaining, "vehicle disconnected");
    }

    /// Challenge → HelloRequest → Schnorr verification.
    async fn authenticate(
        &self,
        ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    ) -> Result<(), String> {
        let nonce: [u8; 32] = rand::random();
        let challenge = HelloChallenge {
            nonce: nonce.to_vec(),
        };
        ws.send(Message::Binary(challenge.encode_to_vec()))
            .await
            .map_err(|e| format!("challenge send: {e}"))?;

        let first = tokio::time::timeout(HELLO_TIMEOUT, ws.next())
            .await
            .map_err(|_| "hello timeout".to_string())?
            .ok_or_else(|| "closed before hello".to_string())?
            .map_err(|e| format!("hello read: {e}"))?;
        let raw = match first {
            Message::Binary(raw) => raw,
            other => return Err(format!("expected binary hello, got {other:?}")),
        };
        let hello =
            HelloRequest::decode(raw.as_slice()).map_err(|e| format!("hello decode: {e}"))?;

        if hello.vin != self.vin {
            return Err(format!("vin mismatch: {}", hello.vin));
        }
        if let Some(key) = &self.vehicle_key {
            schnorr::verify(key, &nonce, &hello.signature)
                .map_err(|e| format!("signature: {e}"))?;
        }
        tracing::info!(vin=%hello.vin, "telemetry stream authenticated");
        Ok(())
    }
}
