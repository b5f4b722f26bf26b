//! Local RPC tool surface.
//!
//! Newline-delimited JSON over a loopback TCP socket: each request line
//! is `{"method": ..., "params": ...}` and each response line is the
//! dispatcher's `{ok, result|error}` envelope. The transport is
//! deliberately dumb; the dispatch function is the interface.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::dispatcher::CommandDispatcher;
use vlink_core::error::{VlinkError, VlinkResult};

pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<CommandDispatcher>,
}

impl RpcServer {
    pub async fn bind(addr: SocketAddr, dispatcher: Arc<CommandDispatcher>) -> VlinkResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| VlinkError::Transport(format!("rpc bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| VlinkError::Transport(e.to_string()))?;
        Ok(RpcServer {
            listener,
            local_addr,
            dispatcher,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(addr=%self.local_addr, "local rpc listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, dispatcher).await;
                        });
                    }
                    Err(err) => tracing::warn!(error=%err, "rpc accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, dispatcher: Arc<CommandDispatcher>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => {
                let method = request
                    .get("method")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
                if method.is_empty() {
                    error_envelope("InvalidParams", "request missing 'method'")
                } else {
                    dispatcher.dispatch_enveloped(&method, params).await
                }
            }
            Err(err) => error_envelope("Decode", &format!("malformed request: {err}")),
        };
        let mut out = response.to_string();
        out.push('\n');
        if write.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn error_envelope(code: &str, message: &str) -> Value {
    json!({ "ok": false, "error": { "code": code, "message": message } })
}
