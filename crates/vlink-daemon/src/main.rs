// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vlink_core::cache::ResponseCache;
use vlink_core::fields::resolve_fields;
use vlink_core::filter::DualGateFilter;
use vlink_core::store::LatestStore;
use vlink_core::trigger::TriggerEngine;
use vlink_daemon::config::{DaemonConfig, Tier};
use vlink_daemon::dispatcher::CommandDispatcher;
use vlink_daemon::emitter::EventEmitter;
use vlink_daemon::fanout::FrameFanout;
use vlink_daemon::fleet::{FleetClient, HttpTransport};
use vlink_daemon::gateway::{GatewayClient, GatewayConfig, InvokeHandler};
use vlink_daemon::receiver::TelemetryReceiver;
use vlink_daemon::router::CommandRouter;
use vlink_daemon::rpc::RpcServer;
use vlink_daemon::session::SessionManager;
use vlink_daemon::tunnel::{SessionConfig, TailscaleIngress, TelemetrySession};
use vlink_daemon::{keys, now_ms, sinks};

/// How long graceful shutdown waits for the fanout to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "vlinkd")]
#[command(about = "vlink edge-node daemon: vehicle to agent bridge")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    vin: Option<String>,

    /// Local telemetry WebSocket port.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long, default_value = "info")]
    log: String,

    #[arg(long)]
    gateway_url: Option<String>,

    /// Telemetry field preset or comma-separated field list.
    #[arg(long)]
    fields: Option<String>,

    /// Push interval override in seconds for every field.
    #[arg(long)]
    interval: Option<u32>,

    /// Skip the public ingress and vehicle telemetry configuration
    /// (the vehicle is already pointed at this node).
    #[arg(long, default_value_t = false)]
    no_tunnel: bool,

    /// Local RPC listen address.
    #[arg(long, default_value = "127.0.0.1:7777")]
    rpc_listen: SocketAddr,

    /// Feed frames to the dashboard renderer.
    #[arg(long, default_value_t = false)]
    dashboard: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log.clone()))
        .init();

    let mut config = DaemonConfig::load(args.config.as_deref())?;
    if let Some(vin) = args.vin.clone() {
        config.vin = vin;
    }
    if let Some(port) = args.port {
        config.telemetry_port = port;
    }
    if let Some(url) = args.gateway_url.clone() {
        config.gateway.url = url;
    }
    if let Some(fields) = args.fields.clone() {
        config.fields = fields;
    }
    if config.vin.len() != 17 {
        return Err(format!("invalid VIN '{}' (need 17 characters)", config.vin).into());
    }

    let config_dir = DaemonConfig::expand_path(&config.config_dir);
    let cache_dir = DaemonConfig::expand_path(&config.cache_dir);
    let fields = resolve_fields(&config.fields, args.interval)?;

    // -- Key material ----------------------------------------------------
    let command_key = keys::load_command_key(&config_dir)?;
    if command_key.is_none() {
        tracing::warn!("no command signing key enrolled; signed commands will be rejected");
    }
    let device_key = keys::ensure_device_key(&config_dir)?;
    let vehicle_key = match config.vehicle_public_key_hex.as_deref() {
        Some(hex_key) => {
            let raw = hex::decode(hex_key)?;
            Some(p256::PublicKey::from_sec1_bytes(&raw)?)
        }
        None => None,
    };

    // -- Shared state ----------------------------------------------------
    let access_token = config.access_token.clone().unwrap_or_default();
    if access_token.is_empty() {
        tracing::warn!("no fleet access token configured; REST calls will fail");
    }
    let fleet = FleetClient::new(Arc::new(HttpTransport::new(
        config.fleet_base_url.clone(),
        access_token,
    )));
    let cache = Arc::new(ResponseCache::new(&cache_dir)?);
    let store = Arc::new(LatestStore::new());
    let triggers = Arc::new(TriggerEngine::new(config.vin.clone()));
    let sessions = Arc::new(SessionManager::new(fleet.clone(), command_key));
    let router = Arc::new(CommandRouter::new(
        fleet.clone(),
        sessions.clone(),
        cache.clone(),
        config.tier,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        config.vin.clone(),
        store.clone(),
        triggers.clone(),
        router.clone(),
        fleet.clone(),
        cache.clone(),
    ));
    if config.tier == Tier::Readonly {
        tracing::info!("readonly tier: write dispatches are blocked");
    }

    // -- Gateway ---------------------------------------------------------
    let invoke_handler: InvokeHandler = {
        let dispatcher = dispatcher.clone();
        Arc::new(move |method, params| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatcher.dispatch(&method, params).await })
        })
    };
    let gateway = GatewayClient::new(
        GatewayConfig {
            url: config.gateway.url.clone(),
            token: config.gateway.token.clone(),
            client_id: config.gateway.client_id.clone(),
            vin: config.vin.clone(),
        },
        device_key,
        invoke_handler,
    );

    // Trigger notifications ride both channels: the pending deque for
    // pollers, and a push event when the gateway is up.
    {
        let gateway = gateway.clone();
        let client_id = config.gateway.client_id.clone();
        triggers.set_push_sink(Box::new(move |notification| {
            let event = serde_json::json!({
                "method": "vlink.trigger.fired",
                "params": {
                    "event_type": "trigger_fired",
                    "source": client_id,
                    "vin": notification.vin,
                    "timestamp_ms": now_ms(),
                    "data": notification,
                }
            });
            gateway.send_event_or_queue(event);
        }));
    }

    // -- Fanout and sinks ------------------------------------------------
    let fanout = Arc::new(FrameFanout::new());
    let mut sink_handles = Vec::new();
    let (_stats, handle) = sinks::spawn_store_sink(&fanout, store.clone());
    sink_handles.push(handle);
    let (_stats, handle) = sinks::spawn_cache_sink(&fanout, cache.clone(), config.vin.clone());
    sink_handles.push(handle);
    let (_stats, handle) = sinks::spawn_trigger_sink(&fanout, triggers.clone());
    sink_handles.push(handle);
    let (_stats, handle) = sinks::spawn_emitter_sink(
        &fanout,
        DualGateFilter::new(config.filter_specs()),
        EventEmitter::new(config.gateway.client_id.clone()),
        gateway.clone(),
    );
    sink_handles.push(handle);
    if args.dashboard {
        let (mut feed, _stats, handle) = sinks::spawn_dashboard_sink(&fanout);
        sink_handles.push(handle);
        tokio::spawn(async move {
            while let Some(frame) = feed.rx.recv().await {
                tracing::info!(vin=%frame.vin, fields=%frame.fields.len(),
                    captured_at_ms=%frame.captured_at_ms, "frame");
            }
        });
    }

    // -- Servers ---------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let receiver = TelemetryReceiver::bind(
        SocketAddr::from(([0, 0, 0, 0], config.telemetry_port)),
        config.vin.clone(),
        vehicle_key,
        fanout.clone(),
    )
    .await?;
    let receiver_task = tokio::spawn(receiver.run(shutdown_rx.clone()));

    let rpc = RpcServer::bind(args.rpc_listen, dispatcher.clone()).await?;
    let rpc_task = tokio::spawn(rpc.run(shutdown_rx.clone()));

    let gateway_task = {
        let gateway = gateway.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { gateway.run(shutdown_rx).await })
    };

    // -- Tunnel / partner lifecycle --------------------------------------
    let tunnel = if args.no_tunnel {
        None
    } else {
        Some(
            TelemetrySession::establish(
                fleet.clone(),
                Box::new(TailscaleIngress),
                SessionConfig {
                    vin: config.vin.clone(),
                    local_port: config.telemetry_port,
                    fields,
                    registered_domain: None,
                },
            )
            .await?,
        )
    };

    tracing::info!(vin=%config.vin, port=%config.telemetry_port, "vlinkd running");
    let run_result = tokio::signal::ctrl_c().await;
    if let Err(err) = run_result {
        tracing::error!(error=%err, "signal handler failed, shutting down");
    }

    // -- Graceful shutdown: stop intake, drain fanout, close gateway,
    //    release tunnel.
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = receiver_task.await;
    let _ = rpc_task.await;

    drop(fanout);
    let drain = async {
        for handle in sink_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("fanout drain exceeded {DRAIN_TIMEOUT:?}, abandoning queued frames");
    }

    let _ = gateway_task.await;
    if let Some(tunnel) = tunnel {
        tunnel.teardown().await;
    }
    tracing::info!("vlinkd stopped");
    Ok(())
}
