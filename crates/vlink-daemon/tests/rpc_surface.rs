//! Local RPC surface: newline-delimited JSON over loopback TCP.

mod common;

use common::{MockVehicleTransport, TEST_VIN};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

use vlink_core::cache::ResponseCache;
use vlink_core::store::LatestStore;
use vlink_core::trigger::TriggerEngine;
use vlink_core::value::FieldValue;
use vlink_daemon::config::Tier;
use vlink_daemon::dispatcher::CommandDispatcher;
use vlink_daemon::fleet::FleetClient;
use vlink_daemon::now_ms;
use vlink_daemon::router::CommandRouter;
use vlink_daemon::rpc::RpcServer;
use vlink_daemon::session::SessionManager;

async fn start_rpc(
    tier: Tier,
) -> (
    SocketAddr,
    Arc<LatestStore>,
    tempfile::TempDir,
    watch::Sender<bool>,
) {
    let transport = Arc::new(MockVehicleTransport::new());
    let fleet = FleetClient::new(transport);
    let cache_dir = tempfile::tempdir().expect("tmp");
    let cache = Arc::new(ResponseCache::new(cache_dir.path()).expect("cache"));
    let store = Arc::new(LatestStore::new());
    let sessions = Arc::new(SessionManager::new(fleet.clone(), None));
    let router = Arc::new(CommandRouter::new(fleet.clone(), sessions, cache.clone(), tier));
    let dispatcher = Arc::new(CommandDispatcher::new(
        TEST_VIN,
        store.clone(),
        Arc::new(TriggerEngine::new(TEST_VIN)),
        router,
        fleet,
        cache,
    ));

    let server = RpcServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)), dispatcher)
        .await
        .expect("bind rpc");
    let addr = server.local_addr();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));
    (addr, store, cache_dir, shutdown_tx)
}

async fn call(stream: &mut TcpStream, request: Value) -> Value {
    let (read, mut write) = stream.split();
    let mut line = request.to_string();
    line.push('\n');
    write.write_all(line.as_bytes()).await.expect("write");
    let mut lines = BufReader::new(read).lines();
    let raw = lines
        .next_line()
        .await
        .expect("read line")
        .expect("response line");
    serde_json::from_str(&raw).expect("response json")
}

#[tokio::test]
async fn reads_and_errors_over_the_wire() {
    let (addr, store, _dir, _shutdown) = start_rpc(Tier::Readonly).await;
    store.update("Soc", FieldValue::Int(81), now_ms());
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let response = call(
        &mut stream,
        json!({"method": "telemetry.get", "params": {"field": "Soc"}}),
    )
    .await;
    assert_eq!(response["ok"], true);
    assert_eq!(response["result"]["value"], 81);

    // Tier gate applies identically on this surface.
    let response = call(&mut stream, json!({"method": "door.lock"})).await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "TierBlocked");

    let response = call(&mut stream, json!({"method": "no.such.method"})).await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "UnknownMethod");

    // Malformed request lines answer instead of killing the stream.
    let (read, mut write) = stream.split();
    write.write_all(b"not json\n").await.expect("write");
    let mut lines = BufReader::new(read).lines();
    let raw = lines.next_line().await.expect("line").expect("response");
    let response: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(response["error"]["code"], "Decode");
}
