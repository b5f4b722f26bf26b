//! Read caching and write-triggered invalidation (read → cache → write
//! → fresh read).

mod common;

use common::{MockVehicleTransport, TEST_VIN};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use vlink_core::cache::ResponseCache;
use vlink_core::store::LatestStore;
use vlink_core::trigger::TriggerEngine;
use vlink_daemon::config::Tier;
use vlink_daemon::dispatcher::CommandDispatcher;
use vlink_daemon::fleet::FleetClient;
use vlink_daemon::router::CommandRouter;
use vlink_daemon::session::SessionManager;

#[tokio::test]
async fn write_invalidates_cached_reads() {
    let transport = Arc::new(MockVehicleTransport::new());
    let fleet = FleetClient::new(transport.clone());
    let cache_dir = tempfile::tempdir().expect("tmp");
    let cache = Arc::new(ResponseCache::new(cache_dir.path()).expect("cache"));
    let sessions = Arc::new(SessionManager::new(
        fleet.clone(),
        Some(p256::SecretKey::random(&mut rand::rngs::OsRng)),
    ));
    let router = Arc::new(CommandRouter::new(
        fleet.clone(),
        sessions,
        cache.clone(),
        Tier::Full,
    ));
    let dispatcher = CommandDispatcher::new(
        TEST_VIN,
        Arc::new(LatestStore::new()),
        Arc::new(TriggerEngine::new(TEST_VIN)),
        router,
        fleet,
        cache,
    );

    // Cold read hits the network once.
    let first = dispatcher
        .dispatch("charge_state.get", json!({}))
        .await
        .expect("charge_state.get");
    assert_eq!(first["charge_state"], "Disconnected");
    assert_eq!(transport.vehicle_data_gets.load(Ordering::SeqCst), 1);

    // Warm reads are served from cache.
    for _ in 0..3 {
        dispatcher
            .dispatch("charge_state.get", json!({}))
            .await
            .expect("cached read");
    }
    assert_eq!(transport.vehicle_data_gets.load(Ordering::SeqCst), 1);

    // A successful write evicts the vin scope...
    transport.vehicle_data.lock()["charge_state"]["charging_state"] = json!("Charging");
    let written = dispatcher
        .dispatch("charge.start", json!({}))
        .await
        .expect("charge.start");
    assert_eq!(written["result"], true);

    // ...so the next read fetches fresh data.
    let fresh = dispatcher
        .dispatch("charge_state.get", json!({}))
        .await
        .expect("fresh read");
    assert_eq!(fresh["charge_state"], "Charging");
    assert_eq!(transport.vehicle_data_gets.load(Ordering::SeqCst), 2);
}
