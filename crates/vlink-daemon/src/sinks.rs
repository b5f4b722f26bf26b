// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Built-in fanout sinks.
//!
//! Each sink is an independent consumer task registered on the
//! [`FrameFanout`]; none of them can block or fail another. The store
//! sink and trigger sink run unconditionally; the cache warmer, event
//! emitter and dashboard feed are wired up by the runtime when their
//! collaborators exist.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::emitter::EventEmitter;
use crate::fanout::{FrameFanout, SinkStats};
use crate::gateway::GatewayClient;
use crate::now_ms;
use vlink_core::cache::{CacheKey, ResponseCache};
use vlink_core::filter::DualGateFilter;
use vlink_core::mapper::{deep_merge, deep_set, TelemetryMapper};
use vlink_core::store::LatestStore;
use vlink_core::trigger::TriggerEngine;
use vlink_core::TelemetryFrame;

/// Cache entries stay generously fresh while telemetry streams.
const TELEMETRY_CACHE_TTL: Duration = Duration::from_secs(120);
const CACHE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DASHBOARD_QUEUE: usize = 64;

/// Merge every frame field into the latest-value store.
pub fn spawn_store_sink(
    fanout: &FrameFanout,
    store: Arc<LatestStore>,
) -> (Arc<SinkStats>, JoinHandle<()>) {
    fanout.spawn_sink("latest-store", move |frame| {
        let store = store.clone();
        async move {
            for (field, value) in &frame.fields {
                store.update(field, value.clone(), frame.captured_at_ms);
            }
            Ok(())
        }
    })
}

/// Evaluate triggers on every frame.
pub fn spawn_trigger_sink(
    fanout: &FrameFanout,
    engine: Arc<TriggerEngine>,
) -> (Arc<SinkStats>, JoinHandle<()>) {
    fanout.spawn_sink("triggers", move |frame| {
        let engine = engine.clone();
        async move {
            engine.evaluate_frame(&frame);
            Ok(())
        }
    })
}

struct CacheWarmState {
    pending: Value,
    last_flush_ms: i64,
}

/// Project telemetry onto the VehicleData shape and keep the response
/// cache warm, flushing at most once per interval.
pub fn spawn_cache_sink(
    fanout: &FrameFanout,
    cache: Arc<ResponseCache>,
    vin: String,
) -> (Arc<SinkStats>, JoinHandle<()>) {
    let state = Arc::new(Mutex::new(CacheWarmState {
        pending: json!({}),
        last_flush_ms: 0,
    }));
    fanout.spawn_sink("cache-warmer", move |frame| {
        let cache = cache.clone();
        let vin = vin.clone();
        let state = state.clone();
        async move {
            if frame.vin != vin {
                return Ok(());
            }
            let mapper = TelemetryMapper;
            let mut guard = state.lock();
            for (field, value) in &frame.fields {
                for (path, projected) in mapper.map(field, value) {
                    deep_set(&mut guard.pending, path, projected);
                }
            }
            let now = now_ms();
            if now - guard.last_flush_ms < CACHE_FLUSH_INTERVAL.as_millis() as i64 {
                return Ok(());
            }
            guard.last_flush_ms = now;
            let pending = std::mem::replace(&mut guard.pending, json!({}));
            drop(guard);
            if pending.as_object().map(|o| o.is_empty()).unwrap_or(true) {
                return Ok(());
            }

            let key = CacheKey::vin(&vin, "vehicle_data", json!({}));
            let mut blob = cache
                .get(&key)
                .map(|hit| hit.value)
                .unwrap_or_else(|| json!({ "vin": vin, "state": "online" }));
            deep_merge(&mut blob, &pending);
            cache.put(&key, &blob, TELEMETRY_CACHE_TTL)?;
            cache.put_wake_state(&vin, "online", TELEMETRY_CACHE_TTL)?;
            Ok(())
        }
    })
}

/// Run the dual-gate filter over each frame and forward passing fields
/// to the gateway as events.
pub fn spawn_emitter_sink(
    fanout: &FrameFanout,
    filter: DualGateFilter,
    emitter: EventEmitter,
    gateway: GatewayClient,
) -> (Arc<SinkStats>, JoinHandle<()>) {
    let filter = Arc::new(Mutex::new(filter));
    fanout.spawn_sink("emitter", move |frame| {
        let filter = filter.clone();
        let emitter = emitter.clone();
        let gateway = gateway.clone();
        async move {
            let now = now_ms();
            for (field, value) in &frame.fields {
                let passes = filter.lock().should_emit(field, value, now);
                if !passes {
                    continue;
                }
                let Some(event) = emitter.to_event(field, value, &frame.vin, frame.captured_at_ms)
                else {
                    continue;
                };
                gateway.send_event(event);
                filter.lock().record_emit(field, value, now);
            }
            Ok(())
        }
    })
}

/// Handle to the dashboard frame feed.
pub struct DashboardFeed {
    pub rx: mpsc::Receiver<Arc<TelemetryFrame>>,
}

/// Non-blocking feed for a TUI renderer; frames are dropped freely
/// under pressure.
pub fn spawn_dashboard_sink(
    fanout: &FrameFanout,
) -> (DashboardFeed, Arc<SinkStats>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(DASHBOARD_QUEUE);
    let (stats, handle) = fanout.spawn_sink("dashboard", move |frame| {
        let tx = tx.clone();
        async move {
            // A full queue is fine; the renderer is cosmetic.
            let _ = tx.try_send(frame);
            Ok(())
        }
    });
    (DashboardFeed { rx }, stats, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vlink_core::FieldValue;

    fn frame(fields: &[(&str, FieldValue)], at: i64) -> TelemetryFrame {
        TelemetryFrame {
            vin: "5YJ3E1EA1NF000000".into(),
            captured_at_ms: at,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            is_resend: false,
        }
    }

    #[tokio::test]
    async fn store_sink_merges_fields() {
        let fanout = FrameFanout::new();
        let store = Arc::new(LatestStore::new());
        let (_stats, handle) = spawn_store_sink(&fanout, store.clone());

        fanout.publish(frame(&[("Soc", FieldValue::Int(71))], 1_000));
        drop(fanout);
        handle.await.unwrap();

        assert_eq!(store.get("Soc").unwrap().value, FieldValue::Int(71));
        assert_eq!(store.get("Soc").unwrap().updated_at_ms, 1_000);
    }

    #[tokio::test]
    async fn trigger_sink_feeds_engine() {
        let fanout = FrameFanout::new();
        let engine = Arc::new(TriggerEngine::new("5YJ3E1EA1NF000000"));
        engine
            .create(
                vlink_core::trigger::TriggerRequest {
                    field: "Soc".into(),
                    operator: vlink_core::trigger::TriggerOperator::Lt,
                    threshold: Some(vlink_core::trigger::Threshold::Scalar(FieldValue::Int(50))),
                    once: false,
                    cooldown: Duration::ZERO,
                },
                0,
            )
            .unwrap();
        let (_stats, handle) = spawn_trigger_sink(&fanout, engine.clone());

        fanout.publish(frame(&[("Soc", FieldValue::Int(40))], 1_000));
        drop(fanout);
        handle.await.unwrap();

        assert_eq!(engine.poll().len(), 1);
    }

    #[tokio::test]
    async fn cache_sink_warms_vehicle_data() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResponseCache::new(dir.path()).unwrap());
        let fanout = FrameFanout::new();
        let (_stats, handle) =
            spawn_cache_sink(&fanout, cache.clone(), "5YJ3E1EA1NF000000".into());

        fanout.publish(frame(
            &[
                ("Soc", FieldValue::Int(71)),
                ("ChargeState", FieldValue::String("Charging".into())),
            ],
            1_000,
        ));
        // A frame for another vehicle is ignored.
        let mut foreign = frame(&[("Soc", FieldValue::Int(5))], 2_000);
        foreign.vin = "OTHER00000000000X".into();
        fanout.publish(foreign);
        drop(fanout);
        handle.await.unwrap();

        let key = CacheKey::vin("5YJ3E1EA1NF000000", "vehicle_data", json!({}));
        let blob = cache.get(&key).unwrap().value;
        assert_eq!(blob["charge_state"]["usable_battery_level"], 71);
        assert_eq!(blob["charge_state"]["charging_state"], "Charging");
        assert_eq!(
            cache.get_wake_state("5YJ3E1EA1NF000000").as_deref(),
            Some("online")
        );
    }

    #[tokio::test]
    async fn dashboard_sink_drops_under_pressure() {
        let fanout = FrameFanout::new();
        let (mut feed, _stats, handle) = spawn_dashboard_sink(&fanout);
        for i in 0..(DASHBOARD_QUEUE as i64 * 2) {
            fanout.publish(frame(&[("Soc", FieldValue::Int(i))], i));
        }
        drop(fanout);
        handle.await.unwrap();

        let mut received = 0;
        while feed.rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received > 0);
        assert!(received <= DASHBOARD_QUEUE);
    }
}
