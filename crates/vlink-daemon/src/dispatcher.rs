// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inbound command dispatcher.
//!
//! One dispatch surface serves both the gateway and the local RPC
//! callers. Reads answer from the latest-value store, falling back to
//! the cached (or freshly fetched) VehicleData blob. Writes run through
//! the policy gates and the command router; trigger CRUD talks to the
//! trigger engine directly. `system.run` re-enters dispatch through the
//! alias table with a hard depth limit of 1.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::fleet::FleetClient;
use crate::now_ms;
use crate::registry::resolve_alias;
use crate::router::CommandRouter;
use vlink_core::cache::{CacheKey, ResponseCache, TtlTier};
use vlink_core::error::{VlinkError, VlinkResult};
use vlink_core::store::LatestStore;
use vlink_core::trigger::{Threshold, TriggerEngine, TriggerOperator, TriggerRequest};
use vlink_core::units::fahrenheit_to_celsius;
use vlink_core::value::FieldValue;

pub struct CommandDispatcher {
    vin: String,
    store: Arc<LatestStore>,
    triggers: Arc<TriggerEngine>,
    router: Arc<CommandRouter>,
    fleet: FleetClient,
    cache: Arc<ResponseCache>,
    write_lock: tokio::sync::Mutex<()>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(
        vin: impl Into<String>,
        store: Arc<LatestStore>,
        triggers: Arc<TriggerEngine>,
        router: Arc<CommandRouter>,
        fleet: FleetClient,
        cache: Arc<ResponseCache>,
    ) -> Self {
        CommandDispatcher {
            vin: vin.into(),
            store,
            triggers,
            router,
            fleet,
            cache,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Dispatch and wrap the outcome in the `{ok, result|error}`
    /// envelope used by both RPC surfaces.
    pub async fn dispatch_enveloped(&self, method: &str, params: Value) -> Value {
        match self.dispatch(method, params).await {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(err) => json!({
                "ok": false,
                "error": { "code": err.code(), "message": err.to_string() },
            }),
        }
    }

    pub async fn dispatch(&self, method: &str, params: Value) -> VlinkResult<Value> {
        self.dispatch_inner(method, params, 0).await
    }

    fn dispatch_boxed<'a>(
        &'a self,
        method: &'a str,
        params: Value,
        depth: u8,
    ) -> futures_util::future::BoxFuture<'a, VlinkResult<Value>> {
        Box::pin(self.dispatch_inner(method, params, depth))
    }

    async fn dispatch_inner(&self, method: &str, params: Value, depth: u8) -> VlinkResult<Value> {
        tracing::debug!(%method, depth, "dispatch");
        match method {
            // -- Reads ------------------------------------------------
            "location.get" => self.location_get().await,
            "battery.get" => self.battery_get().await,
            "temperature.get" => self.temperature_get().await,
            "speed.get" => self.speed_get().await,
            "charge_state.get" => self.charge_state_get().await,
            "security.get" => self.security_get().await,
            "telemetry.get" => self.telemetry_get(&params),

            // -- Trigger CRUD ----------------------------------------
            "trigger.create" => self.trigger_create(params),
            "trigger.delete" => self.trigger_delete(&params),
            "trigger.list" => Ok(self.trigger_list(None)),
            "trigger.poll" => Ok(self.trigger_poll()),

            // -- Trigger aliases -------------------------------------
            "cabin_temp.trigger" => {
                self.trigger_create(prefill(params, "InsideTemp", true)?)
            }
            "outside_temp.trigger" => {
                self.trigger_create(prefill(params, "OutsideTemp", true)?)
            }
            "battery.trigger" => self.trigger_create(prefill(params, "BatteryLevel", false)?),
            "location.trigger" => self.trigger_create(prefill(params, "Location", false)?),
            "cabin_temp.trigger.list" => Ok(self.trigger_list(Some("InsideTemp"))),
            "outside_temp.trigger.list" => Ok(self.trigger_list(Some("OutsideTemp"))),
            "battery.trigger.list" => Ok(self.trigger_list(Some("BatteryLevel"))),
            "location.trigger.list" => Ok(self.trigger_list(Some("Location"))),
            "cabin_temp.trigger.delete"
            | "outside_temp.trigger.delete"
            | "battery.trigger.delete"
            | "location.trigger.delete" => self.trigger_delete(&params),

            // -- Meta-dispatch ---------------------------------------
            "system.run" => self.system_run(params, depth).await,

            // -- Writes ----------------------------------------------
            _ => self.write(method, params).await,
        }
    }

    // -- Read handlers ----------------------------------------------------

    fn store_value(&self, field: &str) -> Option<FieldValue> {
        self.store.get(field).map(|snap| snap.value)
    }

    /// Cached VehicleData fallback for reads with no streamed value.
    async fn vehicle_data(&self) -> VlinkResult<Value> {
        let key = CacheKey::vin(&self.vin, "vehicle_data", json!({}));
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.value);
        }
        let data = self.fleet.vehicle_data(&self.vin, &[]).await?;
        self.cache.put(&key, &data, TtlTier::Default.duration())?;
        Ok(data)
    }

    async fn location_get(&self) -> VlinkResult<Value> {
        if let Some(FieldValue::Location(loc)) = self.store_value("Location") {
            return Ok(serde_json::to_value(loc)
                .map_err(|e| VlinkError::Internal(e.to_string()))?);
        }
        let data = self.vehicle_data().await?;
        let drive = &data["drive_state"];
        if drive.is_null() {
            return Ok(json!({ "available": false }));
        }
        Ok(json!({
            "latitude": drive["latitude"],
            "longitude": drive["longitude"],
            "heading": drive["heading"],
            "speed": drive["speed"],
        }))
    }

    async fn battery_get(&self) -> VlinkResult<Value> {
        let soc = self
            .store_value("Soc")
            .or_else(|| self.store_value("BatteryLevel"))
            .and_then(|v| v.as_f64());
        if let Some(level) = soc {
            let mut result = json!({ "battery_level": level });
            if let Some(range) = self.store_value("EstBatteryRange").and_then(|v| v.as_f64()) {
                result["range_miles"] = json!(range);
            }
            return Ok(result);
        }
        let data = self.vehicle_data().await?;
        let charge = &data["charge_state"];
        if charge.is_null() {
            return Ok(json!({ "available": false }));
        }
        Ok(json!({
            "battery_level": charge["battery_level"],
            "range_miles": charge["battery_range"],
        }))
    }

    async fn temperature_get(&self) -> VlinkResult<Value> {
        let inside = self.store_value("InsideTemp").and_then(|v| v.as_f64());
        let outside = self.store_value("OutsideTemp").and_then(|v| v.as_f64());
        if inside.is_some() || outside.is_some() {
            let mut result = json!({});
            if let Some(c) = inside {
                result["inside_temp_c"] = json!(c);
            }
            if let Some(c) = outside {
                result["outside_temp_c"] = json!(c);
            }
            return Ok(result);
        }
        let data = self.vehicle_data().await?;
        let climate = &data["climate_state"];
        if climate.is_null() {
            return Ok(json!({ "available": false }));
        }
        Ok(json!({
            "inside_temp_c": climate["inside_temp"],
            "outside_temp_c": climate["outside_temp"],
        }))
    }

    async fn speed_get(&self) -> VlinkResult<Value> {
        if let Some(speed) = self.store_value("VehicleSpeed").and_then(|v| v.as_f64()) {
            return Ok(json!({ "speed_mph": speed }));
        }
        let data = self.vehicle_data().await?;
        let drive = &data["drive_state"];
        if drive.is_null() {
            return Ok(json!({ "available": false }));
        }
        Ok(json!({ "speed_mph": drive["speed"] }))
    }

    async fn charge_state_get(&self) -> VlinkResult<Value> {
        let state = self
            .store_value("ChargeState")
            .or_else(|| self.store_value("DetailedChargeState"));
        if let Some(FieldValue::String(state)) = state {
            return Ok(json!({ "charge_state": state }));
        }
        let data = self.vehicle_data().await?;
        let charge = &data["charge_state"];
        if charge.is_null() {
            return Ok(json!({ "available": false }));
        }
        Ok(json!({ "charge_state": charge["charging_state"] }))
    }

    async fn security_get(&self) -> VlinkResult<Value> {
        let locked = self.store_value("Locked").and_then(|v| v.as_bool());
        let sentry = self.store_value("SentryMode").and_then(|v| v.as_bool());
        if locked.is_some() || sentry.is_some() {
            let mut result = json!({});
            if let Some(locked) = locked {
                result["locked"] = json!(locked);
            }
            if let Some(sentry) = sentry {
                result["sentry_mode"] = json!(sentry);
            }
            return Ok(result);
        }
        let data = self.vehicle_data().await?;
        let state = &data["vehicle_state"];
        if state.is_null() {
            return Ok(json!({ "available": false }));
        }
        Ok(json!({
            "locked": state["locked"],
            "sentry_mode": state["sentry_mode"],
        }))
    }

    fn telemetry_get(&self, params: &Value) -> VlinkResult<Value> {
        let field = params
            .get("field")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VlinkError::InvalidParams("telemetry.get requires 'field'".into()))?;
        match self.store_value(field) {
            Some(value) => Ok(json!({ "field": field, "value": value })),
            None => Ok(json!({ "field": field, "available": false })),
        }
    }

    // -- Trigger handlers -------------------------------------------------

    fn trigger_create(&self, params: Value) -> VlinkResult<Value> {
        let field = params
            .get("field")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VlinkError::InvalidParams("trigger.create requires 'field'".into()))?
            .to_string();
        let operator = params
            .get("operator")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                VlinkError::InvalidParams("trigger.create requires 'operator'".into())
            })
            .and_then(TriggerOperator::parse)?;
        let threshold = match params.get("value") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<Threshold>(raw.clone())
                    .map_err(|e| VlinkError::InvalidTrigger(format!("value: {e}")))?,
            ),
        };
        let request = TriggerRequest {
            field: field.clone(),
            operator,
            threshold,
            once: params.get("once").and_then(|v| v.as_bool()).unwrap_or(false),
            cooldown: std::time::Duration::from_secs_f64(
                params
                    .get("cooldown_seconds")
                    .and_then(|v| v.as_f64())
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .unwrap_or(60.0),
            ),
        };
        let created = self.triggers.create(request, now_ms())?;
        tracing::info!(id=%created.id, field=%created.field, operator=%created.operator.as_str(),
            "trigger created");

        let mut result = json!({
            "id": created.id,
            "field": created.field,
            "operator": created.operator.as_str(),
        });
        // Immediate evaluation against the latest stored value: the
        // caller learns the condition was already satisfied.
        if let Some(snapshot) = self.store.get(&field) {
            if self
                .triggers
                .evaluate_single(&created.id, &snapshot.value, now_ms())
                .is_some()
            {
                result["immediate"] = json!(true);
            }
        }
        Ok(result)
    }

    fn trigger_delete(&self, params: &Value) -> VlinkResult<Value> {
        let id = params
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VlinkError::InvalidParams("trigger.delete requires 'id'".into()))?;
        let deleted = self.triggers.delete(id);
        Ok(json!({ "deleted": deleted, "id": id }))
    }

    fn trigger_list(&self, field: Option<&str>) -> Value {
        let triggers = match field {
            Some(field) => self.triggers.list_for_field(field),
            None => self.triggers.list(),
        };
        let entries: Vec<Value> = triggers
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "field": t.field,
                    "operator": t.operator.as_str(),
                    "value": t.threshold,
                    "once": t.once,
                    "cooldown_seconds": t.cooldown.as_secs_f64(),
                })
            })
            .collect();
        json!({ "triggers": entries })
    }

    fn trigger_poll(&self) -> Value {
        let notifications = self.triggers.poll();
        json!({ "notifications": notifications })
    }

    // -- Meta-dispatch ----------------------------------------------------

    async fn system_run(&self, params: Value, depth: u8) -> VlinkResult<Value> {
        if depth >= 1 {
            return Err(VlinkError::InvalidParams(
                "system.run cannot nest".into(),
            ));
        }
        let raw = params
            .get("method")
            .or_else(|| params.get("command"))
            .cloned()
            .unwrap_or(Value::Null);
        // Some agents send ["door.lock"] instead of a plain string.
        let name = match &raw {
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => items
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .trim()
                .to_string(),
            _ => String::new(),
        };
        if name.is_empty() {
            return Err(VlinkError::InvalidParams(
                "system.run requires 'method' (or 'command')".into(),
            ));
        }
        let resolved = resolve_alias(&name);
        if resolved == "system.run" {
            return Err(VlinkError::InvalidParams(
                "system.run cannot invoke itself".into(),
            ));
        }
        tracing::info!(from=%name, to=%resolved, "system.run");
        let inner = params.get("params").cloned().unwrap_or_else(|| json!({}));
        self.dispatch_boxed(resolved, inner, depth + 1).await
    }

    // -- Write handlers ---------------------------------------------------

    async fn write(&self, method: &str, params: Value) -> VlinkResult<Value> {
        let (name, body) = match method {
            "door.lock" => ("door_lock", json!({})),
            "door.unlock" => ("door_unlock", json!({})),
            "climate.on" => ("auto_conditioning_start", json!({})),
            "climate.off" => ("auto_conditioning_stop", json!({})),
            "climate.set_temp" => {
                let temp = require_f64(&params, "temp", "climate.set_temp")?;
                (
                    "set_temps",
                    json!({ "driver_temp": temp, "passenger_temp": temp }),
                )
            }
            "climate.defrost" => {
                let on = params.get("on").and_then(|v| v.as_bool()).unwrap_or(true);
                (
                    "set_preconditioning_max",
                    json!({ "on": on, "manual_override": true }),
                )
            }
            "charge.start" => ("charge_start", json!({})),
            "charge.stop" => ("charge_stop", json!({})),
            "charge.set_limit" => {
                let percent = require_f64(&params, "percent", "charge.set_limit")? as i64;
                ("set_charge_limit", json!({ "percent": percent }))
            }
            "trunk.open" => ("actuate_trunk", json!({ "which_trunk": "rear" })),
            "frunk.open" => ("actuate_trunk", json!({ "which_trunk": "front" })),
            "flash_lights" => ("flash_lights", json!({})),
            "honk_horn" => ("honk_horn", json!({})),
            "sentry.on" => ("set_sentry_mode", json!({ "on": true })),
            "sentry.off" => ("set_sentry_mode", json!({ "on": false })),
            "nav.send" => {
                let address = params
                    .get("address")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        VlinkError::InvalidParams("nav.send requires 'address'".into())
                    })?;
                ("share", json!({ "address": address }))
            }
            "nav.gps" => {
                let lat = require_f64(&params, "lat", "nav.gps")?;
                let lon = require_f64(&params, "lon", "nav.gps")?;
                let mut body = json!({ "lat": lat, "lon": lon });
                if let Some(order) = params.get("order").and_then(|v| v.as_i64()) {
                    body["order"] = json!(order);
                }
                ("navigation_gps_request", body)
            }
            "nav.supercharger" => ("navigation_sc_request", json!({})),
            "nav.waypoints" => {
                let waypoints = params.get("waypoints").cloned().ok_or_else(|| {
                    VlinkError::InvalidParams("nav.waypoints requires 'waypoints'".into())
                })?;
                ("navigation_waypoints_request", json!({ "waypoints": waypoints }))
            }
            "homelink.trigger" => {
                let lat = require_f64(&params, "lat", "homelink.trigger")?;
                let lon = require_f64(&params, "lon", "homelink.trigger")?;
                ("trigger_homelink", json!({ "lat": lat, "lon": lon }))
            }
            other => return Err(VlinkError::UnknownMethod(other.to_string())),
        };

        // Writes against one VIN are serialized; the policy gates run
        // before any network I/O inside the router.
        let _guard = self.write_lock.lock().await;
        let response = self.router.execute(&self.vin, name, body).await?;
        Ok(json!({
            "result": response.result,
            "reason": if response.reason.is_empty() { "ok".to_string() } else { response.reason },
        }))
    }
}

fn require_f64(params: &Value, key: &str, method: &str) -> VlinkResult<f64> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| VlinkError::InvalidParams(format!("{method} requires '{key}'")))
}

/// Pre-fill the field for a convenience trigger alias. Temperature
/// aliases take their threshold in °F and store °C.
fn prefill(params: Value, field: &str, fahrenheit: bool) -> VlinkResult<Value> {
    let mut params = params;
    if !params.is_object() {
        params = json!({});
    }
    params["field"] = json!(field);
    if fahrenheit {
        if let Some(f) = params.get("value").and_then(|v| v.as_f64()) {
            params["value"] = json!(fahrenheit_to_celsius(f));
        }
    }
    Ok(params)
}
