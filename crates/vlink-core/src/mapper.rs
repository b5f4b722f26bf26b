//! Telemetry field → VehicleData path projection.
//!
//! Translates streamed field names (`"Soc"`, `"Location"`) into the
//! dotted VehicleData JSON paths the fleet REST responses use
//! (`"charge_state.usable_battery_level"`). The cache-warming sink uses
//! this to keep read responses fresh while telemetry is active.

use serde_json::{json, Map, Value};

use crate::value::FieldValue;

/// Value coercion applied before a projected write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Int,
    Float,
    Bool,
    Str,
    /// Gear enum → API `shift_state` letter.
    Gear,
    Latitude,
    Longitude,
}

/// One projection target for a telemetry field.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub path: &'static str,
    pub transform: Transform,
}

const fn m(path: &'static str, transform: Transform) -> FieldMapping {
    FieldMapping { path, transform }
}

/// Projection targets for a field name; empty for unmapped fields.
#[must_use]
pub fn mappings(field: &str) -> &'static [FieldMapping] {
    use Transform::*;
    match field {
        // charge_state
        "Soc" => { const V: [FieldMapping; 1] = [m("charge_state.usable_battery_level", Int)]; &V }
        "BatteryLevel" => { const V: [FieldMapping; 1] = [m("charge_state.battery_level", Int)]; &V }
        "ChargeState" => { const V: [FieldMapping; 1] = [m("charge_state.charging_state", Str)]; &V }
        "DetailedChargeState" => { const V: [FieldMapping; 1] = [m("charge_state.charge_port_latch", Str)]; &V }
        "EstBatteryRange" => { const V: [FieldMapping; 1] = [m("charge_state.est_battery_range", Float)]; &V }
        "IdealBatteryRange" => { const V: [FieldMapping; 1] = [m("charge_state.ideal_battery_range", Float)]; &V }
        "RatedRange" => { const V: [FieldMapping; 1] = [m("charge_state.battery_range", Float)]; &V }
        "ChargerVoltage" => { const V: [FieldMapping; 1] = [m("charge_state.charger_voltage", Int)]; &V }
        "ChargeAmps" => { const V: [FieldMapping; 1] = [m("charge_state.charge_amps", Int)]; &V }
        "ChargerPhases" => { const V: [FieldMapping; 1] = [m("charge_state.charger_phases", Int)]; &V }
        "ChargeLimitSoc" => { const V: [FieldMapping; 1] = [m("charge_state.charge_limit_soc", Int)]; &V }
        "ChargeCurrentRequest" => { const V: [FieldMapping; 1] = [m("charge_state.charge_current_request", Int)]; &V }
        "ChargeCurrentRequestMax" => { const V: [FieldMapping; 1] = [m("charge_state.charge_current_request_max", Int)]; &V }
        "ChargePortDoorOpen" => { const V: [FieldMapping; 1] = [m("charge_state.charge_port_door_open", Bool)]; &V }
        "ChargePortLatch" => { const V: [FieldMapping; 1] = [m("charge_state.charge_port_latch", Str)]; &V }
        "TimeToFullCharge" => { const V: [FieldMapping; 1] = [m("charge_state.time_to_full_charge", Float)]; &V }
        "ACChargingPower" => { const V: [FieldMapping; 1] = [m("charge_state.charger_power", Float)]; &V }
        "ACChargingEnergyIn" => { const V: [FieldMapping; 1] = [m("charge_state.charge_energy_added", Float)]; &V }
        "FastChargerPresent" => { const V: [FieldMapping; 1] = [m("charge_state.fast_charger_present", Bool)]; &V }
        "ScheduledChargingMode" => { const V: [FieldMapping; 1] = [m("charge_state.scheduled_charging_mode", Str)]; &V }
        "ScheduledChargingPending" => { const V: [FieldMapping; 1] = [m("charge_state.scheduled_charging_pending", Bool)]; &V }
        "ScheduledChargingStartTime" => { const V: [FieldMapping; 1] = [m("charge_state.scheduled_charging_start_time", Float)]; &V }
        "ScheduledDepartureTime" => { const V: [FieldMapping; 1] = [m("charge_state.scheduled_departure_time_minutes", Int)]; &V }
        "EnergyRemaining" => { const V: [FieldMapping; 1] = [m("charge_state.energy_remaining", Float)]; &V }
        "PackVoltage" => { const V: [FieldMapping; 1] = [m("charge_state.pack_voltage", Float)]; &V }
        "PackCurrent" => { const V: [FieldMapping; 1] = [m("charge_state.pack_current", Float)]; &V }
        "ChargingCableType" => { const V: [FieldMapping; 1] = [m("charge_state.conn_charge_cable", Str)]; &V }
        // climate_state
        "InsideTemp" => { const V: [FieldMapping; 1] = [m("climate_state.inside_temp", Float)]; &V }
        "OutsideTemp" => { const V: [FieldMapping; 1] = [m("climate_state.outside_temp", Float)]; &V }
        "HvacLeftTemperatureRequest" => { const V: [FieldMapping; 1] = [m("climate_state.driver_temp_setting", Float)]; &V }
        "HvacRightTemperatureRequest" => { const V: [FieldMapping; 1] = [m("climate_state.passenger_temp_setting", Float)]; &V }
        "HvacPower" => { const V: [FieldMapping; 1] = [m("climate_state.is_climate_on", Bool)]; &V }
        "HvacFanStatus" => { const V: [FieldMapping; 1] = [m("climate_state.fan_status", Int)]; &V }
        "SeatHeaterLeft" => { const V: [FieldMapping; 1] = [m("climate_state.seat_heater_left", Int)]; &V }
        "SeatHeaterRight" => { const V: [FieldMapping; 1] = [m("climate_state.seat_heater_right", Int)]; &V }
        "SeatHeaterRearLeft" => { const V: [FieldMapping; 1] = [m("climate_state.seat_heater_rear_left", Int)]; &V }
        "SeatHeaterRearCenter" => { const V: [FieldMapping; 1] = [m("climate_state.seat_heater_rear_center", Int)]; &V }
        "SeatHeaterRearRight" => { const V: [FieldMapping; 1] = [m("climate_state.seat_heater_rear_right", Int)]; &V }
        "HvacSteeringWheelHeatLevel" => { const V: [FieldMapping; 1] = [m("climate_state.steering_wheel_heater", Bool)]; &V }
        "DefrostMode" => { const V: [FieldMapping; 1] = [m("climate_state.defrost_mode", Int)]; &V }
        "CabinOverheatProtectionMode" => { const V: [FieldMapping; 1] = [m("climate_state.cabin_overheat_protection", Str)]; &V }
        "PreconditioningEnabled" => { const V: [FieldMapping; 1] = [m("climate_state.is_preconditioning", Bool)]; &V }
        // drive_state
        "Location" => { const V: [FieldMapping; 2] = [m("drive_state.latitude", Latitude), m("drive_state.longitude", Longitude),]; &V }
        "VehicleSpeed" => { const V: [FieldMapping; 1] = [m("drive_state.speed", Int)]; &V }
        "GpsHeading" => { const V: [FieldMapping; 1] = [m("drive_state.heading", Int)]; &V }
        "Gear" => { const V: [FieldMapping; 1] = [m("drive_state.shift_state", Gear)]; &V }
        // vehicle_state
        "Locked" => { const V: [FieldMapping; 1] = [m("vehicle_state.locked", Bool)]; &V }
        "SentryMode" => { const V: [FieldMapping; 1] = [m("vehicle_state.sentry_mode", Bool)]; &V }
        "Odometer" => { const V: [FieldMapping; 1] = [m("vehicle_state.odometer", Float)]; &V }
        "Version" => { const V: [FieldMapping; 1] = [m("vehicle_state.car_version", Str)]; &V }
        "ValetModeEnabled" => { const V: [FieldMapping; 1] = [m("vehicle_state.valet_mode", Bool)]; &V }
        "TpmsPressureFl" => { const V: [FieldMapping; 1] = [m("vehicle_state.tpms_pressure_fl", Float)]; &V }
        "TpmsPressureFr" => { const V: [FieldMapping; 1] = [m("vehicle_state.tpms_pressure_fr", Float)]; &V }
        "TpmsPressureRl" => { const V: [FieldMapping; 1] = [m("vehicle_state.tpms_pressure_rl", Float)]; &V }
        "TpmsPressureRr" => { const V: [FieldMapping; 1] = [m("vehicle_state.tpms_pressure_rr", Float)]; &V }
        "CenterDisplay" => { const V: [FieldMapping; 1] = [m("vehicle_state.center_display_state", Int)]; &V }
        "HomelinkNearby" => { const V: [FieldMapping; 1] = [m("vehicle_state.homelink_nearby", Bool)]; &V }
        "DriverSeatOccupied" => { const V: [FieldMapping; 1] = [m("vehicle_state.is_user_present", Bool)]; &V }
        "RemoteStartEnabled" => { const V: [FieldMapping; 1] = [m("vehicle_state.remote_start", Bool)]; &V }

        _ => &[],
    }
}

fn apply(transform: Transform, value: &FieldValue) -> Option<Value> {
    match transform {
        Transform::Int => value.as_f64().map(|v| json!(v as i64)),
        Transform::Float => value.as_f64().map(|v| json!(v)),
        Transform::Bool => match value {
            FieldValue::Bool(b) => Some(json!(b)),
            FieldValue::Int(i) => Some(json!(*i != 0)),
            FieldValue::Float(f) => Some(json!(*f != 0.0)),
            FieldValue::String(s) => Some(json!(matches!(
                s.to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            ))),
            FieldValue::Location(_) => None,
        },
        Transform::Str => match value {
            FieldValue::String(s) => Some(json!(s)),
            FieldValue::Bool(b) => Some(json!(b.to_string())),
            FieldValue::Int(i) => Some(json!(i.to_string())),
            FieldValue::Float(f) => Some(json!(f.to_string())),
            FieldValue::Location(_) => None,
        },
        Transform::Gear => {
            let s = value.as_str()?;
            let mapped = match s {
                "P" | "Park" => "P",
                "R" | "Reverse" => "R",
                "N" | "Neutral" => "N",
                "D" | "Drive" | "DriveSport" => "D",
                other => other,
            };
            if mapped.is_empty() {
                None
            } else {
                Some(json!(mapped))
            }
        }
        Transform::Latitude => value.as_location().map(|loc| json!(loc.latitude)),
        Transform::Longitude => value.as_location().map(|loc| json!(loc.longitude)),
    }
}

/// Stateless mapper from telemetry fields to VehicleData writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryMapper;

impl TelemetryMapper {
    /// Project one field update to zero or more `(path, value)` writes.
    #[must_use]
    pub fn map(&self, field: &str, value: &FieldValue) -> Vec<(&'static str, Value)> {
        mappings(field)
            .iter()
            .filter_map(|mapping| apply(mapping.transform, value).map(|v| (mapping.path, v)))
            .collect()
    }
}

/// Set a value at a dotted path, creating intermediate objects.
pub fn deep_set(target: &mut Value, dotted_path: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let mut current = target;
    let mut parts = dotted_path.split('.').peekable();
    while let Some(key) = parts.next() {
        let obj = match current.as_object_mut() {
            Some(obj) => obj,
            None => return,
        };
        if parts.peek().is_none() {
            obj.insert(key.to_string(), value);
            return;
        }
        let entry = obj
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key-wise;
/// everything else overwrites.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
