//! Telemetry field → gateway event translation.
//!
//! Stateless: each passing field becomes one `req:agent` event payload,
//! or nothing for unmapped fields. Temperatures convert to Fahrenheit
//! on this outbound edge only; read handlers keep Celsius.

use serde_json::{json, Value};

use vlink_core::units::celsius_to_fahrenheit;
use vlink_core::value::FieldValue;

#[derive(Debug, Clone)]
pub struct EventEmitter {
    client_id: String,
}

impl EventEmitter {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        EventEmitter {
            client_id: client_id.into(),
        }
    }

    /// Convert one telemetry datum into a gateway event, or `None` for
    /// fields with no event mapping.
    #[must_use]
    pub fn to_event(
        &self,
        field: &str,
        value: &FieldValue,
        vin: &str,
        captured_at_ms: i64,
    ) -> Option<Value> {
        let (event_type, data) = build_payload(field, value)?;
        Some(json!({
            "method": "req:agent",
            "params": {
                "event_type": event_type,
                "source": self.client_id,
                "vin": vin,
                "timestamp_ms": captured_at_ms,
                "data": data,
            }
        }))
    }
}

fn build_payload(field: &str, value: &FieldValue) -> Option<(&'static str, Value)> {
    match field {
        "Location" => {
            let loc = value.as_location()?;
            let mut data = json!({
                "latitude": loc.latitude,
                "longitude": loc.longitude,
            });
            if let Some(heading) = loc.heading {
                data["heading"] = json!(heading);
            }
            if let Some(speed) = loc.speed {
                data["speed"] = json!(speed);
            }
            Some(("location", data))
        }
        "Soc" | "BatteryLevel" => {
            let level = value.as_f64()?;
            Some(("battery", json!({ "battery_level": level })))
        }
        "EstBatteryRange" => {
            let miles = value.as_f64()?;
            Some(("battery", json!({ "range_miles": miles })))
        }
        "InsideTemp" => {
            let c = value.as_f64()?;
            Some(("inside_temp", json!({ "inside_temp_f": celsius_to_fahrenheit(c) })))
        }
        "OutsideTemp" => {
            let c = value.as_f64()?;
            Some(("outside_temp", json!({ "outside_temp_f": celsius_to_fahrenheit(c) })))
        }
        "VehicleSpeed" => {
            let mph = value.as_f64()?;
            Some(("speed", json!({ "speed_mph": mph })))
        }
        "ChargeState" | "DetailedChargeState" => {
            let state = match value {
                FieldValue::String(s) => s.clone(),
                other => other.as_f64()?.to_string(),
            };
            Some((charge_event_type(&state), json!({ "state": state })))
        }
        "Locked" | "SentryMode" => Some((
            "security_changed",
            json!({
                "field": field.to_ascii_lowercase(),
                "value": value,
            }),
        )),
        "Gear" => {
            let gear = value.as_str()?;
            Some(("gear_changed", json!({ "gear": gear })))
        }
        _ => None,
    }
}

fn charge_event_type(state: &str) -> &'static str {
    let lower = state.to_ascii_lowercase();
    if lower.contains("charging") || lower == "starting" {
        "charge_started"
    } else if lower.contains("complete") {
        "charge_complete"
    } else if lower.contains("stopped") || lower.contains("disconnected") {
        "charge_stopped"
    } else {
        "charge_state_changed"
    }
}
