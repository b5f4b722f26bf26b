// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Decoded telemetry values and frames.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{VlinkError, VlinkResult};
use crate::fields;
use vlink_protocol::flatbuf;
use vlink_protocol::vehicle::{value::Kind, Payload};

/// Geographic position with optional motion data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// One telemetry field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Location(Location),
}

impl FieldValue {
    /// Numeric view for threshold comparisons; `None` for strings,
    /// booleans and locations.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_location(&self) -> Option<&Location> {
        match self {
            FieldValue::Location(loc) => Some(loc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// One decoded telemetry push. Immutable after production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub vin: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub captured_at_ms: i64,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub is_resend: bool,
}

impl TelemetryFrame {
    /// Decode a raw WebSocket message: protobuf by default, FlatBuffer
    /// when the `TLFB` identifier is present. `received_at_ms` stands in
    /// when the payload carries no capture timestamp.
    pub fn decode(raw: &[u8], received_at_ms: i64) -> VlinkResult<Self> {
        let payload = if flatbuf::is_flatbuf(raw) {
            flatbuf::decode_payload(raw).map_err(|e| VlinkError::Decode(e.to_string()))?
        } else {
            <Payload as prost::Message>::decode(raw)
                .map_err(|e| VlinkError::Decode(e.to_string()))?
        };
        Ok(Self::from_payload(&payload, received_at_ms))
    }

    /// Normalize a decoded payload into a frame. Unknown field ids keep
    /// a synthetic `Unknown(id)` name so downstream counters still see
    /// them; unit values pass through in raw API units.
    #[must_use]
    pub fn from_payload(payload: &Payload, received_at_ms: i64) -> Self {
        let captured_at_ms = payload
            .created_at
            .as_ref()
            .map(|ts| ts.seconds * 1000 + i64::from(ts.nanos) / 1_000_000)
            .unwrap_or(received_at_ms);

        let mut fields = BTreeMap::new();
        for datum in &payload.data {
            let Some(kind) = datum.value.as_ref().and_then(|v| v.kind.as_ref()) else {
                continue;
            };
            let id = u16::try_from(datum.key).unwrap_or(0);
            let name = fields::field_name(id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Unknown({})", datum.key));
            fields.insert(name, normalize(kind));
        }

        TelemetryFrame {
            vin: payload.vin.clone(),
            captured_at_ms,
            fields,
            is_resend: payload.is_resend,
        }
    }
}

fn normalize(kind: &Kind) -> FieldValue {
    match kind {
        Kind::StringValue(s) => FieldValue::String(s.clone()),
        Kind::IntValue(v) => FieldValue::Int(i64::from(*v)),
        Kind::LongValue(v) => FieldValue::Int(*v),
        Kind::FloatValue(v) => FieldValue::Float(f64::from(*v)),
        Kind::DoubleValue(v) => FieldValue::Float(*v),
        Kind::BooleanValue(v) => FieldValue::Bool(*v),
        Kind::LocationValue(loc) => FieldValue::Location(Location {
            latitude: loc.latitude,
            longitude: loc.longitude,
            heading: loc.heading,
            speed: loc.speed,
        }),
    }
}
