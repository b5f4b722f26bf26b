// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dual-gate emission filter.
//!
//! A field value reaches the event emitter only when both gates pass:
//!
//! 1. **Throttle gate** — a minimum interval since the last emission.
//! 2. **Delta gate** — the value moved beyond the field's granularity
//!    (haversine meters for `Location`, absolute difference for numeric
//!    scalars, inequality for booleans and strings).
//!
//! `granularity == 0` emits on any change. An optional staleness window
//! forces an emission through the delta gate when a field has been
//! silent too long (slow-moving numerics on a parked vehicle).

use std::collections::HashMap;
use std::time::Duration;

use crate::value::FieldValue;

/// Per-field filter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilterSpec {
    pub enabled: bool,
    /// Delta threshold; unit depends on the field (meters, percent,
    /// degrees). Zero means any change.
    pub granularity: f64,
    /// Minimum interval between emissions.
    pub throttle: Duration,
    /// Force an emission after this much silence, bypassing the delta
    /// gate. `None` disables the staleness override.
    pub max_silence: Option<Duration>,
}

impl FieldFilterSpec {
    #[must_use]
    pub fn new(granularity: f64, throttle: Duration) -> Self {
        FieldFilterSpec {
            enabled: true,
            granularity,
            throttle,
            max_silence: None,
        }
    }

    #[must_use]
    pub fn with_max_silence(mut self, max_silence: Duration) -> Self {
        self.max_silence = Some(max_silence);
        self
    }
}

/// Haversine distance in meters between two WGS-84 coordinates.
#[must_use]
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Value distance used by the delta gate.
#[must_use]
pub fn delta(old: &FieldValue, new: &FieldValue) -> f64 {
    match (old.as_location(), new.as_location()) {
        (Some(a), Some(b)) => {
            return haversine(a.latitude, a.longitude, b.latitude, b.longitude)
        }
        (None, None) => {}
        // Type changed under us; treat as maximally different.
        _ => return f64::INFINITY,
    }
    match (old.as_f64(), new.as_f64()) {
        (Some(a), Some(b)) => (b - a).abs(),
        _ => {
            if old == new {
                0.0
            } else {
                1.0
            }
        }
    }
}

#[derive(Debug, Clone)]
struct EmitState {
    value: FieldValue,
    emitted_at_ms: i64,
}

/// Stateful dual-gate filter over a set of field specs.
#[derive(Debug, Default)]
pub struct DualGateFilter {
    specs: HashMap<String, FieldFilterSpec>,
    fallback: Option<FieldFilterSpec>,
    state: HashMap<String, EmitState>,
}

impl DualGateFilter {
    #[must_use]
    pub fn new(specs: HashMap<String, FieldFilterSpec>) -> Self {
        DualGateFilter {
            specs,
            fallback: None,
            state: HashMap::new(),
        }
    }

    /// Apply `fallback` to fields without an explicit spec. Without a
    /// fallback, unconfigured fields never emit.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FieldFilterSpec) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Check the gates. Does not record; call [`Self::record_emit`]
    /// once the value actually went out.
    #[must_use]
    pub fn should_emit(&self, field: &str, value: &FieldValue, now_ms: i64) -> bool {
        let spec = match self.specs.get(field).or(self.fallback.as_ref()) {
            Some(spec) if spec.enabled => spec,
            _ => return false,
        };

        let Some(prev) = self.state.get(field) else {
            return true;
        };

        let since_last = now_ms.saturating_sub(prev.emitted_at_ms);
        if since_last < spec.throttle.as_millis() as i64 {
            return false;
        }

        if let Some(max_silence) = spec.max_silence {
            if since_last >= max_silence.as_millis() as i64 {
                return true;
            }
        }

        if spec.granularity == 0.0 {
            return *value != prev.value;
        }
        delta(&prev.value, value) >= spec.granularity
    }

    /// Record an emission after the value was delivered downstream.
    pub fn record_emit(&mut self, field: &str, value: &FieldValue, now_ms: i64) {
        self.state.insert(
            field.to_string(),
            EmitState {
                value: value.clone(),
                emitted_at_ms: now_ms,
            },
        );
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}
