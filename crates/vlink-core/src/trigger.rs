// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trigger registry and evaluation engine.
//!
//! Agents register conditions over telemetry fields and receive a
//! notification when a condition fires. Delivery is dual-channel: every
//! notification lands in a bounded pending deque (drained by `poll`)
//! and, when a push sink is registered, is handed to it as well.
//!
//! Geofence operators fire on boundary *crossings* only. The runtime
//! tracks `was_inside` as a tri-state (unknown / inside / outside); the
//! first observation seeds the state and never fires, regardless of
//! which side of the fence it lands on.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{VlinkError, VlinkResult};
use crate::filter::haversine;
use crate::value::FieldValue;
use crate::TelemetryFrame;

/// Registry capacity.
pub const MAX_TRIGGERS: usize = 100;

/// Pending-notification deque capacity; oldest entries drop on overflow.
pub const MAX_PENDING: usize = 500;

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOperator {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
    Changed,
    Enter,
    Leave,
}

impl TriggerOperator {
    #[must_use]
    pub const fn is_geofence(self) -> bool {
        matches!(self, TriggerOperator::Enter | TriggerOperator::Leave)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TriggerOperator::Lt => "lt",
            TriggerOperator::Gt => "gt",
            TriggerOperator::Lte => "lte",
            TriggerOperator::Gte => "gte",
            TriggerOperator::Eq => "eq",
            TriggerOperator::Neq => "neq",
            TriggerOperator::Changed => "changed",
            TriggerOperator::Enter => "enter",
            TriggerOperator::Leave => "leave",
        }
    }

    pub fn parse(raw: &str) -> VlinkResult<Self> {
        match raw {
            "lt" => Ok(TriggerOperator::Lt),
            "gt" => Ok(TriggerOperator::Gt),
            "lte" => Ok(TriggerOperator::Lte),
            "gte" => Ok(TriggerOperator::Gte),
            "eq" => Ok(TriggerOperator::Eq),
            "neq" => Ok(TriggerOperator::Neq),
            "changed" => Ok(TriggerOperator::Changed),
            "enter" => Ok(TriggerOperator::Enter),
            "leave" => Ok(TriggerOperator::Leave),
            other => Err(VlinkError::InvalidTrigger(format!(
                "unknown operator '{other}'"
            ))),
        }
    }
}

/// Circular geofence region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

impl Geofence {
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        haversine(latitude, longitude, self.latitude, self.longitude) <= self.radius_m
    }
}

/// Trigger threshold: a scalar comparand or a geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Geofence(Geofence),
    Scalar(FieldValue),
}

mod cooldown_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("cooldown must be non-negative"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Parameters for registering a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub field: String,
    pub operator: TriggerOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default)]
    pub once: bool,
    #[serde(
        rename = "cooldown_seconds",
        with = "cooldown_secs",
        default = "default_cooldown"
    )]
    pub cooldown: Duration,
}

fn default_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

/// A registered trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Server-assigned 12-hex-char id.
    pub id: String,
    pub field: String,
    pub operator: TriggerOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default)]
    pub once: bool,
    #[serde(
        rename = "cooldown_seconds",
        with = "cooldown_secs",
        default = "default_cooldown"
    )]
    pub cooldown: Duration,
    pub created_at_ms: i64,
}

/// Emitted once per firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerNotification {
    pub trigger_id: String,
    pub field: String,
    pub operator: TriggerOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    pub value: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<FieldValue>,
    pub fired_at_ms: i64,
    pub vin: String,
}

#[derive(Debug, Default, Clone)]
struct TriggerRuntime {
    last_fired_at_ms: Option<i64>,
    previous_value: Option<FieldValue>,
    was_inside: Option<bool>,
}

#[derive(Default)]
struct Inner {
    triggers: HashMap<String, TriggerDefinition>,
    field_index: HashMap<String, Vec<String>>,
    runtime: HashMap<String, TriggerRuntime>,
    pending: VecDeque<TriggerNotification>,
    dropped: u64,
}

type PushSink = Box<dyn Fn(&TriggerNotification) + Send + Sync>;

/// Trigger lifecycle and evaluation, serialized by one internal mutex.
pub struct TriggerEngine {
    vin: String,
    inner: Mutex<Inner>,
    push: Mutex<Option<PushSink>>,
}

impl TriggerEngine {
    #[must_use]
    pub fn new(vin: impl Into<String>) -> Self {
        TriggerEngine {
            vin: vin.into(),
            inner: Mutex::new(Inner::default()),
            push: Mutex::new(None),
        }
    }

    /// Register a push sink invoked for every notification while set.
    pub fn set_push_sink(&self, sink: PushSink) {
        *self.push.lock() = Some(sink);
    }

    pub fn clear_push_sink(&self) {
        *self.push.lock() = None;
    }

    /// Validate and register a trigger; returns the stored definition.
    pub fn create(&self, req: TriggerRequest, now_ms: i64) -> VlinkResult<TriggerDefinition> {
        validate(&req)?;
        let mut inner = self.inner.lock();
        if inner.triggers.len() >= MAX_TRIGGERS {
            return Err(VlinkError::TriggerLimit(MAX_TRIGGERS));
        }

        let mut id = new_trigger_id();
        while inner.triggers.contains_key(&id) {
            id = new_trigger_id();
        }

        let def = TriggerDefinition {
            id: id.clone(),
            field: req.field,
            operator: req.operator,
            threshold: req.threshold,
            once: req.once,
            cooldown: req.cooldown,
            created_at_ms: now_ms,
        };
        inner
            .field_index
            .entry(def.field.clone())
            .or_default()
            .push(id.clone());
        inner.runtime.insert(id.clone(), TriggerRuntime::default());
        inner.triggers.insert(id, def.clone());
        Ok(def)
    }

    /// Remove a trigger. `true` if it existed.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        remove_locked(&mut inner, id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<TriggerDefinition> {
        let inner = self.inner.lock();
        let mut out: Vec<_> = inner.triggers.values().cloned().collect();
        out.sort_by_key(|t| (t.created_at_ms, t.id.clone()));
        out
    }

    #[must_use]
    pub fn list_for_field(&self, field: &str) -> Vec<TriggerDefinition> {
        self.list().into_iter().filter(|t| t.field == field).collect()
    }

    /// Drain the pending notification deque.
    #[must_use]
    pub fn poll(&self) -> Vec<TriggerNotification> {
        let mut inner = self.inner.lock();
        inner.pending.drain(..).collect()
    }

    /// Notifications dropped to the deque bound so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Evaluate every field of a frame against its registered triggers.
    pub fn evaluate_frame(&self, frame: &TelemetryFrame) {
        for (field, value) in &frame.fields {
            self.evaluate_field(field, value, frame.captured_at_ms);
        }
    }

    /// Evaluate all triggers indexed under `field`.
    pub fn evaluate_field(&self, field: &str, value: &FieldValue, now_ms: i64) {
        let fired = {
            let mut inner = self.inner.lock();
            let Some(ids) = inner.field_index.get(field).cloned() else {
                return;
            };
            let mut fired = Vec::new();
            for id in ids {
                if let Some(notification) =
                    evaluate_one(&mut inner, &id, value, now_ms, &self.vin)
                {
                    enqueue(&mut inner, notification.clone());
                    fired.push(notification);
                }
            }
            fired
        };
        // Push outside the registry lock: the sink may re-enter the engine.
        for notification in &fired {
            if let Some(sink) = self.push.lock().as_ref() {
                sink(notification);
            }
        }
    }

    /// Evaluate one trigger immediately (used at creation against the
    /// latest stored value). Returns the notification if it fired.
    pub fn evaluate_single(
        &self,
        id: &str,
        value: &FieldValue,
        now_ms: i64,
    ) -> Option<TriggerNotification> {
        let notification = {
            let mut inner = self.inner.lock();
            let notification = evaluate_one(&mut inner, id, value, now_ms, &self.vin)?;
            enqueue(&mut inner, notification.clone());
            notification
        };
        if let Some(sink) = self.push.lock().as_ref() {
            sink(&notification);
        }
        Some(notification)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().triggers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().triggers.is_empty()
    }
}

fn enqueue(inner: &mut Inner, notification: TriggerNotification) {
    if inner.pending.len() >= MAX_PENDING {
        inner.pending.pop_front();
        inner.dropped += 1;
    }
    inner.pending.push_back(notification);
}

fn remove_locked(inner: &mut Inner, id: &str) -> bool {
    let Some(def) = inner.triggers.remove(id) else {
        return false;
    };
    if let Some(ids) = inner.field_index.get_mut(&def.field) {
        ids.retain(|other| other != id);
        if ids.is_empty() {
            inner.field_index.remove(&def.field);
        }
    }
    inner.runtime.remove(id);
    true
}

fn validate(req: &TriggerRequest) -> VlinkResult<()> {
    if req.field.is_empty() {
        return Err(VlinkError::InvalidTrigger("field is required".into()));
    }
    match req.operator {
        TriggerOperator::Changed => {
            if req.threshold.is_some() {
                return Err(VlinkError::InvalidTrigger(
                    "'changed' takes no threshold value".into(),
                ));
            }
        }
        TriggerOperator::Enter | TriggerOperator::Leave => match req.threshold {
            Some(Threshold::Geofence(geofence)) => {
                if !(geofence.radius_m > 0.0) {
                    return Err(VlinkError::InvalidTrigger(
                        "geofence radius_m must be positive".into(),
                    ));
                }
            }
            _ => {
                return Err(VlinkError::InvalidTrigger(format!(
                    "'{}' requires a geofence threshold (latitude, longitude, radius_m)",
                    req.operator.as_str()
                )))
            }
        },
        _ => match req.threshold {
            Some(Threshold::Scalar(_)) => {}
            _ => {
                return Err(VlinkError::InvalidTrigger(format!(
                    "'{}' requires a scalar threshold",
                    req.operator.as_str()
                )))
            }
        },
    }
    Ok(())
}

fn evaluate_one(
    inner: &mut Inner,
    id: &str,
    value: &FieldValue,
    now_ms: i64,
    vin: &str,
) -> Option<TriggerNotification> {
    let def = inner.triggers.get(id)?.clone();
    let runtime = inner.runtime.entry(id.to_string()).or_default();

    let previous_value = runtime.previous_value.clone();
    let matched = if def.operator.is_geofence() {
        matches_geofence(&def, runtime, value)
    } else {
        matches_scalar(&def, previous_value.as_ref(), value)
    };
    runtime.previous_value = Some(value.clone());

    if !matched {
        return None;
    }

    // Cooldown applies only to persistent triggers.
    if !def.once {
        if let Some(last) = runtime.last_fired_at_ms {
            if now_ms.saturating_sub(last) < def.cooldown.as_millis() as i64 {
                return None;
            }
        }
    }
    runtime.last_fired_at_ms = Some(now_ms);

    let notification = TriggerNotification {
        trigger_id: def.id.clone(),
        field: def.field.clone(),
        operator: def.operator,
        threshold: def.threshold.clone(),
        value: value.clone(),
        previous_value,
        fired_at_ms: now_ms,
        vin: vin.to_string(),
    };

    if def.once {
        remove_locked(inner, id);
    }
    Some(notification)
}

fn matches_scalar(
    def: &TriggerDefinition,
    previous: Option<&FieldValue>,
    value: &FieldValue,
) -> bool {
    match def.operator {
        TriggerOperator::Changed => match previous {
            Some(prev) => !values_equal(prev, value),
            None => false,
        },
        TriggerOperator::Eq | TriggerOperator::Neq => {
            let Some(Threshold::Scalar(threshold)) = &def.threshold else {
                return false;
            };
            let equal = values_equal(threshold, value);
            if def.operator == TriggerOperator::Eq {
                equal
            } else {
                !equal
            }
        }
        TriggerOperator::Lt | TriggerOperator::Gt | TriggerOperator::Lte | TriggerOperator::Gte => {
            let Some(Threshold::Scalar(threshold)) = &def.threshold else {
                return false;
            };
            let (Some(v), Some(t)) = (value.as_f64(), threshold.as_f64()) else {
                return false;
            };
            match def.operator {
                TriggerOperator::Lt => v < t,
                TriggerOperator::Gt => v > t,
                TriggerOperator::Lte => v <= t,
                TriggerOperator::Gte => v >= t,
                _ => false,
            }
        }
        TriggerOperator::Enter | TriggerOperator::Leave => false,
    }
}

fn matches_geofence(
    def: &TriggerDefinition,
    runtime: &mut TriggerRuntime,
    value: &FieldValue,
) -> bool {
    let Some(Threshold::Geofence(fence)) = &def.threshold else {
        return false;
    };
    let Some(location) = value.as_location() else {
        return false;
    };
    let inside = fence.contains(location.latitude, location.longitude);
    let fired = match (def.operator, runtime.was_inside) {
        (TriggerOperator::Enter, Some(false)) => inside,
        (TriggerOperator::Leave, Some(true)) => !inside,
        // First observation only seeds the state.
        _ => false,
    };
    runtime.was_inside = Some(inside);
    fired
}

fn values_equal(a: &FieldValue, b: &FieldValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn new_trigger_id() -> String {
    let bytes: [u8; 6] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Location;

    fn loc(lat: f64, lon: f64) -> FieldValue {
        FieldValue::Location(Location {
            latitude: lat,
            longitude: lon,
            heading: None,
            speed: None,
        })
    }

    fn scalar_req(field: &str, operator: TriggerOperator, threshold: f64) -> TriggerRequest {
        TriggerRequest {
            field: field.to_string(),
            operator,
            threshold: Some(Threshold::Scalar(FieldValue::Float(threshold))),
            once: false,
            cooldown: Duration::ZERO,
        }
    }

    #[test]
    fn ids_are_twelve_hex_chars() {
        let engine = TriggerEngine::new("VIN");
        let def = engine
            .create(scalar_req("Soc", TriggerOperator::Lt, 20.0), 0)
            .unwrap();
        assert_eq!(def.id.len(), 12);
        assert!(def.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn low_battery_one_shot_scenario() {
        let engine = TriggerEngine::new("5YJ3E1EA1NF000000");
        let mut req = scalar_req("BatteryLevel", TriggerOperator::Lt, 20.0);
        req.once = true;
        let def = engine.create(req, 0).unwrap();

        engine.evaluate_field("BatteryLevel", &FieldValue::Int(25), 1_000);
        assert!(engine.poll().is_empty());

        engine.evaluate_field("BatteryLevel", &FieldValue::Int(18), 2_000);
        let notifications = engine.poll();
        assert_eq!(notifications.len(), 1);
        let n = &notifications[0];
        assert_eq!(n.trigger_id, def.id);
        assert_eq!(
            n.threshold,
            Some(Threshold::Scalar(FieldValue::Float(20.0)))
        );
        assert_eq!(n.value, FieldValue::Int(18));
        assert_eq!(n.previous_value, Some(FieldValue::Int(25)));
        assert_eq!(n.vin, "5YJ3E1EA1NF000000");

        // One-shot: removed after firing, never fires again.
        assert!(engine.list().is_empty());
        engine.evaluate_field("BatteryLevel", &FieldValue::Int(10), 3_000);
        assert!(engine.poll().is_empty());
    }

    #[test]
    fn geofence_leave_requires_crossing() {
        let engine = TriggerEngine::new("VIN");
        engine
            .create(
                TriggerRequest {
                    field: "Location".to_string(),
                    operator: TriggerOperator::Leave,
                    threshold: Some(Threshold::Geofence(Geofence {
                        latitude: 37.7749,
                        longitude: -122.4194,
                        radius_m: 200.0,
                    })),
                    once: false,
                    cooldown: Duration::ZERO,
                },
                0,
            )
            .unwrap();

        // First observation inside: seeds state, no fire.
        engine.evaluate_field("Location", &loc(37.7749, -122.4194), 1_000);
        assert!(engine.poll().is_empty());

        // ~567 m north: crossing out fires a leave.
        engine.evaluate_field("Location", &loc(37.7800, -122.4194), 2_000);
        let fired = engine.poll();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].operator, TriggerOperator::Leave);
    }

    #[test]
    fn geofence_enter_never_fires_on_first_inside_observation() {
        let engine = TriggerEngine::new("VIN");
        engine
            .create(
                TriggerRequest {
                    field: "Location".to_string(),
                    operator: TriggerOperator::Enter,
                    threshold: Some(Threshold::Geofence(Geofence {
                        latitude: 37.7749,
                        longitude: -122.4194,
                        radius_m: 200.0,
                    })),
                    once: false,
                    cooldown: Duration::ZERO,
                },
                0,
            )
            .unwrap();

        engine.evaluate_field("Location", &loc(37.7749, -122.4194), 1_000);
        assert!(engine.poll().is_empty(), "already-inside must not fire");

        // Out, then back in: that is a crossing.
        engine.evaluate_field("Location", &loc(37.7800, -122.4194), 2_000);
        assert!(engine.poll().is_empty());
        engine.evaluate_field("Location", &loc(37.7749, -122.4194), 3_000);
        let fired = engine.poll();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].operator, TriggerOperator::Enter);
    }

    #[test]
    fn cooldown_suppresses_refiring() {
        let engine = TriggerEngine::new("VIN");
        let mut req = scalar_req("Soc", TriggerOperator::Lt, 50.0);
        req.cooldown = Duration::from_secs(60);
        engine.create(req, 0).unwrap();

        engine.evaluate_field("Soc", &FieldValue::Int(40), 0);
        assert_eq!(engine.poll().len(), 1);

        engine.evaluate_field("Soc", &FieldValue::Int(39), 30_000);
        assert!(engine.poll().is_empty(), "inside cooldown window");

        engine.evaluate_field("Soc", &FieldValue::Int(38), 60_000);
        assert_eq!(engine.poll().len(), 1);
    }

    #[test]
    fn changed_skips_first_observation() {
        let engine = TriggerEngine::new("VIN");
        engine
            .create(
                TriggerRequest {
                    field: "Gear".to_string(),
                    operator: TriggerOperator::Changed,
                    threshold: None,
                    once: false,
                    cooldown: Duration::ZERO,
                },
                0,
            )
            .unwrap();

        engine.evaluate_field("Gear", &FieldValue::String("P".into()), 1);
        assert!(engine.poll().is_empty());
        engine.evaluate_field("Gear", &FieldValue::String("P".into()), 2);
        assert!(engine.poll().is_empty());
        engine.evaluate_field("Gear", &FieldValue::String("D".into()), 3);
        assert_eq!(engine.poll().len(), 1);
    }

    #[test]
    fn validation_rules() {
        let engine = TriggerEngine::new("VIN");
        // changed with a threshold
        let err = engine
            .create(
                TriggerRequest {
                    field: "Gear".into(),
                    operator: TriggerOperator::Changed,
                    threshold: Some(Threshold::Scalar(FieldValue::Int(1))),
                    once: false,
                    cooldown: Duration::ZERO,
                },
                0,
            )
            .unwrap_err();
        assert_eq!(err.code(), "InvalidTrigger");

        // geofence op with scalar threshold
        let err = engine
            .create(scalar_req("Location", TriggerOperator::Enter, 1.0), 0)
            .unwrap_err();
        assert_eq!(err.code(), "InvalidTrigger");

        // numeric op with no threshold
        let err = engine
            .create(
                TriggerRequest {
                    field: "Soc".into(),
                    operator: TriggerOperator::Lt,
                    threshold: None,
                    once: false,
                    cooldown: Duration::ZERO,
                },
                0,
            )
            .unwrap_err();
        assert_eq!(err.code(), "InvalidTrigger");
    }

    #[test]
    fn duplicate_conditions_fire_independently() {
        let engine = TriggerEngine::new("VIN");
        engine
            .create(scalar_req("Soc", TriggerOperator::Lt, 50.0), 0)
            .unwrap();
        engine
            .create(scalar_req("Soc", TriggerOperator::Lt, 50.0), 0)
            .unwrap();
        engine.evaluate_field("Soc", &FieldValue::Int(40), 1_000);
        assert_eq!(engine.poll().len(), 2);
    }

    #[test]
    fn limit_enforced() {
        let engine = TriggerEngine::new("VIN");
        for _ in 0..MAX_TRIGGERS {
            engine
                .create(scalar_req("Soc", TriggerOperator::Lt, 10.0), 0)
                .unwrap();
        }
        let err = engine
            .create(scalar_req("Soc", TriggerOperator::Lt, 10.0), 0)
            .unwrap_err();
        assert_eq!(err.code(), "TriggerLimit");
    }

    #[test]
    fn pending_deque_drops_oldest() {
        let engine = TriggerEngine::new("VIN");
        engine
            .create(scalar_req("Soc", TriggerOperator::Gt, 0.0), 0)
            .unwrap();
        for i in 0..(MAX_PENDING as i64 + 10) {
            engine.evaluate_field("Soc", &FieldValue::Int(i + 1), i);
        }
        assert_eq!(engine.dropped(), 10);
        let pending = engine.poll();
        assert_eq!(pending.len(), MAX_PENDING);
        // Oldest 10 were evicted.
        assert_eq!(pending[0].value, FieldValue::Int(11));
    }

    #[test]
    fn push_sink_sees_notifications() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let engine = TriggerEngine::new("VIN");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        engine.set_push_sink(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        engine
            .create(scalar_req("Soc", TriggerOperator::Lt, 50.0), 0)
            .unwrap();
        engine.evaluate_field("Soc", &FieldValue::Int(40), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Deque delivery still happens alongside the push.
        assert_eq!(engine.poll().len(), 1);
    }

    #[test]
    fn immediate_evaluation_at_creation() {
        let engine = TriggerEngine::new("VIN");
        let mut req = scalar_req("InsideTemp", TriggerOperator::Gte, 30.0);
        req.once = true;
        let def = engine.create(req, 0).unwrap();
        let fired = engine.evaluate_single(&def.id, &FieldValue::Float(35.0), 1_000);
        assert!(fired.is_some());
        assert!(engine.list().is_empty());
    }

    #[test]
    fn definition_serde_round_trip() {
        let def = TriggerDefinition {
            id: "a1b2c3d4e5f6".into(),
            field: "BatteryLevel".into(),
            operator: TriggerOperator::Lt,
            threshold: Some(Threshold::Scalar(FieldValue::Int(20))),
            once: true,
            cooldown: Duration::from_secs(60),
            created_at_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&def).unwrap();
        let back: TriggerDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);

        let geo = TriggerDefinition {
            operator: TriggerOperator::Enter,
            threshold: Some(Threshold::Geofence(Geofence {
                latitude: 37.0,
                longitude: -122.0,
                radius_m: 100.0,
            })),
            ..def
        };
        let json = serde_json::to_string(&geo).unwrap();
        let back: TriggerDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, geo);
    }
}
