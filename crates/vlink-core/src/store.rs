//! Latest-value store for decoded telemetry.
//!
//! Written by the fanout's store sink, read concurrently by the command
//! dispatcher. Per-field timestamps are monotonic: a stale frame still
//! merges its value, but the recorded timestamp never goes backwards.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::value::FieldValue;

/// A field's most recent observation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    pub value: FieldValue,
    pub updated_at_ms: i64,
}

/// Single-writer / multi-reader map of latest field values.
#[derive(Debug, Default)]
pub struct LatestStore {
    inner: RwLock<HashMap<String, FieldSnapshot>>,
}

impl LatestStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one field observation. The value always wins; the
    /// timestamp only moves forward.
    pub fn update(&self, field: &str, value: FieldValue, observed_at_ms: i64) {
        let mut inner = self.inner.write();
        match inner.get_mut(field) {
            Some(snap) => {
                snap.value = value;
                if observed_at_ms > snap.updated_at_ms {
                    snap.updated_at_ms = observed_at_ms;
                }
            }
            None => {
                inner.insert(
                    field.to_string(),
                    FieldSnapshot {
                        value,
                        updated_at_ms: observed_at_ms,
                    },
                );
            }
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<FieldSnapshot> {
        self.inner.read().get(field).cloned()
    }

    /// Copy-on-read view of every field.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, FieldSnapshot> {
        self.inner.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
