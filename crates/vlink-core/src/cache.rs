// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! File-backed response cache.
//!
//! Entries are content-addressed: the key digests scope, identifier,
//! endpoint and the canonical JSON of the request params (serde_json
//! orders object keys, so semantically equal params digest equally).
//! Writes are atomic (temp file + rename); expired entries are deleted
//! lazily on read; write dispatches invalidate eagerly by
//! `{scope}_{identifier}_` prefix.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{VlinkError, VlinkResult};

/// TTL tiers for read responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// Vehicle config and other near-immutable data.
    Static,
    /// Slow-moving state.
    Slow,
    Default,
    /// Rapidly changing state while streaming.
    Fast,
}

impl TtlTier {
    #[must_use]
    pub const fn duration(self) -> Duration {
        match self {
            TtlTier::Static => Duration::from_secs(3600),
            TtlTier::Slow => Duration::from_secs(300),
            TtlTier::Default => Duration::from_secs(60),
            TtlTier::Fast => Duration::from_secs(30),
        }
    }
}

/// Cache key components.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub scope: String,
    pub identifier: String,
    pub endpoint: String,
    pub params: Value,
}

impl CacheKey {
    #[must_use]
    pub fn vin(vin: &str, endpoint: &str, params: Value) -> Self {
        CacheKey {
            scope: "vin".to_string(),
            identifier: vin.to_string(),
            endpoint: endpoint.to_string(),
            params,
        }
    }

    /// SHA-256 over `scope|identifier|endpoint|canonical_json(params)`,
    /// truncated to 16 hex chars for the file name.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.scope.as_bytes());
        hasher.update(b"|");
        hasher.update(self.identifier.as_bytes());
        hasher.update(b"|");
        hasher.update(self.endpoint.as_bytes());
        hasher.update(b"|");
        hasher.update(self.params.to_string().as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize(&self.scope),
            sanitize(&self.identifier),
            self.digest()
        )
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    inserted_at_ms: i64,
    ttl_ms: u64,
    value: Value,
}

/// A cache hit with its age metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: Value,
    pub age: Duration,
    pub ttl: Duration,
}

/// Disk cache of read responses, one file per key.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> VlinkResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| VlinkError::Internal(format!("cache dir {}: {e}", dir.display())))?;
        Ok(ResponseCache { dir, enabled: true })
    }

    /// A cache that never stores or returns anything.
    #[must_use]
    pub fn disabled() -> Self {
        ResponseCache {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        if !self.enabled {
            return None;
        }
        let path = self.dir.join(key.file_name());
        let entry = read_entry(&path)?;
        let age_ms = now_ms().saturating_sub(entry.inserted_at_ms);
        if age_ms < 0 || age_ms as u64 >= entry.ttl_ms {
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(CacheHit {
            value: entry.value,
            age: Duration::from_millis(age_ms as u64),
            ttl: Duration::from_millis(entry.ttl_ms),
        })
    }

    pub fn put(&self, key: &CacheKey, value: &Value, ttl: Duration) -> VlinkResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let entry = Entry {
            inserted_at_ms: now_ms(),
            ttl_ms: ttl.as_millis() as u64,
            value: value.clone(),
        };
        let raw = serde_json::to_vec(&entry)
            .map_err(|e| VlinkError::Internal(format!("cache serialize: {e}")))?;
        let path = self.dir.join(key.file_name());
        write_atomic(&path, &raw)
    }

    /// Delete every entry under `{scope}_{identifier}_`. Returns the
    /// number of files removed.
    pub fn invalidate(&self, scope: &str, identifier: &str) -> usize {
        if !self.enabled {
            return 0;
        }
        let prefix = format!("{}_{}_", sanitize(scope), sanitize(identifier));
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Record that the vehicle was recently seen online, so dispatchers
    /// can skip a redundant wake round-trip.
    pub fn put_wake_state(&self, vin: &str, state: &str, ttl: Duration) -> VlinkResult<()> {
        let key = wake_key(vin);
        self.put(&key, &Value::String(state.to_string()), ttl)
    }

    #[must_use]
    pub fn get_wake_state(&self, vin: &str) -> Option<String> {
        let key = wake_key(vin);
        match self.get(&key)?.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn wake_key(vin: &str) -> CacheKey {
    CacheKey {
        scope: "wake".to_string(),
        identifier: vin.to_string(),
        endpoint: "state".to_string(),
        params: Value::Null,
    }
}

fn read_entry(path: &Path) -> Option<Entry> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}

fn write_atomic(path: &Path, contents: &[u8]) -> VlinkResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .map_err(|e| VlinkError::Internal(format!("cache write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| VlinkError::Internal(format!("cache rename {}: {e}", path.display())))
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
