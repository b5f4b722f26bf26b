//! Daemon configuration: JSON file plus environment overrides.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vlink_core::error::{VlinkError, VlinkResult};
use vlink_core::filter::FieldFilterSpec;

pub const ACCESS_TOKEN_ENV: &str = "VLINK_ACCESS_TOKEN";
pub const GATEWAY_TOKEN_ENV: &str = "VLINK_GATEWAY_TOKEN";
pub const CONFIG_DIR_ENV: &str = "VLINK_CONFIG_DIR";

/// Policy level controlling write dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Readonly,
    Full,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Full
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    pub token: Option<String>,
    pub client_id: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            url: "ws://127.0.0.1:18789".to_string(),
            token: None,
            client_id: "vlink-node".to_string(),
        }
    }
}

/// Per-field filter entry as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterEntry {
    pub enabled: bool,
    pub granularity: f64,
    pub throttle_seconds: f64,
    pub max_seconds: Option<f64>,
}

impl Default for FilterEntry {
    fn default() -> Self {
        FilterEntry {
            enabled: true,
            granularity: 0.0,
            throttle_seconds: 1.0,
            max_seconds: None,
        }
    }
}

impl FilterEntry {
    fn spec(&self) -> FieldFilterSpec {
        let mut spec = FieldFilterSpec::new(
            self.granularity,
            Duration::from_secs_f64(self.throttle_seconds),
        );
        spec.enabled = self.enabled;
        if let Some(max) = self.max_seconds {
            spec = spec.with_max_silence(Duration::from_secs_f64(max));
        }
        spec
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Target vehicle.
    pub vin: String,
    /// Local port for the telemetry WebSocket receiver.
    pub telemetry_port: u16,
    /// Fleet REST base, e.g. `https://fleet-api.example.com`.
    pub fleet_base_url: String,
    /// Bearer token; normally injected via `VLINK_ACCESS_TOKEN`.
    pub access_token: Option<String>,
    pub tier: Tier,
    pub gateway: GatewayConfig,
    pub cache_dir: PathBuf,
    pub config_dir: PathBuf,
    /// Telemetry field preset or comma-separated field list.
    pub fields: String,
    pub telemetry_filters: HashMap<String, FilterEntry>,
    /// Registered vehicle public key (uncompressed SEC1 hex) used to
    /// authenticate the telemetry hello handshake.
    pub vehicle_public_key_hex: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            vin: String::new(),
            telemetry_port: 8443,
            fleet_base_url: "https://fleet-api.prd.na.vn.cloud.tesla.com".to_string(),
            access_token: None,
            tier: Tier::Full,
            gateway: GatewayConfig::default(),
            cache_dir: PathBuf::from("~/.cache/vlink"),
            config_dir: PathBuf::from("~/.config/vlink"),
            fields: "default".to_string(),
            telemetry_filters: default_filters(),
            vehicle_public_key_hex: None,
        }
    }
}

fn entry(granularity: f64, throttle_seconds: f64) -> FilterEntry {
    FilterEntry {
        enabled: true,
        granularity,
        throttle_seconds,
        max_seconds: None,
    }
}

/// Stock filter set: state fields pass on any change, numeric fields
/// are damped.
fn default_filters() -> HashMap<String, FilterEntry> {
    HashMap::from([
        ("Location".to_string(), entry(50.0, 1.0)),
        ("Soc".to_string(), entry(5.0, 10.0)),
        ("InsideTemp".to_string(), entry(5.0, 30.0)),
        ("OutsideTemp".to_string(), entry(5.0, 30.0)),
        ("VehicleSpeed".to_string(), entry(5.0, 2.0)),
        ("ChargeState".to_string(), entry(0.0, 0.0)),
        ("DetailedChargeState".to_string(), entry(0.0, 0.0)),
        ("Locked".to_string(), entry(0.0, 0.0)),
        ("SentryMode".to_string(), entry(0.0, 0.0)),
        ("BatteryLevel".to_string(), entry(1.0, 10.0)),
        ("EstBatteryRange".to_string(), entry(5.0, 30.0)),
        ("Odometer".to_string(), entry(1.0, 60.0)),
        ("Gear".to_string(), entry(0.0, 0.0)),
    ])
}

impl DaemonConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// absent, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> VlinkResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = fs::read(path).map_err(|e| {
                    VlinkError::Internal(format!("config {}: {e}", path.display()))
                })?;
                serde_json::from_slice(&raw)
                    .map_err(|e| VlinkError::Decode(format!("config {}: {e}", path.display())))?
            }
            _ => DaemonConfig::default(),
        };

        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.is_empty() {
                config.access_token = Some(token);
            }
        }
        if let Ok(token) = std::env::var(GATEWAY_TOKEN_ENV) {
            if !token.is_empty() {
                config.gateway.token = Some(token);
            }
        }
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                config.config_dir = PathBuf::from(dir);
            }
        }
        Ok(config)
    }

    /// Filter specs for the dual-gate filter.
    #[must_use]
    pub fn filter_specs(&self) -> HashMap<String, FieldFilterSpec> {
        self.telemetry_filters
            .iter()
            .map(|(field, entry)| (field.clone(), entry.spec()))
            .collect()
    }

    #[must_use]
    pub fn expand_path(path: &Path) -> PathBuf {
        let Some(s) = path.to_str() else {
            return path.to_path_buf();
        };
        if let Some(rest) = s.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        path.to_path_buf()
    }
}
