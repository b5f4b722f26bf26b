// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tunnel and partner lifecycle.
//!
//! A telemetry session is a scoped resource: public HTTPS ingress up,
//! hostname registered with the fleet service, telemetry configuration
//! posted to the vehicle. Teardown runs the same steps in reverse and
//! is best-effort: a failing step logs and the remaining steps still
//! run, so a half-dead tunnel never strands the vehicle config.

use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::fleet::FleetClient;
use vlink_core::error::{VlinkError, VlinkResult};
use vlink_core::fields::FieldSet;

/// Public ingress in front of the local telemetry port.
#[derive(Debug, Clone)]
pub struct IngressInfo {
    pub url: String,
    pub hostname: String,
    pub ca_pem: Option<String>,
}

#[async_trait]
pub trait Ingress: Send + Sync {
    async fn start(&self, local_port: u16) -> VlinkResult<IngressInfo>;
    async fn stop(&self) -> VlinkResult<()>;
}

/// Ingress backed by the `tailscale` CLI (`funnel` terminates TLS at
/// the tailnet edge and proxies to the local port).
pub struct TailscaleIngress;

impl TailscaleIngress {
    async fn run(args: &[&str]) -> VlinkResult<String> {
        let output = Command::new("tailscale")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| VlinkError::Transport(format!("tailscale {}: {e}", args.join(" "))))?;
        if !output.status.success() {
            return Err(VlinkError::Transport(format!(
                "tailscale {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn hostname() -> VlinkResult<String> {
        let raw = Self::run(&["status", "--json"]).await?;
        let status: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| VlinkError::Decode(format!("tailscale status: {e}")))?;
        let dns = status["Self"]["DNSName"]
            .as_str()
            .ok_or_else(|| VlinkError::Decode("tailscale status missing DNSName".into()))?;
        Ok(dns.trim_end_matches('.').to_string())
    }
}

#[async_trait]
impl Ingress for TailscaleIngress {
    async fn start(&self, local_port: u16) -> VlinkResult<IngressInfo> {
        Self::run(&["version"]).await?;
        let hostname = Self::hostname().await?;
        Self::run(&["funnel", "--bg", &local_port.to_string()]).await?;
        tracing::info!(%hostname, %local_port, "tailscale funnel active");
        Ok(IngressInfo {
            url: format!("https://{hostname}"),
            hostname,
            ca_pem: None,
        })
    }

    async fn stop(&self) -> VlinkResult<()> {
        Self::run(&["funnel", "reset"]).await?;
        tracing::info!("tailscale funnel released");
        Ok(())
    }
}

/// Partner re-registration tolerates tunnel propagation delay: the
/// fleet service probes the new hostname and answers 424 until it
/// resolves.
const REGISTER_ATTEMPTS: u32 = 12;
const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct SessionConfig {
    pub vin: String,
    pub local_port: u16,
    pub fields: FieldSet,
    /// Hostname currently registered with the fleet service, if known;
    /// restored at teardown when the tunnel replaced it.
    pub registered_domain: Option<String>,
}

/// Live telemetry session. Call [`TelemetrySession::teardown`] on every
/// exit path; dropping without teardown logs loudly.
pub struct TelemetrySession {
    fleet: FleetClient,
    ingress: Box<dyn Ingress>,
    pub info: IngressInfo,
    vin: String,
    prior_domain: Option<String>,
    torn_down: bool,
}

impl TelemetrySession {
    /// Bring up ingress → partner registration → vehicle telemetry
    /// config. On a mid-sequence failure the already-acquired resources
    /// are released before the error returns.
    pub async fn establish(
        fleet: FleetClient,
        ingress: Box<dyn Ingress>,
        config: SessionConfig,
    ) -> VlinkResult<Self> {
        let info = ingress.start(config.local_port).await?;

        let prior_domain = match &config.registered_domain {
            Some(registered)
                if registered.eq_ignore_ascii_case(&info.hostname) =>
            {
                None
            }
            other => {
                if let Err(err) = register_with_retry(&fleet, &info.hostname).await {
                    let _ = ingress.stop().await;
                    return Err(err);
                }
                other.clone()
            }
        };

        let fields = serde_json::to_value(&config.fields)
            .map_err(|e| VlinkError::Internal(format!("fields: {e}")))?;
        if let Err(err) = fleet
            .create_telemetry_config(
                &config.vin,
                &info.hostname,
                443,
                info.ca_pem.as_deref(),
                &fields,
            )
            .await
        {
            if let Some(prior) = &prior_domain {
                let _ = fleet.register_partner_domain(prior).await;
            }
            let _ = ingress.stop().await;
            return Err(err);
        }

        tracing::info!(vin=%config.vin, hostname=%info.hostname, "telemetry session established");
        Ok(TelemetrySession {
            fleet,
            ingress,
            info,
            vin: config.vin,
            prior_domain,
            torn_down: false,
        })
    }

    /// Reverse teardown: vehicle config → partner restore → ingress.
    /// Each step is attempted regardless of earlier failures.
    pub async fn teardown(mut self) {
        self.torn_down = true;
        if let Err(err) = self.fleet.delete_telemetry_config(&self.vin).await {
            tracing::warn!(error=%err, "telemetry config delete failed, continuing teardown");
        }
        if let Some(prior) = self.prior_domain.take() {
            if let Err(err) = self.fleet.register_partner_domain(&prior).await {
                tracing::warn!(error=%err, %prior, "partner domain restore failed, continuing");
            }
        }
        if let Err(err) = self.ingress.stop().await {
            tracing::warn!(error=%err, "ingress release failed");
        }
        tracing::info!(vin=%self.vin, "telemetry session torn down");
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::error!(
                vin=%self.vin,
                hostname=%self.info.hostname,
                "telemetry session dropped without teardown; vehicle may keep pushing"
            );
        }
    }
}

async fn register_with_retry(fleet: &FleetClient, hostname: &str) -> VlinkResult<()> {
    for attempt in 1..=REGISTER_ATTEMPTS {
        match fleet.register_partner_domain(hostname).await {
            Ok(_) => {
                if attempt > 1 {
                    tracing::info!(%hostname, attempt, "partner registration succeeded");
                }
                return Ok(());
            }
            Err(VlinkError::Transport(message))
                if message.contains("http 424") && attempt < REGISTER_ATTEMPTS =>
            {
                tracing::info!(%hostname, attempt, "tunnel not reachable yet (424), retrying");
                tokio::time::sleep(REGISTER_RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(VlinkError::Transport(format!(
        "partner registration for {hostname} never became reachable"
    )))
}
