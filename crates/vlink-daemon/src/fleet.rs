// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fleet REST client.
//!
//! The fleet service is treated as a byte-oriented HTTP transport: the
//! daemon GETs and POSTs JSON with a bearer token. The transport is a
//! trait object so tests can swap in an in-process vehicle double.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use vlink_core::error::{VlinkError, VlinkResult};

/// Raw transport outcome before taxonomy mapping.
#[derive(Debug)]
pub enum FleetHttpError {
    /// Non-2xx response.
    Status {
        status: u16,
        body: String,
        retry_after: Option<u64>,
    },
    /// Connection-level failure.
    Network(String),
}

#[async_trait]
pub trait FleetTransport: Send + Sync {
    async fn get(&self, path: &str, query: &[(String, String)])
        -> Result<Value, FleetHttpError>;
    async fn post(&self, path: &str, body: Value) -> Result<Value, FleetHttpError>;
}

/// reqwest-backed production transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpTransport {
    #[must_use]
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }

    async fn handle(&self, response: reqwest::Response) -> Result<Value, FleetHttpError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response
            .text()
            .await
            .map_err(|e| FleetHttpError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(FleetHttpError::Status {
                status,
                body,
                retry_after,
            });
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| FleetHttpError::Network(format!("body: {e}")))
    }
}

#[async_trait]
impl FleetTransport for HttpTransport {
    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value, FleetHttpError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| FleetHttpError::Network(e.to_string()))?;
        self.handle(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, FleetHttpError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetHttpError::Network(e.to_string()))?;
        self.handle(response).await
    }
}

/// `{ response: { result, reason } }` envelope on command endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    pub result: bool,
    #[serde(default)]
    pub reason: String,
}

fn map_common(err: FleetHttpError) -> VlinkError {
    match err {
        FleetHttpError::Network(message) => VlinkError::Transport(message),
        FleetHttpError::Status {
            status: 401,
            body,
            ..
        } => VlinkError::Auth(body),
        FleetHttpError::Status {
            status: 408, ..
        } => VlinkError::VehicleAsleep,
        FleetHttpError::Status {
            status: 429,
            retry_after,
            ..
        } => VlinkError::RateLimited {
            retry_after: Duration::from_secs(retry_after.unwrap_or(60)),
        },
        FleetHttpError::Status { status, body, .. } => {
            if body.contains("vehicle unavailable") || body.contains("asleep") {
                VlinkError::VehicleAsleep
            } else {
                VlinkError::Transport(format!("http {status}: {body}"))
            }
        }
    }
}

/// Wake polling respects the fleet service's wake rate limit: 20 s
/// between attempts, backing off ×1.5 to a 30 s cap.
const WAKE_INITIAL_DELAY: Duration = Duration::from_secs(20);
const WAKE_MAX_DELAY: Duration = Duration::from_secs(30);

/// Typed fleet operations over a [`FleetTransport`].
#[derive(Clone)]
pub struct FleetClient {
    transport: Arc<dyn FleetTransport>,
}

impl FleetClient {
    #[must_use]
    pub fn new(transport: Arc<dyn FleetTransport>) -> Self {
        FleetClient { transport }
    }

    pub async fn vehicles(&self) -> VlinkResult<Value> {
        let data = self
            .transport
            .get("/api/1/vehicles", &[])
            .await
            .map_err(map_common)?;
        Ok(data["response"].clone())
    }

    pub async fn vehicle_data(&self, vin: &str, endpoints: &[&str]) -> VlinkResult<Value> {
        let mut query = Vec::new();
        if !endpoints.is_empty() {
            query.push(("endpoints".to_string(), endpoints.join(";")));
        }
        let data = self
            .transport
            .get(&format!("/api/1/vehicles/{vin}/vehicle_data"), &query)
            .await
            .map_err(map_common)?;
        Ok(data["response"].clone())
    }

    /// Send one wake request; returns the reported vehicle state.
    pub async fn wake(&self, vin: &str) -> VlinkResult<String> {
        let data = self
            .transport
            .post(&format!("/api/1/vehicles/{vin}/wake_up"), json!({}))
            .await
            .map_err(map_common)?;
        Ok(data["response"]["state"].as_str().unwrap_or("unknown").to_string())
    }

    /// Wake and poll until the vehicle reports online or the deadline
    /// passes. Callers gate this behind explicit consent.
    pub async fn wake_until_online(&self, vin: &str, timeout: Duration) -> VlinkResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay = WAKE_INITIAL_DELAY;
        let mut state = self.wake(vin).await?;
        while state != "online" {
            if tokio::time::Instant::now() >= deadline {
                return Err(VlinkError::VehicleAsleep);
            }
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay.mul_f64(1.5), WAKE_MAX_DELAY);
            state = match self.wake(vin).await {
                Ok(state) => state,
                Err(VlinkError::VehicleAsleep) => "asleep".to_string(),
                Err(err) => return Err(err),
            };
        }
        Ok(())
    }

    /// Unsigned command path: `POST /command/{name}`.
    pub async fn command(
        &self,
        vin: &str,
        name: &str,
        body: Value,
    ) -> VlinkResult<CommandResponse> {
        let data = self
            .transport
            .post(&format!("/api/1/vehicles/{vin}/command/{name}"), body)
            .await
            .map_err(map_common)?;
        parse_command_response(&data)
    }

    /// Signed command path: the body is `{ routable_message: base64 }`
    /// and the response carries a base64 routable message back.
    pub async fn signed_command(&self, vin: &str, routable_b64: &str) -> VlinkResult<Value> {
        self.transport
            .post(
                &format!("/api/1/vehicles/{vin}/signed_command"),
                json!({ "routable_message": routable_b64 }),
            )
            .await
            .map_err(|err| match err {
                FleetHttpError::Status {
                    status: 403 | 404,
                    body,
                    ..
                } => {
                    tracing::debug!(%body, "signed command rejected, key not enrolled");
                    VlinkError::KeyNotEnrolled
                }
                other => map_common(other),
            })
    }

    /// Register the partner hostname the vehicle will accept telemetry
    /// pushes from.
    pub async fn register_partner_domain(&self, domain: &str) -> VlinkResult<Value> {
        self.transport
            .post(
                "/api/1/partner_accounts/public_key",
                json!({ "domain": domain }),
            )
            .await
            .map_err(map_common)
    }

    /// Post the telemetry streaming configuration to the vehicle.
    pub async fn create_telemetry_config(
        &self,
        vin: &str,
        hostname: &str,
        port: u16,
        ca_pem: Option<&str>,
        fields: &Value,
    ) -> VlinkResult<Value> {
        let mut config = json!({
            "hostname": hostname,
            "port": port,
            "fields": fields,
        });
        if let Some(ca) = ca_pem {
            config["ca"] = json!(ca);
        }
        self.transport
            .post(
                "/api/1/vehicles/fleet_telemetry_config",
                json!({ "vins": [vin], "config": config }),
            )
            .await
            .map_err(map_common)
    }

    pub async fn delete_telemetry_config(&self, vin: &str) -> VlinkResult<Value> {
        // The fleet API models deletion as a POST with an empty config.
        self.transport
            .post(
                &format!("/api/1/vehicles/{vin}/fleet_telemetry_config_delete"),
                json!({}),
            )
            .await
            .map_err(map_common)
    }
}

fn parse_command_response(data: &Value) -> VlinkResult<CommandResponse> {
    let response = data
        .get("response")
        .ok_or_else(|| VlinkError::Decode("command response missing 'response'".into()))?;
    serde_json::from_value(response.clone())
        .map_err(|e| VlinkError::Decode(format!("command response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            map_common(FleetHttpError::Status {
                status: 401,
                body: "token expired".into(),
                retry_after: None
            })
            .code(),
            "Auth"
        );
        assert_eq!(
            map_common(FleetHttpError::Status {
                status: 429,
                body: String::new(),
                retry_after: Some(17)
            })
            .code(),
            "RateLimited"
        );
        assert_eq!(
            map_common(FleetHttpError::Status {
                status: 408,
                body: String::new(),
                retry_after: None
            })
            .code(),
            "VehicleAsleep"
        );
        assert_eq!(
            map_common(FleetHttpError::Network("reset".into())).code(),
            "Transport"
        );
    }

    #[test]
    fn asleep_detected_in_body() {
        let err = map_common(FleetHttpError::Status {
            status: 500,
            body: "vehicle unavailable: vehicle is offline or asleep".into(),
            retry_after: None,
        });
        assert_eq!(err.code(), "VehicleAsleep");
    }

    #[test]
    fn command_response_parsing() {
        let ok = parse_command_response(&json!({
            "response": {"result": true, "reason": ""}
        }))
        .unwrap();
        assert!(ok.result);
        assert!(parse_command_response(&json!({"nope": 1})).is_err());
    }
}
