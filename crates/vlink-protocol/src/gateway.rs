// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Agent-gateway wire protocol: typed JSON frames and device auth.
//!
//! The node speaks three frame shapes over the WebSocket:
//!
//! - Request:  `{type:"req", id, method, params}`
//! - Response: `{type:"res", id, ok, payload|error}`
//! - Event:    `{type:"event", event, payload}`
//!
//! Authentication signs a pipe-delimited payload with the node's
//! Ed25519 device key:
//! `v2|deviceId|clientId|mode|role|scopes|signedAt|token|nonce`
//! (the `v1` form omits the trailing nonce).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Gateway protocol version negotiated during `connect`.
pub const PROTOCOL_VERSION: u32 = 3;

/// Scopes requested by the node role.
pub const NODE_SCOPES: [&str; 2] = ["node.telemetry", "node.command"];

/// One decoded gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        error: Value,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
}

impl Frame {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound invocation payload inside a `node.invoke.request` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "nodeId")]
    pub node_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, rename = "paramsJSON")]
    pub params_json: String,
    #[serde(default, rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

/// Base64URL-encode without padding.
#[must_use]
pub fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Stable device id: SHA-256 of the raw 32-byte public key, hex-encoded.
#[must_use]
pub fn device_id(key: &SigningKey) -> String {
    hex::encode(Sha256::digest(key.verifying_key().as_bytes()))
}

/// Raw public key as base64url, as sent in the `device` connect block.
#[must_use]
pub fn public_key_b64url(key: &SigningKey) -> String {
    b64url(key.verifying_key().as_bytes())
}

/// Build the pipe-delimited auth payload string that gets signed.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn auth_payload(
    device_id: &str,
    client_id: &str,
    client_mode: &str,
    role: &str,
    scopes: &[&str],
    signed_at_ms: i64,
    token: Option<&str>,
    nonce: Option<&str>,
) -> String {
    let version = if nonce.is_some() { "v2" } else { "v1" };
    let mut parts = vec![
        version.to_string(),
        device_id.to_string(),
        client_id.to_string(),
        client_mode.to_string(),
        role.to_string(),
        scopes.join(","),
        signed_at_ms.to_string(),
        token.unwrap_or_default().to_string(),
    ];
    if let Some(nonce) = nonce {
        parts.push(nonce.to_string());
    }
    parts.join("|")
}

/// Sign the auth payload with the device key, base64url signature.
#[must_use]
pub fn sign_auth_payload(key: &SigningKey, payload: &str) -> String {
    b64url(&key.sign(payload.as_bytes()).to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    fn device_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn frame_round_trip() {
        let frame = Frame::Req {
            id: "42".to_string(),
            method: "connect".to_string(),
            params: serde_json::json!({"role": "node"}),
        };
        let raw = frame.encode().unwrap();
        assert!(raw.contains("\"type\":\"req\""));
        let back = Frame::decode(&raw).unwrap();
        assert!(matches!(back, Frame::Req { ref method, .. } if method == "connect"));
    }

    #[test]
    fn event_frame_decodes_challenge() {
        let raw = r#"{"type":"event","event":"connect.challenge","payload":{"nonce":"abc"}}"#;
        match Frame::decode(raw).unwrap() {
            Frame::Event { event, payload } => {
                assert_eq!(event, "connect.challenge");
                assert_eq!(payload["nonce"], "abc");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn auth_payload_v2_layout() {
        let payload = auth_payload(
            "dev-1",
            "vlink-node",
            "node",
            "node",
            &NODE_SCOPES,
            1_700_000_000_000,
            Some("tok"),
            Some("n0nce"),
        );
        assert_eq!(
            payload,
            "v2|dev-1|vlink-node|node|node|node.telemetry,node.command|1700000000000|tok|n0nce"
        );
    }

    #[test]
    fn auth_payload_without_nonce_is_v1() {
        let payload = auth_payload("d", "c", "node", "node", &[], 1, None, None);
        assert!(payload.starts_with("v1|"));
        assert_eq!(payload.matches('|').count(), 7);
    }

    #[test]
    fn signed_payload_verifies() {
        let key = device_key();
        let payload = auth_payload("d", "c", "node", "node", &NODE_SCOPES, 5, None, Some("n"));
        let sig_b64 = sign_auth_payload(&key, &payload);
        let sig_bytes = URL_SAFE_NO_PAD.decode(sig_b64).unwrap();
        let sig = ed25519_dalek::Signature::from_slice(&sig_bytes).unwrap();
        key.verifying_key()
            .verify(payload.as_bytes(), &sig)
            .unwrap();
    }

    #[test]
    fn device_id_is_pubkey_digest() {
        let key = device_key();
        let id = device_id(&key);
        assert_eq!(id.len(), 64);
        assert_eq!(id, hex::encode(Sha256::digest(key.verifying_key().as_bytes())));
    }
}
