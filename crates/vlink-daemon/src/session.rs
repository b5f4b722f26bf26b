// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Vehicle session manager and command signer.
//!
//! Sessions are established on demand per `(vin, domain)` by relaying a
//! session-info request through the fleet REST service, deriving the
//! shared key from ECDH, and verifying the session-info HMAC tag. All
//! signing for one key is serialized by a per-key async mutex so the
//! TLV counter stays strictly monotonic; the counter is committed only
//! after the vehicle acknowledges the command.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use parking_lot::Mutex;
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::fleet::{CommandResponse, FleetClient};
use vlink_core::error::{VlinkError, VlinkResult};
use vlink_protocol::signer;
use vlink_protocol::tlv::{MetadataWriter, Tag, SIGNATURE_TYPE_HMAC_PERSONALIZED};
use vlink_protocol::vehicle::{
    self, signature_data::Sig, Destination, HmacPersonalizedSignatureData, KeyIdentity,
    RoutableMessage, SessionInfo, SessionInfoRequest, SignatureData,
};
use vlink_protocol::{tag_len, Domain};

/// Session lifetime before a re-handshake.
const SESSION_TTL: Duration = Duration::from_secs(300);

/// Validity window stamped into each signed command.
const COMMAND_TTL_SECS: i64 = 5;

/// Live session state for one `(vin, domain)`.
#[derive(Debug, Clone)]
pub struct Session {
    pub signing_key: [u8; 32],
    pub session_info_key: [u8; 32],
    pub epoch: Vec<u8>,
    pub counter: u32,
    /// `vehicle_clock - local_clock`, seconds.
    pub clock_offset_secs: i64,
    established_at: SystemTime,
}

impl Session {
    fn is_expired(&self) -> bool {
        self.established_at
            .elapsed()
            .map(|age| age >= SESSION_TTL)
            .unwrap_or(true)
    }
}

#[derive(Default)]
struct Slot {
    session: Option<Session>,
}

/// A signed envelope ready for the REST relay, with the counter it will
/// consume on success.
pub struct SignedCommand {
    pub envelope: RoutableMessage,
    pub bytes: Vec<u8>,
    pub counter: u32,
}

pub struct SessionManager {
    fleet: FleetClient,
    command_key: Option<SecretKey>,
    slots: Mutex<HashMap<(String, Domain), Arc<tokio::sync::Mutex<Slot>>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(fleet: FleetClient, command_key: Option<SecretKey>) -> Self {
        SessionManager {
            fleet,
            command_key,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a command signing key is enrolled.
    #[must_use]
    pub fn has_key(&self) -> bool {
        self.command_key.is_some()
    }

    /// Drop the cached session; the next sign re-handshakes. An
    /// in-flight command keeps its own slot handle and is unaffected.
    pub fn invalidate(&self, vin: &str, domain: Domain) {
        self.slots.lock().remove(&(vin.to_string(), domain));
    }

    fn slot(&self, vin: &str, domain: Domain) -> Arc<tokio::sync::Mutex<Slot>> {
        self.slots
            .lock()
            .entry((vin.to_string(), domain))
            .or_default()
            .clone()
    }

    /// Sign and relay one command, retrying once after a signature
    /// mismatch with a fresh session. Transport failures consume no
    /// counter.
    pub async fn execute(
        &self,
        vin: &str,
        domain: Domain,
        payload: &[u8],
    ) -> VlinkResult<CommandResponse> {
        let slot = self.slot(vin, domain);
        let mut guard = slot.lock().await;

        for attempt in 0..2 {
            if guard
                .session
                .as_ref()
                .map(Session::is_expired)
                .unwrap_or(true)
            {
                guard.session = Some(self.handshake(vin, domain).await?);
            }
            let session = guard
                .session
                .as_ref()
                .ok_or_else(|| VlinkError::Internal("session vanished".into()))?;

            let signed = self.sign_with(session, vin, domain, payload)?;
            let b64 = BASE64.encode(&signed.bytes);
            let response = self.fleet.signed_command(vin, &b64).await?;
            let reply = decode_reply(&response)?;

            if signature_mismatch(&reply) {
                tracing::warn!(%vin, ?domain, attempt, "vehicle reported signature mismatch");
                guard.session = None;
                if attempt == 1 {
                    return Err(VlinkError::SignatureMismatch);
                }
                continue;
            }

            // 2xx and no fault: the counter is consumed.
            if let Some(session) = guard.session.as_mut() {
                session.counter = signed.counter;
            }
            return Ok(reply_to_response(&reply));
        }
        Err(VlinkError::SignatureMismatch)
    }

    /// Build the signed envelope for `payload` without relaying it.
    /// The session's counter is not advanced; [`Self::execute`] commits
    /// it after the vehicle accepts the command.
    pub fn sign_with(
        &self,
        session: &Session,
        vin: &str,
        domain: Domain,
        payload: &[u8],
    ) -> VlinkResult<SignedCommand> {
        let key = self.command_key.as_ref().ok_or(VlinkError::KeyNotEnrolled)?;
        let counter = session.counter + 1;
        let expires_at = (now_secs() + session.clock_offset_secs + COMMAND_TTL_SECS) as u32;

        let mut metadata = MetadataWriter::new();
        let write = |result: Result<(), vlink_protocol::tlv::TlvError>| {
            result.map_err(|e| VlinkError::Internal(format!("metadata: {e}")))
        };
        write(metadata.add(Tag::SignatureType, &[SIGNATURE_TYPE_HMAC_PERSONALIZED]))?;
        write(metadata.add(Tag::Domain, &[domain.as_u8()]))?;
        write(metadata.add(Tag::Personalization, vin.as_bytes()))?;
        write(metadata.add(Tag::Epoch, &session.epoch))?;
        write(metadata.add_u32(Tag::ExpiresAt, expires_at))?;
        write(metadata.add_u32(Tag::Counter, counter))?;
        write(metadata.add_u32(Tag::Flags, 0))?;

        let mut tag = signer::compute_command_tag(&session.signing_key, metadata.entries(), payload)
            .to_vec();
        tag.truncate(tag_len(domain));

        let envelope = RoutableMessage {
            to_destination: Some(Destination::domain(domain)),
            from_destination: None,
            protobuf_message_as_bytes: payload.to_vec(),
            status: None,
            signature_data: Some(SignatureData {
                signer_identity: Some(KeyIdentity {
                    public_key: key.public_key().to_encoded_point(false).as_bytes().to_vec(),
                }),
                sig: Some(Sig::HmacPersonalized(HmacPersonalizedSignatureData {
                    epoch: session.epoch.clone(),
                    counter,
                    expires_at,
                    tag,
                })),
            }),
            session_info_request: None,
            session_info: Vec::new(),
            uuid: rand::random::<[u8; 16]>().to_vec(),
        };
        let bytes = envelope.encode_to_vec();
        Ok(SignedCommand {
            envelope,
            bytes,
            counter,
        })
    }

    async fn handshake(&self, vin: &str, domain: Domain) -> VlinkResult<Session> {
        let key = self.command_key.as_ref().ok_or(VlinkError::KeyNotEnrolled)?;
        let local_public = key.public_key().to_encoded_point(false).as_bytes().to_vec();

        let request = RoutableMessage {
            to_destination: Some(Destination::domain(domain)),
            from_destination: None,
            protobuf_message_as_bytes: Vec::new(),
            status: None,
            signature_data: None,
            session_info_request: Some(SessionInfoRequest {
                public_key: local_public,
            }),
            session_info: Vec::new(),
            uuid: rand::random::<[u8; 16]>().to_vec(),
        };
        let b64 = BASE64.encode(request.encode_to_vec());
        let response = self.fleet.signed_command(vin, &b64).await?;
        let reply = decode_reply(&response)?;

        if reply.session_info.is_empty() {
            return Err(VlinkError::HandshakeFailed(
                "peer returned no session info".into(),
            ));
        }
        let info = SessionInfo::decode(reply.session_info.as_slice())
            .map_err(|e| VlinkError::Decode(format!("session info: {e}")))?;
        let peer = PublicKey::from_sec1_bytes(&info.public_key)
            .map_err(|_| VlinkError::HandshakeFailed("invalid peer public key".into()))?;

        let shared = diffie_hellman(key.to_nonzero_scalar(), peer.as_affine());
        let session_key = signer::session_key_from_shared_secret(shared.raw_secret_bytes());
        let signing_key = signer::derive_signing_key(&session_key);
        let session_info_key = signer::derive_session_info_key(&session_key);

        let tag = match reply.signature_data.as_ref().and_then(|sd| sd.sig.as_ref()) {
            Some(Sig::SessionInfoTag(tag)) => tag.tag.clone(),
            _ => {
                return Err(VlinkError::HandshakeFailed(
                    "session info carried no tag".into(),
                ))
            }
        };
        if !signer::verify_session_info_tag(&session_info_key, &reply.session_info, &tag) {
            return Err(VlinkError::HandshakeFailed(
                "session info tag verification failed".into(),
            ));
        }

        tracing::info!(%vin, ?domain, counter=%info.counter, "vehicle session established");
        Ok(Session {
            signing_key,
            session_info_key,
            epoch: info.epoch,
            counter: info.counter,
            clock_offset_secs: i64::from(info.clock_time) - now_secs(),
            established_at: SystemTime::now(),
        })
    }
}

fn decode_reply(response: &serde_json::Value) -> VlinkResult<RoutableMessage> {
    let b64 = response
        .get("response")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VlinkError::Decode("signed_command reply missing response".into()))?;
    let raw = BASE64
        .decode(b64)
        .map_err(|e| VlinkError::Decode(format!("reply base64: {e}")))?;
    RoutableMessage::decode(raw.as_slice())
        .map_err(|e| VlinkError::Decode(format!("reply envelope: {e}")))
}

fn signature_mismatch(reply: &RoutableMessage) -> bool {
    reply
        .status
        .as_ref()
        .map(|s| s.signed_message_fault == vehicle::FAULT_INVALID_SIGNATURE)
        .unwrap_or(false)
}

fn reply_to_response(reply: &RoutableMessage) -> CommandResponse {
    match reply.status.as_ref() {
        Some(status) if status.operation_status != vehicle::OPERATION_STATUS_OK => {
            CommandResponse {
                result: false,
                reason: format!("vehicle fault {}", status.signed_message_fault),
            }
        }
        _ => CommandResponse {
            result: true,
            reason: String::new(),
        },
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
