//! Shared test double: an in-process fleet service fronting a mock
//! vehicle that speaks the real session and signing protocol.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use parking_lot::Mutex;
use prost::Message;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use vlink_daemon::fleet::{FleetHttpError, FleetTransport};
use vlink_protocol::signer;
use vlink_protocol::tlv::{MetadataWriter, Tag, SIGNATURE_TYPE_HMAC_PERSONALIZED};
use vlink_protocol::vehicle::{
    self, signature_data::Sig, HmacSignatureData, MessageStatus, RoutableMessage, SessionInfo,
    SignatureData,
};
use vlink_protocol::{tag_len, Domain};

pub const TEST_VIN: &str = "5YJ3E1EA1NF000000";

struct VehicleSession {
    session_key: [u8; 16],
    counter: u32,
}

/// Fleet transport double. Signed-command posts are answered by a mock
/// vehicle that performs the real ECDH handshake and verifies command
/// tags; everything else returns canned JSON.
pub struct MockVehicleTransport {
    vehicle_key: SecretKey,
    epoch: Vec<u8>,
    sessions: Mutex<HashMap<u8, VehicleSession>>,
    /// Commands to reject with a signature fault before succeeding.
    pub reject_next: AtomicU32,
    pub accepted_envelopes: Mutex<Vec<RoutableMessage>>,
    pub unsigned_posts: Mutex<Vec<(String, Value)>>,
    pub vehicle_data_gets: AtomicUsize,
    pub vehicle_data: Mutex<Value>,
    pub handshakes: AtomicUsize,
}

impl Default for MockVehicleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVehicleTransport {
    pub fn new() -> Self {
        MockVehicleTransport {
            vehicle_key: SecretKey::random(&mut rand::rngs::OsRng),
            epoch: b"epoch-test-0001".to_vec(),
            sessions: Mutex::new(HashMap::new()),
            reject_next: AtomicU32::new(0),
            accepted_envelopes: Mutex::new(Vec::new()),
            unsigned_posts: Mutex::new(Vec::new()),
            vehicle_data_gets: AtomicUsize::new(0),
            vehicle_data: Mutex::new(json!({
                "charge_state": {
                    "battery_level": 64,
                    "battery_range": 201.5,
                    "charging_state": "Disconnected",
                },
                "climate_state": { "inside_temp": 21.0, "outside_temp": 14.5 },
                "drive_state": { "latitude": 37.0, "longitude": -122.0, "speed": 0 },
                "vehicle_state": { "locked": true, "sentry_mode": false },
            })),
            handshakes: AtomicUsize::new(0),
        }
    }

    fn handle_signed_command(&self, body: &Value) -> Value {
        let b64 = body["routable_message"].as_str().unwrap_or_default();
        let raw = BASE64.decode(b64).expect("routable_message base64");
        let request = RoutableMessage::decode(raw.as_slice()).expect("routable message");

        if let Some(info_request) = &request.session_info_request {
            return self.handle_handshake(&request, &info_request.public_key);
        }
        self.handle_command(&request)
    }

    fn handle_handshake(&self, request: &RoutableMessage, peer_public: &[u8]) -> Value {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let domain = destination_domain(request);
        let peer = PublicKey::from_sec1_bytes(peer_public).expect("requester key");
        let shared = diffie_hellman(self.vehicle_key.to_nonzero_scalar(), peer.as_affine());
        let session_key = signer::session_key_from_shared_secret(shared.raw_secret_bytes());

        let base_counter = 100;
        self.sessions.lock().insert(
            domain,
            VehicleSession {
                session_key,
                counter: base_counter,
            },
        );

        let info = SessionInfo {
            counter: base_counter,
            public_key: self
                .vehicle_key
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            epoch: self.epoch.clone(),
            clock_time: now_secs() as u32,
            status: 0,
        };
        let info_bytes = info.encode_to_vec();
        let tag = hmac_tag(
            &signer::derive_session_info_key(&session_key),
            &info_bytes,
        );
        let reply = RoutableMessage {
            to_destination: None,
            from_destination: request.to_destination.clone(),
            protobuf_message_as_bytes: Vec::new(),
            status: None,
            signature_data: Some(SignatureData {
                signer_identity: None,
                sig: Some(Sig::SessionInfoTag(HmacSignatureData { tag })),
            }),
            session_info_request: None,
            session_info: info_bytes,
            uuid: Vec::new(),
        };
        json!({ "response": BASE64.encode(reply.encode_to_vec()) })
    }

    fn handle_command(&self, request: &RoutableMessage) -> Value {
        let domain_id = destination_domain(request);
        let domain = Domain::from_u8(domain_id).expect("known domain");

        let fault = 'verify: {
            if self.reject_next.load(Ordering::SeqCst) > 0 {
                self.reject_next.fetch_sub(1, Ordering::SeqCst);
                break 'verify vehicle::FAULT_INVALID_SIGNATURE;
            }
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(&domain_id) else {
                break 'verify vehicle::FAULT_INVALID_SIGNATURE;
            };
            let Some(SignatureData {
                sig: Some(Sig::HmacPersonalized(sig)),
                ..
            }) = &request.signature_data
            else {
                break 'verify vehicle::FAULT_INVALID_SIGNATURE;
            };
            if sig.counter <= session.counter || sig.epoch != self.epoch {
                break 'verify vehicle::FAULT_INVALID_SIGNATURE;
            }

            let mut metadata = MetadataWriter::new();
            metadata
                .add(Tag::SignatureType, &[SIGNATURE_TYPE_HMAC_PERSONALIZED])
                .expect("tlv");
            metadata.add(Tag::Domain, &[domain_id]).expect("tlv");
            metadata
                .add(Tag::Personalization, TEST_VIN.as_bytes())
                .expect("tlv");
            metadata.add(Tag::Epoch, &sig.epoch).expect("tlv");
            metadata.add_u32(Tag::ExpiresAt, sig.expires_at).expect("tlv");
            metadata.add_u32(Tag::Counter, sig.counter).expect("tlv");
            metadata.add_u32(Tag::Flags, 0).expect("tlv");

            let signing_key = signer::derive_signing_key(&session.session_key);
            let mut expected = signer::compute_command_tag(
                &signing_key,
                metadata.entries(),
                &request.protobuf_message_as_bytes,
            )
            .to_vec();
            expected.truncate(tag_len(domain));
            if expected != sig.tag {
                break 'verify vehicle::FAULT_INVALID_SIGNATURE;
            }

            session.counter = sig.counter;
            0
        };

        if fault == 0 {
            self.accepted_envelopes.lock().push(request.clone());
        }
        let reply = RoutableMessage {
            to_destination: None,
            from_destination: request.to_destination.clone(),
            protobuf_message_as_bytes: Vec::new(),
            status: Some(MessageStatus {
                operation_status: if fault == 0 {
                    vehicle::OPERATION_STATUS_OK
                } else {
                    vehicle::OPERATION_STATUS_ERROR
                },
                signed_message_fault: fault,
            }),
            signature_data: None,
            session_info_request: None,
            session_info: Vec::new(),
            uuid: Vec::new(),
        };
        json!({ "response": BASE64.encode(reply.encode_to_vec()) })
    }
}

#[async_trait]
impl FleetTransport for MockVehicleTransport {
    async fn get(
        &self,
        path: &str,
        _query: &[(String, String)],
    ) -> Result<Value, FleetHttpError> {
        if path.ends_with("/vehicle_data") {
            self.vehicle_data_gets.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({ "response": self.vehicle_data.lock().clone() }));
        }
        Ok(json!({ "response": [] }))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, FleetHttpError> {
        if path.ends_with("/signed_command") {
            return Ok(self.handle_signed_command(&body));
        }
        if let Some(idx) = path.find("/command/") {
            let name = path[idx + "/command/".len()..].to_string();
            self.unsigned_posts.lock().push((name, body));
            return Ok(json!({ "response": { "result": true, "reason": "" } }));
        }
        if path.ends_with("/wake_up") {
            return Ok(json!({ "response": { "state": "online" } }));
        }
        Ok(json!({}))
    }
}

pub fn decode_metadata_counter(envelope: &RoutableMessage) -> (u32, Vec<u8>) {
    match &envelope.signature_data {
        Some(SignatureData {
            sig: Some(Sig::HmacPersonalized(sig)),
            ..
        }) => (sig.counter, sig.epoch.clone()),
        other => panic!("envelope missing personalized signature: {other:?}"),
    }
}

fn destination_domain(request: &RoutableMessage) -> u8 {
    match &request.to_destination {
        Some(destination) => match &destination.sub {
            Some(vehicle::destination::Sub::Domain(id)) => *id as u8,
            _ => panic!("destination missing domain"),
        },
        None => panic!("request missing destination"),
    }
}

fn hmac_tag(key: &[u8], message: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    let mut mac = <Hmac<sha2::Sha256>>::new_from_slice(key).expect("hmac key");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
