// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prost-typed vehicle wire messages.
//!
//! Two families share this module: the routable-message envelope carried
//! over `POST /signed_command`, and the push-telemetry `Payload` the
//! vehicle streams over the WebSocket. The schema is foreign and fixed
//! (vehicle firmware), so the structs are declared by hand with explicit
//! field tags instead of generated from `.proto` sources.

use prost::Message;

// ---------------------------------------------------------------------------
// Routable-message envelope
// ---------------------------------------------------------------------------

/// Operation status values carried in [`MessageStatus`].
pub const OPERATION_STATUS_OK: i32 = 0;
pub const OPERATION_STATUS_WAIT: i32 = 1;
pub const OPERATION_STATUS_ERROR: i32 = 2;

/// Fault raised by the vehicle when a command tag fails verification.
pub const FAULT_INVALID_SIGNATURE: i32 = 4;

#[derive(Clone, PartialEq, Message)]
pub struct RoutableMessage {
    #[prost(message, optional, tag = "6")]
    pub to_destination: Option<Destination>,
    #[prost(message, optional, tag = "7")]
    pub from_destination: Option<Destination>,
    /// Serialized command payload for the addressed domain.
    #[prost(bytes = "vec", tag = "10")]
    pub protobuf_message_as_bytes: Vec<u8>,
    #[prost(message, optional, tag = "12")]
    pub status: Option<MessageStatus>,
    #[prost(message, optional, tag = "13")]
    pub signature_data: Option<SignatureData>,
    #[prost(message, optional, tag = "14")]
    pub session_info_request: Option<SessionInfoRequest>,
    /// Serialized [`SessionInfo`], authenticated by the session-info tag.
    #[prost(bytes = "vec", tag = "15")]
    pub session_info: Vec<u8>,
    #[prost(bytes = "vec", tag = "50")]
    pub uuid: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Destination {
    #[prost(oneof = "destination::Sub", tags = "1, 2")]
    pub sub: Option<destination::Sub>,
}

pub mod destination {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Sub {
        /// Numeric [`crate::Domain`] id.
        #[prost(int32, tag = "1")]
        Domain(i32),
        #[prost(bytes, tag = "2")]
        RoutingAddress(Vec<u8>),
    }
}

impl Destination {
    #[must_use]
    pub fn domain(domain: crate::Domain) -> Self {
        Destination {
            sub: Some(destination::Sub::Domain(i32::from(domain.as_u8()))),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct MessageStatus {
    #[prost(int32, tag = "1")]
    pub operation_status: i32,
    #[prost(int32, tag = "2")]
    pub signed_message_fault: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignatureData {
    #[prost(message, optional, tag = "1")]
    pub signer_identity: Option<KeyIdentity>,
    #[prost(oneof = "signature_data::Sig", tags = "6, 8")]
    pub sig: Option<signature_data::Sig>,
}

pub mod signature_data {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Sig {
        #[prost(message, tag = "6")]
        HmacPersonalized(super::HmacPersonalizedSignatureData),
        #[prost(message, tag = "8")]
        SessionInfoTag(super::HmacSignatureData),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct KeyIdentity {
    /// Uncompressed SEC1 P-256 public key (65 bytes).
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HmacPersonalizedSignatureData {
    #[prost(bytes = "vec", tag = "1")]
    pub epoch: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub counter: u32,
    #[prost(uint32, tag = "3")]
    pub expires_at: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub tag: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HmacSignatureData {
    #[prost(bytes = "vec", tag = "1")]
    pub tag: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionInfoRequest {
    /// Requester's uncompressed SEC1 P-256 public key.
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionInfo {
    #[prost(uint32, tag = "1")]
    pub counter: u32,
    /// Vehicle's uncompressed SEC1 P-256 public key.
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub epoch: Vec<u8>,
    /// Vehicle clock, seconds since its epoch base.
    #[prost(uint32, tag = "4")]
    pub clock_time: u32,
    #[prost(int32, tag = "5")]
    pub status: i32,
}

/// Domain command payload carried in
/// [`RoutableMessage::protobuf_message_as_bytes`]: the action name from
/// the command registry plus its JSON-encoded parameters.
#[derive(Clone, PartialEq, Message)]
pub struct VehicleAction {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub params_json: String,
}

// ---------------------------------------------------------------------------
// Telemetry push stream
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct Payload {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<Datum>,
    #[prost(message, optional, tag = "2")]
    pub created_at: Option<Timestamp>,
    #[prost(string, tag = "3")]
    pub vin: String,
    #[prost(bool, tag = "4")]
    pub is_resend: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Datum {
    /// Field id from the vehicle telemetry registry.
    #[prost(int32, tag = "1")]
    pub key: i32,
    #[prost(message, optional, tag = "2")]
    pub value: Option<Value>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Value {
    #[prost(oneof = "value::Kind", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub kind: Option<value::Kind>,
}

pub mod value {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(string, tag = "1")]
        StringValue(String),
        #[prost(int32, tag = "2")]
        IntValue(i32),
        #[prost(int64, tag = "3")]
        LongValue(i64),
        #[prost(float, tag = "4")]
        FloatValue(f32),
        #[prost(double, tag = "5")]
        DoubleValue(f64),
        #[prost(bool, tag = "6")]
        BooleanValue(bool),
        #[prost(message, tag = "7")]
        LocationValue(super::LocationValue),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct LocationValue {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
    #[prost(double, optional, tag = "3")]
    pub heading: Option<f64>,
    #[prost(double, optional, tag = "4")]
    pub speed: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

// ---------------------------------------------------------------------------
// Hello handshake
// ---------------------------------------------------------------------------

/// Server-issued challenge, the first message on a telemetry socket.
#[derive(Clone, PartialEq, Message)]
pub struct HelloChallenge {
    #[prost(bytes = "vec", tag = "1")]
    pub nonce: Vec<u8>,
}

/// Vehicle's reply: claimed VIN plus a Schnorr signature over the nonce.
#[derive(Clone, PartialEq, Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub vin: String,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Encode any vehicle message to its wire bytes.
#[must_use]
pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}
