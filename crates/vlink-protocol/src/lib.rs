// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
#![forbid(unsafe_code)]

//! Wire formats shared by the vlink daemon and its test harnesses.
//!
//! Everything here is pure data and arithmetic: TLV command metadata,
//! HMAC signing material, P-256 Schnorr signatures for the telemetry
//! hello handshake, the prost-typed vehicle envelope, and the JSON
//! frame types spoken to the agent gateway. No I/O.

pub mod flatbuf;
pub mod gateway;
pub mod schnorr;
pub mod signer;
pub mod tlv;
pub mod vehicle;

/// Command-routing namespaces on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Domain {
    VehicleSecurity,
    Infotainment,
}

impl Domain {
    /// Numeric domain id carried in the TLV metadata and the envelope
    /// destination.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Domain::VehicleSecurity => 2,
            Domain::Infotainment => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            2 => Some(Domain::VehicleSecurity),
            3 => Some(Domain::Infotainment),
            _ => None,
        }
    }
}

/// Signed-command authentication tag length for the security domain.
///
/// VehicleSecurity truncates the HMAC-SHA256 tag to 17 bytes;
/// Infotainment keeps the full 32.
#[must_use]
pub const fn tag_len(domain: Domain) -> usize {
    match domain {
        Domain::VehicleSecurity => 17,
        Domain::Infotainment => 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_ids_round_trip() {
        for d in [Domain::VehicleSecurity, Domain::Infotainment] {
            assert_eq!(Domain::from_u8(d.as_u8()), Some(d));
        }
        assert_eq!(Domain::from_u8(0), None);
    }

    #[test]
    fn security_tags_are_truncated() {
        assert_eq!(tag_len(Domain::VehicleSecurity), 17);
        assert_eq!(tag_len(Domain::Infotainment), 32);
    }
}
