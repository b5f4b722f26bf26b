// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! HMAC-SHA256 signing material for the vehicle command protocol.
//!
//! Signing flow for the fleet REST path:
//!
//! 1. Derive the session key from the ECDH shared secret:
//!    `K = SHA1(ECDH(local_priv, peer_pub))[..16]`
//! 2. Derive the per-purpose keys:
//!    `K_cmd  = HMAC-SHA256(K, "authenticated command")`
//!    `K_info = HMAC-SHA256(K, "session info")`
//! 3. Tag = `HMAC-SHA256(K_cmd, metadata || 0xFF || payload)` where the
//!    `0xFF` is the bare TLV terminator, not a length-framed entry.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derivation label for the command signing key.
const LABEL_AUTHENTICATED_COMMAND: &[u8] = b"authenticated command";

/// Derivation label for the session-info verification key.
const LABEL_SESSION_INFO: &[u8] = b"session info";

/// Width of the session key truncated from the ECDH shared secret.
pub const SESSION_KEY_LEN: usize = 16;

/// Reduce a raw ECDH shared secret to the 16-byte session key.
#[must_use]
pub fn session_key_from_shared_secret(shared_secret: &[u8]) -> [u8; SESSION_KEY_LEN] {
    use sha1::Digest;
    let digest = Sha1::digest(shared_secret);
    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&digest[..SESSION_KEY_LEN]);
    key
}

/// Derive the command signing key: `HMAC-SHA256(K, "authenticated command")`.
#[must_use]
pub fn derive_signing_key(session_key: &[u8]) -> [u8; 32] {
    hmac_sha256(session_key, LABEL_AUTHENTICATED_COMMAND)
}

/// Derive the session-info verification key: `HMAC-SHA256(K, "session info")`.
#[must_use]
pub fn derive_session_info_key(session_key: &[u8]) -> [u8; 32] {
    hmac_sha256(session_key, LABEL_SESSION_INFO)
}

/// Compute the authentication tag over TLV metadata and payload.
///
/// `metadata` is the encoded entries *without* the terminator; the bare
/// `0xFF` separator is written here, between metadata and payload.
#[must_use]
pub fn compute_command_tag(signing_key: &[u8], metadata: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut mac = mac(signing_key);
    mac.update(metadata);
    mac.update(&[crate::tlv::TAG_END]);
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// Verify the HMAC tag on a serialized session-info record.
#[must_use]
pub fn verify_session_info_tag(
    session_info_key: &[u8],
    session_info: &[u8],
    expected_tag: &[u8],
) -> bool {
    let computed = hmac_sha256(session_info_key, session_info);
    constant_time_eq(&computed, expected_tag)
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut m = mac(key);
    m.update(message);
    m.finalize().into_bytes().into()
}

fn mac(key: &[u8]) -> HmacSha256 {
    // HMAC-SHA256 accepts keys of any length.
    #[allow(clippy::expect_used)]
    HmacSha256::new_from_slice(key).expect("hmac accepts any key length")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::{MetadataWriter, Tag};

    #[test]
    fn session_key_is_sha1_prefix() {
        let key = session_key_from_shared_secret(b"shared");
        use sha1::Digest;
        let digest = Sha1::digest(b"shared");
        assert_eq!(&key[..], &digest[..16]);
    }

    #[test]
    fn derived_keys_differ_by_label() {
        let session_key = [0x11u8; 16];
        assert_ne!(
            derive_signing_key(&session_key),
            derive_session_info_key(&session_key)
        );
    }

    #[test]
    fn tag_covers_metadata_separator_and_payload() {
        let signing_key = derive_signing_key(&[0x22u8; 16]);
        let mut w = MetadataWriter::new();
        w.add(Tag::Domain, &[2]).unwrap();
        let metadata = w.entries().to_vec();

        let tag = compute_command_tag(&signing_key, &metadata, b"payload");

        // Equivalent single-buffer computation.
        let mut joined = metadata.clone();
        joined.push(0xFF);
        joined.extend_from_slice(b"payload");
        assert_eq!(tag, hmac_sha256(&signing_key, &joined));

        // Moving a byte across the separator must change the tag.
        let shifted = compute_command_tag(&signing_key, &metadata, b"payloadX");
        assert_ne!(tag, shifted);
    }

    #[test]
    fn session_info_tag_round_trip() {
        let info_key = derive_session_info_key(&[0x33u8; 16]);
        let info = b"session-info-bytes";
        let tag = hmac_sha256(&info_key, info);
        assert!(verify_session_info_tag(&info_key, info, &tag));
        assert!(!verify_session_info_tag(&info_key, b"tampered", &tag));
        assert!(!verify_session_info_tag(&info_key, info, &tag[..16]));
    }
}
