//! Schnorr signatures over P-256 for the telemetry hello handshake.
//!
//! The vehicle proves possession of its enrolled key by signing the
//! receiver's nonce: with generator `G`, public key `P = x·G` and nonce
//! commitment `R = k·G`, the challenge is
//! `e = SHA-256(R || P || message) mod n` and the response
//! `s = k + e·x mod n`. Verification checks `s·G == R + e·P`.
//!
//! Signatures are `R (65-byte uncompressed SEC1) || s (32 bytes)`.

use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::elliptic_curve::PrimeField;
use p256::{FieldBytes, NonZeroScalar, ProjectivePoint, PublicKey, Scalar, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Encoded signature length: 65-byte point plus 32-byte scalar.
pub const SIGNATURE_LEN: usize = 97;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchnorrError {
    #[error("signature must be {SIGNATURE_LEN} bytes")]
    Length,

    #[error("invalid nonce commitment encoding")]
    BadCommitment,

    #[error("invalid response scalar encoding")]
    BadScalar,

    #[error("signature verification failed")]
    Rejected,
}

/// Sign `message` with the vehicle key. Used by test harnesses and the
/// enrollment tooling; the daemon itself only verifies.
#[must_use]
pub fn sign(key: &SecretKey, message: &[u8]) -> Vec<u8> {
    let x = key.to_nonzero_scalar();
    let k = NonZeroScalar::random(&mut rand::rngs::OsRng);
    let r_point = ProjectivePoint::GENERATOR * *k;
    let r_encoded = r_point.to_encoded_point(false);

    let public = key.public_key();
    let e = challenge(r_encoded.as_bytes(), &public, message);
    let s = *k + e * *x;

    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(r_encoded.as_bytes());
    out.extend_from_slice(&s.to_bytes());
    out
}

/// Verify a signature over `message` against the enrolled public key.
pub fn verify(public: &PublicKey, message: &[u8], signature: &[u8]) -> Result<(), SchnorrError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SchnorrError::Length);
    }
    let (r_bytes, s_bytes) = signature.split_at(65);

    let r_point = PublicKey::from_sec1_bytes(r_bytes)
        .map_err(|_| SchnorrError::BadCommitment)?
        .to_projective();
    let s: Option<Scalar> =
        Scalar::from_repr(FieldBytes::clone_from_slice(s_bytes)).into();
    let s = s.ok_or(SchnorrError::BadScalar)?;

    let e = challenge(r_bytes, public, message);
    let lhs = ProjectivePoint::GENERATOR * s;
    let rhs = r_point + public.to_projective() * e;
    if lhs == rhs {
        Ok(())
    } else {
        Err(SchnorrError::Rejected)
    }
}

fn challenge(r_bytes: &[u8], public: &PublicKey, message: &[u8]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(r_bytes);
    hasher.update(public.to_encoded_point(false).as_bytes());
    hasher.update(message);
    let digest = hasher.finalize();
    <Scalar as Reduce<p256::elliptic_curve::bigint::U256>>::reduce_bytes(&digest)
}
