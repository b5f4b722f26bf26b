// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use thiserror::Error;

pub type VlinkResult<T> = Result<T, VlinkError>;

/// Error taxonomy surfaced out of the core.
///
/// Every variant maps to a stable code string via [`VlinkError::code`];
/// callers across transports (gateway responses, local RPC) key on the
/// code, not the message.
#[derive(Debug, Error)]
pub enum VlinkError {
    /// Transient I/O failure; the caller may retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// Bearer token expired or invalid; the upper layer refreshes.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A readonly tier rejected a write dispatch.
    #[error("command blocked by readonly tier")]
    TierBlocked,

    /// Signing required but no EC key is enrolled.
    #[error("no command signing key enrolled")]
    KeyNotEnrolled,

    /// The vehicle rejected a signed command after one re-handshake.
    #[error("vehicle rejected command signature")]
    SignatureMismatch,

    /// Session-info tag did not verify, or the peer refused the handshake.
    #[error("session handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed frame or response.
    #[error("decode error: {0}")]
    Decode(String),

    /// Fleet service throttled the request.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The vehicle must be woken before this operation; waking needs
    /// explicit caller consent.
    #[error("vehicle is asleep")]
    VehicleAsleep,

    /// Trigger definition failed validation.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Trigger registry is at capacity.
    #[error("trigger limit of {0} reached")]
    TriggerLimit(usize),

    /// Method or field name not recognized.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Malformed or missing request parameter.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VlinkError {
    /// Stable error code carried alongside the human message.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            VlinkError::Transport(_) => "Transport",
            VlinkError::Auth(_) => "Auth",
            VlinkError::TierBlocked => "TierBlocked",
            VlinkError::KeyNotEnrolled => "KeyNotEnrolled",
            VlinkError::SignatureMismatch => "SignatureMismatch",
            VlinkError::HandshakeFailed(_) => "HandshakeFailed",
            VlinkError::Decode(_) => "Decode",
            VlinkError::RateLimited { .. } => "RateLimited",
            VlinkError::VehicleAsleep => "VehicleAsleep",
            VlinkError::InvalidTrigger(_) => "InvalidTrigger",
            VlinkError::TriggerLimit(_) => "TriggerLimit",
            VlinkError::UnknownMethod(_) => "UnknownMethod",
            VlinkError::InvalidParams(_) => "InvalidParams",
            VlinkError::Internal(_) => "Internal",
        }
    }

    /// True for failures worth retrying at the caller's discretion.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            VlinkError::Transport(_) | VlinkError::RateLimited { .. }
        )
    }
}
