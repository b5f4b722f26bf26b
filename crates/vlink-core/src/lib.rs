// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

//! Domain core for the vlink edge-node runtime.
//!
//! Everything here is synchronous and network-free: the telemetry field
//! registry, decoded frames and the latest-value store, the
//! telemetry→VehicleData projection used for cache warming, the
//! dual-gate emission filter, the trigger engine, and the file-backed
//! response cache. The daemon crate wires these into the async
//! pipeline.

pub mod cache;
pub mod error;
pub mod fields;
pub mod filter;
pub mod mapper;
pub mod store;
pub mod trigger;
pub mod units;
pub mod value;

pub use error::{VlinkError, VlinkResult};
pub use value::{FieldValue, TelemetryFrame};
