//! # MAVLink Protocol Module
//!
//! Minimal implementation of the MAVLink wire protocol for telemetry reception.
//!
//! This module handles:
//! - Frame synchronization for v1 (`0xFE`) and v2 (`0xFD`) frames
//! - CRC-16/MCRF4XX (X.25) checksums with per-message CRC_EXTRA
//! - Decoding the telemetry messages the monitor consumes
//! - Encoding the GCS heartbeat the monitor announces itself with

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
