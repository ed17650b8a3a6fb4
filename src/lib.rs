//! # UAV Monitor Library
//!
//! Near-real-time telemetry acquisition for an uncrewed vehicle.
//!
//! This library connects to the vehicle over a MAVLink link, scores link
//! quality, builds timestamped telemetry snapshots, and falls back to the
//! newest stored snapshot whenever no live reading is possible.

pub mod broadcast;
pub mod config;
pub mod detection;
pub mod error;
pub mod link;
pub mod logging;
pub mod mavlink;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod telemetry;
