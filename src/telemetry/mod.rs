//! # Telemetry Module
//!
//! Turns the raw link traffic into published vehicle state.
//!
//! This module handles:
//! - Mirroring vehicle fields from decoded messages
//! - Estimating link quality from rolling radio and heartbeat counters
//! - Building null-tolerant, rounded snapshots
//! - Falling back to the newest stored snapshot when the link is down

pub mod fallback;
pub mod qos;
pub mod snapshot;
pub mod state;

pub use fallback::latest_or_fallback;
pub use qos::{estimate, GpsQuality, QosMetrics, RollingCounters};
pub use snapshot::{build, Source, TelemetrySnapshot};
pub use state::VehicleState;

/// Round to a fixed number of decimal places
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(-33.71234567, 6), -33.712346);
        assert_eq!(round_to(2.005, 0), 2.0);
    }
}
