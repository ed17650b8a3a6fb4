//! # QoS Estimator
//!
//! Derives link-quality metrics from the counters the drain maintains.
//!
//! Composite score, starting from 100:
//!
//! | Input | Penalty / bonus | When unknown |
//! |-------|-----------------|--------------|
//! | packet loss % | `-loss × 0.6` (max 60) | `-30` |
//! | heartbeat delay s | `-min(30, delay × 20)` | `-15` |
//! | RSSI (raw 0-255) | `-(100 - rssi/255 × 100) × 0.3` (max 30) | `-5` |
//! | GPS fix type | `-20` below a 3-D fix | `-20` |
//! | satellites | `+1` each, max `+15` | `0` |
//!
//! The result is rounded and clamped to 0-100.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::round_to;
use crate::link::drain::{DrainResult, RadioStatusSample};

const LOSS_WEIGHT: f64 = 0.6;
const LOSS_UNKNOWN_PENALTY: f64 = 30.0;
const HEARTBEAT_DELAY_WEIGHT: f64 = 20.0;
const HEARTBEAT_DELAY_MAX_PENALTY: f64 = 30.0;
const HEARTBEAT_UNKNOWN_PENALTY: f64 = 15.0;
const RSSI_RAW_MAX: f64 = 255.0;
const RSSI_WEIGHT: f64 = 0.3;
const RSSI_UNKNOWN_PENALTY: f64 = 5.0;
const NO_3D_FIX_PENALTY: f64 = 20.0;
const SATELLITE_BONUS_MAX: f64 = 15.0;

/// GPS fix type of a 3-D fix
pub const GPS_FIX_3D: u8 = 3;

/// Link quality as of one poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QosMetrics {
    /// 0-100, higher is better
    pub score: u8,
    /// `None` until a radio error baseline exists
    pub packet_loss_pct: Option<f64>,
    /// Messages per second since the previous poll
    pub message_rate: f64,
    /// `None` until a vehicle heartbeat has been seen
    pub heartbeat_delay_s: Option<f64>,
    /// Raw RSSI of the last radio status, if any
    pub rssi: Option<u8>,
}

/// GPS inputs to the score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpsQuality {
    pub fix_type: Option<u8>,
    pub satellites_visible: Option<u8>,
}

/// Counters carried from one poll to the next
///
/// Owned by the fast-poll loop only. Reset whenever the link session
/// changes, since error counters of a new radio link share no baseline
/// with the old one.
#[derive(Debug, Clone, Default)]
pub struct RollingCounters {
    session_id: Option<u64>,
    messages_since_tick: u64,
    last_tick: Option<Instant>,
    last_rx_errors: Option<u16>,
    last_heartbeat: Option<Instant>,
    radio: Option<RadioStatusSample>,
}

impl RollingCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the counters to a session, discarding them if it is a new one
    pub fn track_session(&mut self, session_id: u64) {
        if self.session_id != Some(session_id) {
            *self = Self {
                session_id: Some(session_id),
                ..Self::default()
            };
        }
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    /// Fold one drain cycle into the counters
    pub fn record(&mut self, drained: &DrainResult) {
        self.messages_since_tick += drained.count;
        if let Some(radio) = drained.last_radio_status {
            self.radio = Some(radio);
        }
        if let Some(seen) = drained.last_heartbeat_seen {
            self.last_heartbeat = Some(seen);
        }
    }
}

/// Compute QoS for this tick and reset the per-tick counters
///
/// # Arguments
///
/// * `counters` - Rolling counters of the current session
/// * `drained` - Result of this tick's drain
/// * `gps` - GPS fix and satellites from the vehicle mirror
/// * `now` - Tick time
///
/// # Examples
///
/// ```
/// use uav_monitor::link::DrainResult;
/// use uav_monitor::telemetry::qos::{estimate, GpsQuality, RollingCounters};
/// use tokio::time::Instant;
///
/// let mut counters = RollingCounters::new();
/// let qos = estimate(&mut counters, &DrainResult::default(), GpsQuality::default(), Instant::now());
///
/// // Nothing known yet: -30 loss, -15 heartbeat, -5 rssi, -20 gps
/// assert_eq!(qos.score, 30);
/// assert_eq!(qos.packet_loss_pct, None);
/// ```
pub fn estimate(counters: &mut RollingCounters, drained: &DrainResult, gps: GpsQuality, now: Instant) -> QosMetrics {
    counters.record(drained);

    let message_rate = match counters.last_tick {
        Some(last) => {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                counters.messages_since_tick as f64 / elapsed
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    let current_errors = counters.radio.map(|r| r.rx_errors);
    let packet_loss_pct = match (counters.last_rx_errors, current_errors) {
        (Some(previous), Some(current)) => {
            // A counter that went backwards was reset by the radio
            let delta = current.saturating_sub(previous) as f64;
            let denominator = delta + counters.messages_since_tick as f64;
            if denominator > 0.0 {
                Some((delta / denominator * 100.0).clamp(0.0, 100.0))
            } else {
                Some(0.0)
            }
        }
        _ => None,
    };

    let heartbeat_delay_s = counters
        .last_heartbeat
        .map(|seen| now.saturating_duration_since(seen).as_secs_f64());
    let rssi = counters.radio.map(|r| r.rssi);

    let score = composite_score(packet_loss_pct, heartbeat_delay_s, rssi, gps);

    if current_errors.is_some() {
        counters.last_rx_errors = current_errors;
    }
    counters.messages_since_tick = 0;
    counters.last_tick = Some(now);

    QosMetrics {
        score,
        packet_loss_pct: packet_loss_pct.map(|v| round_to(v, 2)),
        message_rate: round_to(message_rate, 2),
        heartbeat_delay_s: heartbeat_delay_s.map(|v| round_to(v, 2)),
        rssi,
    }
}

/// Weighted 0-100 score; see the module table
pub fn composite_score(
    packet_loss_pct: Option<f64>,
    heartbeat_delay_s: Option<f64>,
    rssi: Option<u8>,
    gps: GpsQuality,
) -> u8 {
    let mut score = 100.0;

    score -= match packet_loss_pct {
        Some(loss) => loss.clamp(0.0, 100.0) * LOSS_WEIGHT,
        None => LOSS_UNKNOWN_PENALTY,
    };

    score -= match heartbeat_delay_s {
        Some(delay) => (delay.max(0.0) * HEARTBEAT_DELAY_WEIGHT).min(HEARTBEAT_DELAY_MAX_PENALTY),
        None => HEARTBEAT_UNKNOWN_PENALTY,
    };

    score -= match rssi {
        Some(raw) => (100.0 - raw as f64 / RSSI_RAW_MAX * 100.0) * RSSI_WEIGHT,
        None => RSSI_UNKNOWN_PENALTY,
    };

    if gps.fix_type.map_or(true, |fix| fix < GPS_FIX_3D) {
        score -= NO_3D_FIX_PENALTY;
    }

    score += gps
        .satellites_visible
        .map_or(0.0, |sats| (sats as f64).min(SATELLITE_BONUS_MAX));

    score.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fix(fix_type: u8, satellites: u8) -> GpsQuality {
        GpsQuality {
            fix_type: Some(fix_type),
            satellites_visible: Some(satellites),
        }
    }

    fn drained(count: u64, rx_errors: Option<u16>, rssi: u8, heartbeat: Option<Instant>) -> DrainResult {
        DrainResult {
            count,
            last_radio_status: rx_errors.map(|rx_errors| RadioStatusSample {
                rssi,
                remote_rssi: rssi,
                rx_errors,
            }),
            last_heartbeat_seen: heartbeat,
            ..DrainResult::default()
        }
    }

    #[test]
    fn test_first_sample_has_unknown_loss() {
        let now = Instant::now();
        let mut counters = RollingCounters::new();

        let qos = estimate(&mut counters, &drained(20, Some(5), 255, Some(now)), fix(3, 0), now);

        assert_eq!(qos.packet_loss_pct, None);
        // 100 - 30 (unknown loss) - 0 - 0 - 0 + 0
        assert_eq!(qos.score, 70);
        assert_eq!(qos.message_rate, 0.0);
    }

    #[test]
    fn test_packet_loss_from_error_delta() {
        let t0 = Instant::now();
        let mut counters = RollingCounters::new();
        estimate(&mut counters, &drained(10, Some(100), 255, Some(t0)), fix(3, 0), t0);

        let t1 = t0 + Duration::from_secs(1);
        let qos = estimate(&mut counters, &drained(45, Some(105), 255, Some(t1)), fix(3, 0), t1);

        // 5 errors / (5 + 45 messages) = 10 %
        assert_eq!(qos.packet_loss_pct, Some(10.0));
        assert_eq!(qos.message_rate, 45.0);
        assert_eq!(qos.score, 94);
    }

    #[test]
    fn test_zero_denominator_reports_zero_loss() {
        let t0 = Instant::now();
        let mut counters = RollingCounters::new();
        estimate(&mut counters, &drained(0, Some(7), 255, None), fix(3, 0), t0);

        let t1 = t0 + Duration::from_millis(500);
        let qos = estimate(&mut counters, &drained(0, None, 255, None), fix(3, 0), t1);
        assert_eq!(qos.packet_loss_pct, Some(0.0));
    }

    #[test]
    fn test_error_counter_reset_is_not_loss() {
        let t0 = Instant::now();
        let mut counters = RollingCounters::new();
        estimate(&mut counters, &drained(10, Some(500), 255, None), fix(3, 0), t0);

        let t1 = t0 + Duration::from_secs(1);
        let qos = estimate(&mut counters, &drained(10, Some(2), 255, None), fix(3, 0), t1);
        assert_eq!(qos.packet_loss_pct, Some(0.0));
    }

    #[test]
    fn test_loss_is_bounded() {
        let t0 = Instant::now();
        let mut counters = RollingCounters::new();
        estimate(&mut counters, &drained(0, Some(0), 0, None), fix(0, 0), t0);

        let t1 = t0 + Duration::from_secs(1);
        let qos = estimate(&mut counters, &drained(0, Some(u16::MAX), 0, None), fix(0, 0), t1);

        let loss = qos.packet_loss_pct.unwrap();
        assert!((0.0..=100.0).contains(&loss));
        assert_eq!(loss, 100.0);
        assert!(qos.score <= 100);
    }

    #[test]
    fn test_heartbeat_delay_penalty_is_capped() {
        let seen = Instant::now();
        let now = seen + Duration::from_secs(2);
        let mut counters = RollingCounters::new();

        let qos = estimate(&mut counters, &drained(0, None, 0, Some(seen)), fix(3, 0), now);

        assert_eq!(qos.heartbeat_delay_s, Some(2.0));
        // 100 - 30 (loss unknown) - 30 (delay capped) - 5 (rssi unknown)
        assert_eq!(qos.score, 35);
    }

    #[test]
    fn test_heartbeat_persists_across_ticks() {
        let seen = Instant::now();
        let mut counters = RollingCounters::new();
        estimate(&mut counters, &drained(1, None, 0, Some(seen)), fix(3, 0), seen);

        let later = seen + Duration::from_millis(500);
        let qos = estimate(&mut counters, &drained(0, None, 0, None), fix(3, 0), later);
        assert_eq!(qos.heartbeat_delay_s, Some(0.5));
    }

    #[test]
    fn test_no_3d_fix_and_satellite_bonus() {
        let with_fix = composite_score(Some(0.0), Some(0.0), Some(255), fix(3, 0));
        let without_fix = composite_score(Some(0.0), Some(0.0), Some(255), fix(2, 10));

        assert_eq!(with_fix, 100);
        // -20 fix penalty, +10 satellites
        assert_eq!(without_fix, 90);
    }

    #[test]
    fn test_satellite_bonus_is_capped() {
        let score = composite_score(Some(50.0), Some(0.0), Some(255), fix(3, 30));
        // 100 - 30 + 15
        assert_eq!(score, 85);
    }

    #[test]
    fn test_unknown_fix_is_penalized() {
        let score = composite_score(Some(0.0), Some(0.0), Some(255), GpsQuality::default());
        assert_eq!(score, 80);
    }

    #[test]
    fn test_rssi_penalty() {
        // 102/255 = 40 % -> (100 - 40) * 0.3 = 18
        let score = composite_score(Some(0.0), Some(0.0), Some(102), fix(3, 0));
        assert_eq!(score, 82);
    }

    #[test]
    fn test_score_clamped_at_zero() {
        let score = composite_score(Some(100.0), Some(60.0), Some(0), fix(0, 0));
        assert_eq!(score, 0);
    }

    #[test]
    fn test_new_session_resets_counters() {
        let t0 = Instant::now();
        let mut counters = RollingCounters::new();
        counters.track_session(1);
        estimate(&mut counters, &drained(10, Some(100), 255, Some(t0)), fix(3, 0), t0);

        counters.track_session(1);
        assert!(counters.last_heartbeat().is_some());

        counters.track_session(2);
        assert_eq!(counters.session_id(), Some(2));
        assert!(counters.last_heartbeat().is_none());

        let qos = estimate(&mut counters, &drained(10, Some(300), 255, Some(t0)), fix(3, 0), t0);
        assert_eq!(qos.packet_loss_pct, None);
    }
}
