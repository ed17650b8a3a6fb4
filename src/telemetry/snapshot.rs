//! # Snapshot Builder
//!
//! One immutable, timestamped reading of vehicle state plus link quality.
//! Every numeric field is a finite value or an explicit `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::qos::QosMetrics;
use super::round_to;
use super::state::VehicleState;

/// Decimal places kept for latitude and longitude
const POSITION_DECIMALS: i32 = 6;

/// Decimal places kept for every other reading
const READING_DECIMALS: i32 = 2;

/// Where a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttitudeReading {
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub fix_type: Option<u8>,
    pub satellites_visible: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub battery: Option<f64>,
    pub altitude: Option<f64>,
    pub sonar_range: Option<f64>,
    pub heading: Option<f64>,
    pub airspeed: Option<f64>,
    pub groundspeed: Option<f64>,
    pub attitude: AttitudeReading,
    pub gps: GpsReading,
    /// Present only on live snapshots
    pub qos: Option<QosMetrics>,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

/// Defensive numeric read: non-finite values become `None`
pub fn reading(value: Option<f64>, decimals: i32) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| round_to(v, decimals))
}

/// Build a live snapshot stamped now
pub fn build(vehicle: &VehicleState, qos: QosMetrics) -> TelemetrySnapshot {
    build_at(vehicle, qos, Utc::now())
}

/// Build a live snapshot with an explicit timestamp
pub fn build_at(vehicle: &VehicleState, qos: QosMetrics, timestamp: DateTime<Utc>) -> TelemetrySnapshot {
    TelemetrySnapshot {
        battery: reading(vehicle.battery_remaining, READING_DECIMALS),
        altitude: reading(vehicle.effective_altitude(), READING_DECIMALS),
        sonar_range: reading(vehicle.rangefinder_distance, READING_DECIMALS),
        heading: reading(vehicle.heading, READING_DECIMALS),
        airspeed: reading(vehicle.airspeed, READING_DECIMALS),
        groundspeed: reading(vehicle.groundspeed, READING_DECIMALS),
        attitude: AttitudeReading {
            roll: reading(vehicle.roll, READING_DECIMALS),
            pitch: reading(vehicle.pitch, READING_DECIMALS),
            yaw: reading(vehicle.yaw, READING_DECIMALS),
        },
        gps: GpsReading {
            latitude: reading(vehicle.latitude, POSITION_DECIMALS),
            longitude: reading(vehicle.longitude, POSITION_DECIMALS),
            altitude: reading(vehicle.altitude_msl, READING_DECIMALS),
            fix_type: vehicle.gps_fix_type,
            satellites_visible: vehicle.satellites_visible,
        },
        qos: Some(qos),
        source: Source::Live,
        timestamp,
    }
}

impl TelemetrySnapshot {
    /// Rebuild a snapshot from a stored record, tagged `source`
    ///
    /// Fields that are missing or of the wrong type read as `None`; the
    /// stored `qos` is dropped.
    pub fn from_record(record: &Value, timestamp: DateTime<Utc>, source: Source) -> Self {
        let number = |path: &[&str], decimals: i32| reading(lookup(record, path).and_then(Value::as_f64), decimals);
        let small_int = |path: &[&str]| {
            lookup(record, path)
                .and_then(Value::as_u64)
                .and_then(|v| u8::try_from(v).ok())
        };

        Self {
            battery: number(&["battery"], READING_DECIMALS),
            altitude: number(&["altitude"], READING_DECIMALS),
            sonar_range: number(&["sonar_range"], READING_DECIMALS),
            heading: number(&["heading"], READING_DECIMALS),
            airspeed: number(&["airspeed"], READING_DECIMALS),
            groundspeed: number(&["groundspeed"], READING_DECIMALS),
            attitude: AttitudeReading {
                roll: number(&["attitude", "roll"], READING_DECIMALS),
                pitch: number(&["attitude", "pitch"], READING_DECIMALS),
                yaw: number(&["attitude", "yaw"], READING_DECIMALS),
            },
            gps: GpsReading {
                latitude: number(&["gps", "latitude"], POSITION_DECIMALS),
                longitude: number(&["gps", "longitude"], POSITION_DECIMALS),
                altitude: number(&["gps", "altitude"], READING_DECIMALS),
                fix_type: small_int(&["gps", "fix_type"]),
                satellites_visible: small_int(&["gps", "satellites_visible"]),
            },
            qos: None,
            source,
            timestamp,
        }
    }

    /// The flat record persisted to the store
    pub fn to_record(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Copy with link metrics removed, as persisted by autosave
    pub fn without_qos(&self) -> Self {
        Self {
            qos: None,
            ..self.clone()
        }
    }
}

fn lookup<'a>(record: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(record, |node, key| node.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn qos() -> QosMetrics {
        QosMetrics {
            score: 88,
            packet_loss_pct: Some(1.25),
            message_rate: 42.5,
            heartbeat_delay_s: Some(0.4),
            rssi: Some(201),
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_state_builds_all_null_snapshot() {
        let snapshot = build_at(&VehicleState::default(), qos(), ts());

        assert_eq!(snapshot.battery, None);
        assert_eq!(snapshot.altitude, None);
        assert_eq!(snapshot.gps, GpsReading::default());
        assert_eq!(snapshot.source, Source::Live);
        assert_eq!(snapshot.qos, Some(qos()));
    }

    #[test]
    fn test_rounding() {
        let vehicle = VehicleState {
            battery_remaining: Some(76.0),
            latitude: Some(-33.712_345_678),
            longitude: Some(151.234_567_891),
            altitude_msl: Some(123.456),
            relative_altitude: Some(10.509),
            airspeed: Some(12.3456),
            roll: Some(0.123_456),
            ..VehicleState::default()
        };

        let snapshot = build_at(&vehicle, qos(), ts());

        assert_eq!(snapshot.gps.latitude, Some(-33.712346));
        assert_eq!(snapshot.gps.longitude, Some(151.234568));
        assert_eq!(snapshot.gps.altitude, Some(123.46));
        assert_eq!(snapshot.altitude, Some(10.51));
        assert_eq!(snapshot.airspeed, Some(12.35));
        assert_eq!(snapshot.attitude.roll, Some(0.12));
    }

    #[test]
    fn test_non_finite_values_become_null() {
        let vehicle = VehicleState {
            airspeed: Some(f64::NAN),
            groundspeed: Some(f64::INFINITY),
            ..VehicleState::default()
        };

        let snapshot = build_at(&vehicle, qos(), ts());
        assert_eq!(snapshot.airspeed, None);
        assert_eq!(snapshot.groundspeed, None);
    }

    #[test]
    fn test_sonar_range_and_altitude() {
        let vehicle = VehicleState {
            relative_altitude: Some(25.0),
            rangefinder_distance: Some(3.456),
            ..VehicleState::default()
        };

        let snapshot = build_at(&vehicle, qos(), ts());
        assert_eq!(snapshot.altitude, Some(3.46));
        assert_eq!(snapshot.sonar_range, Some(3.46));
    }

    #[test]
    fn test_record_has_explicit_nulls() {
        let record = build_at(&VehicleState::default(), qos(), ts()).to_record().unwrap();

        assert_eq!(record["source"], "live");
        assert!(record.get("battery").unwrap().is_null());
        assert!(record["gps"].get("latitude").unwrap().is_null());
        assert_eq!(record["qos"]["score"], 88);
        assert_eq!(record["timestamp"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_from_record_is_defensive() {
        let record = json!({
            "battery": 55.556,
            "altitude": "high",
            "gps": { "latitude": -33.7123456789, "fix_type": 3, "satellites_visible": 400 },
            "attitude": null,
            "qos": { "score": 99 },
            "source": "live"
        });

        let snapshot = TelemetrySnapshot::from_record(&record, ts(), Source::Fallback);

        assert_eq!(snapshot.battery, Some(55.56));
        assert_eq!(snapshot.altitude, None);
        assert_eq!(snapshot.gps.latitude, Some(-33.712346));
        assert_eq!(snapshot.gps.fix_type, Some(3));
        assert_eq!(snapshot.gps.satellites_visible, None);
        assert_eq!(snapshot.attitude, AttitudeReading::default());
        assert_eq!(snapshot.qos, None);
        assert_eq!(snapshot.source, Source::Fallback);
    }

    #[test]
    fn test_without_qos() {
        let snapshot = build_at(&VehicleState::default(), qos(), ts()).without_qos();
        assert_eq!(snapshot.qos, None);
        assert_eq!(snapshot.source, Source::Live);
    }
}
