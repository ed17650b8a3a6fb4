//! # Fire Detection Reports
//!
//! Turns the newest record of the thermal detection feed into a fire report.
//!
//! Feed records (`sensors_thermal`) carry `fire_detected`, `max_temp`,
//! `sensor_type`, `image_url`, `fire_bbox` and `timestamp`. Environmental
//! records (`sensors_env`) contribute `humidity` and the location.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::store::StoredRecord;

/// Sensor type reported when the feed leaves it out
pub const UNKNOWN_SENSOR_TYPE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

/// `High` only when the measured temperature strictly exceeds the threshold
pub fn classify(max_temp: Option<f64>, threshold: f64) -> Severity {
    match max_temp {
        Some(temp) if temp > threshold => Severity::High,
        _ => Severity::Medium,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FireLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Report persisted and broadcast for a positive detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireReport {
    /// Feed timestamp as received, or the report time if the feed has none
    pub timestamp: Value,
    pub severity: Severity,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub sensor_type: String,
    pub image_url: Option<String>,
    pub fire_bbox: Value,
    pub location: FireLocation,
    /// Store key of the feed record that triggered the report
    pub detection_key: String,
}

/// Result of one event-sync tick
#[derive(Debug, Clone, PartialEq)]
pub enum EventSyncOutcome {
    /// The feed is empty
    NoData,
    /// Newest feed record reports no fire
    NoFire,
    /// Newest feed record was reported by an earlier tick
    AlreadyReported,
    /// A new report was written under `report_key`
    Reported { report_key: String, severity: Severity },
}

/// Whether a feed record signals a positive detection
pub fn is_positive(record: &Value) -> bool {
    record.get("fire_detected").and_then(Value::as_bool).unwrap_or(false)
}

fn number(record: Option<&Value>, field: &str) -> Option<f64> {
    record?.get(field)?.as_f64().filter(|v| v.is_finite())
}

/// Build a report from the newest feed record
///
/// # Arguments
///
/// * `detection` - Newest thermal feed record
/// * `environment` - Newest environmental record, if any
/// * `threshold` - Temperature above which severity is high
///
/// # Returns
///
/// * `Option<FireReport>` - `None` when the record is not a positive detection
pub fn build_report(detection: &StoredRecord, environment: Option<&Value>, threshold: f64) -> Option<FireReport> {
    let record = &detection.record;
    if !is_positive(record) {
        return None;
    }

    let temperature = number(Some(record), "max_temp");
    let timestamp = match record.get("timestamp") {
        Some(ts) if !ts.is_null() => ts.clone(),
        _ => Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    };

    Some(FireReport {
        timestamp,
        severity: classify(temperature, threshold),
        temperature,
        humidity: number(environment, "humidity"),
        sensor_type: record
            .get("sensor_type")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_SENSOR_TYPE)
            .to_string(),
        image_url: record.get("image_url").and_then(Value::as_str).map(str::to_string),
        fire_bbox: record.get("fire_bbox").cloned().unwrap_or(Value::Null),
        location: FireLocation {
            latitude: number(environment, "latitude"),
            longitude: number(environment, "longitude"),
        },
        detection_key: detection.key.clone(),
    })
}
