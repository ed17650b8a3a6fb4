//! # Fallback Bridge
//!
//! Serves the newest stored snapshot when no live reading is possible.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::snapshot::{Source, TelemetrySnapshot};
use crate::error::Result;
use crate::store::{parse_timestamp, DocumentStore};

/// Newest stored snapshot of `collection`, tagged `Source::Fallback`
///
/// # Returns
///
/// * `Ok(None)` - only when the collection holds no records
///
/// # Errors
///
/// Returns error if the store itself fails
pub async fn latest_or_fallback(store: &dyn DocumentStore, collection: &str) -> Result<Option<TelemetrySnapshot>> {
    let latest = match store.read_latest(collection).await? {
        Some(latest) => latest,
        None => {
            debug!("No stored snapshot in '{}'", collection);
            return Ok(None);
        }
    };

    let timestamp = parse_timestamp(&latest.record).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    debug!("Serving fallback snapshot {} from '{}'", latest.key, collection);

    Ok(Some(TelemetrySnapshot::from_record(&latest.record, timestamp, Source::Fallback)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_store_is_not_found() {
        let store = MemoryStore::new();
        assert!(latest_or_fallback(&store, "telemetry").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_returns_newest_record_as_fallback() {
        let store = MemoryStore::new();
        store
            .write("telemetry", json!({"timestamp": "2024-05-01T10:00:05Z", "battery": 80, "source": "live"}))
            .await
            .unwrap();
        store
            .write("telemetry", json!({"timestamp": "2024-05-01T10:00:01Z", "battery": 90, "source": "live"}))
            .await
            .unwrap();

        let snapshot = latest_or_fallback(&store, "telemetry").await.unwrap().unwrap();

        assert_eq!(snapshot.battery, Some(80.0));
        assert_eq!(snapshot.source, Source::Fallback);
        assert_eq!(snapshot.qos, None);
        assert_eq!(snapshot.timestamp.to_rfc3339(), "2024-05-01T10:00:05+00:00");
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_uses_epoch() {
        let store = MemoryStore::new();
        store.write("telemetry", json!({"timestamp": "soon", "battery": 10})).await.unwrap();

        let snapshot = latest_or_fallback(&store, "telemetry").await.unwrap().unwrap();
        assert_eq!(snapshot.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(snapshot.battery, Some(10.0));
    }
}
