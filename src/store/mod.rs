//! # Document Store
//!
//! Append-only document persistence for snapshots and reports.
//!
//! This module handles:
//! - Writing records with a generated, time-ordered key
//! - Reading the newest record of a collection by its `timestamp` field
//! - Selecting a backend from configuration

pub mod jsonl;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{MonitorError, Result};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Collection the live and manual snapshots go to
pub const TELEMETRY_COLLECTION: &str = "telemetry";

/// A record together with the key the store assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub record: Value,
}

/// Durable store collaborator
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a record and return its key
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Persistence` if the record is not a JSON object
    /// or the backend cannot write
    async fn write(&self, collection: &str, record: Value) -> Result<String>;

    /// Newest record of a collection, ordered by `timestamp`
    async fn read_latest(&self, collection: &str) -> Result<Option<StoredRecord>>;

    /// Number of records currently held in a collection
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Build the backend named in the configuration
///
/// # Errors
///
/// Returns error if the backend is unknown or its directory cannot be created
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "jsonl" => Ok(Arc::new(
            JsonlStore::open(&config.data_dir, config.max_records_per_file, config.max_files_to_keep).await?,
        )),
        other => Err(MonitorError::Persistence(format!("Unknown store backend '{}'", other))),
    }
}

/// Parse a record's `timestamp` field
///
/// Accepts RFC 3339 strings, naive ISO 8601 strings (taken as UTC) and
/// numeric Unix seconds.
pub fn parse_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    match record.get("timestamp")? {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
        }
        _ => None,
    }
}

/// Pick the newest record; later writes win ties and unparseable timestamps
///
/// `records` must be in write order.
pub fn select_latest<'a, I>(records: I) -> Option<&'a StoredRecord>
where
    I: IntoIterator<Item = &'a StoredRecord>,
{
    records
        .into_iter()
        .enumerate()
        .max_by_key(|(index, stored)| (parse_timestamp(&stored.record), *index))
        .map(|(_, stored)| stored)
}

pub(crate) fn ensure_object(collection: &str, record: &Value) -> Result<()> {
    if record.is_object() {
        Ok(())
    } else {
        Err(MonitorError::Persistence(format!(
            "Records written to '{}' must be JSON objects",
            collection
        )))
    }
}

/// Generates keys that sort in write order within a process
#[derive(Debug, Default)]
pub struct KeyGenerator {
    sequence: AtomicU64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{:013}-{:06}", Utc::now().timestamp_millis(), seq)
    }
}
