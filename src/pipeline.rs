//! # Telemetry Pipeline
//!
//! One pass of Resolve → Drain → Estimate → Build → Publish/Persist, plus
//! the read contract offered to consumers.
//!
//! This module handles:
//! - Building live snapshots from the memoized link session
//! - Substituting the newest stored snapshot when the link is down or fails
//! - Persisting live snapshots (autosave)
//! - Turning positive fire detections into reports and alerts (event sync)

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, TOPIC_FIRE_ALERT, TOPIC_TELEMETRY};
use crate::config::{Config, DetectionConfig};
use crate::detection::{build_report, is_positive, EventSyncOutcome};
use crate::error::{MonitorError, Result};
use crate::link::drain::drain;
use crate::link::manager::LinkManager;
use crate::store::{ensure_object, DocumentStore};
use crate::telemetry::fallback::latest_or_fallback;
use crate::telemetry::qos::{estimate, GpsQuality, RollingCounters};
use crate::telemetry::snapshot::{build, Source, TelemetrySnapshot};

/// `source` given to records pushed from outside the pipeline
pub const MANUAL_SOURCE: &str = "manual";

/// Outcome of a telemetry read
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRead {
    /// Built from the connected link in this cycle
    Live(TelemetrySnapshot),
    /// Newest durable snapshot, served because no live read was possible
    Fallback(TelemetrySnapshot),
    /// No link and nothing stored
    Unavailable,
}

impl TelemetryRead {
    pub fn snapshot(&self) -> Option<&TelemetrySnapshot> {
        match self {
            TelemetryRead::Live(snapshot) | TelemetryRead::Fallback(snapshot) => Some(snapshot),
            TelemetryRead::Unavailable => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        self.snapshot().map(|s| s.source)
    }
}

/// Pipeline parameters taken from the configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub telemetry_collection: String,
    pub max_messages_per_drain: usize,
    /// Live reads fail once the vehicle has been silent this long
    pub heartbeat_timeout: Duration,
    pub detection: DetectionConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            telemetry_collection: config.store.telemetry_collection.clone(),
            max_messages_per_drain: config.link.max_messages_per_drain,
            heartbeat_timeout: Duration::from_millis(config.link.heartbeat_timeout_ms),
            detection: config.detection.clone(),
        }
    }
}

/// Shared by the scheduler loops and any read-side consumer
pub struct Pipeline {
    link: Arc<LinkManager>,
    store: Arc<dyn DocumentStore>,
    broadcaster: Arc<dyn Broadcaster>,
    settings: PipelineSettings,
    latest_live: watch::Sender<Option<TelemetrySnapshot>>,
    last_reported: Mutex<Option<String>>,
}

impl Pipeline {
    pub fn new(
        link: Arc<LinkManager>,
        store: Arc<dyn DocumentStore>,
        broadcaster: Arc<dyn Broadcaster>,
        settings: PipelineSettings,
    ) -> Self {
        let (latest_live, _) = watch::channel(None);
        Self {
            link,
            store,
            broadcaster,
            settings,
            latest_live,
            last_reported: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<LinkManager> {
        &self.link
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Follow the live snapshots published by the fast poll
    pub fn subscribe_live(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.latest_live.subscribe()
    }

    /// Build a live snapshot, if a link is available
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - no candidate endpoint answered
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Read` if the transport fails or the vehicle
    /// heartbeat is stale
    pub async fn read_live(&self, counters: &mut RollingCounters) -> Result<Option<TelemetrySnapshot>> {
        let session = match self.link.acquire().await {
            Some(session) => session,
            None => return Ok(None),
        };
        counters.track_session(session.id());

        let mut drained = drain(&session, self.settings.max_messages_per_drain).await?;
        let last_heartbeat = session.last_heartbeat().await;
        drained.last_heartbeat_seen = drained.last_heartbeat_seen.or(last_heartbeat);

        let now = Instant::now();
        let silent_for = last_heartbeat.map(|seen| now.saturating_duration_since(seen));
        if silent_for.map_or(true, |silent| silent > self.settings.heartbeat_timeout) {
            return Err(MonitorError::Read(format!(
                "No heartbeat from {} within {} ms",
                session.endpoint(),
                self.settings.heartbeat_timeout.as_millis()
            )));
        }

        if !session.is_connected() {
            return Err(MonitorError::Read(format!("Link to {} closed during read", session.endpoint())));
        }

        let vehicle = session.vehicle_state().await;
        let gps = GpsQuality {
            fix_type: vehicle.gps_fix_type,
            satellites_visible: vehicle.satellites_visible,
        };
        let qos = estimate(counters, &drained, gps, now);

        Ok(Some(build(&vehicle, qos)))
    }

    /// Live read, falling back to the store when it is not possible
    ///
    /// A failed live read releases the link so the next cycle reconnects.
    ///
    /// # Errors
    ///
    /// Returns error only if the fallback store read fails
    pub async fn poll(&self, counters: &mut RollingCounters) -> Result<TelemetryRead> {
        match self.read_live(counters).await {
            Ok(Some(snapshot)) => return Ok(TelemetryRead::Live(snapshot)),
            Ok(None) => debug!("No vehicle link, reading fallback"),
            Err(e) => {
                warn!("Live telemetry read failed: {}", e);
                self.link.release().await;
            }
        }
        self.fallback().await
    }

    async fn fallback(&self) -> Result<TelemetryRead> {
        let snapshot = latest_or_fallback(self.store.as_ref(), &self.settings.telemetry_collection).await?;
        Ok(snapshot.map_or(TelemetryRead::Unavailable, TelemetryRead::Fallback))
    }

    /// One fast-poll cycle: read and publish on the telemetry topic
    ///
    /// Nothing is published when no data is available at all.
    pub async fn fast_poll_tick(&self, counters: &mut RollingCounters) -> Result<TelemetryRead> {
        let read = self.poll(counters).await?;

        match &read {
            TelemetryRead::Live(snapshot) => {
                let record = snapshot.to_record()?;
                self.latest_live.send_replace(Some(snapshot.clone()));
                self.broadcaster.publish(TOPIC_TELEMETRY, record);
            }
            TelemetryRead::Fallback(snapshot) => {
                let record = snapshot.to_record()?;
                self.latest_live.send_replace(None);
                self.broadcaster.publish(TOPIC_TELEMETRY, record);
            }
            TelemetryRead::Unavailable => {
                self.latest_live.send_replace(None);
                debug!("No telemetry available to publish");
            }
        }

        Ok(read)
    }

    /// Persist the newest live snapshot with its link metrics stripped
    ///
    /// # Returns
    ///
    /// * `Ok(Some(key))` - store key of the written record
    /// * `Ok(None)` - skipped, there is no live link
    pub async fn autosave_tick(&self) -> Result<Option<String>> {
        if !self.link.is_connected() {
            debug!("Autosave skipped, no live link");
            return Ok(None);
        }

        let live = self.latest_live.borrow().clone();
        let snapshot = match live {
            Some(snapshot) => snapshot,
            None => {
                debug!("Autosave skipped, no live snapshot yet");
                return Ok(None);
            }
        };

        let record = snapshot.without_qos().to_record()?;
        let key = self.store.write(&self.settings.telemetry_collection, record).await?;
        info!("Autosaved telemetry snapshot {}", key);
        Ok(Some(key))
    }

    /// Report the newest detection feed record if it is a new positive
    pub async fn event_sync_tick(&self) -> Result<EventSyncOutcome> {
        let detection = &self.settings.detection;
        let mut last_reported = self.last_reported.lock().await;

        let latest = match self.store.read_latest(&detection.feed_collection).await? {
            Some(latest) => latest,
            None => return Ok(EventSyncOutcome::NoData),
        };

        if !is_positive(&latest.record) {
            return Ok(EventSyncOutcome::NoFire);
        }

        if last_reported.as_deref() == Some(latest.key.as_str()) {
            return Ok(EventSyncOutcome::AlreadyReported);
        }

        let environment = self
            .store
            .read_latest(&detection.environment_collection)
            .await?
            .map(|stored| stored.record);

        let report = match build_report(&latest, environment.as_ref(), detection.severity_threshold) {
            Some(report) => report,
            None => return Ok(EventSyncOutcome::NoFire),
        };

        let record = serde_json::to_value(&report)?;
        let report_key = self.store.write(&detection.reports_collection, record.clone()).await?;
        self.broadcaster.publish(TOPIC_FIRE_ALERT, record);
        *last_reported = Some(latest.key.clone());

        info!(
            severity = ?report.severity,
            temperature = ?report.temperature,
            "Fire detection {} reported as {}",
            latest.key,
            report_key
        );

        Ok(EventSyncOutcome::Reported {
            report_key,
            severity: report.severity,
        })
    }

    /// Current telemetry for on-demand consumers
    ///
    /// Live while the link is connected and a live snapshot exists,
    /// otherwise the fallback bridge.
    pub async fn latest(&self) -> Result<TelemetryRead> {
        if self.link.is_connected() {
            let live = self.latest_live.borrow().clone();
            if let Some(snapshot) = live {
                return Ok(TelemetryRead::Live(snapshot));
            }
        }
        self.fallback().await
    }

    /// Append an externally supplied record to the telemetry collection
    ///
    /// `timestamp` (now) and `source` (`"manual"`) are filled in when absent.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Persistence` if the record is not a JSON object
    pub async fn push_manual(&self, mut record: Value) -> Result<String> {
        let collection = &self.settings.telemetry_collection;
        ensure_object(collection, &record)?;

        if let Some(fields) = record.as_object_mut() {
            fields
                .entry("timestamp")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)));
            fields
                .entry("source")
                .or_insert_with(|| Value::String(MANUAL_SOURCE.to_string()));
        }

        let key = self.store.write(collection, record).await?;
        debug!("Manual telemetry record stored as {}", key);
        Ok(key)
    }
}
