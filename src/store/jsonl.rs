//! # JSONL Store
//!
//! Durable backend writing one JSON Lines file series per collection.
//!
//! Layout: `<data_dir>/<collection>/<collection>_<index>.jsonl`, each line
//! `{"key": ..., "record": {...}}`. A file is closed after
//! `max_records_per_file` lines and only the newest `max_files_to_keep`
//! files are retained.
//!
//! The newest record and the record count of each collection are kept in
//! memory. The files are scanned once when a collection is first touched
//! and again only after rotation prunes a file.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ensure_object, parse_timestamp, select_latest, DocumentStore, KeyGenerator, StoredRecord};
use crate::error::{MonitorError, Result};

/// Write cursor of one collection
#[derive(Debug, Clone, Copy)]
struct Cursor {
    file_index: u64,
    records_in_file: usize,
}

/// In-memory view of one collection
#[derive(Debug, Clone)]
struct CollectionState {
    cursor: Cursor,
    latest: Option<StoredRecord>,
    count: usize,
}

impl CollectionState {
    fn record_write(&mut self, stored: StoredRecord) {
        self.count += 1;
        self.cursor.records_in_file += 1;

        // Same ordering as `select_latest`: later writes win ties
        let replaces = match &self.latest {
            Some(current) => parse_timestamp(&stored.record) >= parse_timestamp(&current.record),
            None => true,
        };
        if replaces {
            self.latest = Some(stored);
        }
    }
}

pub struct JsonlStore {
    root: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    collections: Mutex<HashMap<String, CollectionState>>,
    keys: KeyGenerator,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or a limit is zero
    pub async fn open<P: AsRef<Path>>(root: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        if max_records_per_file == 0 || max_files_to_keep == 0 {
            return Err(MonitorError::Persistence(
                "JSONL store limits must be greater than 0".to_string(),
            ));
        }

        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            MonitorError::Persistence(format!("Failed to create {}: {}", root.display(), e))
        })?;
        info!("JSONL store opened at {}", root.display());

        Ok(Self {
            root,
            max_records_per_file,
            max_files_to_keep,
            collections: Mutex::new(HashMap::new()),
            keys: KeyGenerator::new(),
        })
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(MonitorError::Persistence(format!("Invalid collection name '{}'", collection)));
        }
        Ok(self.root.join(collection))
    }

    fn file_path(dir: &Path, collection: &str, index: u64) -> PathBuf {
        dir.join(format!("{}_{:06}.jsonl", collection, index))
    }

    /// Indices of the collection's files, oldest first
    async fn file_indices(dir: &Path, collection: &str) -> Result<Vec<u64>> {
        let mut indices = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(indices),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_", collection);
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(".jsonl"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(index) = index {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Scan a collection's files into its in-memory state
    async fn load_state(dir: &Path, collection: &str) -> Result<CollectionState> {
        let mut records = Vec::new();
        let mut cursor = Cursor { file_index: 0, records_in_file: 0 };

        for index in Self::file_indices(dir, collection).await? {
            let path = Self::file_path(dir, collection, index);
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                // Pruned between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            cursor = Cursor {
                file_index: index,
                records_in_file: 0,
            };
            for (line_no, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                cursor.records_in_file += 1;
                match serde_json::from_str::<StoredRecord>(line) {
                    Ok(stored) => records.push(stored),
                    Err(e) => warn!("Skipping corrupt line {} in {}: {}", line_no + 1, path.display(), e),
                }
            }
        }

        debug!("Loaded {} record(s) of '{}' from disk", records.len(), collection);
        Ok(CollectionState {
            cursor,
            latest: select_latest(&records).cloned(),
            count: records.len(),
        })
    }

    /// Delete the oldest files beyond the retention limit
    ///
    /// # Returns
    ///
    /// * `Result<bool>` - whether any file was deleted
    async fn prune(&self, dir: &Path, collection: &str) -> Result<bool> {
        let indices = Self::file_indices(dir, collection).await?;
        if indices.len() <= self.max_files_to_keep {
            return Ok(false);
        }
        let excess = indices.len() - self.max_files_to_keep;
        for index in &indices[..excess] {
            let path = Self::file_path(dir, collection, *index);
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Removed rotated file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(true)
    }

    /// In-memory state of a collection, loaded from disk on first use
    async fn state(&self, collection: &str) -> Result<CollectionState> {
        let dir = self.collection_dir(collection)?;
        let mut collections = self.collections.lock().await;
        if let Some(state) = collections.get(collection) {
            return Ok(state.clone());
        }

        let state = Self::load_state(&dir, collection).await?;
        collections.insert(collection.to_string(), state.clone());
        Ok(state)
    }
}

#[async_trait]
impl DocumentStore for JsonlStore {
    async fn write(&self, collection: &str, record: Value) -> Result<String> {
        ensure_object(collection, &record)?;
        let dir = self.collection_dir(collection)?;

        fs::create_dir_all(&dir).await?;

        let mut collections = self.collections.lock().await;
        let mut state = match collections.get(collection) {
            Some(state) => state.clone(),
            None => Self::load_state(&dir, collection).await?,
        };

        let rotated = state.cursor.records_in_file >= self.max_records_per_file;
        if rotated {
            state.cursor.file_index += 1;
            state.cursor.records_in_file = 0;
        }

        let stored = StoredRecord {
            key: self.keys.next_key(),
            record,
        };
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        let path = Self::file_path(&dir, collection, state.cursor.file_index);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| MonitorError::Persistence(format!("Failed to open {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MonitorError::Persistence(format!("Failed to write {}: {}", path.display(), e)))?;
        file.flush().await?;

        let key = stored.key.clone();
        state.record_write(stored);
        collections.insert(collection.to_string(), state);

        if rotated {
            debug!("Rotated '{}' to {}", collection, path.display());
            if self.prune(&dir, collection).await? {
                // Pruned records may include the newest one; rescan lazily
                collections.remove(collection);
            }
        }

        Ok(key)
    }

    async fn read_latest(&self, collection: &str) -> Result<Option<StoredRecord>> {
        Ok(self.state(collection).await?.latest)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.state(collection).await?.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(second: u32, battery: u32) -> Value {
        json!({ "timestamp": format!("2024-05-01T10:00:{:02}Z", second), "battery": battery })
    }

    #[tokio::test]
    async fn test_write_and_read_latest() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();

        store.write("telemetry", record(1, 90)).await.unwrap();
        let key = store.write("telemetry", record(3, 88)).await.unwrap();
        store.write("telemetry", record(2, 89)).await.unwrap();

        let latest = store.read_latest("telemetry").await.unwrap().unwrap();
        assert_eq!(latest.key, key);
        assert_eq!(latest.record["battery"], 88);
        assert_eq!(store.count("telemetry").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
        assert!(store.read_latest("telemetry").await.unwrap().is_none());
        assert_eq!(store.count("telemetry").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rotation_and_retention() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 2, 2).await.unwrap();

        for i in 0..7 {
            store.write("telemetry", record(i, 100 - i)).await.unwrap();
        }

        // 7 records at 2 per file = 4 files; only the newest 2 are kept
        let files = JsonlStore::file_indices(&dir.path().join("telemetry"), "telemetry").await.unwrap();
        assert_eq!(files, vec![2, 3]);
        assert_eq!(store.count("telemetry").await.unwrap(), 3);

        let latest = store.read_latest("telemetry").await.unwrap().unwrap();
        assert_eq!(latest.record["battery"], 94);
    }

    #[tokio::test]
    async fn test_reopen_continues_current_file() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonlStore::open(dir.path(), 3, 5).await.unwrap();
            store.write("telemetry", record(1, 90)).await.unwrap();
            store.write("telemetry", record(2, 89)).await.unwrap();
        }

        let store = JsonlStore::open(dir.path(), 3, 5).await.unwrap();
        store.write("telemetry", record(3, 88)).await.unwrap();
        store.write("telemetry", record(4, 87)).await.unwrap();

        let files = JsonlStore::file_indices(&dir.path().join("telemetry"), "telemetry").await.unwrap();
        assert_eq!(files, vec![0, 1]);
        assert_eq!(store.count("telemetry").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
        store.write("telemetry", record(1, 90)).await.unwrap();

        let path = JsonlStore::file_path(&dir.path().join("telemetry"), "telemetry", 0);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json\n");
        std::fs::write(&path, contents).unwrap();

        assert_eq!(store.count("telemetry").await.unwrap(), 1);

        let reopened = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
        assert_eq!(reopened.count("telemetry").await.unwrap(), 1);
        assert_eq!(reopened.read_latest("telemetry").await.unwrap().unwrap().record["battery"], 90);
    }

    #[tokio::test]
    async fn test_latest_survives_reopen_and_older_writes() {
        let dir = TempDir::new().unwrap();
        let newest = {
            let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
            store.write("telemetry", record(1, 90)).await.unwrap();
            let key = store.write("telemetry", record(5, 86)).await.unwrap();
            store.write("telemetry", record(3, 88)).await.unwrap();
            key
        };

        let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
        assert_eq!(store.read_latest("telemetry").await.unwrap().unwrap().key, newest);

        store.write("telemetry", record(2, 89)).await.unwrap();
        let latest = store.read_latest("telemetry").await.unwrap().unwrap();
        assert_eq!(latest.key, newest);
        assert_eq!(latest.record["battery"], 86);
        assert_eq!(store.count("telemetry").await.unwrap(), 4);

        let key = store.write("telemetry", record(5, 85)).await.unwrap();
        assert_eq!(store.read_latest("telemetry").await.unwrap().unwrap().key, key);
    }

    #[tokio::test]
    async fn test_reads_are_served_from_memory_once_loaded() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
        let key = store.write("telemetry", record(1, 90)).await.unwrap();

        // Files changed behind the store's back are not rescanned
        std::fs::remove_dir_all(dir.path().join("telemetry")).unwrap();

        assert_eq!(store.read_latest("telemetry").await.unwrap().unwrap().key, key);
        assert_eq!(store.count("telemetry").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pruning_rescans_latest() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 1, 1).await.unwrap();

        // Newest timestamp first; it lands in a file that gets pruned
        store.write("telemetry", record(9, 90)).await.unwrap();
        store.write("telemetry", record(1, 89)).await.unwrap();
        let key = store.write("telemetry", record(2, 88)).await.unwrap();

        let latest = store.read_latest("telemetry").await.unwrap().unwrap();
        assert_eq!(latest.key, key);
        assert_eq!(store.count("telemetry").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), 100, 5).await.unwrap();
        assert!(store.write("../escape", record(1, 90)).await.is_err());
        assert!(store.write("", record(1, 90)).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_limits_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(JsonlStore::open(dir.path(), 0, 5).await.is_err());
        assert!(JsonlStore::open(dir.path(), 5, 0).await.is_err());
    }
}
