//! Process-local store backend for tests and dry runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ensure_object, select_latest, DocumentStore, KeyGenerator, StoredRecord};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredRecord>>>,
    keys: KeyGenerator,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn write(&self, collection: &str, record: Value) -> Result<String> {
        ensure_object(collection, &record)?;
        let key = self.keys.next_key();
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(StoredRecord { key: key.clone(), record });
        Ok(key)
    }

    async fn read_latest(&self, collection: &str) -> Result<Option<StoredRecord>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|records| select_latest(records))
            .cloned())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.collections.read().await.get(collection).map_or(0, Vec::len))
    }
}
