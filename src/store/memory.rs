//! In-memory record store

use crate::config::{to_record, ConfigRecord};
use crate::error::Result;
use crate::persistence;
use crate::store::{Record, Store, StoreSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MEMORY_STORE: &str = "MemoryStore";

/// Construction parameters of a [`MemoryStore`] (none besides the discriminator).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryStoreConfig {}

/// Records held in an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: BTreeMap<u64, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(_config: MemoryStoreConfig) -> Self {
        Self::new()
    }

    /// Iterate over `(idx, record)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Record)> {
        self.records.iter()
    }
}

impl Store for MemoryStore {
    fn canonical_name(&self) -> &'static str {
        MEMORY_STORE
    }

    fn get(&mut self, idx: u64) -> Result<Option<Record>> {
        Ok(self.records.get(&idx).cloned())
    }

    fn set(&mut self, idx: u64, record: Record) -> Result<()> {
        self.records.insert(idx, record);
        Ok(())
    }

    fn delete(&mut self, idx: u64) -> Result<bool> {
        Ok(self.records.remove(&idx).is_some())
    }

    fn size(&mut self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn reset(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        let snapshot = StoreSnapshot {
            records: self.records.clone(),
        };
        persistence::save_store(path, &snapshot)?;
        tracing::info!("Saved {} records to {}", self.records.len(), path.display());
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let snapshot: StoreSnapshot = persistence::load_store(path)?;
        self.records = snapshot.records;
        tracing::info!("Loaded {} records from {}", self.records.len(), path.display());
        Ok(())
    }

    fn get_config(&self) -> ConfigRecord {
        to_record(&MemoryStoreConfig {}, MEMORY_STORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimilarityError;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_set_get_delete() {
        let mut store = MemoryStore::new();
        store.set(1, json!({"label": "cat"})).unwrap();

        assert_eq!(store.get(1).unwrap(), Some(json!({"label": "cat"})));
        assert_eq!(store.get(2).unwrap(), None);
        assert!(store.delete(1).unwrap());
        assert!(!store.delete(1).unwrap());
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_set_overwrites() {
        let mut store = MemoryStore::new();
        store.set(1, json!(1)).unwrap();
        store.set(1, json!(2)).unwrap();
        assert_eq!(store.get(1).unwrap(), Some(json!(2)));
        assert_eq!(store.size().unwrap(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryStore::new();
        store.set(3, json!("three")).unwrap();
        store.set(u64::MAX, json!([1, 2])).unwrap();
        store.save(dir.path()).unwrap();

        let mut restored = MemoryStore::new();
        restored.set(9, json!("stale")).unwrap();
        restored.load(dir.path()).unwrap();

        assert_eq!(restored.size().unwrap(), 2);
        assert_eq!(restored.get(3).unwrap(), Some(json!("three")));
        assert_eq!(restored.get(u64::MAX).unwrap(), Some(json!([1, 2])));
        assert_eq!(restored.get(9).unwrap(), None);
    }

    #[test]
    fn test_load_missing_is_storage_io() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryStore::new();
        store.set(1, json!(1)).unwrap();
        assert!(matches!(
            store.load(&dir.path().join("missing")),
            Err(SimilarityError::StorageIo { .. })
        ));
        assert_eq!(store.size().unwrap(), 1);
    }

    #[test]
    fn test_get_config() {
        let config = MemoryStore::new().get_config();
        assert_eq!(config.len(), 1);
        assert_eq!(config["canonical_name"], "MemoryStore");
    }
}
