//! Record stores: id -> opaque record persistence, independent of the search index.

pub mod cached;
pub mod memory;
pub mod redis_store;

pub use self::cached::{CachedStore, CachedStoreConfig};
pub use self::memory::{MemoryStore, MemoryStoreConfig};
pub use self::redis_store::{RedisClient, RedisStore, RedisStoreConfig, StoreClient};

use crate::config::ConfigRecord;
use crate::error::{Result, SimilarityError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Opaque value associated with an id (label, metadata, ...).
pub type Record = serde_json::Value;

/// Id -> record mapping with its own lifecycle.
pub trait Store: Send + fmt::Debug {
    /// Discriminator used by the factory to rebuild this store.
    fn canonical_name(&self) -> &'static str;

    /// Fetch the record stored under `idx`.
    fn get(&mut self, idx: u64) -> Result<Option<Record>>;

    /// Store `record` under `idx`, replacing any previous value.
    fn set(&mut self, idx: u64, record: Record) -> Result<()>;

    /// Remove the record under `idx`. Returns whether one existed.
    fn delete(&mut self, idx: u64) -> Result<bool>;

    /// Number of stored records.
    fn size(&mut self) -> Result<usize>;

    /// Store records pairwise; equivalent to calling `set` in order.
    fn batch_set(&mut self, idxs: &[u64], records: Vec<Record>) -> Result<()> {
        if idxs.len() != records.len() {
            return Err(SimilarityError::RecordBatchMismatch {
                records: records.len(),
                idxs: idxs.len(),
            });
        }
        idxs.iter()
            .zip(records)
            .try_for_each(|(&idx, record)| self.set(idx, record))
    }

    /// Fetch several records, in the order of `idxs`.
    fn batch_get(&mut self, idxs: &[u64]) -> Result<Vec<Option<Record>>> {
        idxs.iter().map(|&idx| self.get(idx)).collect()
    }

    /// Remove every record.
    fn reset(&mut self) -> Result<()>;

    /// Persist every record into the directory `path`.
    fn save(&mut self, path: &Path) -> Result<()>;

    /// Replace the content with what was saved at `path`.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Configuration record; the factory turns it back into an equivalent store.
    fn get_config(&self) -> ConfigRecord;
}

/// On-disk form shared by the store variants.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub records: BTreeMap<u64, Record>,
}
