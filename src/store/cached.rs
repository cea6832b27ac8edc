//! Cache-layered store: an LRU cache in front of any backing store.
//!
//! Reads populate the cache on miss; writes and deletes go through to the
//! backing store before the cache is updated, so a `get` after a `set` on the
//! same instance always sees the written value. When the cache is full the
//! least recently used entry is evicted.

use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::{to_record, ConfigRecord, CACHED_STORE_DEFAULT_CAPACITY};
use crate::error::{Result, SimilarityError};
use crate::store::{MemoryStore, Record, Store};

pub const CACHED_STORE: &str = "CachedStore";

fn default_capacity() -> usize {
    CACHED_STORE_DEFAULT_CAPACITY
}

/// Construction parameters of a [`CachedStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedStoreConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Configuration record of the backing store.
    pub backing: ConfigRecord,
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// LRU read-through, write-through cache over a backing store.
pub struct CachedStore {
    backing: Box<dyn Store>,
    cache: LruCache<u64, Record>,
    stats: CacheStats,
}

impl std::fmt::Debug for CachedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("backing", &self.backing)
            .field("capacity", &self.cache.cap())
            .field("cached", &self.cache.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl CachedStore {
    /// Wrap `backing` with a cache holding at most `capacity` records.
    pub fn new(backing: impl Store + 'static, capacity: usize) -> Result<Self> {
        Self::with_backing(Box::new(backing), capacity)
    }

    /// Cache in front of a fresh [`MemoryStore`].
    pub fn in_memory(capacity: usize) -> Result<Self> {
        Self::new(MemoryStore::new(), capacity)
    }

    pub fn with_backing(backing: Box<dyn Store>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            SimilarityError::InvalidConfig("CachedStore capacity must be positive, got 0".to_string())
        })?;
        Ok(Self {
            backing,
            cache: LruCache::new(capacity),
            stats: CacheStats::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Number of records currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn backing(&self) -> &dyn Store {
        self.backing.as_ref()
    }
}

impl Store for CachedStore {
    fn canonical_name(&self) -> &'static str {
        CACHED_STORE
    }

    fn get(&mut self, idx: u64) -> Result<Option<Record>> {
        if let Some(record) = self.cache.get(&idx) {
            self.stats.hits += 1;
            return Ok(Some(record.clone()));
        }

        self.stats.misses += 1;
        let record = self.backing.get(idx)?;
        if let Some(record) = &record {
            self.cache.put(idx, record.clone());
        }
        Ok(record)
    }

    fn set(&mut self, idx: u64, record: Record) -> Result<()> {
        self.backing.set(idx, record.clone())?;
        self.cache.put(idx, record);
        Ok(())
    }

    fn delete(&mut self, idx: u64) -> Result<bool> {
        let existed = self.backing.delete(idx)?;
        self.cache.pop(&idx);
        Ok(existed)
    }

    fn size(&mut self) -> Result<usize> {
        self.backing.size()
    }

    fn reset(&mut self) -> Result<()> {
        self.backing.reset()?;
        self.cache.clear();
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.backing.save(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let loaded = self.backing.load(path);
        // The backing store may have changed even on failure.
        self.cache.clear();
        loaded
    }

    fn get_config(&self) -> ConfigRecord {
        let config = CachedStoreConfig {
            capacity: self.capacity(),
            backing: self.backing.get_config(),
        };
        to_record(&config, CACHED_STORE)
    }
}
