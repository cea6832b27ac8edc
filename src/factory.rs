//! Build searches and stores from configuration records.
//!
//! `make_search(&search.get_config())` yields an empty index equivalent to
//! `search`; the same holds for stores. Custom distance objects have no
//! registry name, so their records only rebuild when the name is registered.

use std::path::Path;

use crate::config::{canonical_name, from_record, ConfigRecord};
use crate::error::{Result, SimilarityError};
use crate::persistence;
use crate::search::hnsw::HNSW_SEARCH;
use crate::search::linear::LINEAR_SEARCH;
use crate::search::{HnswSearch, LinearSearch, Search};
use crate::store::cached::CACHED_STORE;
use crate::store::memory::MEMORY_STORE;
use crate::store::redis_store::REDIS_STORE;
use crate::store::{CachedStore, CachedStoreConfig, MemoryStore, RedisStore, Store};

pub type SearchConstructor = fn(&ConfigRecord) -> Result<Box<dyn Search>>;
pub type StoreConstructor = fn(&ConfigRecord) -> Result<Box<dyn Store>>;

fn linear_search(record: &ConfigRecord) -> Result<Box<dyn Search>> {
    Ok(Box::new(LinearSearch::from_config(from_record(record)?)?))
}

fn hnsw_search(record: &ConfigRecord) -> Result<Box<dyn Search>> {
    Ok(Box::new(HnswSearch::from_config(from_record(record)?)?))
}

fn memory_store(record: &ConfigRecord) -> Result<Box<dyn Store>> {
    Ok(Box::new(MemoryStore::from_config(from_record(record)?)))
}

fn cached_store(record: &ConfigRecord) -> Result<Box<dyn Store>> {
    let config: CachedStoreConfig = from_record(record)?;
    let backing = make_store(&config.backing)?;
    Ok(Box::new(CachedStore::with_backing(backing, config.capacity)?))
}

fn redis_store(record: &ConfigRecord) -> Result<Box<dyn Store>> {
    Ok(Box::new(RedisStore::new(from_record(record)?)))
}

/// Every search backend, keyed by canonical name.
pub const SEARCH_ALIASES: &[(&str, SearchConstructor)] =
    &[(LINEAR_SEARCH, linear_search), (HNSW_SEARCH, hnsw_search)];

/// Every store variant, keyed by canonical name.
pub const STORE_ALIASES: &[(&str, StoreConstructor)] = &[
    (MEMORY_STORE, memory_store),
    (CACHED_STORE, cached_store),
    (REDIS_STORE, redis_store),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Result<T> {
    table
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|&(_, constructor)| constructor)
        .ok_or_else(|| SimilarityError::UnknownType {
            name: name.to_string(),
        })
}

/// Build an empty search backend from its configuration record.
pub fn make_search(config: &ConfigRecord) -> Result<Box<dyn Search>> {
    let name = canonical_name(config)?;
    let search = lookup(SEARCH_ALIASES, name)?(config)?;
    tracing::debug!("Built {} {:?}", name, search.name());
    Ok(search)
}

/// Build a store from its configuration record.
pub fn make_store(config: &ConfigRecord) -> Result<Box<dyn Store>> {
    let name = canonical_name(config)?;
    let store = lookup(STORE_ALIASES, name)?(config)?;
    tracing::debug!("Built {}", name);
    Ok(store)
}

/// Reopen a saved search directory as whichever backend saved it.
pub fn load_search(path: &Path) -> Result<Box<dyn Search>> {
    let manifest = persistence::read_manifest(path)?;
    let mut search = make_search(&manifest.config)?;
    search.load(path)?;
    Ok(search)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{Distance, DistanceMetric};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(value: serde_json::Value) -> ConfigRecord {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_make_search_from_minimal_record() {
        let search = make_search(&record(json!({
            "canonical_name": "LinearSearch",
            "distance": "L2",
            "dim": 3,
        })))
        .unwrap();

        assert_eq!(search.canonical_name(), "LinearSearch");
        assert_eq!(search.distance().name(), "euclidean");
        assert_eq!(search.dim(), 3);
        assert!(search.is_empty());
    }

    #[test]
    fn test_search_config_roundtrip() {
        let hnsw = HnswSearch::new(DistanceMetric::Cosine, 8)
            .unwrap()
            .with_name("faces")
            .with_auto_build(false);
        let rebuilt = make_search(&hnsw.get_config()).unwrap();

        assert_eq!(rebuilt.get_config(), hnsw.get_config());
        assert_eq!(rebuilt.name(), "faces");
        assert!(rebuilt.is_built());
    }

    #[test]
    fn test_unknown_type() {
        let err = make_search(&record(json!({"canonical_name": "Annoy", "dim": 3}))).unwrap_err();
        assert!(matches!(err, SimilarityError::UnknownType { ref name } if name == "Annoy"));

        let err = make_store(&record(json!({"canonical_name": "LinearSearch"}))).unwrap_err();
        assert!(matches!(err, SimilarityError::UnknownType { .. }));
    }

    #[test]
    fn test_missing_discriminator() {
        let err = make_search(&record(json!({"distance": "cosine", "dim": 3}))).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = make_search(&record(json!({
            "canonical_name": "LinearSearch",
            "distance": "cosine",
            "dim": 3,
            "nlist": 16,
        })))
        .unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_distance_in_record() {
        let err = make_search(&record(json!({
            "canonical_name": "HnswSearch",
            "distance": "hamming",
            "dim": 3,
        })))
        .unwrap_err();
        assert!(matches!(err, SimilarityError::UnknownDistance { .. }));
    }

    #[test]
    fn test_custom_distance_does_not_rebuild() {
        #[derive(Debug)]
        struct Chebyshev;
        impl Distance for Chebyshev {
            fn name(&self) -> &str {
                "chebyshev"
            }
            fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
                a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
            }
        }

        let search = LinearSearch::new(Arc::new(Chebyshev) as Arc<dyn Distance>, 2).unwrap();
        assert!(matches!(
            make_search(&search.get_config()),
            Err(SimilarityError::UnknownDistance { .. })
        ));
    }

    #[test]
    fn test_make_nested_cached_store() {
        let mut store = make_store(&record(json!({
            "canonical_name": "CachedStore",
            "capacity": 2,
            "backing": {"canonical_name": "MemoryStore"},
        })))
        .unwrap();

        store.set(1, json!("x")).unwrap();
        assert_eq!(store.get(1).unwrap(), Some(json!("x")));
        assert_eq!(store.get_config()["backing"]["canonical_name"], "MemoryStore");

        let rebuilt = make_store(&store.get_config()).unwrap();
        assert_eq!(rebuilt.get_config(), store.get_config());
    }

    #[test]
    fn test_make_redis_store_is_lazy() {
        let store = make_store(&record(json!({
            "canonical_name": "RedisStore",
            "host": "redis.invalid",
            "prefix": "faces",
        })))
        .unwrap();
        assert_eq!(store.get_config()["prefix"], "faces");
        assert_eq!(store.get_config()["port"], 6379);
    }

    #[test]
    fn test_load_search_picks_backend() {
        let dir = TempDir::new().unwrap();
        let mut hnsw = HnswSearch::new("manhattan", 2).unwrap();
        hnsw.batch_add(&[vec![0.0, 0.0], vec![3.0, 4.0]], &[7, 8]).unwrap();
        hnsw.save(dir.path()).unwrap();

        let loaded = load_search(dir.path()).unwrap();
        assert_eq!(loaded.canonical_name(), "HnswSearch");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup(&[3.0, 3.0], 1).unwrap(), (vec![8], vec![1.0]));
    }

    #[test]
    fn test_load_search_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_search(&dir.path().join("nothing")),
            Err(SimilarityError::StorageIo { .. })
        ));
    }
}
