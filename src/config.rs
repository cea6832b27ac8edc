//! Defaults and the configuration record type shared by searches and stores.
//!
//! Every backend describes itself with a typed, `deny_unknown_fields` serde
//! struct. The loose form handed to the factory is a flat JSON object with a
//! `canonical_name` discriminator.

use crate::error::{Result, SimilarityError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Flat JSON mapping produced by `get_config` and consumed by the factory.
pub type ConfigRecord = serde_json::Map<String, serde_json::Value>;

/// Key of the discriminator identifying the concrete backend.
pub const CANONICAL_NAME_KEY: &str = "canonical_name";

/// Default number of neighbors returned by a lookup.
pub const DEFAULT_K: usize = 5;

/// Default verbosity. Above 0, batch operations and persistence log at info level.
pub const DEFAULT_VERBOSE: u8 = 1;

/// Default number of bidirectional links per HNSW node.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Default seed for HNSW level generation.
pub const HNSW_DEFAULT_SEED: u64 = 42;

/// Default capacity (entries) of a `CachedStore`.
pub const CACHED_STORE_DEFAULT_CAPACITY: usize = 10_000;

/// Default Redis connect timeout in milliseconds.
pub const REDIS_DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// Default number of connect attempts before a Redis store gives up.
pub const REDIS_DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

pub(crate) fn default_verbose() -> u8 {
    DEFAULT_VERBOSE
}

/// Serialize a typed config and stamp it with its canonical name.
pub fn to_record<T: Serialize>(config: &T, canonical_name: &str) -> ConfigRecord {
    let mut record = match serde_json::to_value(config) {
        Ok(serde_json::Value::Object(map)) => map,
        // Backend config structs always serialize to objects.
        _ => ConfigRecord::new(),
    };
    record.insert(
        CANONICAL_NAME_KEY.to_string(),
        serde_json::Value::String(canonical_name.to_string()),
    );
    record
}

/// Deserialize a typed config from a record, ignoring the discriminator.
///
/// Unknown or mistyped fields are rejected by the target's serde attributes.
pub fn from_record<T: DeserializeOwned>(record: &ConfigRecord) -> Result<T> {
    let mut fields = record.clone();
    fields.remove(CANONICAL_NAME_KEY);
    serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| SimilarityError::InvalidConfig(e.to_string()))
}

/// Read the discriminator out of a record.
pub fn canonical_name(record: &ConfigRecord) -> Result<&str> {
    record
        .get(CANONICAL_NAME_KEY)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            SimilarityError::InvalidConfig(format!("missing string field {:?}", CANONICAL_NAME_KEY))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        dim: usize,
        #[serde(default = "default_verbose")]
        verbose: u8,
    }

    #[test]
    fn test_record_roundtrip() {
        let sample = Sample { dim: 8, verbose: 0 };
        let record = to_record(&sample, "Sample");
        assert_eq!(canonical_name(&record).unwrap(), "Sample");
        assert_eq!(from_record::<Sample>(&record).unwrap(), sample);
    }

    #[test]
    fn test_missing_field_takes_default() {
        let record: ConfigRecord = serde_json::from_str(r#"{"dim": 4}"#).unwrap();
        let sample: Sample = from_record(&record).unwrap();
        assert_eq!(sample.verbose, DEFAULT_VERBOSE);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let record: ConfigRecord =
            serde_json::from_str(r#"{"dim": 4, "dimension": 4, "canonical_name": "Sample"}"#)
                .unwrap();
        let err = from_record::<Sample>(&record).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidConfig(ref msg) if msg.contains("dimension")));
    }

    #[test]
    fn test_missing_canonical_name() {
        let record: ConfigRecord = serde_json::from_str(r#"{"dim": 4}"#).unwrap();
        assert!(matches!(
            canonical_name(&record),
            Err(SimilarityError::InvalidConfig(_))
        ));
    }
}
