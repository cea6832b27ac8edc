//! # simdex
//!
//! Pluggable nearest-neighbor indexing for embeddings keyed by integer ids.
//!
//! This library provides:
//! - Distance functions resolved by name or supplied as custom objects
//! - A `Search` trait with exact (linear) and approximate (HNSW) backends
//! - Record stores: in-memory, LRU cache-layered and Redis-hosted
//! - A factory rebuilding any backend from its configuration record
//! - Checksummed on-disk persistence
//!
//! ## Example
//!
//! ```rust
//! use simdex::{make_search, LinearSearch, Search};
//!
//! let mut search = LinearSearch::new("euclidean", 2)?;
//! search.batch_add(&[vec![0.0, 0.0], vec![3.0, 4.0]], &[1, 2])?;
//!
//! let (ids, distances) = search.lookup(&[0.0, 0.0], 2)?;
//! assert_eq!(ids, vec![1, 2]);
//! assert_eq!(distances, vec![0.0, 5.0]);
//!
//! // The configuration record rebuilds an empty twin.
//! let twin = make_search(&search.get_config())?;
//! assert_eq!(twin.get_config(), search.get_config());
//! # Ok::<(), simdex::SimilarityError>(())
//! ```

pub mod config;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod factory;
pub mod persistence;
pub mod search;
pub mod store;

pub use config::ConfigRecord;
pub use distance::{distance_canonicalizer, Distance, DistanceMetric, DistanceSpec};
pub use embedding::Embedding;
pub use error::{Result, SimilarityError};
pub use factory::{load_search, make_search, make_store};
pub use search::{HnswSearch, LinearSearch, Search};
pub use store::{CachedStore, MemoryStore, RedisStore, Store};
