//! Search trait for pluggable nearest-neighbor backends

pub mod hnsw;
pub mod linear;

pub use hnsw::{HnswSearch, HnswSearchConfig};
pub use linear::{LinearSearch, LinearSearchConfig};

use crate::config::ConfigRecord;
use crate::distance::{distance_canonicalizer, Distance, DistanceSpec};
use crate::embedding::Embedding;
use crate::error::{Result, SimilarityError};
use rayon::prelude::*;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Neighbor ids and their distances, ascending by distance.
pub type Neighbors = (Vec<u64>, Vec<f32>);

/// Per-query neighbor ids and distances, in query order.
pub type BatchNeighbors = (Vec<Vec<u64>>, Vec<Vec<f32>>);

/// A nearest-neighbor index over fixed-dimension embeddings keyed by `u64` ids.
///
/// Mutating methods take `&mut self` (single writer); lookups take `&self`
/// and may run concurrently with each other.
pub trait Search: Send + Sync + fmt::Debug {
    /// Discriminator used by the factory to rebuild this backend.
    fn canonical_name(&self) -> &'static str;

    /// Instance name (defaults to the canonical name).
    fn name(&self) -> &str;

    /// The distance used to rank neighbors.
    fn distance(&self) -> &Arc<dyn Distance>;

    /// Embedding dimension, fixed for the instance's lifetime.
    fn dim(&self) -> usize;

    /// Logging verbosity. Has no effect on results.
    fn verbose(&self) -> u8;

    /// Number of searchable embeddings.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a single embedding under `idx`.
    fn add(&mut self, embedding: &[f32], idx: u64) -> Result<()>;

    /// Add a batch of embeddings; equivalent to calling `add` for each pair in order.
    fn batch_add(&mut self, embeddings: &[Embedding], idxs: &[u64]) -> Result<()>;

    /// Find the `k` nearest neighbors of `embedding`.
    ///
    /// Results are ascending by distance with ties broken by insertion order.
    /// An empty index yields two empty vectors.
    fn lookup(&self, embedding: &[f32], k: usize) -> Result<Neighbors>;

    /// Run [`Search::lookup`] for every query in parallel, preserving query order.
    fn batch_lookup(&self, embeddings: &[Embedding], k: usize) -> Result<BatchNeighbors> {
        let results = embeddings
            .par_iter()
            .map(|embedding| self.lookup(embedding, k))
            .collect::<Result<Vec<_>>>()?;
        Ok(results.into_iter().unzip())
    }

    /// Serialize the index (configuration and content) into the directory `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace configuration and content with what was saved at `path`.
    ///
    /// The saved data is fully read and verified before any state changes,
    /// so a failed load leaves the index as it was.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Remove all content, keeping distance, dim and name.
    fn reset(&mut self);

    /// Whether the index is ready for lookups.
    fn is_built(&self) -> bool;

    /// Complete any pending build step. A no-op for backends that are always built.
    fn build(&mut self) -> Result<()> {
        Ok(())
    }

    /// Configuration record; the factory turns it back into an equivalent empty index.
    fn get_config(&self) -> ConfigRecord;
}

/// Configuration shared by every search backend.
#[derive(Debug, Clone)]
pub struct SearchBase {
    pub distance: Arc<dyn Distance>,
    pub dim: usize,
    pub verbose: u8,
    pub name: String,
}

impl SearchBase {
    pub fn new(
        distance: impl Into<DistanceSpec>,
        dim: usize,
        verbose: u8,
        name: Option<String>,
        canonical_name: &str,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(SimilarityError::InvalidConfig(
                "dim must be a positive integer, got 0".to_string(),
            ));
        }
        Ok(Self {
            distance: distance_canonicalizer(distance)?,
            dim,
            verbose,
            name: name.unwrap_or_else(|| canonical_name.to_string()),
        })
    }

    /// Resolve a saved distance name, keeping the current object when the names agree.
    ///
    /// This lets indexes built with a custom distance reload their own saves.
    pub fn resolve_distance(&self, name: &str) -> Result<Arc<dyn Distance>> {
        if name == self.distance.name() {
            Ok(self.distance.clone())
        } else {
            distance_canonicalizer(name)
        }
    }

    /// Log at info level when verbose, debug otherwise.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        if self.verbose > 0 {
            tracing::info!("[{}] {}", self.name, args);
        } else {
            tracing::debug!("[{}] {}", self.name, args);
        }
    }
}

/// Reject a saved index whose discriminator does not match the loading backend.
pub(crate) fn check_canonical_name(record: &ConfigRecord, expected: &str) -> Result<()> {
    let found = crate::config::canonical_name(record)?;
    if found != expected {
        return Err(SimilarityError::InvalidConfig(format!(
            "saved index is a {}, cannot load it into a {}",
            found, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_base_rejects_zero_dim() {
        let err = SearchBase::new("euclidean", 0, 1, None, "LinearSearch").unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidConfig(_)));
    }

    #[test]
    fn test_search_base_defaults_name() {
        let base = SearchBase::new("l2", 4, 1, None, "LinearSearch").unwrap();
        assert_eq!(base.name, "LinearSearch");
        assert_eq!(base.distance.name(), "euclidean");

        let named = SearchBase::new("l2", 4, 1, Some("faces".into()), "LinearSearch").unwrap();
        assert_eq!(named.name, "faces");
    }

    #[test]
    fn test_search_base_unknown_distance() {
        assert!(matches!(
            SearchBase::new("nope", 4, 1, None, "LinearSearch"),
            Err(SimilarityError::UnknownDistance { .. })
        ));
    }

    #[test]
    fn test_batch_lookup_default_preserves_order() {
        let mut search = LinearSearch::new("euclidean", 2).unwrap();
        search
            .batch_add(&[vec![0.0, 0.0], vec![10.0, 0.0]], &[1, 2])
            .unwrap();

        let (ids, distances) = search
            .batch_lookup(&[vec![9.0, 0.0], vec![1.0, 0.0], vec![0.0, 0.0]], 1)
            .unwrap();
        assert_eq!(ids, vec![vec![2], vec![1], vec![1]]);
        assert_eq!(distances[2], vec![0.0]);
    }
}
