//! Brute-force linear search: exact O(n) k-NN over a flat buffer.
//!
//! Duplicate ids are kept: adding an id twice makes both entries searchable.
//! The index is always built.

use crate::config::{default_verbose, from_record, to_record, ConfigRecord};
use crate::distance::{Distance, DistanceSpec};
use crate::embedding::{check_batch, check_embedding, Embedding};
use crate::error::{Result, SimilarityError};
use crate::persistence::{self, Manifest};
use crate::search::{check_canonical_name, Neighbors, Search, SearchBase};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

pub const LINEAR_SEARCH: &str = "LinearSearch";

/// Construction parameters of a [`LinearSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearSearchConfig {
    pub distance: String,
    pub dim: usize,
    #[serde(default = "default_verbose")]
    pub verbose: u8,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct LinearPayload {
    ids: Vec<u64>,
    data: Vec<f32>,
}

/// Exact search that computes the distance to every stored embedding.
#[derive(Debug)]
pub struct LinearSearch {
    base: SearchBase,
    /// Ids in insertion order.
    ids: Vec<u64>,
    /// Row-major embeddings, `dim` floats per id.
    data: Vec<f32>,
}

impl LinearSearch {
    /// Create an empty linear search with the given distance and dimension.
    pub fn new(distance: impl Into<DistanceSpec>, dim: usize) -> Result<Self> {
        Self::with_base(SearchBase::new(
            distance,
            dim,
            default_verbose(),
            None,
            LINEAR_SEARCH,
        )?)
    }

    pub fn from_config(config: LinearSearchConfig) -> Result<Self> {
        Self::with_base(SearchBase::new(
            config.distance,
            config.dim,
            config.verbose,
            config.name,
            LINEAR_SEARCH,
        )?)
    }

    fn with_base(base: SearchBase) -> Result<Self> {
        Ok(Self {
            base,
            ids: Vec::new(),
            data: Vec::new(),
        })
    }

    /// Set the instance name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base.name = name.into();
        self
    }

    /// Set the logging verbosity.
    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.base.verbose = verbose;
        self
    }

    /// Iterate over `(id, embedding)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[f32])> {
        self.ids
            .iter()
            .copied()
            .zip(self.data.chunks_exact(self.base.dim))
    }

    fn config(&self) -> LinearSearchConfig {
        LinearSearchConfig {
            distance: self.base.distance.name().to_string(),
            dim: self.base.dim,
            verbose: self.base.verbose,
            name: Some(self.base.name.clone()),
        }
    }
}

/// Rank by distance, then by insertion position.
fn by_rank(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

impl Search for LinearSearch {
    fn canonical_name(&self) -> &'static str {
        LINEAR_SEARCH
    }

    fn name(&self) -> &str {
        &self.base.name
    }

    fn distance(&self) -> &Arc<dyn Distance> {
        &self.base.distance
    }

    fn dim(&self) -> usize {
        self.base.dim
    }

    fn verbose(&self) -> u8 {
        self.base.verbose
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn add(&mut self, embedding: &[f32], idx: u64) -> Result<()> {
        check_embedding(embedding, self.base.dim)?;
        self.ids.push(idx);
        self.data.extend_from_slice(embedding);
        Ok(())
    }

    fn batch_add(&mut self, embeddings: &[Embedding], idxs: &[u64]) -> Result<()> {
        check_batch(embeddings, idxs, self.base.dim)?;

        self.ids.reserve(idxs.len());
        self.data.reserve(idxs.len() * self.base.dim);
        for (embedding, &idx) in embeddings.iter().zip(idxs) {
            self.ids.push(idx);
            self.data.extend_from_slice(embedding);
        }

        self.base.log(format_args!(
            "indexed {} embeddings ({} total)",
            idxs.len(),
            self.ids.len()
        ));
        Ok(())
    }

    fn lookup(&self, embedding: &[f32], k: usize) -> Result<Neighbors> {
        check_embedding(embedding, self.base.dim)?;
        if k == 0 || self.ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let distance = &self.base.distance;
        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.base.dim)
            .enumerate()
            .map(|(pos, row)| (distance.distance(embedding, row), pos))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_rank);

        Ok(scored
            .into_iter()
            .map(|(dist, pos)| (self.ids[pos], dist))
            .unzip())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let manifest = Manifest {
            config: self.get_config(),
            count: self.ids.len(),
        };
        let payload = LinearPayload {
            ids: self.ids.clone(),
            data: self.data.clone(),
        };
        persistence::save_index(path, &manifest, &payload)?;

        self.base.log(format_args!(
            "saved {} embeddings to {}",
            self.ids.len(),
            path.display()
        ));
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let (manifest, payload): (Manifest, LinearPayload) = persistence::load_index(path)?;
        check_canonical_name(&manifest.config, LINEAR_SEARCH)?;
        let config: LinearSearchConfig = from_record(&manifest.config)?;

        if config.dim == 0 || payload.data.len() != payload.ids.len() * config.dim {
            return Err(SimilarityError::Corrupted {
                path: path.to_path_buf(),
                reason: format!(
                    "{} floats for {} ids of dim {}",
                    payload.data.len(),
                    payload.ids.len(),
                    config.dim
                ),
            });
        }

        let distance = self.base.resolve_distance(&config.distance)?;
        self.base = SearchBase {
            distance,
            dim: config.dim,
            verbose: config.verbose,
            name: config.name.unwrap_or_else(|| LINEAR_SEARCH.to_string()),
        };
        self.ids = payload.ids;
        self.data = payload.data;

        self.base.log(format_args!(
            "loaded {} embeddings from {}",
            self.ids.len(),
            path.display()
        ));
        Ok(())
    }

    fn reset(&mut self) {
        self.ids.clear();
        self.data.clear();
    }

    fn is_built(&self) -> bool {
        true
    }

    fn get_config(&self) -> ConfigRecord {
        to_record(&self.config(), LINEAR_SEARCH)
    }
}
