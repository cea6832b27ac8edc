//! HNSW (Hierarchical Navigable Small World) approximate search backend.
//!
//! Duplicate ids overwrite: re-adding an id removes its old node first.
//!
//! Build policy: with `auto_build` (the default) every `add`/`batch_add`
//! wires the new embeddings into the graph before returning, so the index is
//! always built. Without it, embeddings are staged; `is_built()` is false and
//! `lookup` fails with [`SimilarityError::NotBuilt`] until `build()` runs.

pub mod graph;
pub mod neighbor_queue;

pub use graph::{GraphState, HnswGraph, HnswParams};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{
    default_verbose, from_record, to_record, ConfigRecord, HNSW_DEFAULT_EF_CONSTRUCTION,
    HNSW_DEFAULT_EF_SEARCH, HNSW_DEFAULT_M, HNSW_DEFAULT_SEED,
};
use crate::distance::{Distance, DistanceSpec};
use crate::embedding::{check_batch, check_embedding, Embedding};
use crate::error::{Result, SimilarityError};
use crate::persistence::{self, Manifest};
use crate::search::{check_canonical_name, Neighbors, Search, SearchBase};

pub const HNSW_SEARCH: &str = "HnswSearch";

fn default_m() -> usize {
    HNSW_DEFAULT_M
}

fn default_ef_construction() -> usize {
    HNSW_DEFAULT_EF_CONSTRUCTION
}

fn default_ef_search() -> usize {
    HNSW_DEFAULT_EF_SEARCH
}

fn default_seed() -> u64 {
    HNSW_DEFAULT_SEED
}

fn default_auto_build() -> bool {
    true
}

/// Construction parameters of an [`HnswSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HnswSearchConfig {
    pub distance: String,
    pub dim: usize,
    #[serde(default = "default_verbose")]
    pub verbose: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_auto_build")]
    pub auto_build: bool,
}

#[derive(Serialize, Deserialize)]
struct HnswPayload {
    graph: GraphState,
    /// External id of every slot, including removed ones.
    slot_ids: Vec<u64>,
    pending: Vec<(u64, Vec<f32>)>,
}

/// An HNSW-based approximate nearest neighbor search.
#[derive(Debug)]
pub struct HnswSearch {
    base: SearchBase,
    graph: HnswGraph,
    auto_build: bool,
    /// External id of every slot.
    slot_ids: Vec<u64>,
    /// Live slot of every external id.
    slots: HashMap<u64, usize>,
    /// Embeddings added while `auto_build` is off, in insertion order.
    pending: Vec<(u64, Vec<f32>)>,
}

impl HnswSearch {
    /// Create a new HNSW search with default parameters.
    pub fn new(distance: impl Into<DistanceSpec>, dim: usize) -> Result<Self> {
        Self::with_params(distance, dim, HnswParams::default())
    }

    /// Create a new HNSW search with custom graph parameters.
    pub fn with_params(
        distance: impl Into<DistanceSpec>,
        dim: usize,
        params: HnswParams,
    ) -> Result<Self> {
        let base = SearchBase::new(distance, dim, default_verbose(), None, HNSW_SEARCH)?;
        Ok(Self::with_base(base, params, true))
    }

    pub fn from_config(config: HnswSearchConfig) -> Result<Self> {
        let base = SearchBase::new(
            config.distance,
            config.dim,
            config.verbose,
            config.name,
            HNSW_SEARCH,
        )?;
        let params = HnswParams::new(config.m, config.ef_construction, config.ef_search)
            .with_seed(config.seed);
        Ok(Self::with_base(base, params, config.auto_build))
    }

    fn with_base(base: SearchBase, params: HnswParams, auto_build: bool) -> Self {
        Self {
            graph: HnswGraph::new(base.distance.clone(), params),
            base,
            auto_build,
            slot_ids: Vec::new(),
            slots: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Stage inserts until `build()` instead of wiring them in immediately.
    pub fn with_auto_build(mut self, auto_build: bool) -> Self {
        self.auto_build = auto_build;
        self
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

    /// Graph parameters in use.
    pub fn params(&self) -> &HnswParams {
        self.graph.params()
    }

    /// Number of staged embeddings waiting for `build()`.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Embedding currently stored under `idx`, if built.
    pub fn get(&self, idx: u64) -> Option<&[f32]> {
        self.slots.get(&idx).and_then(|&slot| self.graph.get_vector(slot))
    }

    /// Search with a specific ef value for runtime tuning.
    pub fn lookup_with_ef(&self, embedding: &[f32], k: usize, ef: usize) -> Result<Neighbors> {
        check_embedding(embedding, self.base.dim)?;
        if !self.pending.is_empty() {
            return Err(SimilarityError::NotBuilt {
                name: self.base.name.clone(),
                pending: self.pending.len(),
            });
        }
        if k == 0 {
            return Ok((Vec::new(), Vec::new()));
        }

        Ok(self
            .graph
            .search_knn(embedding, k, ef)
            .into_iter()
            .map(|n| (self.slot_ids[n.slot], n.distance))
            .unzip())
    }

    /// Wire one embedding into the graph, replacing any node with the same id.
    fn insert(&mut self, idx: u64, embedding: Vec<f32>) {
        if let Some(old) = self.slots.remove(&idx) {
            self.graph.remove(old);
        }
        let slot = self.graph.insert(embedding);
        debug_assert_eq!(slot, self.slot_ids.len());
        self.slot_ids.push(idx);
        self.slots.insert(idx, slot);
    }

    fn config(&self) -> HnswSearchConfig {
        let params = self.graph.params();
        HnswSearchConfig {
            distance: self.base.distance.name().to_string(),
            dim: self.base.dim,
            verbose: self.base.verbose,
            name: Some(self.base.name.clone()),
            m: params.m,
            ef_construction: params.ef_construction,
            ef_search: params.ef_search,
            seed: params.seed,
            auto_build: self.auto_build,
        }
    }
}

impl Search for HnswSearch {
    fn canonical_name(&self) -> &'static str {
        HNSW_SEARCH
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

    /// Number of built embeddings; staged ones are counted by [`HnswSearch::pending`].
    fn len(&self) -> usize {
        self.graph.len()
    }

    fn add(&mut self, embedding: &[f32], idx: u64) -> Result<()> {
        check_embedding(embedding, self.base.dim)?;
        if self.auto_build {
            self.insert(idx, embedding.to_vec());
        } else {
            self.pending.push((idx, embedding.to_vec()));
        }
        Ok(())
    }

    fn batch_add(&mut self, embeddings: &[Embedding], idxs: &[u64]) -> Result<()> {
        check_batch(embeddings, idxs, self.base.dim)?;

        if self.auto_build {
            for (embedding, &idx) in embeddings.iter().zip(idxs) {
                self.insert(idx, embedding.clone());
            }
            self.base.log(format_args!(
                "indexed {} embeddings ({} total)",
                idxs.len(),
                self.graph.len()
            ));
        } else {
            self.pending
                .extend(idxs.iter().copied().zip(embeddings.iter().cloned()));
            self.base.log(format_args!(
                "staged {} embeddings ({} pending)",
                idxs.len(),
                self.pending.len()
            ));
        }
        Ok(())
    }

    fn lookup(&self, embedding: &[f32], k: usize) -> Result<Neighbors> {
        self.lookup_with_ef(embedding, k, self.graph.params().ef_search)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let manifest = Manifest {
            config: self.get_config(),
            count: self.graph.len(),
        };
        let payload = HnswPayload {
            graph: self.graph.state().clone(),
            slot_ids: self.slot_ids.clone(),
            pending: self.pending.clone(),
        };
        persistence::save_index(path, &manifest, &payload)?;

        self.base.log(format_args!(
            "saved {} nodes and {} staged embeddings to {}",
            self.graph.len(),
            self.pending.len(),
            path.display()
        ));
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let (manifest, payload): (Manifest, HnswPayload) = persistence::load_index(path)?;
        check_canonical_name(&manifest.config, HNSW_SEARCH)?;
        let config: HnswSearchConfig = from_record(&manifest.config)?;

        let corrupted = |reason: String| SimilarityError::Corrupted {
            path: path.to_path_buf(),
            reason,
        };
        if config.dim == 0 {
            return Err(corrupted("dim is 0".to_string()));
        }
        payload.graph.validate(config.dim).map_err(corrupted)?;
        if payload.pending.iter().any(|(_, e)| e.len() != config.dim) {
            return Err(corrupted("staged embedding of the wrong dim".to_string()));
        }

        let distance = self.base.resolve_distance(&config.distance)?;
        let params = HnswParams::new(config.m, config.ef_construction, config.ef_search)
            .with_seed(config.seed);
        let graph = HnswGraph::from_state(distance.clone(), params, payload.graph);
        if payload.slot_ids.len() != graph.next_slot() {
            return Err(corrupted(format!(
                "{} slot ids for {} slots",
                payload.slot_ids.len(),
                graph.next_slot()
            )));
        }

        let slots = payload
            .slot_ids
            .iter()
            .enumerate()
            .filter(|&(slot, _)| graph.get_vector(slot).is_some())
            .map(|(slot, &idx)| (idx, slot))
            .collect();

        self.base = SearchBase {
            distance,
            dim: config.dim,
            verbose: config.verbose,
            name: config.name.unwrap_or_else(|| HNSW_SEARCH.to_string()),
        };
        self.graph = graph;
        self.auto_build = config.auto_build;
        self.slot_ids = payload.slot_ids;
        self.slots = slots;
        self.pending = payload.pending;

        self.base.log(format_args!(
            "loaded {} nodes from {}",
            self.graph.len(),
            path.display()
        ));
        Ok(())
    }

    fn reset(&mut self) {
        self.graph = HnswGraph::new(self.base.distance.clone(), self.graph.params().clone());
        self.slot_ids.clear();
        self.slots.clear();
        self.pending.clear();
    }

    fn is_built(&self) -> bool {
        self.pending.is_empty()
    }

    fn build(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.pending);
        let count = staged.len();
        for (idx, embedding) in staged {
            self.insert(idx, embedding);
        }
        self.base.log(format_args!(
            "built {} staged embeddings ({} total)",
            count,
            self.graph.len()
        ));
        Ok(())
    }

    fn get_config(&self) -> ConfigRecord {
        to_record(&self.config(), HNSW_SEARCH)
    }
}
