//! HNSW graph: core data structures and algorithms.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! Nodes live in slots assigned in insertion order. A node's level is drawn
//! from an RNG seeded with `(params.seed, slot)`, so the same insert sequence
//! always produces the same graph.

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{
    HNSW_DEFAULT_EF_CONSTRUCTION, HNSW_DEFAULT_EF_SEARCH, HNSW_DEFAULT_M,
    HNSW_DEFAULT_MAX_LAYERS, HNSW_DEFAULT_SEED,
};
use crate::distance::Distance;

use super::neighbor_queue::{MaxHeap, MinHeap, Neighbor};

/// Configuration parameters for the HNSW graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max number of connections per node (layers > 0).
    pub m: usize,
    /// Max connections at layer 0 (2 * m).
    pub m_max0: usize,
    /// Number of candidates during construction.
    pub ef_construction: usize,
    /// Number of candidates during search.
    pub ef_search: usize,
    /// Level generation factor: 1 / ln(m).
    pub ml: f64,
    /// Maximum number of layers.
    pub max_layers: usize,
    /// Seed for level generation.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(
            HNSW_DEFAULT_M,
            HNSW_DEFAULT_EF_CONSTRUCTION,
            HNSW_DEFAULT_EF_SEARCH,
        )
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: 2 * m,
            ef_construction: ef_construction.max(1),
            ef_search: ef_search.max(1),
            ml: 1.0 / (m as f64).ln(),
            max_layers: HNSW_DEFAULT_MAX_LAYERS,
            seed: HNSW_DEFAULT_SEED,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    vector: Vec<f32>,
    /// Neighbors per layer. neighbors[l] is the list of neighbor slots at layer l.
    neighbors: Vec<Vec<usize>>,
    /// The maximum layer this node was inserted into.
    level: usize,
}

/// Serializable graph content, independent of the distance object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphState {
    /// Nodes indexed by slot. Slots are None after removal.
    nodes: Vec<Option<HnswNode>>,
    /// Entry point slot (highest-level node).
    entry_point: Option<usize>,
    /// Current maximum level in the graph.
    max_level: usize,
    /// Count of live nodes.
    count: usize,
}

impl GraphState {
    /// Check internal references so a corrupted save cannot cause panics later.
    pub fn validate(&self, dim: usize) -> std::result::Result<(), String> {
        let slots = self.nodes.len();
        if let Some(ep) = self.entry_point {
            if self.nodes.get(ep).and_then(|n| n.as_ref()).is_none() {
                return Err(format!("entry point {} is not a live node", ep));
            }
        }
        let live = self.nodes.iter().flatten().count();
        if live != self.count {
            return Err(format!("count {} but {} live nodes", self.count, live));
        }
        for (slot, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            if node.vector.len() != dim {
                return Err(format!("slot {} has dim {}", slot, node.vector.len()));
            }
            if node.neighbors.len() != node.level + 1 {
                return Err(format!("slot {} has a malformed layer list", slot));
            }
            if node.neighbors.iter().flatten().any(|&n| n >= slots) {
                return Err(format!("slot {} links past the last slot", slot));
            }
        }
        Ok(())
    }
}

/// The HNSW graph structure.
#[derive(Debug)]
pub struct HnswGraph {
    state: GraphState,
    params: HnswParams,
    distance: Arc<dyn Distance>,
}

impl HnswGraph {
    pub fn new(distance: Arc<dyn Distance>, params: HnswParams) -> Self {
        Self::from_state(distance, params, GraphState::default())
    }

    pub fn from_state(distance: Arc<dyn Distance>, params: HnswParams, state: GraphState) -> Self {
        Self {
            state,
            params,
            distance,
        }
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.state.count
    }

    pub fn is_empty(&self) -> bool {
        self.state.count == 0
    }

    /// Slot the next insert will occupy.
    pub fn next_slot(&self) -> usize {
        self.state.nodes.len()
    }

    /// Generate the level of the node inserted at `slot`.
    fn random_level(&self, slot: usize) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.params.seed ^ (slot as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let r: f64 = 1.0 - rng.gen::<f64>();
        let level = (-r.ln() * self.params.ml).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    fn node(&self, slot: usize) -> Option<&HnswNode> {
        self.state.nodes.get(slot).and_then(|n| n.as_ref())
    }

    /// Distance between a query and a live node.
    fn distance_to(&self, query: &[f32], slot: usize) -> f32 {
        match self.node(slot) {
            Some(node) => self.distance.distance(query, &node.vector),
            None => f32::MAX,
        }
    }

    /// Get the vector stored at a slot.
    pub fn get_vector(&self, slot: usize) -> Option<&[f32]> {
        self.node(slot).map(|n| n.vector.as_slice())
    }

    /// SEARCH-LAYER: Algorithm 2 from the HNSW paper.
    ///
    /// Returns up to `ef` closest live nodes reachable from `ep` on `layer`.
    fn search_layer(&self, query: &[f32], ep: &[usize], ef: usize, layer: usize) -> Vec<Neighbor> {
        let mut visited = HashSet::new();
        let mut candidates = MinHeap::new();
        let mut results = MaxHeap::new();

        for &ep_slot in ep {
            let dist = self.distance_to(query, ep_slot);
            visited.insert(ep_slot);
            candidates.push(Neighbor::new(ep_slot, dist));
            results.push(Neighbor::new(ep_slot, dist));
        }

        while let Some(c) = candidates.pop() {
            if c.distance > results.furthest() {
                break;
            }

            let Some(node) = self.node(c.slot) else {
                continue;
            };
            let Some(links) = node.neighbors.get(layer) else {
                continue;
            };

            for &neighbor in links {
                if !visited.insert(neighbor) || self.node(neighbor).is_none() {
                    continue;
                }

                let dist = self.distance_to(query, neighbor);
                if dist < results.furthest() || results.len() < ef {
                    candidates.push(Neighbor::new(neighbor, dist));
                    results.push_bounded(Neighbor::new(neighbor, dist), ef);
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Select the M closest neighbors from sorted candidates (Algorithm 3).
    fn select_neighbors_simple(candidates: &[Neighbor], m: usize) -> Vec<usize> {
        candidates.iter().take(m).map(|n| n.slot).collect()
    }

    /// Prune a node's neighbor list at a given layer to its `m` closest neighbors.
    fn prune_neighbors(&mut self, slot: usize, layer: usize, m: usize) {
        let Some(node) = self.node(slot) else { return };
        let Some(links) = node.neighbors.get(layer) else {
            return;
        };

        let mut scored: Vec<Neighbor> = links
            .iter()
            .filter_map(|&n| {
                self.node(n)
                    .map(|other| Neighbor::new(n, self.distance.distance(&node.vector, &other.vector)))
            })
            .collect();
        scored.sort_unstable();
        let pruned = Self::select_neighbors_simple(&scored, m);

        if let Some(Some(node)) = self.state.nodes.get_mut(slot) {
            node.neighbors[layer] = pruned;
        }
    }

    /// INSERT: Algorithm 1 from the HNSW paper. Returns the new node's slot.
    pub fn insert(&mut self, vector: Vec<f32>) -> usize {
        let slot = self.next_slot();
        let level = self.random_level(slot);

        self.state.nodes.push(Some(HnswNode {
            vector,
            neighbors: vec![Vec::new(); level + 1],
            level,
        }));
        self.state.count += 1;

        let Some(entry_point) = self.state.entry_point else {
            self.state.entry_point = Some(slot);
            self.state.max_level = level;
            return slot;
        };

        // The query is the node's own vector; clone once to release the borrow.
        let query = self.state.nodes[slot]
            .as_ref()
            .map(|n| n.vector.clone())
            .unwrap_or_default();
        let mut ep = entry_point;
        let current_max_level = self.state.max_level;

        // Phase 1: greedy descent from the top layer down to level + 1 (ef = 1)
        for l in (level + 1..=current_max_level).rev() {
            if let Some(n) = self.search_layer(&query, &[ep], 1, l).first() {
                ep = n.slot;
            }
        }

        // Phase 2: connect on layers min(level, current_max_level) down to 0
        for l in (0..=level.min(current_max_level)).rev() {
            let m = if l == 0 {
                self.params.m_max0
            } else {
                self.params.m
            };

            let nearest = self.search_layer(&query, &[ep], self.params.ef_construction, l);
            let neighbors = Self::select_neighbors_simple(&nearest, m);

            if let Some(Some(node)) = self.state.nodes.get_mut(slot) {
                node.neighbors[l] = neighbors.clone();
            }

            for &neighbor in &neighbors {
                let needs_pruning = match self.state.nodes.get_mut(neighbor) {
                    Some(Some(other)) if l < other.neighbors.len() => {
                        other.neighbors[l].push(slot);
                        other.neighbors[l].len() > m
                    }
                    _ => false,
                };
                if needs_pruning {
                    self.prune_neighbors(neighbor, l, m);
                }
            }

            if let Some(n) = nearest.first() {
                ep = n.slot;
            }
        }

        if level > self.state.max_level {
            self.state.entry_point = Some(slot);
            self.state.max_level = level;
        }

        slot
    }

    /// Remove a node, unlink it and reconnect its former neighbors.
    pub fn remove(&mut self, slot: usize) {
        let Some(node) = self.state.nodes.get_mut(slot).and_then(|n| n.take()) else {
            return;
        };

        // Each former neighbor inherits the removed node's other links on that
        // layer, then is pruned back to the layer's degree bound.
        for (layer, links) in node.neighbors.iter().enumerate() {
            let m = if layer == 0 {
                self.params.m_max0
            } else {
                self.params.m
            };
            for &neighbor in links {
                let Some(Some(other)) = self.state.nodes.get_mut(neighbor) else {
                    continue;
                };
                let Some(list) = other.neighbors.get_mut(layer) else {
                    continue;
                };
                list.retain(|&n| n != slot);
                for &candidate in links {
                    if candidate != neighbor && !list.contains(&candidate) {
                        list.push(candidate);
                    }
                }
                if list.len() > m {
                    self.prune_neighbors(neighbor, layer, m);
                }
            }
        }
        self.state.count -= 1;

        if self.state.entry_point == Some(slot) {
            // Highest level wins; the earliest slot breaks ties.
            let next = self
                .state
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (n.level, std::cmp::Reverse(i))))
                .max();
            self.state.entry_point = next.map(|(_, std::cmp::Reverse(i))| i);
            self.state.max_level = next.map(|(level, _)| level).unwrap_or(0);
        }
    }

    /// SEARCH: Algorithm 5 from the HNSW paper.
    ///
    /// Returns up to `k` nearest live nodes using `max(ef, k)` candidates.
    ///
    /// Falls back to [`HnswGraph::exact_knn`] when the walk reaches fewer than
    /// `min(k, len)` nodes, e.g. identical embeddings whose incoming links
    /// were all pruned.
    pub fn search_knn(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbor> {
        let Some(mut ep) = self.state.entry_point else {
            return Vec::new();
        };

        for l in (1..=self.state.max_level).rev() {
            if let Some(n) = self.search_layer(query, &[ep], 1, l).first() {
                ep = n.slot;
            }
        }

        let mut results = self.search_layer(query, &[ep], ef.max(k), 0);
        if results.len() < k.min(self.state.count) {
            tracing::debug!(
                "HNSW walk reached {} of {} requested nodes, scanning exhaustively",
                results.len(),
                k.min(self.state.count)
            );
            return self.exact_knn(query, k);
        }
        results.truncate(k);
        results
    }

    /// Brute-force k-NN over every live node, ordered by `(distance, slot)`.
    pub fn exact_knn(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut scored: Vec<Neighbor> = self
            .state
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| {
                node.as_ref()
                    .map(|n| Neighbor::new(slot, self.distance.distance(query, &n.vector)))
            })
            .collect();
        scored.sort_unstable();
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn make_graph() -> HnswGraph {
        HnswGraph::new(Arc::new(DistanceMetric::Euclidean), HnswParams::new(4, 32, 16))
    }

    #[test]
    fn test_insert_single() {
        let mut graph = make_graph();
        assert_eq!(graph.insert(vec![1.0, 0.0, 0.0]), 0);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.state().entry_point, Some(0));
    }

    #[test]
    fn test_insert_assigns_sequential_slots() {
        let mut graph = make_graph();
        for i in 0..10 {
            assert_eq!(graph.insert(vec![i as f32, 0.0, 0.0]), i);
        }
        assert_eq!(graph.len(), 10);
    }

    #[test]
    fn test_self_search() {
        let mut graph = make_graph();
        let vectors: Vec<Vec<f32>> = (0..100)
            .map(|i| {
                vec![
                    (i as f32) * 0.1,
                    ((i * 7) as f32) * 0.1,
                    ((i * 13) as f32) * 0.1,
                ]
            })
            .collect();

        for v in &vectors {
            graph.insert(v.clone());
        }

        for (i, v) in vectors.iter().enumerate() {
            let results = graph.search_knn(v, 1, 16);
            assert!(!results.is_empty(), "No results for vector {}", i);
            assert_eq!(results[0].distance, 0.0, "Self-search for {} missed", i);
        }
    }

    #[test]
    fn test_search_knn_ties_by_slot() {
        let mut graph = make_graph();
        for x in 0..5 {
            graph.insert(vec![x as f32, 0.0]);
        }

        let results = graph.search_knn(&[0.5, 0.0], 2, 16);
        let slots: Vec<usize> = results.iter().map(|n| n.slot).collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn test_same_sequence_same_graph() {
        let mut a = make_graph();
        let mut b = make_graph();
        for i in 0..50 {
            let v = vec![(i % 7) as f32, (i % 11) as f32];
            a.insert(v.clone());
            b.insert(v);
        }
        let query = [3.3, 4.4];
        let ra: Vec<usize> = a.search_knn(&query, 5, 8).iter().map(|n| n.slot).collect();
        let rb: Vec<usize> = b.search_knn(&query, 5, 8).iter().map(|n| n.slot).collect();
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_remove() {
        let mut graph = make_graph();
        graph.insert(vec![1.0, 0.0]);
        graph.insert(vec![0.0, 1.0]);

        graph.remove(0);
        assert_eq!(graph.len(), 1);
        assert!(graph.get_vector(0).is_none());

        let results = graph.search_knn(&[0.0, 1.0], 1, 16);
        assert_eq!(results[0].slot, 1);
    }

    #[test]
    fn test_remove_entry_point() {
        let mut graph = make_graph();
        graph.insert(vec![1.0, 0.0]);
        graph.insert(vec![0.0, 1.0]);
        graph.insert(vec![1.0, 1.0]);

        let ep = graph.state().entry_point.unwrap();
        graph.remove(ep);
        assert_eq!(graph.len(), 2);
        assert!(!graph.search_knn(&[0.0, 1.0], 1, 16).is_empty());
    }

    #[test]
    fn test_remaining_nodes_reachable_after_removals() {
        let mut graph = make_graph();
        for i in 0..60 {
            graph.insert(vec![(i % 8) as f32, (i / 8) as f32]);
        }
        for slot in (0..60).step_by(2) {
            graph.remove(slot);
        }

        assert_eq!(graph.len(), 30);
        let found = graph.search_knn(&[0.0, 0.0], 30, 200);
        assert_eq!(found.len(), 30);
        assert!(found.iter().all(|n| n.slot % 2 == 1));
    }

    #[test]
    fn test_identical_vectors_all_returned() {
        let mut graph =
            HnswGraph::new(Arc::new(DistanceMetric::Euclidean), HnswParams::new(2, 8, 8));
        for _ in 0..300 {
            graph.insert(vec![1.0, 2.0]);
        }

        let results = graph.search_knn(&[0.0, 0.0], 1000, 8);
        assert_eq!(results.len(), 300);
        let slots: Vec<usize> = results.iter().map(|n| n.slot).collect();
        assert_eq!(slots, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn test_exact_knn_skips_removed() {
        let mut graph = make_graph();
        for x in 0..6 {
            graph.insert(vec![x as f32, 0.0]);
        }
        graph.remove(1);

        let slots: Vec<usize> = graph
            .exact_knn(&[0.9, 0.0], 3)
            .iter()
            .map(|n| n.slot)
            .collect();
        assert_eq!(slots, vec![0, 2, 3]);
    }

    #[test]
    fn test_remove_last_node_empties_graph() {
        let mut graph = make_graph();
        graph.insert(vec![1.0]);
        graph.remove(0);
        assert!(graph.is_empty());
        assert!(graph.search_knn(&[1.0], 3, 16).is_empty());

        assert_eq!(graph.insert(vec![2.0]), 1);
        assert_eq!(graph.search_knn(&[2.0], 1, 16)[0].slot, 1);
    }

    #[test]
    fn test_state_validation() {
        let mut graph = make_graph();
        for i in 0..20 {
            graph.insert(vec![i as f32, 1.0]);
        }
        assert!(graph.state().validate(2).is_ok());
        assert!(graph.state().validate(3).is_err());
    }
}
