//! Priority queues for HNSW traversal, ordered by `(distance, slot)`.
//!
//! Slots are assigned in insertion order, so equal distances resolve to the
//! earliest inserted node.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A graph slot paired with its distance to the current query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub distance: f32,
    pub slot: usize,
}

impl Neighbor {
    pub fn new(slot: usize, distance: f32) -> Self {
        Self { distance, slot }
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Furthest neighbor on top. Holds the current result set, bounded by ef.
#[derive(Debug, Default)]
pub struct MaxHeap(BinaryHeap<Neighbor>);

impl MaxHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.0.push(n);
    }

    /// Push, then drop the furthest entry while more than `limit` remain.
    pub fn push_bounded(&mut self, n: Neighbor, limit: usize) {
        self.0.push(n);
        if self.0.len() > limit {
            self.0.pop();
        }
    }

    /// Distance of the furthest entry, or `f32::MAX` when empty.
    pub fn furthest(&self) -> f32 {
        self.0.peek().map(|n| n.distance).unwrap_or(f32::MAX)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drain into a Vec sorted by `(distance, slot)` ascending.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.0.into_sorted_vec()
    }
}

/// Closest neighbor on top. Holds the candidates still to expand.
#[derive(Debug, Default)]
pub struct MinHeap(BinaryHeap<Reverse<Neighbor>>);

impl MinHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.0.push(Reverse(n));
    }

    pub fn pop(&mut self) -> Option<Neighbor> {
        self.0.pop().map(|Reverse(n)| n)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_heap_ordering() {
        let mut heap = MinHeap::new();
        heap.push(Neighbor::new(0, 3.0));
        heap.push(Neighbor::new(1, 1.0));
        heap.push(Neighbor::new(2, 2.0));

        assert_eq!(heap.pop().unwrap().distance, 1.0);
        assert_eq!(heap.pop().unwrap().distance, 2.0);
        assert_eq!(heap.pop().unwrap().distance, 3.0);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_bounded_push_keeps_closest() {
        let mut heap = MaxHeap::new();
        heap.push_bounded(Neighbor::new(0, 5.0), 2);
        heap.push_bounded(Neighbor::new(1, 1.0), 2);
        heap.push_bounded(Neighbor::new(2, 3.0), 2);

        assert_eq!(heap.len(), 2);
        assert_eq!(heap.furthest(), 3.0);
        let sorted = heap.into_sorted_vec();
        assert_eq!(sorted[0].slot, 1);
        assert_eq!(sorted[1].slot, 2);
    }

    #[test]
    fn test_equal_distances_sort_by_slot() {
        let mut heap = MaxHeap::new();
        heap.push(Neighbor::new(4, 1.0));
        heap.push(Neighbor::new(2, 1.0));
        heap.push(Neighbor::new(9, 0.5));
        heap.push(Neighbor::new(3, 1.0));

        let slots: Vec<usize> = heap.into_sorted_vec().iter().map(|n| n.slot).collect();
        assert_eq!(slots, vec![9, 2, 3, 4]);
    }

    #[test]
    fn test_empty_furthest_is_max() {
        assert_eq!(MaxHeap::new().furthest(), f32::MAX);
    }
}
