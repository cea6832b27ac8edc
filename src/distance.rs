//! Distance metrics and the canonicalizer that resolves them by name

use crate::error::{Result, SimilarityError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A named, pure, symmetric distance with `d(a, a) == 0` and `d(a, b) >= 0`.
///
/// Callers guarantee both slices have the same length.
pub trait Distance: Send + Sync + fmt::Debug {
    /// Stable name, written into configuration records.
    fn name(&self) -> &str;

    /// Compute the distance between two embeddings.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}

/// Built-in distance metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance
    Euclidean,
    /// Squared Euclidean distance (no square root)
    SquaredEuclidean,
    /// Manhattan (L1) distance
    Manhattan,
    /// Cosine distance: 1 - cosine similarity
    Cosine,
}

/// Registry of accepted names, canonical name first.
const DISTANCE_ALIASES: &[(&str, DistanceMetric)] = &[
    ("euclidean", DistanceMetric::Euclidean),
    ("l2", DistanceMetric::Euclidean),
    ("squared_euclidean", DistanceMetric::SquaredEuclidean),
    ("sql2", DistanceMetric::SquaredEuclidean),
    ("sqeuclidean", DistanceMetric::SquaredEuclidean),
    ("manhattan", DistanceMetric::Manhattan),
    ("l1", DistanceMetric::Manhattan),
    ("taxicab", DistanceMetric::Manhattan),
    ("cosine", DistanceMetric::Cosine),
];

impl DistanceMetric {
    /// All built-in metrics.
    pub const ALL: [DistanceMetric; 4] = [
        DistanceMetric::Euclidean,
        DistanceMetric::SquaredEuclidean,
        DistanceMetric::Manhattan,
        DistanceMetric::Cosine,
    ];

    /// Resolve a metric from a name or alias (trimmed, case-insensitive).
    pub fn from_name(name: &str) -> Result<Self> {
        let key = name.trim().to_ascii_lowercase();
        DISTANCE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|&(_, metric)| metric)
            .ok_or_else(|| SimilarityError::UnknownDistance {
                name: name.to_string(),
            })
    }

    /// Canonical name of this metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::SquaredEuclidean => "squared_euclidean",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl Distance for DistanceMetric {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Euclidean => squared_euclidean_distance(a, b).sqrt(),
            DistanceMetric::SquaredEuclidean => squared_euclidean_distance(a, b),
            DistanceMetric::Manhattan => manhattan_distance(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loose distance specification: a registry name or an already-built distance.
#[derive(Debug, Clone)]
pub enum DistanceSpec {
    Name(String),
    Custom(Arc<dyn Distance>),
}

impl From<&str> for DistanceSpec {
    fn from(name: &str) -> Self {
        DistanceSpec::Name(name.to_string())
    }
}

impl From<String> for DistanceSpec {
    fn from(name: String) -> Self {
        DistanceSpec::Name(name)
    }
}

impl From<DistanceMetric> for DistanceSpec {
    fn from(metric: DistanceMetric) -> Self {
        DistanceSpec::Custom(Arc::new(metric))
    }
}

impl From<Arc<dyn Distance>> for DistanceSpec {
    fn from(distance: Arc<dyn Distance>) -> Self {
        DistanceSpec::Custom(distance)
    }
}

/// Resolve a distance spec to a shareable distance object.
///
/// Names go through the fixed registry and fail with
/// [`SimilarityError::UnknownDistance`]; custom objects are returned as-is.
pub fn distance_canonicalizer(spec: impl Into<DistanceSpec>) -> Result<Arc<dyn Distance>> {
    match spec.into() {
        DistanceSpec::Name(name) => Ok(Arc::new(DistanceMetric::from_name(&name)?)),
        DistanceSpec::Custom(distance) => Ok(distance),
    }
}

/// Sum of squared component differences
pub fn squared_euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Sum of absolute component differences
pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Cosine distance (1 - cosine similarity), clamped to `[0, 2]`.
///
/// Identical inputs give exactly 0. A zero vector is at distance 1 from any
/// non-zero vector.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a == b {
        return 0.0;
    }
    // Components are divided by each side's largest magnitude so that the
    // squared sums cannot overflow.
    let scale_a = max_abs(a);
    let scale_b = max_abs(b);
    if scale_a == 0.0 || scale_b == 0.0 {
        return if scale_a == scale_b { 0.0 } else { 1.0 };
    }

    let (mut dot, mut sq_a, mut sq_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (x / scale_a, y / scale_b);
        dot += x * y;
        sq_a += x * x;
        sq_b += y * y;
    }

    let similarity = (dot / (sq_a.sqrt() * sq_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 - similarity).max(0.0)
}

fn max_abs(v: &[f32]) -> f32 {
    v.iter().fold(0.0f32, |m, x| m.max(x.abs()))
}
