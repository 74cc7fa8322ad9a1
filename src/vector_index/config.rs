//! Vector index configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance function used to rank search results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// 1 - cosine similarity
    #[default]
    Cosine,
    /// Negative dot product
    Dot,
    /// Squared euclidean distance
    L2Squared,
}

impl DistanceMetric {
    /// Distance between two vectors of equal length. Lower is closer.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Dot => -dot(a, b),
            DistanceMetric::L2Squared => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::L2Squared => "l2-squared",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" => Ok(DistanceMetric::Dot),
            "l2" | "l2-squared" | "l2squared" => Ok(DistanceMetric::L2Squared),
            other => Err(format!("unknown distance metric: {}", other)),
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (norm_a * norm_b)
}

/// Configuration for the per-shard vector index
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    pub distance: DistanceMetric,
    /// Required dimensionality. `None` lets the first stored vector decide.
    pub dimensions: Option<usize>,
}

impl VectorIndexConfig {
    pub fn new(distance: DistanceMetric) -> Self {
        Self {
            distance,
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = Some(dims);
        self
    }

    /// Get the index type name
    pub fn index_type_name(&self) -> &'static str {
        "flat"
    }
}
