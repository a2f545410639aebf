//! Vector operations with parallel processing.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric used to compare face embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`.
    Cosine,
    /// Plain L2 distance.
    Euclidean,
    /// L2 distance between unit-normalised vectors.
    EuclideanL2,
}

impl DistanceMetric {
    /// Distance between two vectors of equal length.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - VectorOps::cosine_similarity(a, b),
            DistanceMetric::Euclidean => VectorOps::l2_distance(a, b),
            DistanceMetric::EuclideanL2 => {
                VectorOps::l2_distance(&VectorOps::normalize(a), &VectorOps::normalize(b))
            }
        }
    }

    /// `1 - distance`, clamped to `[0, 1]`. A non-finite result counts as 0.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        let similarity = 1.0 - self.distance(a, b);
        if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
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
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "euclidean_l2" => Ok(DistanceMetric::EuclideanL2),
            other => Err(format!("unknown distance metric: {}", other)),
        }
    }
}

/// Utility struct for vector operations.
pub struct VectorOps;

impl VectorOps {
    /// Compute cosine similarity between two vectors.
    ///
    /// Sums run in `f64` so large components do not overflow.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot_product: f64 = a
            .par_iter()
            .zip(b.par_iter())
            .map(|(&x, &y)| x as f64 * y as f64)
            .sum();
        let norm_a = Self::norm(a);
        let norm_b = Self::norm(b);

        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            (dot_product / (norm_a * norm_b)) as f32
        }
    }

    /// Compute L2 (Euclidean) distance between two vectors.
    pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::MAX;
        }
        a.par_iter()
            .zip(b.par_iter())
            .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
            .sum::<f64>()
            .sqrt() as f32
    }

    /// Normalize a vector and return a new vector.
    pub fn normalize(vector: &[f32]) -> Vec<f32> {
        let norm = Self::norm(vector);
        if norm > 0.0 {
            vector.par_iter().map(|&x| (x as f64 / norm) as f32).collect()
        } else {
            vector.to_vec()
        }
    }

    fn norm(vector: &[f32]) -> f64 {
        vector
            .par_iter()
            .map(|&x| (x as f64).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// True when the vector is non-empty and every component is finite.
    pub fn is_usable(vector: &[f32]) -> bool {
        !vector.is_empty() && vector.iter().all(|x| x.is_finite())
    }
}
