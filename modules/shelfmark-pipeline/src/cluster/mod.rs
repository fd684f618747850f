//! Density clustering with a resilience fallback chain.
//!
//! Three tiers, each tried only when the previous one returns an error:
//! 1. kNN-graph projection + HDBSCAN (noise = -1)
//! 2. cosine-threshold connected components (no noise)
//! 3. everything in cluster 0
//!
//! Low-quality output never triggers a fallback; only an error does. The
//! batch job must never hard-fail because one user's geometry breaks the
//! primary method.

use thiserror::Error;
use tracing::{info, warn};

mod components;
mod density;
mod projection;

/// Fewer points than this skips density estimation entirely: everything
/// lands in cluster 0.
pub const MIN_POINTS_FOR_DENSITY: usize = 5;

/// Cosine similarity threshold for the connected-components fallback.
pub const FALLBACK_SIMILARITY_THRESHOLD: f64 = 0.7;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("empty vector set")]
    Empty,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("non-finite values in input vectors")]
    NonFiniteInput,

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),
}

/// Tunables for the primary tier. Neighbor count and target dimensionality
/// are clamped per dataset inside the tier to satisfy the preconditions of
/// the projection on small inputs.
#[derive(Debug, Clone)]
pub struct ClusterParams {
    pub min_cluster_size: usize,
    pub projection_components: usize,
    pub projection_neighbors: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            projection_components: 15,
            projection_neighbors: 10,
        }
    }
}

/// The ordered strategy chain. `assign` always returns one cluster id per
/// input vector; -1 marks noise (primary tier only).
pub struct ClusterChain {
    params: ClusterParams,
}

impl ClusterChain {
    pub fn new(params: ClusterParams) -> Self {
        Self { params }
    }

    pub fn assign(&self, vectors: &[Vec<f32>]) -> Vec<i64> {
        let n = vectors.len();
        if n == 0 {
            return Vec::new();
        }
        if n < MIN_POINTS_FOR_DENSITY {
            return vec![0; n];
        }

        match density::cluster(vectors, &self.params) {
            Ok(labels) => {
                let clusters = labels.iter().filter(|&&l| l >= 0).collect::<std::collections::HashSet<_>>().len();
                let noise = labels.iter().filter(|&&l| l < 0).count();
                info!(n, clusters, noise, "Density clustering succeeded");
                labels
            }
            Err(e) => {
                warn!(error = %e, "Density clustering failed, falling back to cosine components");
                match components::cluster(vectors, FALLBACK_SIMILARITY_THRESHOLD) {
                    Ok(labels) => {
                        let clusters = labels.iter().collect::<std::collections::HashSet<_>>().len();
                        info!(n, clusters, "Cosine-component clustering succeeded");
                        labels
                    }
                    Err(e2) => {
                        warn!(error = %e2, "All clustering methods failed, assigning single cluster");
                        vec![0; n]
                    }
                }
            }
        }
    }
}

/// Cosine similarity between two vectors, accumulated in f64.
/// Zero-norm inputs yield 0.0.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_output() {
        let chain = ClusterChain::new(ClusterParams::default());
        assert!(chain.assign(&[]).is_empty());
    }

    #[test]
    fn fewer_than_five_points_all_land_in_cluster_zero() {
        let chain = ClusterChain::new(ClusterParams::default());
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, -1.0],
        ];
        assert_eq!(chain.assign(&vectors), vec![0, 0, 0, 0]);
    }

    #[test]
    fn zero_norm_vectors_fall_back_to_singleton_components() {
        // Zero norms break the projection; the cosine fallback treats a
        // zero-norm pair as similarity 0, so every point is a singleton.
        let chain = ClusterChain::new(ClusterParams::default());
        let vectors = vec![vec![0.0, 0.0]; 6];
        let labels = chain.assign(&vectors);
        assert_eq!(labels, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn mismatched_dimensions_exhaust_the_chain() {
        let chain = ClusterChain::new(ClusterParams::default());
        let vectors = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
        ];
        assert_eq!(chain.assign(&vectors), vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
