//! Neighbor-graph spectral projection for the primary clustering tier.
//!
//! Builds a symmetric kNN affinity graph under cosine similarity and embeds
//! it into a low-dimensional space via subspace iteration on the normalized
//! affinity matrix. Deterministic by construction: initialization is seeded
//! from a fixed constant, so repeated runs over the same vectors project
//! identically.

use super::ClusterError;

const ITERATIONS: usize = 50;
const SEED: u64 = 42;

/// Project `vectors` onto `n_components` dimensions using an `n_neighbors`
/// graph. Callers clamp both parameters to the dataset size beforehand.
pub(crate) fn project(
    vectors: &[Vec<f32>],
    n_neighbors: usize,
    n_components: usize,
) -> Result<Vec<Vec<f64>>, ClusterError> {
    let n = vectors.len();
    if n == 0 {
        return Err(ClusterError::Empty);
    }

    let dim = vectors[0].len();
    for v in vectors {
        if v.len() != dim {
            return Err(ClusterError::DimensionMismatch {
                expected: dim,
                got: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(ClusterError::NonFiniteInput);
        }
    }

    let norms: Vec<f64> = vectors
        .iter()
        .map(|v| v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt())
        .collect();
    if norms.iter().any(|&x| x == 0.0) {
        return Err(ClusterError::DegenerateGeometry(
            "zero-norm vector".to_string(),
        ));
    }

    // Pairwise cosine similarity, mapped to [0, 1] affinity.
    let mut affinity = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let dot: f64 = vectors[i]
                .iter()
                .zip(vectors[j].iter())
                .map(|(a, b)| *a as f64 * *b as f64)
                .sum();
            let sim = dot / (norms[i] * norms[j]);
            let aff = ((sim + 1.0) / 2.0).clamp(0.0, 1.0);
            affinity[i][j] = aff;
            affinity[j][i] = aff;
        }
    }

    // Symmetric kNN graph: keep an edge when either endpoint ranks the
    // other among its k nearest.
    let k = n_neighbors.max(1).min(n - 1);
    let mut keep = vec![vec![false; n]; n];
    for i in 0..n {
        let mut order: Vec<usize> = (0..n).filter(|&j| j != i).collect();
        order.sort_by(|&a, &b| {
            affinity[i][b]
                .partial_cmp(&affinity[i][a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        for &j in order.iter().take(k) {
            keep[i][j] = true;
            keep[j][i] = true;
        }
    }

    let mut weights = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in 0..n {
            if keep[i][j] {
                weights[i][j] = affinity[i][j];
            }
        }
    }

    let degrees: Vec<f64> = weights.iter().map(|row| row.iter().sum()).collect();
    if degrees.iter().any(|&d| d <= 0.0 || !d.is_finite()) {
        return Err(ClusterError::DegenerateGeometry(
            "isolated vertex in neighbor graph".to_string(),
        ));
    }

    // Normalized affinity D^{-1/2} W D^{-1/2}.
    let mut normalized = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in 0..n {
            if weights[i][j] > 0.0 {
                normalized[i][j] = weights[i][j] / (degrees[i] * degrees[j]).sqrt();
            }
        }
    }

    // Subspace iteration for the leading eigenvectors. The iteration runs on
    // the shifted operator (M + I)/2 so that columns converge in signed
    // eigenvalue order rather than by magnitude; otherwise large negative
    // eigenvalues (anti-cluster directions) crowd out the informative ones.
    // One extra vector is carried and dropped afterwards: the leading
    // eigenvector of the normalized affinity is the trivial sqrt-degree
    // direction, which is known in closed form and seeded exactly so the
    // remaining columns deflate against it from the first round.
    let m = (n_components + 1).min(n);
    let mut basis: Vec<Vec<f64>> = (0..m)
        .map(|c| (0..n).map(|i| unit_noise(SEED, c, i)).collect())
        .collect();
    let sdeg_norm: f64 = degrees.iter().sum::<f64>().sqrt();
    for (slot, d) in basis[0].iter_mut().zip(degrees.iter()) {
        *slot = d.sqrt() / sdeg_norm;
    }

    for round in 0..ITERATIONS {
        let mut next: Vec<Vec<f64>> = basis
            .iter()
            .map(|col| {
                (0..n)
                    .map(|i| {
                        let mv: f64 = normalized[i]
                            .iter()
                            .zip(col.iter())
                            .map(|(w, x)| w * x)
                            .sum();
                        0.5 * (mv + col[i])
                    })
                    .collect()
            })
            .collect();
        orthonormalize(&mut next, round);
        basis = next;
    }

    // Rows of the projected space: coordinates from the non-trivial
    // eigenvectors, each weighted by its eigenvalue estimate (Rayleigh
    // quotient on the unshifted matrix, floored at zero). Directions with
    // near-zero or negative eigenvalues carry no neighborhood structure and
    // would otherwise inject unit-norm noise into the distances downstream.
    let mut projected = vec![vec![0.0f64; m - 1]; n];
    for (c, col) in basis.iter().enumerate().skip(1) {
        let rayleigh: f64 = (0..n)
            .map(|i| {
                let mv: f64 = normalized[i]
                    .iter()
                    .zip(col.iter())
                    .map(|(w, x)| w * x)
                    .sum();
                col[i] * mv
            })
            .sum();
        let scale = rayleigh.max(0.0);
        for i in 0..n {
            projected[i][c - 1] = scale * col[i];
        }
    }

    if projected
        .iter()
        .any(|row| row.iter().any(|x| !x.is_finite()))
    {
        return Err(ClusterError::DegenerateGeometry(
            "non-finite projection output".to_string(),
        ));
    }

    Ok(projected)
}

/// Gram-Schmidt with deterministic re-seeding of rank-deficient columns.
fn orthonormalize(columns: &mut [Vec<f64>], round: usize) {
    let m = columns.len();
    for c in 0..m {
        let (done, rest) = columns.split_at_mut(c);
        let current = &mut rest[0];
        for prev in done.iter() {
            let dot: f64 = current.iter().zip(prev.iter()).map(|(a, b)| a * b).sum();
            for (x, p) in current.iter_mut().zip(prev.iter()) {
                *x -= dot * p;
            }
        }
        let norm: f64 = columns[c].iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-12 {
            // Column collapsed; replace with fresh deterministic noise so
            // the iteration can recover instead of emitting NaN.
            let len = columns[c].len();
            for i in 0..len {
                columns[c][i] = unit_noise(SEED ^ (round as u64 + 1), c, i);
            }
            let renorm: f64 = columns[c].iter().map(|x| x * x).sum::<f64>().sqrt();
            for x in columns[c].iter_mut() {
                *x /= renorm;
            }
        } else {
            for x in columns[c].iter_mut() {
                *x /= norm;
            }
        }
    }
}

/// Deterministic pseudo-noise in [-0.5, 0.5] (splitmix64 over the indices).
fn unit_noise(seed: u64, column: usize, row: usize) -> f64 {
    let mut z = seed
        .wrapping_add((column as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add((row as u64 + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z as f64 / u64::MAX as f64) - 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_is_deterministic() {
        let vectors: Vec<Vec<f32>> = (0..8)
            .map(|i| vec![(i as f32).sin(), (i as f32).cos(), 1.0])
            .collect();
        let a = project(&vectors, 3, 2).unwrap();
        let b = project(&vectors, 3, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn output_has_requested_shape() {
        let vectors: Vec<Vec<f32>> = (0..10)
            .map(|i| vec![i as f32 + 1.0, 1.0, 0.5])
            .collect();
        let projected = project(&vectors, 4, 2).unwrap();
        assert_eq!(projected.len(), 10);
        assert!(projected.iter().all(|row| row.len() == 2));
    }

    #[test]
    fn tight_groups_stay_tight_after_projection() {
        // Two tight, nearly antipodal bundles must come out as two compact
        // point groups: every within-group distance well below every
        // cross-group distance, with no member flung out as an outlier.
        let mut vectors: Vec<Vec<f32>> = (0..5)
            .map(|i| vec![1.0, 0.01 * i as f32, 0.005 * i as f32])
            .collect();
        vectors.extend((0..5).map(|i| vec![-1.0, 0.01 * i as f32, 0.1 + 0.005 * i as f32]));
        let projected = project(&vectors, 9, 3).unwrap();

        let dist = |a: &[f64], b: &[f64]| -> f64 {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt()
        };
        let mut max_within = 0.0f64;
        let mut min_cross = f64::INFINITY;
        for i in 0..10 {
            for j in (i + 1)..10 {
                let d = dist(&projected[i], &projected[j]);
                if (i < 5) == (j < 5) {
                    max_within = max_within.max(d);
                } else {
                    min_cross = min_cross.min(d);
                }
            }
        }
        assert!(min_cross > 1e-3);
        assert!(min_cross > 5.0 * max_within);
    }

    #[test]
    fn zero_norm_vector_is_rejected() {
        let vectors = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(matches!(
            project(&vectors, 2, 2),
            Err(ClusterError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let vectors = vec![vec![f32::NAN, 0.0], vec![1.0, 0.0]];
        assert!(matches!(
            project(&vectors, 1, 1),
            Err(ClusterError::NonFiniteInput)
        ));
    }
}
