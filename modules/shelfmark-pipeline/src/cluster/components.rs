//! Fallback tier: connected components over a cosine-similarity graph.
//!
//! Pairs at or above the threshold are connected; components are numbered
//! sequentially from 0 by BFS. Every point gets a component, singletons
//! included; there is no noise concept in this tier.

use std::collections::VecDeque;

use super::{cosine_similarity, ClusterError};

pub(crate) fn cluster(vectors: &[Vec<f32>], threshold: f64) -> Result<Vec<i64>, ClusterError> {
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
    }

    if n < 2 {
        return Ok(vec![0; n]);
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            if cosine_similarity(&vectors[i], &vectors[j]) >= threshold {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
        }
    }

    let mut labels = vec![-1i64; n];
    let mut current = 0i64;

    for start in 0..n {
        if labels[start] != -1 {
            continue;
        }
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            if labels[node] != -1 {
                continue;
            }
            labels[node] = current;
            for &neighbor in &adjacency[node] {
                if labels[neighbor] == -1 {
                    queue.push_back(neighbor);
                }
            }
        }
        current += 1;
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_tight_groups_become_two_components() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.05],
            vec![0.0, 1.0],
            vec![0.05, 0.99],
        ];
        let labels = cluster(&vectors, 0.7).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        // Sequential ids starting at 0, in BFS discovery order.
        assert_eq!(labels[0], 0);
        assert_eq!(labels[2], 1);
    }

    #[test]
    fn singletons_are_assigned_not_noise() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let labels = cluster(&vectors, 0.7).unwrap();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn transitive_connectivity_joins_a_chain() {
        // a~b and b~c above threshold, a~c below: one component.
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.8, 0.6],
            vec![0.28, 0.96],
        ];
        let labels = cluster(&vectors, 0.7).unwrap();
        assert_eq!(labels, vec![0, 0, 0]);
    }

    #[test]
    fn single_point_is_cluster_zero() {
        assert_eq!(cluster(&[vec![1.0, 0.0]], 0.7).unwrap(), vec![0]);
    }
}
