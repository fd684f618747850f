//! Density-based clustering over the spectral projection.
//!
//! Pipeline: project the embeddings with [`projection::project`], then run
//! hierarchical density clustering on the projected coordinates. Mutual
//! reachability distances feed a minimum spanning tree, the tree condenses
//! into a cluster hierarchy, and clusters are selected by excess of mass.
//! Points outside every selected cluster are labeled `-1` (noise). The root
//! of the hierarchy is never selectable, so a dataset with no internal
//! density structure comes back as all noise rather than one giant cluster.

use super::projection;
use super::{ClusterError, ClusterParams};

/// Lambda assigned to zero-distance merges, which would otherwise be 1/0.
const LAMBDA_CAP: f64 = 1e12;

pub(crate) fn cluster(
    vectors: &[Vec<f32>],
    params: &ClusterParams,
) -> Result<Vec<i64>, ClusterError> {
    let n = vectors.len();
    if n == 0 {
        return Err(ClusterError::Empty);
    }
    let dim = vectors[0].len();
    let neighbors = params
        .projection_neighbors
        .min(n.saturating_sub(1))
        .max(1);
    let components = params
        .projection_components
        .min(n.saturating_sub(1))
        .min(dim)
        .max(1);
    let points = projection::project(vectors, neighbors, components)?;

    // Small datasets get a proportionally smaller minimum cluster size so
    // the hierarchy has room to form more than one cluster.
    let mcs = params.min_cluster_size.min((n / 3).max(2)).max(2);
    Ok(hdbscan_labels(&points, mcs))
}

fn hdbscan_labels(points: &[Vec<f64>], mcs: usize) -> Vec<i64> {
    let n = points.len();
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean(&points[i], &points[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    // Core distance with a single-sample neighborhood: distance to the
    // nearest other point.
    let core: Vec<f64> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| dist[i][j])
                .fold(f64::INFINITY, f64::min)
        })
        .collect();

    // Mutual reachability reuses the distance matrix in place.
    let mut mreach = dist;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                mreach[i][j] = mreach[i][j].max(core[i]).max(core[j]);
            }
        }
    }

    let edges = minimum_spanning_tree(&mreach);
    let nodes = single_linkage(&edges, n);
    let condensed = condense(&nodes, n, mcs);
    assign_labels(&condensed, n)
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Prim's algorithm over the dense mutual reachability matrix.
fn minimum_spanning_tree(w: &[Vec<f64>]) -> Vec<(usize, usize, f64)> {
    let n = w.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    in_tree[0] = true;
    for j in 1..n {
        best[j] = w[0][j];
    }
    let mut edges = Vec::with_capacity(n.saturating_sub(1));
    for _ in 1..n {
        let mut pick = usize::MAX;
        let mut pick_dist = f64::INFINITY;
        for j in 0..n {
            if !in_tree[j] && best[j] <= pick_dist {
                pick_dist = best[j];
                pick = j;
            }
        }
        edges.push((from[pick], pick, pick_dist));
        in_tree[pick] = true;
        for j in 0..n {
            if !in_tree[j] && w[pick][j] < best[j] {
                best[j] = w[pick][j];
                from[j] = pick;
            }
        }
    }
    edges
}

/// Dendrogram internal node. Leaves are point indices `0..n`; internal
/// nodes are `n..2n-1` in merge order.
struct DendroNode {
    left: usize,
    right: usize,
    dist: f64,
    size: usize,
}

fn node_size(nodes: &[DendroNode], id: usize, n: usize) -> usize {
    if id < n {
        1
    } else {
        nodes[id - n].size
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Single-linkage dendrogram from MST edges sorted by weight.
fn single_linkage(edges: &[(usize, usize, f64)], n: usize) -> Vec<DendroNode> {
    let mut sorted = edges.to_vec();
    sorted.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut parent: Vec<usize> = (0..n).collect();
    // Component root -> dendrogram node currently representing it.
    let mut comp_node: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<DendroNode> = Vec::with_capacity(n.saturating_sub(1));
    for (k, &(a, b, d)) in sorted.iter().enumerate() {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let left = comp_node[ra];
        let right = comp_node[rb];
        let size = node_size(&nodes, left, n) + node_size(&nodes, right, n);
        parent[rb] = ra;
        comp_node[ra] = n + k;
        nodes.push(DendroNode {
            left,
            right,
            dist: d,
            size,
        });
    }
    nodes
}

fn leaves(nodes: &[DendroNode], id: usize, n: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(x) = stack.pop() {
        if x < n {
            out.push(x);
        } else {
            let node = &nodes[x - n];
            stack.push(node.left);
            stack.push(node.right);
        }
    }
    out
}

enum CondChild {
    Point(usize),
    Cluster(usize),
}

struct CondEntry {
    parent: usize,
    child: CondChild,
    lambda: f64,
    size: usize,
}

struct Condensed {
    entries: Vec<CondEntry>,
    /// Birth lambda per condensed cluster id; id 0 is the root.
    births: Vec<f64>,
}

/// Condense the dendrogram: splits where both sides reach `mcs` spawn new
/// clusters, undersized sides fall out as points at the split's lambda.
fn condense(nodes: &[DendroNode], n: usize, mcs: usize) -> Condensed {
    let root = n + nodes.len() - 1;
    let mut entries = Vec::new();
    let mut births = vec![0.0f64];
    let mut stack = vec![(root, 0usize)];
    while let Some((node_id, cl)) = stack.pop() {
        let node = &nodes[node_id - n];
        let lambda = if node.dist > 0.0 {
            (1.0 / node.dist).min(LAMBDA_CAP)
        } else {
            LAMBDA_CAP
        };
        let left_size = node_size(nodes, node.left, n);
        let right_size = node_size(nodes, node.right, n);
        if left_size >= mcs && right_size >= mcs {
            // True split: both sides become new clusters. Sizes >= mcs >= 2
            // imply both children are internal nodes.
            for &(child, child_size) in &[(node.left, left_size), (node.right, right_size)] {
                let id = births.len();
                births.push(lambda);
                entries.push(CondEntry {
                    parent: cl,
                    child: CondChild::Cluster(id),
                    lambda,
                    size: child_size,
                });
                stack.push((child, id));
            }
        } else if left_size < mcs && right_size < mcs {
            // Cluster dissolves entirely at this level.
            for side in [node.left, node.right] {
                for p in leaves(nodes, side, n) {
                    entries.push(CondEntry {
                        parent: cl,
                        child: CondChild::Point(p),
                        lambda,
                        size: 1,
                    });
                }
            }
        } else {
            // One undersized side sheds its points; the other carries the
            // cluster forward under the same id.
            let (small, big) = if left_size < mcs {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };
            for p in leaves(nodes, small, n) {
                entries.push(CondEntry {
                    parent: cl,
                    child: CondChild::Point(p),
                    lambda,
                    size: 1,
                });
            }
            stack.push((big, cl));
        }
    }
    Condensed { entries, births }
}

/// Excess-of-mass cluster selection plus contiguous relabeling.
fn assign_labels(condensed: &Condensed, n: usize) -> Vec<i64> {
    let k = condensed.births.len();
    let mut stability = vec![0.0f64; k];
    let mut cluster_parent = vec![usize::MAX; k];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); k];
    for e in &condensed.entries {
        let birth = condensed.births[e.parent];
        stability[e.parent] += (e.lambda - birth) * e.size as f64;
        if let CondChild::Cluster(c) = e.child {
            cluster_parent[c] = e.parent;
            children[e.parent].push(c);
        }
    }

    // Child ids are always greater than their parent's, so a descending
    // sweep visits every subtree bottom-up. The root (id 0) is skipped and
    // therefore never selected.
    let mut selected = vec![false; k];
    let mut subtree_stability = stability.clone();
    for c in (1..k).rev() {
        if children[c].is_empty() {
            selected[c] = true;
            continue;
        }
        let child_sum: f64 = children[c].iter().map(|&ch| subtree_stability[ch]).sum();
        if stability[c] >= child_sum {
            selected[c] = true;
            subtree_stability[c] = stability[c];
            let mut stack = children[c].clone();
            while let Some(d) = stack.pop() {
                selected[d] = false;
                stack.extend(children[d].iter().copied());
            }
        } else {
            subtree_stability[c] = child_sum;
        }
    }

    let mut label_of = vec![-1i64; k];
    let mut next = 0i64;
    for c in 1..k {
        if selected[c] {
            label_of[c] = next;
            next += 1;
        }
    }

    let mut labels = vec![-1i64; n];
    for e in &condensed.entries {
        if let CondChild::Point(p) = e.child {
            let mut c = e.parent;
            while c != usize::MAX {
                if selected[c] {
                    labels[p] = label_of[c];
                    break;
                }
                c = cluster_parent[c];
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterParams;

    fn blob(base: [f32; 3], count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| {
                vec![
                    base[0],
                    base[1] + 0.01 * i as f32,
                    base[2] + 0.005 * i as f32,
                ]
            })
            .collect()
    }

    #[test]
    fn separated_blobs_get_distinct_labels() {
        let mut vectors = blob([1.0, 0.0, 0.0], 5);
        vectors.extend(blob([-1.0, 0.0, 0.1], 5));
        let labels = cluster(&vectors, &ClusterParams::default()).unwrap();
        assert_eq!(labels.len(), 10);
        let first = labels[0];
        let second = labels[5];
        assert!(first >= 0);
        assert!(second >= 0);
        assert_ne!(first, second);
        assert!(labels[..5].iter().all(|&l| l == first));
        assert!(labels[5..].iter().all(|&l| l == second));
    }

    #[test]
    fn labels_are_deterministic_and_contiguous() {
        let mut vectors = blob([1.0, 0.0, 0.0], 5);
        vectors.extend(blob([0.0, 1.0, 0.0], 4));
        vectors.extend(blob([0.0, 0.0, 1.0], 4));
        let params = ClusterParams::default();
        let a = cluster(&vectors, &params).unwrap();
        let b = cluster(&vectors, &params).unwrap();
        assert_eq!(a, b);

        let mut seen: Vec<i64> = a.iter().copied().filter(|&l| l >= 0).collect();
        seen.sort_unstable();
        seen.dedup();
        let expected: Vec<i64> = (0..seen.len() as i64).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn small_dataset_clamps_oversized_params() {
        // Defaults ask for 10 neighbors and 15 components; with 5 points
        // both clamp to the dataset and the run still succeeds.
        let vectors = blob([1.0, 0.2, 0.1], 5);
        let labels = cluster(&vectors, &ClusterParams::default()).unwrap();
        assert_eq!(labels.len(), 5);
        assert!(labels.iter().all(|&l| l >= -1));
    }

    #[test]
    fn structureless_data_is_all_noise() {
        // Identical projected points give the hierarchy nothing to split
        // on; with the root unselectable everything becomes noise.
        let points = vec![vec![1.0f64, 2.0]; 6];
        let labels = hdbscan_labels(&points, 2);
        assert!(labels.iter().all(|&l| l == -1));
    }

    #[test]
    fn well_separated_groups_in_projected_space() {
        let mut points: Vec<Vec<f64>> = (0..3).map(|i| vec![0.1 * i as f64, 0.0]).collect();
        points.extend((0..3).map(|i| vec![10.0 + 0.1 * i as f64, 0.0]));
        let labels = hdbscan_labels(&points, 2);
        assert!(labels[..3].iter().all(|&l| l == labels[0] && l >= 0));
        assert!(labels[3..].iter().all(|&l| l == labels[3] && l >= 0));
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn mst_spans_all_points() {
        let w = vec![
            vec![0.0, 1.0, 5.0],
            vec![1.0, 0.0, 2.0],
            vec![5.0, 2.0, 0.0],
        ];
        let edges = minimum_spanning_tree(&w);
        assert_eq!(edges.len(), 2);
        let total: f64 = edges.iter().map(|e| e.2).sum();
        assert!((total - 3.0).abs() < 1e-9);
    }
}
