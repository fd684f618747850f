//! Human-readable cluster labels from member tags.

use std::collections::BTreeMap;

/// How many top tags make up a label.
const LABEL_TAG_COUNT: usize = 5;

/// Build a label per cluster id from the tags of its members.
///
/// Tags are ranked by frequency within the cluster; ties keep first-seen
/// order, so labels are stable across runs over the same input. Noise
/// assignments (negative ids) are skipped. A cluster whose members carry no
/// tags at all falls back to `Cluster {id}`.
pub fn label_clusters(assignments: &[i64], tags: &[Vec<String>]) -> BTreeMap<i64, String> {
    let mut per_cluster: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
    for (i, &cluster_id) in assignments.iter().enumerate() {
        if cluster_id < 0 {
            continue;
        }
        let bucket = per_cluster.entry(cluster_id).or_default();
        if let Some(item_tags) = tags.get(i) {
            bucket.extend(item_tags.iter().map(String::as_str));
        }
    }

    let mut labels = BTreeMap::new();
    for (cluster_id, cluster_tags) in per_cluster {
        labels.insert(cluster_id, label_from_tags(cluster_id, &cluster_tags));
    }
    labels
}

fn label_from_tags(cluster_id: i64, tags: &[&str]) -> String {
    if tags.is_empty() {
        return format!("Cluster {cluster_id}");
    }
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for &tag in tags {
        match counts.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, c)) => *c += 1,
            None => counts.push((tag, 1)),
        }
    }
    // Stable sort preserves first-seen order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .iter()
        .take(LABEL_TAG_COUNT)
        .map(|(t, _)| *t)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&[&str]]) -> Vec<Vec<String>> {
        items
            .iter()
            .map(|ts| ts.iter().map(|t| t.to_string()).collect())
            .collect()
    }

    #[test]
    fn most_frequent_tags_lead_the_label() {
        let labels = label_clusters(&[0, 0, 0], &tags(&[&["ai"], &["ai"], &["ml"]]));
        assert_eq!(labels.get(&0).map(String::as_str), Some("ai, ml"));
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let labels = label_clusters(&[0, 0], &tags(&[&["rust", "wasm"], &["wasm", "rust"]]));
        assert_eq!(labels.get(&0).map(String::as_str), Some("rust, wasm"));
    }

    #[test]
    fn label_is_capped_at_five_tags() {
        let labels = label_clusters(
            &[0],
            &tags(&[&["a", "b", "c", "d", "e", "f", "g"]]),
        );
        assert_eq!(labels.get(&0).map(String::as_str), Some("a, b, c, d, e"));
    }

    #[test]
    fn untagged_cluster_gets_numeric_fallback() {
        let labels = label_clusters(&[3, 3], &tags(&[&[], &[]]));
        assert_eq!(labels.get(&3).map(String::as_str), Some("Cluster 3"));
    }

    #[test]
    fn noise_is_never_labeled() {
        let labels = label_clusters(&[-1, 0, -1], &tags(&[&["x"], &["y"], &["z"]]));
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get(&0).map(String::as_str), Some("y"));
    }
}
