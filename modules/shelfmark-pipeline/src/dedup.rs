//! Duplicate grouping over simhash fingerprints.
//!
//! Union-find over the distinct fingerprint values (not per bookmark), so
//! the pairwise Hamming comparison cost is bounded by the number of
//! distinct values. Groups merge transitively: a-b close and b-c close puts
//! a and c in one group even when a-c is far. That chaining is intended.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::fingerprint::hamming_distance;

/// Hamming distance at or below which two fingerprints share a bucket.
pub const HAMMING_THRESHOLD: u32 = 3;

/// One near-duplicate group: canonical bucket, members, representative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupCandidateGroup {
    /// Canonical fingerprint for the group: the union-find root, which is
    /// always the numerically smallest fingerprint in the merged component.
    pub bucket: u64,
    pub member_ids: Vec<Uuid>,
    /// Most recently created member (missing timestamps sort last).
    pub representative_id: Uuid,
}

/// A bookmark eligible for grouping.
#[derive(Debug, Clone)]
pub struct GroupInput {
    pub id: Uuid,
    pub fingerprint: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Union-find arena over distinct fingerprint values. Iterative find with
/// path halving; union by value so the smaller fingerprint becomes root.
struct FingerprintArena {
    index: HashMap<u64, usize>,
    values: Vec<u64>,
    parent: Vec<usize>,
}

impl FingerprintArena {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            values: Vec::new(),
            parent: Vec::new(),
        }
    }

    fn intern(&mut self, value: u64) -> usize {
        if let Some(&i) = self.index.get(&value) {
            return i;
        }
        let i = self.values.len();
        self.index.insert(value, i);
        self.values.push(value);
        self.parent.push(i);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Union two sets, keeping the numerically smaller fingerprint as root
    /// so canonical buckets are independent of input order.
    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        if self.values[ra] <= self.values[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[ra] = rb;
        }
    }
}

/// Group bookmarks whose fingerprints are within `HAMMING_THRESHOLD` of one
/// another (transitively). Returns one group per canonical bucket, members
/// in representative-first order. Empty input yields no groups.
pub fn group_by_fingerprint(items: &[GroupInput]) -> Vec<DupCandidateGroup> {
    if items.is_empty() {
        return Vec::new();
    }

    // Newest first so the representative is simply each bucket's first
    // member; stable sort preserves input order among ties.
    let mut sorted: Vec<&GroupInput> = items.iter().collect();
    sorted.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut arena = FingerprintArena::new();
    for item in &sorted {
        arena.intern(item.fingerprint);
    }

    let distinct: Vec<u64> = arena.values.clone();
    for i in 0..distinct.len() {
        for j in (i + 1)..distinct.len() {
            if hamming_distance(distinct[i], distinct[j]) <= HAMMING_THRESHOLD {
                let a = arena.index[&distinct[i]];
                let b = arena.index[&distinct[j]];
                arena.union(a, b);
            }
        }
    }

    // Bucket membership keyed by canonical root, insertion-ordered so the
    // output order follows the newest member of each group.
    let mut order: Vec<u64> = Vec::new();
    let mut buckets: HashMap<u64, Vec<Uuid>> = HashMap::new();
    for item in &sorted {
        let idx = arena.index[&item.fingerprint];
        let root = arena.find(idx);
        let canonical = arena.values[root];
        let entry = buckets.entry(canonical).or_insert_with(|| {
            order.push(canonical);
            Vec::new()
        });
        entry.push(item.id);
    }

    order
        .into_iter()
        .map(|bucket| {
            let member_ids = buckets.remove(&bucket).unwrap_or_default();
            let representative_id = member_ids[0];
            DupCandidateGroup {
                bucket,
                member_ids,
                representative_id,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::hamming_distance;
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn input(id: u128, fp: u64, created: Option<DateTime<Utc>>) -> GroupInput {
        GroupInput {
            id: Uuid::from_u128(id),
            fingerprint: fp,
            created_at: created,
        }
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_fingerprint(&[]).is_empty());
    }

    #[test]
    fn transitive_chaining_merges_far_endpoints() {
        // d(a,b)=2, d(b,c)=2, d(a,c)=4 > threshold: one group anyway.
        let a = 0b0000u64;
        let b = 0b0011u64;
        let c = 0b1111u64;
        assert_eq!(hamming_distance(a, b), 2);
        assert_eq!(hamming_distance(b, c), 2);
        assert!(hamming_distance(a, c) > HAMMING_THRESHOLD);

        let groups = group_by_fingerprint(&[
            input(1, a, at(10)),
            input(2, b, at(20)),
            input(3, c, at(30)),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].member_ids.len(), 3);
        // Canonical bucket is the smallest fingerprint in the component.
        assert_eq!(groups[0].bucket, a);
    }

    #[test]
    fn distant_fingerprints_stay_apart() {
        let groups = group_by_fingerprint(&[
            input(1, 0, at(1)),
            input(2, u64::MAX, at(2)),
        ]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn representative_is_newest_member() {
        let groups = group_by_fingerprint(&[
            input(1, 0b01, at(100)),
            input(2, 0b11, at(300)),
            input(3, 0b00, at(200)),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative_id, Uuid::from_u128(2));
    }

    #[test]
    fn missing_created_at_sorts_last() {
        let groups = group_by_fingerprint(&[
            input(1, 0b01, None),
            input(2, 0b01, at(5)),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative_id, Uuid::from_u128(2));
    }

    #[test]
    fn identical_fingerprints_share_one_bucket() {
        let groups = group_by_fingerprint(&[
            input(1, 42, at(1)),
            input(2, 42, at(2)),
            input(3, 42, at(3)),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].bucket, 42);
        assert_eq!(groups[0].member_ids.len(), 3);
    }
}
