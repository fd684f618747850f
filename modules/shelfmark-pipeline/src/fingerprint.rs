//! Simhash fingerprints for near-duplicate detection.
//!
//! 64-bit locality-sensitive fingerprints over word shingles: similar text
//! yields fingerprints with small Hamming distance. Every input produces a
//! fingerprint; there is no failure path.

use sha2::{Digest, Sha256};

/// Shingle size in words.
const SHINGLE_SIZE: usize = 3;

/// Normalize text for fingerprinting: lowercase, collapse whitespace.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 64-bit hash of a shingle: first 8 bytes of sha256, big-endian.
fn hash64(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is 32 bytes"))
}

/// Compute the 64-bit simhash of arbitrary text.
///
/// Word 3-shingles each vote on every bit position (+1 if the shingle hash
/// has the bit set, -1 otherwise); the final bit is 1 iff the vote sum is
/// positive, so ties resolve to 0. Fewer than three words collapse to a
/// single whole-string shingle. Empty normalized text yields 0.
pub fn simhash64(text: &str) -> u64 {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return 0;
    }

    let words: Vec<&str> = normalized.split(' ').collect();
    let shingles: Vec<String> = if words.len() < SHINGLE_SIZE {
        vec![normalized.clone()]
    } else {
        words
            .windows(SHINGLE_SIZE)
            .map(|w| w.join(" "))
            .collect()
    };

    let mut votes = [0i64; 64];
    for shingle in &shingles {
        let h = hash64(shingle);
        for (i, vote) in votes.iter_mut().enumerate() {
            if (h >> i) & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    let mut result = 0u64;
    for (i, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            result |= 1 << i;
        }
    }
    result
}

/// Number of differing bit positions between two 64-bit fingerprints.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Reinterpret a signed BIGINT from storage as the unsigned fingerprint.
pub fn from_stored(v: i64) -> u64 {
    v as u64
}

/// Two's-complement representation for signed BIGINT storage.
pub fn to_stored(v: u64) -> i64 {
    v as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_same_fingerprint() {
        let a = simhash64("Rust ownership and borrowing explained in depth");
        let b = simhash64("Rust ownership and borrowing explained in depth");
        assert_eq!(a, b);
    }

    #[test]
    fn normalization_is_case_and_whitespace_insensitive() {
        let a = simhash64("Hello   World  Again");
        let b = simhash64("hello world again");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(simhash64(""), 0);
        assert_eq!(simhash64("   \t\n  "), 0);
    }

    #[test]
    fn short_text_uses_whole_string_shingle() {
        // Two words: the single shingle is the whole normalized string.
        let a = simhash64("hello world");
        assert_eq!(a, {
            let h = hash64("hello world");
            // One shingle: every set bit votes +1, every clear bit -1.
            h
        });
    }

    #[test]
    fn similar_text_is_close_distinct_text_is_far() {
        let a = simhash64("the quick brown fox jumps over the lazy dog today");
        let b = simhash64("the quick brown fox jumps over the lazy dog tonight");
        let c = simhash64("completely unrelated article about database indexing strategies");
        assert!(hamming_distance(a, b) < hamming_distance(a, c));
    }

    #[test]
    fn hamming_properties() {
        let a = simhash64("some saved article title");
        let b = simhash64("another saved article title");
        assert_eq!(hamming_distance(a, a), 0);
        assert_eq!(hamming_distance(a, b), hamming_distance(b, a));
    }

    #[test]
    fn stored_roundtrip_preserves_high_bit() {
        let v = 0xF000_0000_0000_0001u64;
        let stored = to_stored(v);
        assert!(stored < 0);
        assert_eq!(from_stored(stored), v);
        assert_eq!(hamming_distance(from_stored(stored), v), 0);
    }
}
