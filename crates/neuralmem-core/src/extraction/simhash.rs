//! 64-bit SimHash for near-duplicate detection.
//!
//! Features are content tokens (stop words removed, dotted and hyphenated
//! tokens kept whole) weighted by `length × frequency`, so long
//! discriminative tokens dominate and a swapped short word ("DB" for
//! "Database") barely moves the fingerprint. Token hashing uses the stdlib
//! `DefaultHasher`, which is deterministic for a fixed input.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;

use super::keywords::is_stop_word;

/// Hamming radius treated as "the same content".
pub const DEDUP_DISTANCE: u32 = 6;

static FEATURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9à-ỹ][a-z0-9à-ỹ._\-]*").unwrap());

/// Compute the 64-bit SimHash of a text.
///
/// Empty or all-stop-word input hashes to 0.
pub fn simhash64(text: &str) -> u64 {
    let lower = text.to_lowercase();
    let mut weights: HashMap<&str, i64> = HashMap::new();
    for m in FEATURE_RE.find_iter(&lower) {
        let token = m.as_str().trim_end_matches(['.', '-']);
        if token.len() < 2 || is_stop_word(token) {
            continue;
        }
        *weights.entry(token).or_insert(0) += token.len() as i64;
    }
    if weights.is_empty() {
        return 0;
    }

    let mut lanes = [0i64; 64];
    for (token, weight) in weights {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        for (bit, lane) in lanes.iter_mut().enumerate() {
            if h & (1u64 << bit) != 0 {
                *lane += weight;
            } else {
                *lane -= weight;
            }
        }
    }

    let mut out = 0u64;
    for (bit, lane) in lanes.iter().enumerate() {
        if *lane > 0 {
            out |= 1u64 << bit;
        }
    }
    out
}

/// Hamming distance between two hashes.
#[inline]
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Whether two hashes are near-duplicates under the default radius.
#[inline]
pub fn is_near_duplicate(a: u64, b: u64) -> bool {
    hamming(a, b) <= DEDUP_DISTANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_hashes_identically() {
        let a = simhash64("Database host is db.example.com");
        let b = simhash64("Database host is db.example.com");
        assert_eq!(a, b);
        assert_eq!(hamming(a, b), 0);
    }

    #[test]
    fn paraphrase_stays_within_dedup_radius() {
        let a = simhash64("Database host is db.example.com");
        let b = simhash64("DB host is db.example.com");
        assert!(
            hamming(a, b) <= DEDUP_DISTANCE,
            "distance {}",
            hamming(a, b)
        );
    }

    #[test]
    fn unrelated_text_is_far_apart() {
        let a = simhash64("Database host is db.example.com");
        let b = simhash64("Alice suggested rotating the staging credentials weekly");
        assert!(hamming(a, b) > DEDUP_DISTANCE);
    }

    #[test]
    fn dotted_tokens_stay_whole() {
        // Splitting the hostname apart would change the fingerprint far
        // more than swapping one short word does.
        let whole = simhash64("host db.example.com");
        let other = simhash64("server db.example.com");
        assert!(hamming(whole, other) <= 20);
    }

    #[test]
    fn empty_input_hashes_to_zero() {
        assert_eq!(simhash64(""), 0);
        assert_eq!(simhash64("  ! "), 0);
        assert_eq!(simhash64("the a of"), 0);
    }
}
