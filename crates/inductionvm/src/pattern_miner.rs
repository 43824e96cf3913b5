//! Frequent subsequence mining
//!
//! Counts every contiguous subsequence of length `2..=max_pattern_length`
//! in the sequences it observes. A sequence is *cacheable* when it contains
//! any pattern seen at least `min_frequency` times; its cache key is derived
//! from the longest such pattern.
//!
//! Counts only grow until [`PatternMiner::clear`] is called.

use crate::error::{InductionError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;

/// Hex characters kept from the SHA-256 digest in cache keys
const KEY_HEX_LEN: usize = 16;

/// Observation counts for contiguous subsequences
#[derive(Debug, Clone)]
pub struct PatternMiner<T> {
    min_frequency: u64,
    max_pattern_length: usize,
    patterns: HashMap<Vec<T>, u64>,
}

fn digest_key<T: Serialize>(prefix: &str, items: &[T]) -> Result<String> {
    let bytes = serde_json::to_vec(items)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let hex = format!("{:x}", hasher.finalize());
    Ok(format!("{}_{}", prefix, &hex[..KEY_HEX_LEN]))
}

impl<T> PatternMiner<T>
where
    T: Clone + Eq + Hash + Ord + Serialize,
{
    /// Create a miner; `min_frequency >= 1` and `max_pattern_length >= 2`.
    pub fn new(min_frequency: u64, max_pattern_length: usize) -> Result<Self> {
        if min_frequency == 0 {
            return Err(InductionError::Config(
                "min_frequency must be at least 1".to_string(),
            ));
        }
        if max_pattern_length < 2 {
            return Err(InductionError::Config(format!(
                "max_pattern_length must be at least 2, got {}",
                max_pattern_length
            )));
        }
        tracing::info!(
            min_frequency,
            max_pattern_length,
            "PatternMiner initialized"
        );
        Ok(Self {
            min_frequency,
            max_pattern_length,
            patterns: HashMap::new(),
        })
    }

    /// Frequency threshold
    pub fn min_frequency(&self) -> u64 {
        self.min_frequency
    }

    /// Longest tracked pattern
    pub fn max_pattern_length(&self) -> usize {
        self.max_pattern_length
    }

    /// Longest window length usable on a sequence of `n` elements
    fn max_len_for(&self, n: usize) -> usize {
        self.max_pattern_length.min(n)
    }

    /// Count every contiguous subsequence of `sequence`.
    pub fn observe(&mut self, sequence: &[T]) {
        let n = sequence.len();
        for len in 2..=self.max_len_for(n) {
            for window in sequence.windows(len) {
                match self.patterns.get_mut(window) {
                    Some(count) => *count += 1,
                    None => {
                        self.patterns.insert(window.to_vec(), 1);
                    }
                }
            }
        }
        tracing::trace!(len = n, patterns = self.patterns.len(), "Observed sequence");
    }

    /// Observation count of one pattern
    pub fn count(&self, pattern: &[T]) -> u64 {
        self.patterns.get(pattern).copied().unwrap_or(0)
    }

    fn is_frequent(&self, pattern: &[T]) -> bool {
        self.count(pattern) >= self.min_frequency
    }

    /// Longest frequent subsequence; ties go to the earliest offset.
    pub fn longest_frequent<'a>(&self, sequence: &'a [T]) -> Option<&'a [T]> {
        (2..=self.max_len_for(sequence.len()))
            .rev()
            .find_map(|len| sequence.windows(len).find(|w| self.is_frequent(w)))
    }

    /// Whether any subsequence has been seen `min_frequency` times.
    pub fn is_cacheable(&self, sequence: &[T]) -> bool {
        self.longest_frequent(sequence).is_some()
    }

    /// Deterministic cache key for `sequence`.
    ///
    /// `pattern_<hex>` from the longest frequent subsequence, or
    /// `seq_<hex>` from the whole sequence when none qualifies.
    pub fn get_pattern_cache_key(&self, sequence: &[T]) -> Result<String> {
        match self.longest_frequent(sequence) {
            Some(pattern) => digest_key("pattern", pattern),
            None => digest_key("seq", sequence),
        }
    }

    /// Up to `top_k` patterns with count `>= min_frequency`, most frequent
    /// first; equal counts are ordered by pattern.
    pub fn get_frequent_patterns(&self, top_k: usize) -> Vec<(Vec<T>, u64)> {
        let mut frequent: Vec<(&Vec<T>, u64)> = self
            .patterns
            .iter()
            .filter(|(_, count)| **count >= self.min_frequency)
            .map(|(p, &count)| (p, count))
            .collect();
        frequent.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        frequent
            .into_iter()
            .take(top_k)
            .map(|(p, count)| (p.clone(), count))
            .collect()
    }

    /// Number of distinct patterns seen
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether nothing has been observed
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Forget all counts
    pub fn clear(&mut self) {
        self.patterns.clear();
        tracing::info!("Pattern cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miner(min_frequency: u64, max_len: usize) -> PatternMiner<&'static str> {
        PatternMiner::new(min_frequency, max_len).unwrap()
    }

    #[test]
    fn test_counts_all_windows() {
        let mut m = miner(2, 3);
        m.observe(&["a", "b", "a", "b"]);
        assert_eq!(m.count(&["a", "b"]), 2);
        assert_eq!(m.count(&["b", "a"]), 1);
        assert_eq!(m.count(&["a", "b", "a"]), 1);
        assert_eq!(m.count(&["a", "b", "a", "b"]), 0);
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn test_frequent_pair() {
        let mut m = miner(2, 2);
        m.observe(&["a", "b", "a", "b"]);
        assert!(m.is_cacheable(&["a", "b"]));
        assert!(!m.is_cacheable(&["b", "a"]));
        assert_eq!(m.get_frequent_patterns(1), vec![(vec!["a", "b"], 2)]);
    }

    #[test]
    fn test_short_sequences_ignored() {
        let mut m = miner(1, 4);
        m.observe(&["x"]);
        m.observe(&[]);
        assert!(m.is_empty());
        assert!(!m.is_cacheable(&["x"]));
    }

    #[test]
    fn test_ordering_breaks_ties_by_pattern() {
        let mut m = miner(1, 2);
        m.observe(&["c", "d"]);
        m.observe(&["a", "b"]);
        m.observe(&["a", "b"]);
        m.observe(&["b", "z"]);
        let top = m.get_frequent_patterns(10);
        assert_eq!(top[0], (vec!["a", "b"], 2));
        assert_eq!(top[1], (vec!["b", "z"], 1));
        assert_eq!(top[2], (vec!["c", "d"], 1));
    }

    #[test]
    fn test_cache_key_uses_longest_pattern() {
        let mut m = miner(2, 4);
        for _ in 0..2 {
            m.observe(&["x", "y", "z"]);
        }
        let key = m.get_pattern_cache_key(&["q", "x", "y", "z", "q"]).unwrap();
        assert!(key.starts_with("pattern_"));
        assert_eq!(key.len(), "pattern_".len() + KEY_HEX_LEN);
        assert_eq!(
            key,
            m.get_pattern_cache_key(&["x", "y", "z"]).unwrap(),
            "same longest pattern gives same key"
        );
        assert_ne!(key, m.get_pattern_cache_key(&["x", "y"]).unwrap());
    }

    #[test]
    fn test_cache_key_earliest_on_tie() {
        let mut m = miner(1, 2);
        m.observe(&["a", "b"]);
        m.observe(&["c", "d"]);
        assert_eq!(
            m.get_pattern_cache_key(&["c", "d", "a", "b"]).unwrap(),
            m.get_pattern_cache_key(&["c", "d"]).unwrap()
        );
    }

    #[test]
    fn test_cache_key_fallback() {
        let m = miner(3, 10);
        let key = m.get_pattern_cache_key(&["a", "b"]).unwrap();
        assert!(key.starts_with("seq_"));
        assert_eq!(key, m.get_pattern_cache_key(&["a", "b"]).unwrap());
    }

    #[test]
    fn test_clear() {
        let mut m = miner(1, 2);
        m.observe(&["a", "b"]);
        m.clear();
        assert!(m.is_empty());
        assert!(m.get_frequent_patterns(5).is_empty());
    }

    #[test]
    fn test_invalid_construction() {
        assert!(PatternMiner::<u32>::new(0, 5).is_err());
        assert!(PatternMiner::<u32>::new(1, 1).is_err());
    }
}
