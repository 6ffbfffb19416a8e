//! Full-text indexing primitives for the memory store.
//!
//! Deliberately small: lowercase alphanumeric tokenization and
//! term-frequency scoring. The postings themselves live in redb tables
//! alongside the records (see the parent module).

use std::collections::HashMap;
use std::hash::Hash;

/// Split text into lowercase alphanumeric terms with their frequencies.
///
/// Single-character terms are dropped; they match everything and bloat the
/// postings without adding recall.
pub fn terms(text: &str) -> HashMap<String, u32> {
    let mut out: HashMap<String, u32> = HashMap::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 2 {
            continue;
        }
        *out.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    out
}

/// Accumulate a document's score for one matched query term.
///
/// The key is generic so callers can rank plain sequence numbers or
/// tier-tagged keys through the same path.
pub fn accumulate<K: Eq + Hash>(scores: &mut HashMap<K, u32>, key: K, tf: u32) {
    *scores.entry(key).or_insert(0) += tf;
}

/// Rank accumulated scores: best first, ties broken by recency (higher key).
pub fn ranked<K: Ord + Hash>(scores: HashMap<K, u32>, k: usize) -> Vec<(K, u32)> {
    let mut hits: Vec<(K, u32)> = scores.into_iter().collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_lowercase_and_count() {
        let t = terms("The quick fox, the QUICK fox!");
        assert_eq!(t.get("quick"), Some(&2));
        assert_eq!(t.get("fox"), Some(&2));
        assert_eq!(t.get("the"), Some(&2));
        assert_eq!(t.get("a"), None);
    }

    #[test]
    fn single_chars_are_dropped() {
        let t = terms("a b c word");
        assert_eq!(t.len(), 1);
        assert!(t.contains_key("word"));
    }

    #[test]
    fn ranking_prefers_score_then_recency() {
        let mut scores = HashMap::new();
        scores.insert(1, 3);
        scores.insert(2, 5);
        scores.insert(3, 5);
        let top = ranked(scores, 2);
        assert_eq!(top, vec![(3, 5), (2, 5)]);
    }
}
