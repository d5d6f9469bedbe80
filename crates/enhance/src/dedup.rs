//! Two-phase deduplication.
//!
//! The exact phase hashes trimmed, lowercased content and keeps the first
//! occurrence. The fuzzy phase compares each survivor against every item kept
//! so far using character-set Jaccard similarity.

use sha2::{Digest, Sha256};
use sidekick_config::DedupConfig;
use sidekick_core::NormalizedResult;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ResultDeduplicator {
    threshold: f64,
}

impl Default for ResultDeduplicator {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

impl ResultDeduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.similarity_threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Drop exact and near duplicates, preserving first-occurrence order.
    pub fn deduplicate(&self, results: Vec<NormalizedResult>) -> Vec<NormalizedResult> {
        if results.is_empty() {
            debug!("No results to deduplicate");
            return results;
        }
        let total = results.len();
        let exact = exact_dedup(results);
        let kept = self.fuzzy_dedup(exact);
        info!(total, kept = kept.len(), "Deduplicated results");
        kept
    }

    fn fuzzy_dedup(&self, results: Vec<NormalizedResult>) -> Vec<NormalizedResult> {
        let mut kept: Vec<(NormalizedResult, HashSet<char>)> = Vec::with_capacity(results.len());
        for candidate in results {
            let chars = char_set(&candidate.content);
            let duplicate = kept.iter().find_map(|(_, seen)| {
                let similarity = set_similarity(&chars, seen);
                (similarity >= self.threshold).then_some(similarity)
            });
            match duplicate {
                Some(similarity) => {
                    debug!(similarity, source = %candidate.source, "Dropped near-duplicate");
                }
                None => kept.push((candidate, chars)),
            }
        }
        kept.into_iter().map(|(r, _)| r).collect()
    }
}

fn exact_dedup(results: Vec<NormalizedResult>) -> Vec<NormalizedResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| {
            let digest: [u8; 32] = Sha256::digest(r.content.trim().to_lowercase().as_bytes()).into();
            seen.insert(digest)
        })
        .collect()
}

/// Jaccard similarity of the lowercased character sets of `a` and `b`.
///
/// Whitespace and punctuation are not counted, so `今天天气晴朗` and
/// `今天天气晴朗！` are identical sets. Empty sets have similarity 0.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    set_similarity(&char_set(a), &char_set(b))
}

fn set_similarity(a: &HashSet<char>, b: &HashSet<char>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

fn char_set(text: &str) -> HashSet<char> {
    text.to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .collect()
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c,
            '\u{2010}'..='\u{205E}'   // general punctuation
            | '\u{3001}'..='\u{3003}' // 、。〃
            | '\u{3008}'..='\u{3011}' // brackets
            | '\u{3014}'..='\u{301F}'
            | '\u{FF01}'..='\u{FF0F}' // fullwidth ！＂＃ ... ／
            | '\u{FF1A}'..='\u{FF20}'
            | '\u{FF3B}'..='\u{FF40}'
            | '\u{FF5B}'..='\u{FF65}'
            | '\u{00A1}' | '\u{00BF}' | '\u{00B7}'
        )
}
