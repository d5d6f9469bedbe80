//! Composite scoring of pooled results.
//!
//! ```text
//! score = confidence × source_weight × length_weight × (1 + relevance × 0.5)
//! ```
//!
//! Trusted sources outweigh search hits, which outweigh anything else.
//! Content between 50 and 500 chars is preferred; shorter content is
//! penalized more than longer content.

use sidekick_config::RankingConfig;
use sidekick_core::NormalizedResult;
use sidekick_core::result::SOURCE_SEARCH;
use std::collections::HashSet;
use tracing::{debug, info};

const PREFERRED_MIN_CHARS: usize = 50;
const PREFERRED_MAX_CHARS: usize = 500;
const SHORT_WEIGHT: f64 = 0.7;
const LONG_WEIGHT: f64 = 0.9;
const RELEVANCE_BOOST: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ResultRanker {
    top_k: usize,
    trusted_sources: Vec<String>,
    trusted_weight: f64,
    search_weight: f64,
    default_weight: f64,
}

impl Default for ResultRanker {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl ResultRanker {
    /// Ranker with default weights keeping at most `top_k` results.
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self {
            top_k: config.top_k,
            trusted_sources: config.trusted_sources.clone(),
            trusted_weight: config.trusted_weight,
            search_weight: config.search_weight,
            default_weight: config.default_weight,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    fn source_weight(&self, source: &str) -> f64 {
        if self.trusted_sources.iter().any(|s| s == source) {
            self.trusted_weight
        } else if source == SOURCE_SEARCH {
            self.search_weight
        } else {
            self.default_weight
        }
    }

    /// Composite score of one result for `query`.
    pub fn score(&self, result: &NormalizedResult, query: &str) -> f64 {
        let base = result.confidence.value();
        let source_weight = self.source_weight(&result.source);
        let length_weight = length_weight(result.content.chars().count());
        let relevance = relevance(query, &result.content);
        base * source_weight * length_weight * (1.0 + relevance * RELEVANCE_BOOST)
    }

    /// Sort by descending score, keep the top K and record each kept score.
    pub fn rank_results(&self, results: Vec<NormalizedResult>, query: &str) -> Vec<NormalizedResult> {
        if results.is_empty() {
            debug!("No results to rank");
            return results;
        }
        let total = results.len();

        let mut scored: Vec<NormalizedResult> = results
            .into_iter()
            .map(|mut r| {
                r.final_score = Some(self.score(&r, query));
                r
            })
            .collect();

        // Stable sort keeps pool order among equal scores.
        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.top_k);

        info!(total, kept = scored.len(), top_k = self.top_k, "Ranked results");
        scored
    }
}

fn length_weight(chars: usize) -> f64 {
    if chars < PREFERRED_MIN_CHARS {
        SHORT_WEIGHT
    } else if chars > PREFERRED_MAX_CHARS {
        LONG_WEIGHT
    } else {
        1.0
    }
}

/// Fraction of the query's distinct characters that also occur in the
/// content, both lowercased. Zero when either side is empty.
pub fn relevance(query: &str, content: &str) -> f64 {
    if query.is_empty() || content.is_empty() {
        return 0.0;
    }
    let query: HashSet<char> = query.to_lowercase().chars().collect();
    let content: HashSet<char> = content.to_lowercase().chars().collect();
    let matched = query.iter().filter(|c| content.contains(c)).count();
    (matched as f64 / query.len() as f64).min(1.0)
}
