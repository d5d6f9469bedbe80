//! Compress a ranked, deduplicated pool into one context string.
//!
//! Each result contributes a `[source] snippet` point. Points are appended
//! while they fit the budget; the first point that does not fit is cut to the
//! remaining budget if enough of it is left, and the summary ends there.

use sidekick_config::SummaryConfig;
use sidekick_core::NormalizedResult;
use tracing::{debug, info};

const ELLIPSIS: &str = "...";
const QUERY_PREFIX_CHARS: usize = 10;

#[derive(Debug, Clone)]
pub struct ResultSummarizer {
    snippet_length: usize,
    min_tail_budget: usize,
}

impl Default for ResultSummarizer {
    fn default() -> Self {
        Self::from_config(&SummaryConfig::default())
    }
}

impl ResultSummarizer {
    pub fn new(snippet_length: usize, min_tail_budget: usize) -> Self {
        Self {
            snippet_length,
            min_tail_budget,
        }
    }

    pub fn from_config(config: &SummaryConfig) -> Self {
        Self::new(config.snippet_length, config.min_tail_budget)
    }

    /// Build the context string. Pure: the same input always yields the
    /// same output.
    pub fn summarize(&self, results: &[NormalizedResult], query: &str, max_length: usize) -> String {
        if results.is_empty() {
            debug!("No results to summarize");
            return String::new();
        }

        let mut points: Vec<String> = Vec::new();
        let mut used = 0usize;

        for result in results {
            let point = format!("[{}] {}", result.source, self.snippet(&result.content, query));
            let len = point.chars().count();

            if used + len > max_length {
                let remaining = max_length.saturating_sub(used);
                if remaining >= self.min_tail_budget {
                    let mut cut: String = point.chars().take(remaining).collect();
                    cut.push_str(ELLIPSIS);
                    points.push(cut);
                }
                break;
            }

            used += len;
            points.push(point);
        }

        let summary = points.join(" ");
        info!(
            chars = summary.chars().count(),
            points = points.len(),
            results = results.len(),
            "Generated summary"
        );
        summary
    }

    /// A window of at most `snippet_length` chars, centred on the first
    /// occurrence of the query's opening characters when there is one.
    pub fn snippet(&self, content: &str, query: &str) -> String {
        let content = content.trim();
        let chars: Vec<char> = content.chars().collect();
        if chars.len() <= self.snippet_length {
            return content.to_string();
        }

        if !query.is_empty() {
            let needle: Vec<char> = query.chars().take(QUERY_PREFIX_CHARS).map(fold).collect();
            let haystack: Vec<char> = chars.iter().copied().map(fold).collect();
            if let Some(pos) = find(&haystack, &needle) {
                let start = pos.saturating_sub(self.snippet_length / 2);
                let end = (start + self.snippet_length).min(chars.len());
                let mut snippet = String::new();
                if start > 0 {
                    snippet.push_str(ELLIPSIS);
                }
                snippet.extend(&chars[start..end]);
                if end < chars.len() {
                    snippet.push_str(ELLIPSIS);
                }
                return snippet.trim().to_string();
            }
        }

        let mut head: String = chars[..self.snippet_length].iter().collect();
        head.push_str(ELLIPSIS);
        head
    }
}

/// Single-char lowercase so positions line up with the original text.
fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
