//! The DECIDE stage: does this query warrant fetching external context?

use serde::Serialize;
use sidekick_config::EnhancementConfig;
use tracing::debug;

/// Why a decision came out the way it did; recorded in the turn trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DecisionReason {
    Disabled,
    TooShort { length: usize, minimum: usize },
    Keyword { keyword: String },
    QuestionMarker { marker: String },
    NoSignal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub needed: bool,
    #[serde(flatten)]
    pub reason: DecisionReason,
}

impl Decision {
    fn yes(reason: DecisionReason) -> Self {
        Self {
            needed: true,
            reason,
        }
    }

    fn no(reason: DecisionReason) -> Self {
        Self {
            needed: false,
            reason,
        }
    }
}

/// Keyword and question-marker heuristics.
///
/// Checks run in order: the enable flag, the minimum length (in chars),
/// trigger keywords against the lowercased query, then question markers
/// anywhere in the query.
#[derive(Debug, Clone)]
pub struct EnhancementDecider {
    enabled: bool,
    min_query_length: usize,
    trigger_keywords: Vec<String>,
    question_markers: Vec<String>,
}

impl Default for EnhancementDecider {
    fn default() -> Self {
        Self::from_config(&EnhancementConfig::default())
    }
}

impl EnhancementDecider {
    pub fn from_config(config: &EnhancementConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_query_length: config.min_query_length,
            trigger_keywords: config
                .trigger_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            question_markers: config
                .question_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// `enabled` overrides the configured switch for this call only.
    pub fn decide(&self, query: &str, enabled: Option<bool>) -> Decision {
        if !enabled.unwrap_or(self.enabled) {
            debug!("Enhancement disabled");
            return Decision::no(DecisionReason::Disabled);
        }

        let length = query.chars().count();
        if length < self.min_query_length {
            debug!(length, minimum = self.min_query_length, "Query too short for enhancement");
            return Decision::no(DecisionReason::TooShort {
                length,
                minimum: self.min_query_length,
            });
        }

        let lowered = query.to_lowercase();
        if let Some(keyword) = self.trigger_keywords.iter().find(|k| lowered.contains(k.as_str())) {
            debug!(keyword = %keyword, "Enhancement triggered by keyword");
            return Decision::yes(DecisionReason::Keyword {
                keyword: keyword.clone(),
            });
        }

        if let Some(marker) = self.question_markers.iter().find(|m| query.contains(m.as_str())) {
            debug!(marker = %marker, "Enhancement triggered by question marker");
            return Decision::yes(DecisionReason::QuestionMarker {
                marker: marker.clone(),
            });
        }

        Decision::no(DecisionReason::NoSignal)
    }
}
