//! Normalized retrieval results and provider responses.
//!
//! Every provider reply, whatever its wire shape, is converted into a
//! [`NormalizedResult`] before it reaches the ranking funnel.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form metadata attached to results and responses.
pub type Metadata = serde_json::Map<String, Value>;

/// Source tag for results returned by configured external services.
pub const SOURCE_SERVICE: &str = "mcp";

/// Source tag for results returned by the web search collaborator.
pub const SOURCE_SEARCH: &str = "search";

/// Confidence used when a provider or search hit does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A confidence value, always clamped to `[0.0, 1.0]`.
///
/// NaN is treated as zero confidence.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);

    pub fn new(raw: f64) -> Self {
        if raw.is_nan() {
            return Self::ZERO;
        }
        Self(raw.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for Confidence {
    fn from(raw: f64) -> Self {
        Self::new(raw)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE)
    }
}

/// The common shape every provider's raw response is converted into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub content: String,

    pub confidence: Confidence,

    /// Origin tag (`mcp`, `search`, ...), used for ranking weights and
    /// summary prefixes.
    pub source: String,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,

    /// Composite score assigned by the ranker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
}

impl NormalizedResult {
    pub fn new(content: impl Into<String>, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            confidence: Confidence::new(confidence),
            source: source.into(),
            metadata: Metadata::new(),
            final_score: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One hit returned by a [`crate::SearchProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,

    #[serde(default = "default_search_source")]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

fn default_search_source() -> String {
    SOURCE_SEARCH.into()
}

impl SearchHit {
    pub fn new(content: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            content: content.into(),
            source: default_search_source(),
            score,
        }
    }
}

impl From<SearchHit> for NormalizedResult {
    fn from(hit: SearchHit) -> Self {
        NormalizedResult::new(
            hit.content,
            hit.score.unwrap_or(DEFAULT_CONFIDENCE),
            hit.source,
        )
    }
}

/// Outcome of one `MultiServiceClient::fetch` call.
///
/// Failures are values, never panics or `Err`s crossing the client boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancementResponse {
    pub content: String,
    pub confidence: Confidence,
    pub metadata: Metadata,
    pub service_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnhancementResponse {
    /// A successful response from `service_name`.
    pub fn success(
        content: impl Into<String>,
        confidence: f64,
        metadata: Metadata,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            confidence: Confidence::new(confidence),
            metadata,
            service_name: service_name.into(),
            success: true,
            error: None,
        }
    }

    /// A structured failure. Metadata records when and for which domain.
    pub fn failure(
        error: impl Into<String>,
        domain: &str,
        service_name: impl Into<String>,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        metadata.insert("domain".into(), Value::String(domain.to_string()));
        Self {
            content: String::new(),
            confidence: Confidence::ZERO,
            metadata,
            service_name: service_name.into(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Convert a successful, non-empty response into a pool item tagged as a
    /// service result.
    pub fn into_result(self) -> Option<NormalizedResult> {
        if !self.success || self.content.trim().is_empty() {
            return None;
        }
        let mut metadata = self.metadata;
        metadata.insert("service".into(), Value::String(self.service_name));
        Some(NormalizedResult {
            content: self.content,
            confidence: self.confidence,
            source: SOURCE_SERVICE.into(),
            metadata,
            final_score: None,
        })
    }
}
