//! Per-turn pipeline result and stage trace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::result::Metadata;

/// The stages of one turn, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decide,
    Enhance,
    Generate,
    Personalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decide => "decide",
            Stage::Enhance => "enhance",
            Stage::Generate => "generate",
            Stage::Personalize => "personalize",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub detail: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn completed(stage: Stage) -> Self {
        Self {
            stage,
            success: true,
            skipped: false,
            duration: Duration::ZERO,
            detail: Metadata::new(),
            error: None,
        }
    }

    pub fn failed(stage: Stage, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::completed(stage)
        }
    }

    pub fn skipped(stage: Stage, reason: &str) -> Self {
        Self {
            success: false,
            skipped: true,
            ..Self::completed(stage)
        }
        .with_detail("reason", reason)
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// The final outcome of one conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub turn_id: String,

    /// The persona-adjusted reply handed back to the host.
    pub response: String,

    pub enhancement_used: bool,

    /// Origin tags that contributed context (`search`, `mcp`).
    pub sources: Vec<String>,

    pub processing_time: Duration,

    /// One record per stage, in execution order.
    pub trace: Vec<StageRecord>,
}

impl PipelineResult {
    /// Look up the record for a stage.
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.trace.iter().find(|r| r.stage == stage)
    }
}
