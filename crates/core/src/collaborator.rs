//! Collaborator traits consumed by the orchestrator.
//!
//! The language model and the web search backend live outside this
//! repository. Hosts plug them in through these traits; tests use scripted
//! stand-ins.

use async_trait::async_trait;

use crate::error::{GenerationError, SearchError};
use crate::message::ChatTurn;
use crate::result::SearchHit;

/// Produces the assistant's raw reply for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for logs and traces.
    fn name(&self) -> &str {
        "generator"
    }

    /// Generate a reply for `prompt`, given the prior conversation turns.
    async fn generate(
        &self,
        prompt: &str,
        prior_turns: &[ChatTurn],
    ) -> std::result::Result<String, GenerationError>;
}

/// Looks up short factual snippets for a free-text query.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> std::result::Result<Vec<SearchHit>, SearchError>;
}
