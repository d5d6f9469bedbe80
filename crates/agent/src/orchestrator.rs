//! The per-turn state machine.
//!
//! ```text
//! DECIDE ──► ENHANCE (optional) ──► GENERATE ──► PERSONALIZE ──► done
//! ```
//!
//! No stage can abort a turn. Each one is caught on its own and leaves a
//! [`StageRecord`] in the trace; the host always gets a reply back.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sidekick_config::{EnhancementConfig, SidekickConfig};
use sidekick_core::result::SOURCE_SEARCH;
use sidekick_core::{
    ChatTurn, Generator, NormalizedResult, PipelineResult, SearchProvider, Stage, StageRecord,
};
use sidekick_enhance::{
    PersonaDiagnostics, PersonaStyler, ResultDeduplicator, ResultRanker, ResultSummarizer,
};
use sidekick_providers::MultiServiceClient;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::decide::{Decision, EnhancementDecider};
use crate::router::DomainRouter;

/// Reply used when the generator fails.
pub const FALLBACK_REPLY: &str = "抱歉呀，我刚才走神了~ 能再说一遍吗？😊";

/// Per-turn overrides. `None` keeps the configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOptions {
    #[serde(default)]
    pub enable_enhancement: Option<bool>,
    #[serde(default)]
    pub enable_search: Option<bool>,
    #[serde(default)]
    pub enable_mcp: Option<bool>,
}

impl TurnOptions {
    pub fn without_enhancement() -> Self {
        Self {
            enable_enhancement: Some(false),
            ..Self::default()
        }
    }
}

/// What the ENHANCE stage produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enhancement {
    /// Summary folded into the prompt; empty when nothing came back.
    pub context: String,
    /// Origin tags with at least one result left after deduplication.
    pub sources: Vec<String>,
    /// Results pooled before ranking.
    pub pooled: usize,
    /// Results left after ranking and deduplication.
    pub kept: usize,
}

pub struct EnhancementOrchestrator {
    generator: Arc<dyn Generator>,
    search: Option<Arc<dyn SearchProvider>>,
    services: Option<Arc<MultiServiceClient>>,
    flags: EnhancementConfig,
    decider: EnhancementDecider,
    router: DomainRouter,
    ranker: ResultRanker,
    deduplicator: ResultDeduplicator,
    summarizer: ResultSummarizer,
    summary_max_length: usize,
    persona: PersonaStyler,
}

impl EnhancementOrchestrator {
    /// Orchestrator with default settings and no context sources attached.
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self::from_config(generator, &SidekickConfig::default())
    }

    pub fn from_config(generator: Arc<dyn Generator>, config: &SidekickConfig) -> Self {
        Self {
            generator,
            search: None,
            services: None,
            flags: config.enhancement.clone(),
            decider: EnhancementDecider::from_config(&config.enhancement),
            router: DomainRouter::from_config(&config.domains),
            ranker: ResultRanker::from_config(&config.ranking),
            deduplicator: ResultDeduplicator::from_config(&config.dedup),
            summarizer: ResultSummarizer::from_config(&config.summary),
            summary_max_length: config.summary.max_length,
            persona: PersonaStyler::new(&config.persona),
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_services(mut self, services: Arc<MultiServiceClient>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_persona(mut self, persona: PersonaStyler) -> Self {
        self.persona = persona;
        self
    }

    pub fn decide(&self, query: &str, options: &TurnOptions) -> Decision {
        self.decider.decide(query, options.enable_enhancement)
    }

    /// Run the search and service sub-calls, then rank, deduplicate and
    /// summarize whatever came back. A failing sub-call is left out.
    pub async fn enhance(&self, query: &str, options: &TurnOptions) -> Enhancement {
        let mut pool: Vec<NormalizedResult> = Vec::new();
        let mut sources: Vec<String> = Vec::new();

        if options.enable_search.unwrap_or(self.flags.enable_search) {
            if let Some(search) = &self.search {
                let hits = self.search_results(search.as_ref(), query).await;
                if !hits.is_empty() {
                    sources.push(SOURCE_SEARCH.to_string());
                    pool.extend(hits);
                }
            }
        }

        if options.enable_mcp.unwrap_or(self.flags.enable_services) {
            if let Some(services) = &self.services {
                if let Some(result) = self.service_result(services, query).await {
                    sources.push(result.source.clone());
                    pool.push(result);
                }
            }
        }

        if pool.is_empty() {
            info!("No enhancement results available");
            return Enhancement::default();
        }

        let pooled = pool.len();
        let ranked = self.ranker.rank_results(pool, query);
        let unique = self.deduplicator.deduplicate(ranked);
        sources.retain(|source| unique.iter().any(|r| &r.source == source));
        let context = self
            .summarizer
            .summarize(&unique, query, self.summary_max_length);

        Enhancement {
            context,
            sources,
            pooled,
            kept: unique.len(),
        }
    }

    async fn search_results(&self, search: &dyn SearchProvider, query: &str) -> Vec<NormalizedResult> {
        match search.search(query).await {
            Ok(hits) => {
                info!(provider = %search.name(), count = hits.len(), "Search returned results");
                hits.into_iter()
                    .map(|hit| NormalizedResult {
                        source: SOURCE_SEARCH.to_string(),
                        ..NormalizedResult::from(hit)
                    })
                    .filter(|r| !r.content.trim().is_empty())
                    .collect()
            }
            Err(e) => {
                warn!(provider = %search.name(), error = %e, "Search failed, continuing without it");
                Vec::new()
            }
        }
    }

    async fn service_result(&self, services: &MultiServiceClient, query: &str) -> Option<NormalizedResult> {
        let domain = self.router.route(query);
        let response = services.fetch(domain, query).await;
        if !response.success {
            warn!(
                domain,
                error = response.error.as_deref().unwrap_or("unknown"),
                "Service fetch failed, continuing without it"
            );
            return None;
        }
        info!(domain, service = %response.service_name, "Service returned a result");
        response.into_result()
    }

    /// Prompt handed to the generator.
    pub fn build_prompt(query: &str, context: &str) -> String {
        if context.is_empty() {
            query.to_string()
        } else {
            format!("[参考信息: {context}]\n\n{query}")
        }
    }

    /// Process one turn end to end. Never fails.
    pub async fn run_turn(&self, query: &str, history: &[ChatTurn], options: TurnOptions) -> PipelineResult {
        let started = Instant::now();
        let turn_id = uuid::Uuid::new_v4().to_string();
        let mut trace = Vec::with_capacity(4);
        info!(turn_id = %turn_id, chars = query.chars().count(), "Processing turn");

        // DECIDE
        let stage_started = Instant::now();
        let decision = self.decide(query, &options);
        trace.push(
            StageRecord::completed(Stage::Decide)
                .with_detail("needed", decision.needed)
                .with_detail("decision", to_value(&decision.reason))
                .with_duration(stage_started.elapsed()),
        );
        info!(turn_id = %turn_id, needed = decision.needed, "Enhancement decision");

        // ENHANCE
        let enhancement = if decision.needed {
            let stage_started = Instant::now();
            match AssertUnwindSafe(self.enhance(query, &options)).catch_unwind().await {
                Ok(enhancement) => {
                    trace.push(
                        StageRecord::completed(Stage::Enhance)
                            .with_detail("sources", to_value(&enhancement.sources))
                            .with_detail("pooled", enhancement.pooled)
                            .with_detail("kept", enhancement.kept)
                            .with_detail("context_chars", enhancement.context.chars().count())
                            .with_duration(stage_started.elapsed()),
                    );
                    enhancement
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(turn_id = %turn_id, error = %message, "Enhancement failed, using the plain model");
                    trace.push(
                        StageRecord::failed(Stage::Enhance, message)
                            .with_duration(stage_started.elapsed()),
                    );
                    Enhancement::default()
                }
            }
        } else {
            trace.push(StageRecord::skipped(Stage::Enhance, "Enhancement not needed"));
            Enhancement::default()
        };

        // GENERATE
        let stage_started = Instant::now();
        let prompt = Self::build_prompt(query, &enhancement.context);
        let generated = AssertUnwindSafe(self.generator.generate(&prompt, history))
            .catch_unwind()
            .await;
        let raw = match generated {
            Ok(Ok(reply)) if !reply.trim().is_empty() => {
                trace.push(
                    StageRecord::completed(Stage::Generate)
                        .with_detail("generator", self.generator.name())
                        .with_detail("raw_chars", reply.chars().count())
                        .with_duration(stage_started.elapsed()),
                );
                reply
            }
            outcome => {
                let message = match outcome {
                    Ok(Ok(_)) => "Generator returned an empty reply".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => panic_message(panic.as_ref()),
                };
                error!(turn_id = %turn_id, generator = %self.generator.name(), error = %message, "Generation failed, using fallback reply");
                trace.push(
                    StageRecord::failed(Stage::Generate, message)
                        .with_detail("fallback", true)
                        .with_duration(stage_started.elapsed()),
                );
                FALLBACK_REPLY.to_string()
            }
        };

        // PERSONALIZE
        let stage_started = Instant::now();
        let response = match std::panic::catch_unwind(AssertUnwindSafe(|| self.persona.apply(&raw))) {
            Ok(styled) => {
                let diagnostics = PersonaDiagnostics::inspect(&styled);
                if !diagnostics.valid {
                    warn!(
                        turn_id = %turn_id,
                        has_emoji = diagnostics.has_emoji,
                        has_particle = diagnostics.has_particle,
                        negative_hits = ?diagnostics.negative_hits,
                        "Reply failed persona validation, using it anyway"
                    );
                }
                trace.push(
                    StageRecord::completed(Stage::Personalize)
                        .with_detail("valid", diagnostics.valid)
                        .with_detail("diagnostics", to_value(&diagnostics))
                        .with_detail("final_chars", styled.chars().count())
                        .with_duration(stage_started.elapsed()),
                );
                styled
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(turn_id = %turn_id, error = %message, "Persona styling failed, returning raw reply");
                trace.push(
                    StageRecord::failed(Stage::Personalize, message)
                        .with_duration(stage_started.elapsed()),
                );
                raw
            }
        };

        let enhancement_used = decision.needed && !enhancement.sources.is_empty();
        let processing_time = started.elapsed();
        info!(
            turn_id = %turn_id,
            enhancement_used,
            sources = ?enhancement.sources,
            elapsed_ms = processing_time.as_millis() as u64,
            "Turn completed"
        );

        PipelineResult {
            turn_id,
            response,
            enhancement_used,
            sources: enhancement.sources,
            processing_time,
            trace,
        }
    }
}

fn to_value(value: &impl Serialize) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "stage panicked".to_string())
}
