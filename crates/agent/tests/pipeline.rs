//! End-to-end turns through the orchestrator with scripted collaborators.

use async_trait::async_trait;
use sidekick_agent::{EnhancementOrchestrator, FALLBACK_REPLY, TurnOptions};
use sidekick_config::{PersonaConfig, Protocol, ServiceDescriptor, ServiceRegistry, SidekickConfig};
use sidekick_core::error::{GenerationError, SearchError, ServiceError};
use sidekick_core::{ChatTurn, Generator, SearchHit, SearchProvider, Stage};
use sidekick_enhance::PersonaStyler;
use sidekick_providers::{MultiServiceClient, NoopSleeper, ProviderPayload, ServiceBackend, ServiceCall};
use std::sync::{Arc, Mutex};

/// Records every prompt and answers with a fixed reply, or fails.
struct ScriptedGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
    history_lengths: Mutex<Vec<usize>>,
}

impl ScriptedGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
            history_lengths: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
            history_lengths: Mutex::new(Vec::new()),
        })
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, prior_turns: &[ChatTurn]) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.history_lengths.lock().unwrap().push(prior_turns.len());
        self.reply
            .clone()
            .ok_or_else(|| GenerationError::Unavailable("model offline".into()))
    }
}

struct StaticSearch {
    hits: Option<Vec<SearchHit>>,
    calls: Mutex<usize>,
}

impl StaticSearch {
    fn with_hits(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            hits: Some(hits),
            calls: Mutex::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            hits: None,
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        *self.calls.lock().unwrap() += 1;
        self.hits
            .clone()
            .ok_or_else(|| SearchError::Unavailable("search is down".into()))
    }
}

/// Collaborator that panics mid-call.
struct Exploding;

#[async_trait]
impl SearchProvider for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        panic!("search exploded")
    }
}

#[async_trait]
impl Generator for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    async fn generate(&self, _prompt: &str, _prior_turns: &[ChatTurn]) -> Result<String, GenerationError> {
        panic!("generator exploded")
    }
}

/// Answers every call with `content`, or fails when `content` is `None`.
struct FixedBackend {
    content: Option<String>,
    domains: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceBackend for FixedBackend {
    fn protocol(&self) -> &str {
        "rest"
    }

    async fn call(
        &self,
        _service: &ServiceDescriptor,
        call: &ServiceCall,
    ) -> Result<ProviderPayload, ServiceError> {
        self.domains.lock().unwrap().push(call.domain.clone());
        match &self.content {
            Some(content) => Ok(ProviderPayload::Structured {
                content: content.clone(),
                confidence: 0.95,
                data: None,
                extra: Default::default(),
            }),
            None => Err(ServiceError::Transport("connection refused".into())),
        }
    }
}

fn services(content: Option<&str>) -> (Arc<MultiServiceClient>, Arc<FixedBackend>) {
    let backend = Arc::new(FixedBackend {
        content: content.map(str::to_string),
        domains: Mutex::new(Vec::new()),
    });
    let registry = ServiceRegistry::new(vec![
        ServiceDescriptor::new("weather-api", "http://127.0.0.1:9", &["weather"]).with_retries(1),
    ]);
    let client = MultiServiceClient::new(registry)
        .with_backend(Protocol::Rest, backend.clone())
        .with_sleeper(Arc::new(NoopSleeper));
    (Arc::new(client), backend)
}

/// Persona styling without the random emoji so replies can be compared.
fn quiet_persona() -> PersonaStyler {
    PersonaStyler::new(&PersonaConfig {
        emoji_probability: 0.0,
        min_length_for_particle: 5,
    })
    .with_seed(11)
}

#[tokio::test]
async fn failing_sources_do_not_break_the_turn() {
    let generator = ScriptedGenerator::replying("今天是晴天，出门记得带伞");
    let search = StaticSearch::failing();
    let (client, _) = services(None);
    let orchestrator = EnhancementOrchestrator::new(generator.clone())
        .with_search(search.clone())
        .with_services(client);

    let query = "今天天气怎么样呢？";
    let result = orchestrator.run_turn(query, &[], TurnOptions::default()).await;

    assert!(!result.enhancement_used);
    assert!(result.sources.is_empty());
    assert!(!result.response.trim().is_empty());
    assert_eq!(search.calls(), 1);
    assert_eq!(generator.last_prompt(), query);

    let stages: Vec<Stage> = result.trace.iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![Stage::Decide, Stage::Enhance, Stage::Generate, Stage::Personalize]
    );
    let enhance = result.stage(Stage::Enhance).unwrap();
    assert!(enhance.success);
    assert_eq!(enhance.detail["pooled"], 0);
}

#[tokio::test]
async fn context_from_both_sources_reaches_the_prompt() {
    let generator = ScriptedGenerator::replying("北京今天是晴天哦");
    let search = StaticSearch::with_hits(vec![SearchHit::new(
        "今天天气晴朗，温度适宜，最高温度25度，最低温度15度。",
        Some(0.9),
    )]);
    let (client, backend) = services(Some("北京天气：晴，温度22°C，湿度40%"));
    let orchestrator = EnhancementOrchestrator::new(generator.clone())
        .with_search(search)
        .with_services(client)
        .with_persona(quiet_persona());

    let query = "北京今天天气怎么样？";
    let result = orchestrator.run_turn(query, &[], TurnOptions::default()).await;

    assert!(result.enhancement_used);
    assert_eq!(result.sources, vec!["search".to_string(), "mcp".to_string()]);
    assert_eq!(backend.domains.lock().unwrap().as_slice(), ["weather"]);

    let prompt = generator.last_prompt();
    assert!(prompt.starts_with("[参考信息: "), "{prompt}");
    assert!(prompt.ends_with(&format!("]\n\n{query}")), "{prompt}");
    let mcp = prompt.find("[mcp]").unwrap();
    let search = prompt.find("[search]").unwrap();
    assert!(mcp < search, "trusted service result should rank first: {prompt}");

    assert_eq!(result.response, "北京今天是晴天哦");
}

#[tokio::test]
async fn short_query_skips_enhancement() {
    let generator = ScriptedGenerator::replying("你好呀");
    let search = StaticSearch::with_hits(vec![SearchHit::new("unused", None)]);
    let orchestrator = EnhancementOrchestrator::new(generator.clone()).with_search(search.clone());

    let result = orchestrator.run_turn("hi", &[], TurnOptions::default()).await;

    assert!(!result.enhancement_used);
    assert_eq!(search.calls(), 0);
    assert_eq!(generator.last_prompt(), "hi");
    let enhance = result.stage(Stage::Enhance).unwrap();
    assert!(enhance.skipped);
    assert_eq!(result.stage(Stage::Decide).unwrap().detail["needed"], false);
}

#[tokio::test]
async fn turn_option_disables_enhancement() {
    let generator = ScriptedGenerator::replying("好的呀");
    let search = StaticSearch::with_hits(vec![SearchHit::new("今天晴", Some(0.9))]);
    let orchestrator = EnhancementOrchestrator::new(generator).with_search(search.clone());

    let result = orchestrator
        .run_turn("今天天气怎么样呢？", &[], TurnOptions::without_enhancement())
        .await;

    assert!(!result.enhancement_used);
    assert_eq!(search.calls(), 0);
    assert!(result.stage(Stage::Enhance).unwrap().skipped);
}

#[tokio::test]
async fn search_can_be_switched_off_per_turn() {
    let generator = ScriptedGenerator::replying("好的呀");
    let search = StaticSearch::with_hits(vec![SearchHit::new("今天晴", Some(0.9))]);
    let (client, _) = services(Some("北京天气：晴"));
    let orchestrator = EnhancementOrchestrator::new(generator)
        .with_search(search.clone())
        .with_services(client);

    let options = TurnOptions {
        enable_search: Some(false),
        ..TurnOptions::default()
    };
    let result = orchestrator.run_turn("北京天气怎么样", &[], options).await;

    assert_eq!(search.calls(), 0);
    assert_eq!(result.sources, vec!["mcp".to_string()]);
    assert!(result.enhancement_used);
}

#[tokio::test]
async fn generation_failure_uses_fallback_reply() {
    let generator = ScriptedGenerator::failing();
    let orchestrator = EnhancementOrchestrator::new(generator);

    let result = orchestrator.run_turn("随便聊聊吧", &[], TurnOptions::default()).await;

    assert_eq!(result.response, FALLBACK_REPLY);
    let generate = result.stage(Stage::Generate).unwrap();
    assert!(!generate.success);
    assert_eq!(generate.detail["fallback"], true);
    assert!(generate.error.as_deref().unwrap().contains("model offline"));
}

#[tokio::test]
async fn history_is_passed_through() {
    let generator = ScriptedGenerator::replying("记得呀");
    let orchestrator = EnhancementOrchestrator::new(generator.clone());
    let history = vec![ChatTurn::user("我叫小明"), ChatTurn::assistant("你好小明呀")];

    orchestrator.run_turn("你还记得我吗", &history, TurnOptions::default()).await;

    assert_eq!(generator.history_lengths.lock().unwrap().as_slice(), [2]);
}

#[tokio::test]
async fn invalid_persona_is_logged_not_blocked() {
    let generator = ScriptedGenerator::replying("真笨");
    let orchestrator = EnhancementOrchestrator::new(generator).with_persona(quiet_persona());

    let result = orchestrator.run_turn("随便聊聊吧", &[], TurnOptions::default()).await;

    assert_eq!(result.response, "真笨");
    let personalize = result.stage(Stage::Personalize).unwrap();
    assert!(personalize.success);
    assert_eq!(personalize.detail["valid"], false);
}

#[tokio::test]
async fn config_can_disable_enhancement() {
    let mut config = SidekickConfig::default();
    config.enhancement.enabled = false;
    let generator = ScriptedGenerator::replying("好的呀");
    let search = StaticSearch::with_hits(vec![SearchHit::new("今天晴", Some(0.9))]);
    let orchestrator = EnhancementOrchestrator::from_config(generator, &config).with_search(search.clone());

    let result = orchestrator
        .run_turn("今天天气怎么样呢？", &[], TurnOptions::default())
        .await;
    assert!(!result.enhancement_used);
    assert_eq!(search.calls(), 0);

    let forced = orchestrator
        .run_turn(
            "今天天气怎么样呢？",
            &[],
            TurnOptions {
                enable_enhancement: Some(true),
                ..TurnOptions::default()
            },
        )
        .await;
    assert!(forced.enhancement_used);
    assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn panicking_search_leaves_enhance_failed() {
    let generator = ScriptedGenerator::replying("今天是晴天哦");
    let orchestrator = EnhancementOrchestrator::new(generator.clone()).with_search(Arc::new(Exploding));

    let query = "今天天气怎么样呢？";
    let result = orchestrator.run_turn(query, &[], TurnOptions::default()).await;

    assert!(!result.enhancement_used);
    assert!(result.sources.is_empty());
    assert_eq!(generator.last_prompt(), query);
    assert!(!result.response.trim().is_empty());

    let enhance = result.stage(Stage::Enhance).unwrap();
    assert!(!enhance.success);
    assert!(!enhance.skipped);
    assert_eq!(enhance.error.as_deref(), Some("search exploded"));
    assert!(result.stage(Stage::Generate).unwrap().success);
}

#[tokio::test]
async fn panicking_generator_uses_fallback_reply() {
    let orchestrator = EnhancementOrchestrator::new(Arc::new(Exploding));

    let result = orchestrator.run_turn("随便聊聊吧", &[], TurnOptions::default()).await;

    assert_eq!(result.response, FALLBACK_REPLY);
    let generate = result.stage(Stage::Generate).unwrap();
    assert!(!generate.success);
    assert_eq!(generate.detail["fallback"], true);
    assert_eq!(generate.error.as_deref(), Some("generator exploded"));
    assert!(result.stage(Stage::Personalize).is_some());
}

#[tokio::test]
async fn source_dropped_by_dedup_does_not_count() {
    let content = "北京天气：晴，温度22°C，湿度40%";
    let generator = ScriptedGenerator::replying("北京今天是晴天哦");
    let search = StaticSearch::with_hits(vec![SearchHit::new(content, Some(0.9))]);
    let (client, _) = services(Some(content));
    let orchestrator = EnhancementOrchestrator::new(generator.clone())
        .with_search(search.clone())
        .with_services(client);

    let result = orchestrator
        .run_turn("北京今天天气怎么样？", &[], TurnOptions::default())
        .await;

    assert_eq!(search.calls(), 1);
    assert!(result.enhancement_used);
    assert_eq!(result.sources, vec!["mcp".to_string()]);
    let enhance = result.stage(Stage::Enhance).unwrap();
    assert_eq!(enhance.detail["pooled"], 2);
    assert_eq!(enhance.detail["kept"], 1);
    assert!(!generator.last_prompt().contains("[search]"));
}
