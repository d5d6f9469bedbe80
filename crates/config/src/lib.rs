//! Configuration loading, validation, and management for Sidekick.
//!
//! Two documents are handled here:
//!
//! - the service registry (JSON, YAML or TOML), see [`ServiceRegistry`];
//! - the pipeline settings in `~/.sidekick/config.toml`, see [`SidekickConfig`],
//!   with environment variable overrides.

pub mod registry;
pub mod service;

pub use registry::{RegistrySource, ServiceRegistry, SourceFormat};
pub use service::{
    ArgumentSource, AuthDescriptor, AuthType, Protocol, ServiceDescriptor, ToolBinding,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root pipeline configuration.
///
/// Maps directly to `~/.sidekick/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidekickConfig {
    /// Path to the service registry document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_path: Option<PathBuf>,

    /// When and how to enhance a turn
    #[serde(default)]
    pub enhancement: EnhancementConfig,

    /// Ranking weights
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Near-duplicate removal
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Context summary budget
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Reply styling
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Query keyword → service domain routing
    #[serde(default)]
    pub domains: DomainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Queries shorter than this (in characters) are never enhanced
    #[serde(default = "default_min_query_length")]
    pub min_query_length: usize,

    #[serde(default = "default_trigger_keywords")]
    pub trigger_keywords: Vec<String>,

    /// Characters that mark a question anywhere in the query
    #[serde(default = "default_question_markers")]
    pub question_markers: Vec<String>,

    #[serde(default = "default_true")]
    pub enable_search: bool,

    #[serde(default = "default_true")]
    pub enable_services: bool,
}

fn default_true() -> bool {
    true
}
fn default_min_query_length() -> usize {
    5
}
fn default_trigger_keywords() -> Vec<String> {
    [
        "什么", "怎么", "为什么", "哪里", "哪个", "多少", "几", "谁", "天气", "新闻", "最新",
        "今天", "明天", "查", "搜索", "告诉我", "推荐", "介绍", "如何",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_question_markers() -> Vec<String> {
    ["?", "？", "吗", "呢", "么"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_query_length: default_min_query_length(),
            trigger_keywords: default_trigger_keywords(),
            question_markers: default_question_markers(),
            enable_search: true,
            enable_services: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Source tags that receive `trusted_weight`
    #[serde(default = "default_trusted_sources")]
    pub trusted_sources: Vec<String>,

    #[serde(default = "default_trusted_weight")]
    pub trusted_weight: f64,

    #[serde(default = "default_search_weight")]
    pub search_weight: f64,

    /// Weight for any other source tag
    #[serde(default = "default_other_weight")]
    pub default_weight: f64,
}

fn default_top_k() -> usize {
    5
}
fn default_trusted_sources() -> Vec<String> {
    vec!["mcp".into()]
}
fn default_trusted_weight() -> f64 {
    1.2
}
fn default_search_weight() -> f64 {
    1.0
}
fn default_other_weight() -> f64 {
    0.8
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            trusted_sources: default_trusted_sources(),
            trusted_weight: default_trusted_weight(),
            search_weight: default_search_weight(),
            default_weight: default_other_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_similarity_threshold() -> f64 {
    0.85
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Total budget in characters
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,

    /// A point is only truncated into the summary if at least this many
    /// characters of budget remain
    #[serde(default = "default_min_tail_budget")]
    pub min_tail_budget: usize,
}

fn default_max_length() -> usize {
    200
}
fn default_snippet_length() -> usize {
    100
}
fn default_min_tail_budget() -> usize {
    50
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            snippet_length: default_snippet_length(),
            min_tail_budget: default_min_tail_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_emoji_probability")]
    pub emoji_probability: f64,

    /// Replies this short (in characters) never get a particle appended
    #[serde(default = "default_min_length_for_particle")]
    pub min_length_for_particle: usize,
}

fn default_emoji_probability() -> f64 {
    0.8
}
fn default_min_length_for_particle() -> usize {
    5
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            emoji_probability: default_emoji_probability(),
            min_length_for_particle: default_min_length_for_particle(),
        }
    }
}

/// One keyword route, e.g. `天气` → `weather`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRoute {
    pub domain: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain used when no route matches
    #[serde(default = "default_domain")]
    pub default_domain: String,

    /// Checked in order; the first route with a matching keyword wins
    #[serde(default = "default_routes")]
    pub routes: Vec<DomainRoute>,
}

fn default_domain() -> String {
    "search".into()
}
fn default_routes() -> Vec<DomainRoute> {
    let route = |domain: &str, keywords: &[&str]| DomainRoute {
        domain: domain.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    };
    vec![
        route(
            "weather",
            &["天气", "气温", "温度", "下雨", "下雪", "weather", "forecast"],
        ),
        route("news", &["新闻", "头条", "news"]),
        route("maps", &["地图", "路线", "导航", "map"]),
        route("translation", &["翻译", "translate"]),
    ]
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            default_domain: default_domain(),
            routes: default_routes(),
        }
    }
}

impl SidekickConfig {
    /// Load configuration from the default path (~/.sidekick/config.toml).
    ///
    /// Environment overrides:
    /// - `SIDEKICK_SERVICES` replaces `services_path`
    /// - `SIDEKICK_ENHANCEMENT=0|false|off` disables enhancement
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SIDEKICK_SERVICES") {
            if !path.trim().is_empty() {
                self.services_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(flag) = std::env::var("SIDEKICK_ENHANCEMENT") {
            self.enhancement.enabled = parse_flag(&flag, self.enhancement.enabled);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sidekick")
    }

    /// Load the service registry named by `services_path`.
    ///
    /// Without a path the registry is disabled and every turn runs on search
    /// and generation alone.
    pub fn service_registry(&self) -> ServiceRegistry {
        match &self.services_path {
            Some(path) => ServiceRegistry::load(path.as_path()),
            None => ServiceRegistry::disabled(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            return Err(ConfigError::ValidationError(
                "dedup.similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.persona.emoji_probability) {
            return Err(ConfigError::ValidationError(
                "persona.emoji_probability must be between 0.0 and 1.0".into(),
            ));
        }

        if self.ranking.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "ranking.top_k must be at least 1".into(),
            ));
        }

        if self.summary.max_length == 0 || self.summary.snippet_length == 0 {
            return Err(ConfigError::ValidationError(
                "summary.max_length and summary.snippet_length must be at least 1".into(),
            ));
        }

        let weights = [
            self.ranking.trusted_weight,
            self.ranking.search_weight,
            self.ranking.default_weight,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(ConfigError::ValidationError(
                "ranking weights must be finite and non-negative".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for SidekickConfig {
    fn default() -> Self {
        Self {
            services_path: None,
            enhancement: EnhancementConfig::default(),
            ranking: RankingConfig::default(),
            dedup: DedupConfig::default(),
            summary: SummaryConfig::default(),
            persona: PersonaConfig::default(),
            domains: DomainConfig::default(),
        }
    }
}

fn parse_flag(raw: &str, current: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "0" | "false" | "off" | "no" => false,
        "1" | "true" | "on" | "yes" => true,
        _ => current,
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for sidekick_core::Error {
    fn from(e: ConfigError) -> Self {
        sidekick_core::Error::Config {
            message: e.to_string(),
        }
    }
}
