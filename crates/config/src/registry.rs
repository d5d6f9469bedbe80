//! Service registry: the configured external services, grouped by domain.
//!
//! Two document shapes are accepted:
//!
//! - **detailed**: `{enabled, default_timeout, default_retries, services: [...]}`,
//!   optionally wrapped in a top-level `mcp` key;
//! - **terse**: `{name: {url|endpoint, type}}`, optionally wrapped in
//!   `mcpServers`. Domains are inferred from the service name.
//!
//! Loading never fails. Any read, parse or shape problem is logged and yields
//! a globally disabled, empty registry.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ConfigError;
use crate::service::{AuthDescriptor, AuthType, Protocol, ServiceDescriptor, ToolBinding};

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_PRIORITY: i64 = 999;

/// Name keywords used to infer domains for terse entries.
const DOMAIN_FAMILIES: &[(&[&str], &[&str])] = &[
    (
        &["weather", "forecast", "tianqi"],
        &["weather", "forecast", "temperature"],
    ),
    (
        &["map", "amap", "geo", "navigation", "location"],
        &["maps", "location", "navigation"],
    ),
    (&["news", "headline"], &["news", "headlines"]),
    (
        &["search", "bing", "google", "baidu", "serp"],
        &["search", "web"],
    ),
    (&["translat", "fanyi"], &["translation"]),
];

/// On-disk encoding of a registry document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Yaml,
    Toml,
}

impl SourceFormat {
    /// Pick a format by file extension. Unknown extensions are read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => SourceFormat::Yaml,
            Some("toml") => SourceFormat::Toml,
            _ => SourceFormat::Json,
        }
    }
}

/// Where a registry is loaded from.
#[derive(Debug, Clone)]
pub enum RegistrySource {
    Path(PathBuf),
    Inline { content: String, format: SourceFormat },
    Value(Value),
}

impl From<&Path> for RegistrySource {
    fn from(path: &Path) -> Self {
        RegistrySource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for RegistrySource {
    fn from(path: PathBuf) -> Self {
        RegistrySource::Path(path)
    }
}

impl From<Value> for RegistrySource {
    fn from(value: Value) -> Self {
        RegistrySource::Value(value)
    }
}

// --- raw document shapes ---

#[derive(Deserialize)]
struct DetailedDocument {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_timeout")]
    default_timeout: u64,
    #[serde(default = "default_retries")]
    default_retries: u32,
    #[serde(default)]
    services: Vec<RawService>,
}

#[derive(Deserialize)]
struct RawService {
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    endpoint: String,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default, alias = "auth")]
    authentication: AuthDescriptor,
    #[serde(default)]
    domains: Vec<String>,
    timeout: Option<u64>,
    retries: Option<u32>,
    #[serde(default = "default_priority")]
    priority: i64,
    tool: Option<ToolBinding>,
}

#[derive(Deserialize)]
struct TerseEntry {
    url: Option<String>,
    endpoint: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_retries() -> u32 {
    DEFAULT_RETRIES
}
fn default_protocol() -> String {
    "rest".into()
}
fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// The set of configured external services.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    enabled: bool,
    default_timeout: u64,
    default_retries: u32,
    /// Sorted by `(priority, name)`.
    services: Vec<ServiceDescriptor>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ServiceRegistry {
    /// A globally disabled registry with no services.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            default_timeout: DEFAULT_TIMEOUT_SECS,
            default_retries: DEFAULT_RETRIES,
            services: Vec::new(),
        }
    }

    /// Build an enabled registry from descriptors.
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        let mut registry = Self {
            enabled: true,
            default_timeout: DEFAULT_TIMEOUT_SECS,
            default_retries: DEFAULT_RETRIES,
            services,
        };
        registry.sort();
        registry
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Load from any source. Never fails; problems produce a disabled,
    /// empty registry.
    pub fn load(source: impl Into<RegistrySource>) -> Self {
        match Self::try_load(source.into()) {
            Ok(registry) => {
                info!(
                    enabled = registry.enabled,
                    services = registry.services.len(),
                    "Service registry loaded"
                );
                registry
            }
            Err(e) => {
                warn!(error = %e, "Service registry unavailable, routing disabled");
                Self::disabled()
            }
        }
    }

    /// Parse an in-memory document.
    pub fn from_content(content: &str, format: SourceFormat) -> Self {
        Self::load(RegistrySource::Inline {
            content: content.to_string(),
            format,
        })
    }

    /// Strict loading, reporting the reason a source was rejected.
    pub fn try_load(source: RegistrySource) -> Result<Self, ConfigError> {
        match source {
            RegistrySource::Path(path) => {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                let value = parse_document(&content, SourceFormat::from_path(&path)).map_err(
                    |reason| ConfigError::ParseError {
                        path: path.clone(),
                        reason,
                    },
                )?;
                Self::try_from_value(&value)
            }
            RegistrySource::Inline { content, format } => {
                let value =
                    parse_document(&content, format).map_err(|reason| ConfigError::ParseError {
                        path: PathBuf::from("<inline>"),
                        reason,
                    })?;
                Self::try_from_value(&value)
            }
            RegistrySource::Value(value) => Self::try_from_value(&value),
        }
    }

    /// Interpret an already-parsed document in either shape.
    pub fn try_from_value(value: &Value) -> Result<Self, ConfigError> {
        let root = value.get("mcp").unwrap_or(value);
        if root.get("services").is_some() {
            return Self::from_detailed(root);
        }
        if let Some(servers) = value.get("mcpServers") {
            return Self::from_terse(servers);
        }
        if is_terse_map(root) {
            return Self::from_terse(root);
        }
        Err(ConfigError::UnsupportedFormat(
            "expected a `services` list or a map of named servers".into(),
        ))
    }

    fn from_detailed(root: &Value) -> Result<Self, ConfigError> {
        let doc: DetailedDocument = serde_json::from_value(root.clone())
            .map_err(|e| ConfigError::UnsupportedFormat(e.to_string()))?;
        let services = doc
            .services
            .into_iter()
            .map(|raw| {
                let tool = raw
                    .tool
                    .unwrap_or_else(|| ToolBinding::for_domains(&raw.domains));
                ServiceDescriptor {
                    name: raw.name,
                    enabled: raw.enabled,
                    endpoint: raw.endpoint,
                    protocol: Protocol::parse(&raw.protocol),
                    auth: raw.authentication,
                    domains: raw.domains,
                    timeout: raw.timeout.unwrap_or(doc.default_timeout),
                    retries: raw.retries.unwrap_or(doc.default_retries),
                    priority: raw.priority,
                    tool,
                }
            })
            .collect();
        let mut registry = Self {
            enabled: doc.enabled,
            default_timeout: doc.default_timeout,
            default_retries: doc.default_retries,
            services,
        };
        registry.sort();
        Ok(registry)
    }

    fn from_terse(servers: &Value) -> Result<Self, ConfigError> {
        let map = servers.as_object().ok_or_else(|| {
            ConfigError::UnsupportedFormat("server list must be a map of named entries".into())
        })?;
        let mut services = Vec::with_capacity(map.len());
        for (name, entry) in map {
            let entry: TerseEntry = serde_json::from_value(entry.clone())
                .map_err(|e| ConfigError::UnsupportedFormat(format!("{name}: {e}")))?;
            let Some(endpoint) = entry.url.or(entry.endpoint).filter(|e| !e.trim().is_empty()) else {
                warn!(service = %name, "Skipping server entry without url or endpoint");
                continue;
            };
            let protocol = match entry.kind.as_deref() {
                Some(kind) if kind.eq_ignore_ascii_case("grpc") => Protocol::Grpc,
                _ => Protocol::Rest,
            };
            let domains = infer_domains(name);
            services.push(ServiceDescriptor {
                name: name.clone(),
                enabled: true,
                endpoint,
                protocol,
                auth: AuthDescriptor::default(),
                tool: ToolBinding::for_domains(&domains),
                domains,
                timeout: DEFAULT_TIMEOUT_SECS,
                retries: DEFAULT_RETRIES,
                priority: DEFAULT_PRIORITY,
            });
        }
        Ok(Self::new(services))
    }

    /// Rebuild the registry in place from a new source.
    pub fn reload(&mut self, source: impl Into<RegistrySource>) {
        *self = Self::load(source);
    }

    fn sort(&mut self) {
        self.services
            .sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_timeout(&self) -> u64 {
        self.default_timeout
    }

    pub fn default_retries(&self) -> u32 {
        self.default_retries
    }

    /// Every configured service, enabled or not, in priority order.
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Enabled services that handle `domain`, lowest priority first.
    /// Empty when the registry is globally disabled.
    pub fn get_services_for_domain(&self, domain: &str) -> Vec<&ServiceDescriptor> {
        if !self.enabled {
            return Vec::new();
        }
        self.services
            .iter()
            .filter(|s| s.enabled && s.handles(domain))
            .collect()
    }

    pub fn get_enabled_services(&self) -> Vec<&ServiceDescriptor> {
        if !self.enabled {
            return Vec::new();
        }
        self.services.iter().filter(|s| s.enabled).collect()
    }

    pub fn get_service_by_name(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Sorted, deduplicated domains served by enabled services.
    pub fn available_domains(&self) -> Vec<String> {
        self.get_enabled_services()
            .into_iter()
            .flat_map(|s| s.domains.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Advisory checks. An empty list means no problems were found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.services.is_empty() {
            issues.push("no services configured".to_string());
        }
        let mut seen = BTreeSet::new();
        for svc in &self.services {
            if !seen.insert(svc.name.as_str()) {
                issues.push(format!("duplicate service name: {}", svc.name));
            }
            if svc.endpoint.trim().is_empty() {
                issues.push(format!("service '{}' has no endpoint", svc.name));
            }
            if svc.domains.is_empty() {
                issues.push(format!("service '{}' serves no domains", svc.name));
            }
            if let Protocol::Other(tag) = &svc.protocol {
                issues.push(format!("service '{}' uses unknown protocol '{tag}'", svc.name));
            }
            if let AuthType::Other(tag) = &svc.auth.auth_type {
                issues.push(format!(
                    "service '{}' uses unknown auth type '{tag}'",
                    svc.name
                ));
            }
        }
        issues
    }
}

fn parse_document(content: &str, format: SourceFormat) -> Result<Value, String> {
    match format {
        SourceFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        SourceFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        SourceFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    }
}

fn is_terse_map(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if !map.is_empty() => map.values().all(|entry| {
            entry
                .as_object()
                .is_some_and(|e| e.contains_key("url") || e.contains_key("endpoint"))
        }),
        _ => false,
    }
}

/// Infer domains from a service name; unmatched names serve a domain equal
/// to their lower-cased name.
fn infer_domains(name: &str) -> Vec<String> {
    let lowered = name.to_lowercase();
    let mut domains: Vec<String> = Vec::new();
    for (keywords, family) in DOMAIN_FAMILIES {
        if keywords.iter().any(|k| lowered.contains(k)) {
            for d in *family {
                if !domains.iter().any(|existing| existing == d) {
                    domains.push(d.to_string());
                }
            }
        }
    }
    if domains.is_empty() {
        domains.push(lowered);
    }
    domains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ArgumentSource;
    use serde_json::json;
    use std::io::Write;

    fn detailed() -> Value {
        json!({
            "mcp": {
                "enabled": true,
                "default_timeout": 8,
                "services": [
                    {"name": "backup-weather", "endpoint": "http://b", "domains": ["weather"], "priority": 10},
                    {"name": "primary-weather", "endpoint": "http://a", "domains": ["weather"], "priority": 1, "retries": 0},
                    {"name": "off", "endpoint": "http://c", "domains": ["weather"], "priority": 0, "enabled": false},
                    {"name": "news", "endpoint": "http://d", "domains": ["news"]}
                ]
            }
        })
    }

    #[test]
    fn services_for_domain_sorted_by_priority() {
        let registry = ServiceRegistry::load(detailed());
        let names: Vec<_> = registry
            .get_services_for_domain("weather")
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["primary-weather", "backup-weather"]);
    }

    #[test]
    fn globals_fill_missing_fields() {
        let registry = ServiceRegistry::load(detailed());
        let backup = registry.get_service_by_name("backup-weather").unwrap();
        assert_eq!(backup.timeout, 8);
        assert_eq!(backup.retries, DEFAULT_RETRIES);
        assert_eq!(backup.protocol, Protocol::Rest);
        let news = registry.get_service_by_name("news").unwrap();
        assert_eq!(news.priority, DEFAULT_PRIORITY);
        assert_eq!(registry.get_service_by_name("primary-weather").unwrap().retries, 0);
    }

    #[test]
    fn disabled_services_are_excluded() {
        let registry = ServiceRegistry::load(detailed());
        assert_eq!(registry.get_enabled_services().len(), 3);
        assert!(registry.get_service_by_name("off").is_some());
    }

    #[test]
    fn unknown_domain_is_empty() {
        let registry = ServiceRegistry::load(detailed());
        assert!(registry.get_services_for_domain("stocks").is_empty());
    }

    #[test]
    fn globally_disabled_returns_nothing() {
        let mut doc = detailed();
        doc["mcp"]["enabled"] = json!(false);
        let registry = ServiceRegistry::load(doc);
        assert!(!registry.is_enabled());
        assert!(registry.get_services_for_domain("weather").is_empty());
        assert!(registry.get_enabled_services().is_empty());
    }

    #[test]
    fn equal_priorities_break_ties_by_name() {
        let registry = ServiceRegistry::new(vec![
            ServiceDescriptor::new("zeta", "http://z", &["weather"]).with_priority(5),
            ServiceDescriptor::new("alpha", "http://a", &["weather"]).with_priority(5),
        ]);
        let first = registry.get_services_for_domain("weather")[0];
        assert_eq!(first.name, "alpha");
    }

    #[test]
    fn terse_shape_infers_domains() {
        let registry = ServiceRegistry::load(json!({
            "mcpServers": {
                "amap-weather": {"url": "http://w", "type": "streamable_http"},
                "my-tool": {"endpoint": "http://t", "type": "grpc"}
            }
        }));
        assert!(registry.is_enabled());
        let weather = registry.get_service_by_name("amap-weather").unwrap();
        assert!(weather.handles("weather"));
        assert!(weather.handles("maps"));
        assert_eq!(weather.tool.source, ArgumentSource::Place);
        let tool = registry.get_service_by_name("my-tool").unwrap();
        assert_eq!(tool.domains, vec!["my-tool".to_string()]);
        assert_eq!(tool.protocol, Protocol::Grpc);
    }

    #[test]
    fn terse_entry_without_endpoint_is_skipped() {
        let registry = ServiceRegistry::load(json!({
            "mcpServers": {
                "amap-weather": {"type": "streamable_http"},
                "bing-search": {"url": "http://s"}
            }
        }));
        assert!(registry.get_service_by_name("amap-weather").is_none());
        assert!(registry.get_services_for_domain("weather").is_empty());
        assert_eq!(registry.services().len(), 1);
    }

    #[test]
    fn bare_terse_map_is_accepted() {
        let registry = ServiceRegistry::load(json!({
            "bing-search": {"url": "http://s"}
        }));
        assert_eq!(registry.available_domains(), vec!["search", "web"]);
    }

    #[test]
    fn malformed_sources_disable_routing() {
        let registry = ServiceRegistry::from_content("{not json", SourceFormat::Json);
        assert!(!registry.is_enabled());
        assert!(registry.services().is_empty());

        let registry = ServiceRegistry::load(json!({"mcp": {"services": [{"endpoint": "http://x"}]}}));
        assert!(!registry.is_enabled());

        let registry = ServiceRegistry::load(json!([1, 2, 3]));
        assert!(!registry.is_enabled());
    }

    #[test]
    fn missing_file_disables_routing() {
        let registry = ServiceRegistry::load(Path::new("/nonexistent/services.json"));
        assert!(!registry.is_enabled());
        assert!(matches!(
            ServiceRegistry::try_load(RegistrySource::Path("/nonexistent/services.json".into())),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn loads_yaml_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "mcp:\n  enabled: true\n  services:\n    - name: weather\n      endpoint: http://w\n      domains: [weather]\n      authentication:\n        type: bearer\n        key: tok\n"
        )
        .unwrap();
        let registry = ServiceRegistry::load(file.path());
        let svc = registry.get_service_by_name("weather").unwrap();
        assert_eq!(svc.auth.auth_type, AuthType::Bearer);
        assert_eq!(
            svc.auth.header_pair(),
            Some(("Authorization".into(), "Bearer tok".into()))
        );
    }

    #[test]
    fn loads_toml_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "enabled = true\n\n[[services]]\nname = \"news\"\nendpoint = \"http://n\"\ndomains = [\"news\"]\nprotocol = \"grpc\"\n"
        )
        .unwrap();
        let registry = ServiceRegistry::load(file.path());
        assert_eq!(
            registry.get_service_by_name("news").unwrap().protocol,
            Protocol::Grpc
        );
    }

    #[test]
    fn reload_replaces_contents() {
        let mut registry = ServiceRegistry::load(detailed());
        registry.reload(json!({"services": []}));
        assert!(registry.is_enabled());
        assert!(registry.services().is_empty());
    }

    #[test]
    fn validate_reports_issues() {
        let registry = ServiceRegistry::new(vec![
            ServiceDescriptor::new("dup", "", &[]),
            ServiceDescriptor::new("dup", "http://x", &["weather"])
                .with_protocol(Protocol::parse("soap")),
        ]);
        let issues = registry.validate();
        assert!(issues.iter().any(|i| i.contains("duplicate")));
        assert!(issues.iter().any(|i| i.contains("no endpoint")));
        assert!(issues.iter().any(|i| i.contains("no domains")));
        assert!(issues.iter().any(|i| i.contains("soap")));
        assert!(ServiceRegistry::disabled().validate()[0].contains("no services"));
    }

    #[test]
    fn tool_binding_override() {
        let registry = ServiceRegistry::load(json!({
            "services": [{
                "name": "translator",
                "endpoint": "http://t",
                "domains": ["translation"],
                "tool": {"name": "translate", "argument": "text", "arguments": {"target": "en"}}
            }]
        }));
        let svc = registry.get_service_by_name("translator").unwrap();
        assert_eq!(svc.tool.name, "translate");
        assert_eq!(svc.tool.source, ArgumentSource::Query);
        assert_eq!(svc.tool.arguments["target"], "en");
    }
}
