//! Descriptors for configured external services.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire protocol used to reach a service.
///
/// Unknown tags are kept verbatim so the client can report them as a
/// structured failure instead of rejecting the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Rest,
    Grpc,
    Other(String),
}

impl Protocol {
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rest" | "http" | "https" => Protocol::Rest,
            "grpc" => Protocol::Grpc,
            _ => Protocol::Other(tag.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Rest => "rest",
            Protocol::Grpc => "grpc",
            Protocol::Other(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Protocol::Other(_))
    }
}

impl From<String> for Protocol {
    fn from(tag: String) -> Self {
        Protocol::parse(&tag)
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How credentials are attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthType {
    None,
    ApiKey,
    Bearer,
    Basic,
    Other(String),
}

impl From<String> for AuthType {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "" | "none" => AuthType::None,
            "api_key" | "apikey" => AuthType::ApiKey,
            "bearer" => AuthType::Bearer,
            "basic" => AuthType::Basic,
            _ => AuthType::Other(tag),
        }
    }
}

impl From<AuthType> for String {
    fn from(t: AuthType) -> Self {
        match t {
            AuthType::None => "none".into(),
            AuthType::ApiKey => "api_key".into(),
            AuthType::Bearer => "bearer".into(),
            AuthType::Basic => "basic".into(),
            AuthType::Other(tag) => tag,
        }
    }
}

/// Authentication settings for one service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthDescriptor {
    #[serde(rename = "type", default = "default_auth_type")]
    pub auth_type: AuthType,

    /// Secret value, or the name of an environment variable holding it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default = "default_auth_header")]
    pub header: String,
}

fn default_auth_type() -> AuthType {
    AuthType::None
}
fn default_auth_header() -> String {
    "Authorization".into()
}

impl Default for AuthDescriptor {
    fn default() -> Self {
        Self {
            auth_type: default_auth_type(),
            key: None,
            header: default_auth_header(),
        }
    }
}

impl std::fmt::Debug for AuthDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthDescriptor")
            .field("auth_type", &self.auth_type)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("header", &self.header)
            .finish()
    }
}

/// An upper-case identifier with an underscore names an environment variable.
fn looks_like_env_var(key: &str) -> bool {
    key.contains('_')
        && key.chars().any(|c| c.is_ascii_uppercase())
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl AuthDescriptor {
    /// Resolve the configured secret, reading the environment when the key
    /// is a variable reference. Falls back to the literal value.
    pub fn resolve_secret(&self) -> Option<String> {
        let key = self.key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        if looks_like_env_var(key) {
            if let Ok(value) = std::env::var(key) {
                return Some(value);
            }
        }
        Some(key.to_string())
    }

    /// The `(header, value)` pair to attach, if any.
    pub fn header_pair(&self) -> Option<(String, String)> {
        let secret = self.resolve_secret()?;
        let value = match &self.auth_type {
            AuthType::None | AuthType::Other(_) => return None,
            AuthType::ApiKey => secret,
            AuthType::Bearer => format!("Bearer {secret}"),
            AuthType::Basic if secret.contains(':') => {
                format!("Basic {}", STANDARD.encode(secret.as_bytes()))
            }
            AuthType::Basic => format!("Basic {secret}"),
        };
        Some((self.header.clone(), value))
    }
}

/// Where the functional call's main argument comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentSource {
    /// A place name extracted from the query.
    Place,
    /// The raw query text.
    Query,
}

/// Which tool a service exposes and how to fill its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,

    /// Argument that receives the extracted value.
    pub argument: String,

    #[serde(default = "default_argument_source")]
    pub source: ArgumentSource,

    /// Fixed extra arguments sent with every call.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
}

fn default_argument_source() -> ArgumentSource {
    ArgumentSource::Query
}

impl ToolBinding {
    pub fn weather() -> Self {
        let mut arguments = Map::new();
        arguments.insert("units".into(), Value::String("metric".into()));
        arguments.insert("lang".into(), Value::String("zh_cn".into()));
        Self {
            name: "get_weather".into(),
            argument: "city".into(),
            source: ArgumentSource::Place,
            arguments,
        }
    }

    pub fn search() -> Self {
        Self {
            name: "search".into(),
            argument: "query".into(),
            source: ArgumentSource::Query,
            arguments: Map::new(),
        }
    }

    /// Default binding derived from a service's primary domain.
    pub fn for_domains(domains: &[String]) -> Self {
        match domains.first() {
            Some(d) if d.eq_ignore_ascii_case("weather") => Self::weather(),
            _ => Self::search(),
        }
    }
}

/// Configuration for one external service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub enabled: bool,
    pub endpoint: String,
    pub protocol: Protocol,
    pub auth: AuthDescriptor,
    pub domains: Vec<String>,
    /// Per-attempt timeout in seconds.
    pub timeout: u64,
    /// Additional attempts after the first.
    pub retries: u32,
    /// Lower is tried first.
    pub priority: i64,
    pub tool: ToolBinding,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, domains: &[&str]) -> Self {
        let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
        Self {
            name: name.into(),
            enabled: true,
            endpoint: endpoint.into(),
            protocol: Protocol::Rest,
            auth: AuthDescriptor::default(),
            tool: ToolBinding::for_domains(&domains),
            domains,
            timeout: 5,
            retries: 3,
            priority: 999,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_auth(mut self, auth: AuthDescriptor) -> Self {
        self.auth = auth;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this service is responsible for `domain`.
    pub fn handles(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
    }
}
