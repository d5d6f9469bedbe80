//! Call envelope types and provider response normalization.
//!
//! Every raw provider reply is classified into one [`ProviderPayload`]
//! variant, and each variant has exactly one normalization rule.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sidekick_core::error::ServiceError;
use sidekick_core::result::{DEFAULT_CONFIDENCE, EnhancementResponse, Metadata};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const CONTENT_LIST_CONFIDENCE: f64 = 0.95;
const STRUCTURED_CONFIDENCE: f64 = 0.8;
const PLAIN_TEXT_CONFIDENCE: f64 = 0.7;

/// Outgoing call envelope. Notifications carry no `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// Capability negotiation sent once per service before any tool call.
    pub fn initialize(client_name: &str, client_version: &str) -> Self {
        Self::call(
            1,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "roots": {"listChanged": true},
                    "tools": {"listChanged": true}
                },
                "clientInfo": {"name": client_name, "version": client_version}
            }),
        )
    }

    pub fn initialized() -> Self {
        Self::notification("notifications/initialized")
    }

    pub fn tool_call(id: u64, tool: &str, arguments: Map<String, Value>) -> Self {
        Self::call(
            id,
            "tools/call",
            json!({"name": tool, "arguments": Value::Object(arguments)}),
        )
    }
}

/// Incoming call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default = "unknown_error")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn unknown_error() -> String {
    "Unknown error".into()
}

/// Reply from the gRPC placeholder backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GrpcReply {
    pub content: String,
    pub confidence: f64,
    pub data: Value,
}

/// A raw provider reply, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPayload {
    /// A JSON-RPC style envelope, recognized by its `jsonrpc` key.
    CallEnvelope(JsonRpcResponse),

    /// Any other JSON document.
    Structured {
        content: String,
        confidence: f64,
        data: Option<Value>,
        /// Remaining top-level fields, copied into metadata.
        extra: Map<String, Value>,
    },

    /// A body that is not JSON at all.
    PlainText { text: String, status: u16 },

    Grpc(GrpcReply),
}

impl ProviderPayload {
    /// Classify a response body.
    pub fn from_body(body: &str, status: u16) -> Self {
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                return ProviderPayload::PlainText {
                    text: body.to_string(),
                    status,
                };
            }
        };

        if value.get("jsonrpc").is_some() {
            if let Ok(envelope) = serde_json::from_value::<JsonRpcResponse>(value.clone()) {
                return ProviderPayload::CallEnvelope(envelope);
            }
        }

        match value {
            Value::Object(mut obj) if obj.contains_key("content") => {
                let content = obj.remove("content").map(|c| stringify(&c)).unwrap_or_default();
                let confidence = obj
                    .remove("confidence")
                    .and_then(|c| c.as_f64())
                    .unwrap_or(DEFAULT_CONFIDENCE);
                let data = obj.remove("data");
                ProviderPayload::Structured {
                    content,
                    confidence,
                    data,
                    extra: obj,
                }
            }
            other => ProviderPayload::Structured {
                content: stringify(&other),
                confidence: STRUCTURED_CONFIDENCE,
                data: Some(json!({"status_code": status})),
                extra: Map::new(),
            },
        }
    }

    /// Convert into a successful response for `service`.
    ///
    /// An envelope carrying an `error` aborts the attempt.
    pub fn normalize(self, service: &str) -> Result<EnhancementResponse, ServiceError> {
        let (content, confidence, data, extra) = match self {
            ProviderPayload::CallEnvelope(mut envelope) => {
                if let Some(err) = envelope.error.take() {
                    return Err(ServiceError::Envelope {
                        code: err.code,
                        message: err.message,
                    });
                }
                match envelope.result.take() {
                    Some(result) => {
                        let (content, confidence, data) = normalize_result(result);
                        (content, confidence, Some(data), Map::new())
                    }
                    None => {
                        let raw = serde_json::to_string(&envelope)
                            .map_err(|e| ServiceError::Normalization(e.to_string()))?;
                        (raw, STRUCTURED_CONFIDENCE, None, Map::new())
                    }
                }
            }
            ProviderPayload::Structured {
                content,
                confidence,
                data,
                extra,
            } => (content, confidence, data, extra),
            ProviderPayload::PlainText { text, status } => (
                text,
                PLAIN_TEXT_CONFIDENCE,
                Some(json!({"status_code": status})),
                Map::new(),
            ),
            ProviderPayload::Grpc(reply) => {
                (reply.content, reply.confidence, Some(reply.data), Map::new())
            }
        };

        let mut metadata = Metadata::new();
        metadata.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        metadata.insert("service".into(), Value::String(service.to_string()));
        if let Some(data) = data {
            metadata.insert("data".into(), data);
        }
        for (key, value) in extra {
            metadata.entry(key).or_insert(value);
        }

        Ok(EnhancementResponse::success(
            content, confidence, metadata, service,
        ))
    }
}

/// Normalize an envelope `result`: returns content, confidence, data.
fn normalize_result(result: Value) -> (String, f64, Value) {
    let content_items = result
        .get("content")
        .and_then(|c| c.as_array())
        .filter(|items| !items.is_empty());

    if let Some(items) = content_items {
        let text = items
            .iter()
            .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
            .map(|item| render_text_item(item.get("text").and_then(|t| t.as_str()).unwrap_or("")))
            .collect::<Vec<_>>()
            .join(" ");
        return (text, CONTENT_LIST_CONFIDENCE, result);
    }

    match result.get("content") {
        Some(content) => (stringify(content), STRUCTURED_CONFIDENCE, result),
        None => (
            stringify(&result),
            STRUCTURED_CONFIDENCE,
            json!({ "result": result }),
        ),
    }
}

/// A text item whose text decodes as a flat record is rendered as a sentence.
fn render_text_item(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(record)) => format_record(&record).unwrap_or_else(|| text.to_string()),
        _ => text.to_string(),
    }
}

/// Render a place/condition/readings record, e.g.
/// `北京天气：晴，温度25°C，湿度40%，风速3m/s`.
///
/// Returns `None` when none of the known fields are present.
pub fn format_record(record: &Map<String, Value>) -> Option<String> {
    const FIELDS: [&str; 5] = ["city", "description", "temperature", "humidity", "wind_speed"];
    if !FIELDS.iter().any(|f| record.contains_key(*f)) {
        return None;
    }

    let field = |key: &str| record.get(key).map(stringify);
    let city = field("city").unwrap_or_else(|| "未知城市".into());
    let description = field("description").unwrap_or_else(|| "未知".into());

    let mut parts = vec![format!("{city}天气：{description}")];
    if let Some(t) = field("temperature") {
        parts.push(format!("温度{t}°C"));
    }
    if let Some(h) = field("humidity") {
        parts.push(format!("湿度{h}%"));
    }
    if let Some(w) = field("wind_speed") {
        parts.push(format!("风速{w}m/s"));
    }
    Some(parts.join("，"))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
