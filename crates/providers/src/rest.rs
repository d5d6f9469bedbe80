//! REST backend for stateful tool servers.
//!
//! Before the first functional call against a service the backend performs a
//! one-time handshake:
//! 1. POST `initialize` with protocol version and client capabilities.
//! 2. Read the session token from the `Mcp-Session-Id` header (any status)
//!    or from `result.sessionId` in a 200 body.
//! 3. POST `notifications/initialized` carrying the token; the reply is
//!    ignored.
//!
//! Tokens are cached in the injected [`SessionStore`]. A failed handshake is
//! logged and the call proceeds without a token.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use sidekick_config::ServiceDescriptor;
use sidekick_core::error::ServiceError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{ServiceBackend, ServiceCall};
use crate::envelope::{JsonRpcRequest, ProviderPayload, SESSION_HEADER};
use crate::session::{InMemorySessionStore, SessionStore};

const ACCEPT_VALUE: &str = "application/json, text/event-stream";
const ERROR_BODY_LIMIT: usize = 200;

pub struct RestBackend {
    client: reqwest::Client,
    sessions: Arc<dyn SessionStore>,
    client_name: String,
    client_version: String,
}

impl Default for RestBackend {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }
}

impl RestBackend {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            sessions,
            client_name: "sidekick".into(),
            client_version: "1.0.0".into(),
        }
    }

    /// Identity announced in the handshake.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    fn post(
        &self,
        service: &ServiceDescriptor,
        body: &JsonRpcRequest,
        session: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&service.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_VALUE)
            .json(body);
        if service.timeout > 0 {
            request = request.timeout(Duration::from_secs(service.timeout));
        }
        if let Some((name, value)) = service.auth.header_pair() {
            request = request.header(name, value);
        }
        if let Some(token) = session {
            request = request.header(SESSION_HEADER, token);
        }
        request
    }

    async fn ensure_session(&self, service: &ServiceDescriptor, request_id: &str) -> Option<String> {
        if let Some(token) = self.sessions.get(&service.name) {
            return Some(token);
        }
        info!(request_id = %request_id, service = %service.name, "No session token, performing handshake");
        let token = self.handshake(service).await;
        match &token {
            Some(t) => self.sessions.put(&service.name, t.clone()),
            None => warn!(request_id = %request_id, service = %service.name, "Handshake yielded no session token"),
        }
        token
    }

    /// Run the handshake and return the issued token, if any.
    pub async fn handshake(&self, service: &ServiceDescriptor) -> Option<String> {
        let init = JsonRpcRequest::initialize(&self.client_name, &self.client_version);
        let response = match self.post(service, &init, None).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(service = %service.name, error = %e, "Handshake request failed");
                return None;
            }
        };

        let status = response.status().as_u16();
        let header_token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let token = match header_token {
            Some(token) => Some(token),
            None if status == 200 => {
                let body = response.text().await.unwrap_or_default();
                session_from_body(&unwrap_event_stream(&body))
            }
            None => None,
        };

        match token {
            Some(token) => {
                debug!(service = %service.name, "Session token issued");
                self.acknowledge(service, &token).await;
                Some(token)
            }
            None => {
                warn!(service = %service.name, status, "Handshake returned no session token");
                None
            }
        }
    }

    async fn acknowledge(&self, service: &ServiceDescriptor, token: &str) {
        let notice = JsonRpcRequest::initialized();
        match self.post(service, &notice, Some(token)).send().await {
            Ok(r) => debug!(service = %service.name, status = r.status().as_u16(), "Sent initialized notification"),
            Err(e) => warn!(service = %service.name, error = %e, "Failed to send initialized notification"),
        }
    }
}

#[async_trait]
impl ServiceBackend for RestBackend {
    fn protocol(&self) -> &str {
        "rest"
    }

    async fn call(
        &self,
        service: &ServiceDescriptor,
        call: &ServiceCall,
    ) -> Result<ProviderPayload, ServiceError> {
        let session = self.ensure_session(service, &call.request_id).await;
        let request = JsonRpcRequest::tool_call(call.sequence, &service.tool.name, call.arguments.clone());

        info!(
            request_id = %call.request_id,
            service = %service.name,
            endpoint = %service.endpoint,
            tool = %service.tool.name,
            "REST call"
        );

        let response = self
            .post(service, &request, session.as_deref())
            .send()
            .await
            .map_err(|e| transport_error(e, service))?;

        let status = response.status().as_u16();
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, service))?;

        if status >= 400 {
            if status == 404 && session.is_some() {
                // Expired sessions answer 404; the next attempt re-handshakes.
                self.sessions.remove(&service.name);
            }
            warn!(request_id = %call.request_id, status, "Service returned error");
            return Err(ServiceError::HttpStatus {
                status,
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let body = if is_event_stream {
            unwrap_event_stream(&body)
        } else {
            body
        };
        Ok(ProviderPayload::from_body(&body, status))
    }
}

fn transport_error(e: reqwest::Error, service: &ServiceDescriptor) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout {
            service: service.name.clone(),
            timeout_secs: service.timeout,
        }
    } else {
        ServiceError::Transport(e.to_string())
    }
}

fn session_from_body(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("result")?
        .get("sessionId")?
        .as_str()
        .map(str::to_string)
}

/// Take the last `data:` payload of an event stream body. Bodies without
/// data lines are returned unchanged.
pub fn unwrap_event_stream(body: &str) -> String {
    body.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
