//! Protocol backends.
//!
//! The client keeps one backend per protocol and dispatches every attempt
//! through this trait.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sidekick_config::ServiceDescriptor;
use sidekick_core::error::ServiceError;

use crate::envelope::ProviderPayload;

/// One functional call against one service.
#[derive(Debug, Clone)]
pub struct ServiceCall {
    /// Log correlation id, e.g. `REQ-000042`.
    pub request_id: String,
    /// Numeric id used in the call envelope.
    pub sequence: u64,
    pub domain: String,
    pub query: String,
    pub arguments: Map<String, Value>,
}

#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Protocol tag this backend serves, for logs.
    fn protocol(&self) -> &str;

    async fn call(
        &self,
        service: &ServiceDescriptor,
        call: &ServiceCall,
    ) -> Result<ProviderPayload, ServiceError>;
}
