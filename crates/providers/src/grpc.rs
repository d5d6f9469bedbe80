//! gRPC backend placeholder.
//!
//! No wire format is implemented. The backend answers locally with a reply in
//! the same normalized shape as a real provider, so routing, retry and the
//! ranking funnel can be exercised against grpc-tagged services.

use async_trait::async_trait;
use serde_json::json;
use sidekick_config::ServiceDescriptor;
use sidekick_core::error::ServiceError;
use tracing::debug;

use crate::backend::{ServiceBackend, ServiceCall};
use crate::envelope::{GrpcReply, ProviderPayload};

#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcBackend;

impl GrpcBackend {
    pub fn new() -> Self {
        Self
    }

    fn confidence_for(domain: &str) -> f64 {
        match domain {
            "weather" => 0.85,
            "news" => 0.75,
            "facts" | "general" => 0.9,
            _ => 0.7,
        }
    }
}

#[async_trait]
impl ServiceBackend for GrpcBackend {
    fn protocol(&self) -> &str {
        "grpc"
    }

    async fn call(
        &self,
        service: &ServiceDescriptor,
        call: &ServiceCall,
    ) -> Result<ProviderPayload, ServiceError> {
        debug!(
            request_id = %call.request_id,
            service = %service.name,
            endpoint = %service.endpoint,
            "gRPC placeholder call"
        );
        Ok(ProviderPayload::Grpc(GrpcReply {
            content: format!("{} information for query: {}", call.domain, call.query),
            confidence: Self::confidence_for(&call.domain),
            data: json!({
                "endpoint": service.endpoint,
                "tool": service.tool.name,
                "arguments": call.arguments,
            }),
        }))
    }
}
