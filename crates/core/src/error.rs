//! Error types for the Sidekick domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them for callers that want a single type.

use thiserror::Error;

/// The top-level error type for all Sidekick operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- External service errors ---
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    // --- Domain routing errors ---
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    // --- Collaborator errors ---
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A single attempt against one external provider failed.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service '{service}' timed out after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Call envelope error ({code}): {message}")]
    Envelope { code: i64, message: String },

    #[error("Failed to normalize response: {0}")]
    Normalization(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl ServiceError {
    /// Whether another attempt against the same service could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::UnsupportedProtocol(_))
    }
}

/// Failures of the multi-service routing layer.
///
/// These are rendered into `EnhancementResponse::error` rather than being
/// returned as `Err` from the client.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("Service routing is globally disabled")]
    GloballyDisabled,

    #[error("No services available for domain: {domain}")]
    DomainUnresolved { domain: String },

    #[error("All services failed for domain '{domain}'. Last service: {service}. Last error: {last_error}")]
    Exhausted {
        domain: String,
        service: String,
        last_error: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation failed: {0}")]
    Failed(String),

    #[error("Generator unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_displays_correctly() {
        let err = Error::Service(ServiceError::HttpStatus {
            status: 503,
            body: "upstream overloaded".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("upstream overloaded"));
    }

    #[test]
    fn routing_error_names_last_service() {
        let err = RoutingError::Exhausted {
            domain: "weather".into(),
            service: "backup-weather".into(),
            last_error: "connection refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("backup-weather"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn unsupported_protocol_is_not_retryable() {
        assert!(!ServiceError::UnsupportedProtocol("soap".into()).is_retryable());
        assert!(ServiceError::Transport("reset".into()).is_retryable());
    }
}
