//! External service access for Sidekick.
//!
//! [`MultiServiceClient`] routes a query to the services configured for a
//! domain, retries each with exponential backoff, falls back across
//! candidates, and normalizes whatever comes back. Protocol backends
//! implement [`ServiceBackend`].

pub mod backend;
pub mod client;
pub mod envelope;
pub mod extract;
pub mod grpc;
pub mod rest;
pub mod retry;
pub mod session;

pub use backend::{ServiceBackend, ServiceCall};
pub use client::{MultiServiceClient, ServiceStatus, ServiceSummary};
pub use envelope::{GrpcReply, JsonRpcRequest, JsonRpcResponse, ProviderPayload};
pub use extract::{ArgumentExtractor, PlaceExtractor, QueryPassthrough};
pub use grpc::GrpcBackend;
pub use rest::RestBackend;
pub use retry::{NoopSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use session::{InMemorySessionStore, SessionStore};
