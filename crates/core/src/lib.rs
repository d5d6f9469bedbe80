//! # Sidekick Core
//!
//! Domain types, collaborator traits, and error definitions for the Sidekick
//! reply-enhancement pipeline. This crate has **no transport or runtime
//! dependencies**: it defines the value objects that flow between the service
//! client, the result funnel, and the orchestrator.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (the text generator, the web search backend)
//! is a trait here. Implementations are supplied by the host, so the
//! pipeline can be exercised end-to-end with scripted stand-ins.

pub mod collaborator;
pub mod error;
pub mod message;
pub mod result;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use collaborator::{Generator, SearchProvider};
pub use error::{Error, GenerationError, Result, RoutingError, SearchError, ServiceError};
pub use message::{ChatTurn, Role};
pub use result::{Confidence, EnhancementResponse, Metadata, NormalizedResult, SearchHit};
pub use trace::{PipelineResult, Stage, StageRecord};
