//! The retrieval funnel and reply styling.
//!
//! Results pooled from search and external services flow through
//! [`ResultRanker`] → [`ResultDeduplicator`] → [`ResultSummarizer`] and come
//! out as one bounded context string. [`PersonaStyler`] adjusts the generated
//! reply afterwards.

pub mod dedup;
pub mod persona;
pub mod ranker;
pub mod summarizer;

pub use dedup::{ResultDeduplicator, jaccard_similarity};
pub use persona::{PersonaDiagnostics, PersonaStyler};
pub use ranker::ResultRanker;
pub use summarizer::ResultSummarizer;
