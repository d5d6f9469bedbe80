//! Turn orchestration for Sidekick.
//!
//! [`EnhancementOrchestrator::run_turn`] walks every user message through
//! four stages:
//!
//! 1. **Decide** whether the query needs external context
//! 2. **Enhance**: fetch from search and configured services, then rank,
//!    deduplicate and summarize
//! 3. **Generate** the reply with the context folded into the prompt
//! 4. **Personalize** the reply with the persona rules
//!
//! Each stage is isolated; the turn always produces a reply and a trace.

pub mod decide;
pub mod logging;
pub mod orchestrator;
pub mod router;

pub use decide::{Decision, DecisionReason, EnhancementDecider};
pub use orchestrator::{Enhancement, EnhancementOrchestrator, FALLBACK_REPLY, TurnOptions};
pub use router::DomainRouter;
