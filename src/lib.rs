//! # Continuum Memory: tiered memory for LLM agents
//!
//! Continuum memory keeps what an agent observes in five temporal strata and
//! moves it between them as the agent reasons:
//!
//! - **Working → ShortTerm → Episodic → LongTerm**, plus **Semantic** for
//!   abstracted patterns
//! - **Surprise** (prediction error, or novelty when nothing was predicted)
//!   with time-aware momentum
//! - **Compression** whose intensity follows the target stratum
//! - **Retention** scoring that decides what survives over-capacity tiers
//! - A **dual-loop orchestrator**: a fast per-cycle verify/repair loop and a
//!   slow periodic decay/consolidation loop
//!
//! ## Quick Start
//!
//! ```ignore
//! use continuum_memory::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let memory = ContinuumMemory::new(ContinuumConfig::enabled())?;
//!     let scope = Scope::agent("alice");
//!
//!     memory.begin_cycle(&scope);
//!     memory.observe(&scope, MemoryDraft::new("User asked about Paris weather"));
//!
//!     let reflection = memory.reflect(
//!         &scope,
//!         Reflection::new("The weather API reported sunny skies in Paris.")
//!             .with_tool(ToolResult::ok("weather_api", "Paris: sunny")),
//!     )?;
//!
//!     if let Some(report) = memory.end_cycle(&scope).await? {
//!         println!("outer loop removed {} entries", report.removed);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Facade** (`core`) - [`ContinuumMemory`], owns every service
//! 2. **Orchestrator** (`orchestrator`) - inner and outer loops per scope
//! 3. **Services** (`memory`, `surprise`, `compression`, `lifecycle`,
//!    `processes`) - each keyed by [`Scope`], no cross-scope state
//!
//! The subsystem is inert unless [`ContinuumConfig::enabled`] is set.

mod core;
mod error;

pub mod clock;
pub mod compression;
pub mod config;
pub mod lifecycle;
pub mod memory;
pub mod orchestrator;
pub mod processes;
pub mod surprise;
pub mod text;
pub mod types;

// Public API exports
pub use crate::core::{ContinuumMemory, ContinuumMemoryBuilder, Reflection, ReflectionReport, ScopeStatistics};
pub use error::{MemoryError, MemoryResult};

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use compression::{
    Consolidation, ConsolidationMode, ExtractiveSummarizer, MemoryCompressor, SharedSummarizer,
    Summarizer,
};
pub use config::ContinuumConfig;
pub use lifecycle::{DecayResult, RetentionGate, RetentionPolicy, RetentionStatistics};
pub use memory::{MemoryQuery, MemoryUpdate, QueryResult, StratumManager, StratumStatistics};
pub use orchestrator::{
    DualLoopOrchestrator, OuterLoopReport, ProcessReward, PromotionDecision, ReasoningMode,
    RepairAction, RepairInstruction, SercContext, ToolResult, VerificationTuple,
};
pub use surprise::{Outcome, Prediction, SurpriseCalculator, SurpriseSignal};
pub use types::{
    CompressionMethod, ContentType, Importance, MemoryDraft, MemoryEntry, MemoryId, Scope,
    Stratum,
};

// Re-export commonly used external types for convenience
pub use chrono::{DateTime, Utc};
pub use serde_json::{json, Value as JsonValue};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use continuum_memory::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{ContinuumMemory, Reflection, ReflectionReport};
    pub use crate::error::{MemoryError, MemoryResult};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::ContinuumConfig;
    pub use crate::memory::{MemoryQuery, MemoryUpdate, QueryResult};
    pub use crate::orchestrator::{RepairAction, ToolResult};
    pub use crate::surprise::{Outcome, Prediction};
    pub use crate::types::{Importance, MemoryDraft, MemoryEntry, Scope, Stratum};
    pub use chrono::{DateTime, Utc};
    pub use serde_json::{json, Value as JsonValue};
}
