/// Continuum memory facade.
///
/// This module provides the main user-facing API. [`ContinuumMemory`] builds
/// every service from one [`ContinuumConfig`], owns them behind `Arc`, and
/// offers cycle-level helpers for a cognitive-phase driver:
///
/// ```text
/// begin_cycle ─► observe / recall ─► reflect ─► end_cycle
///                                               (outer loop when due)
/// ```
///
/// # Disabled mode
///
/// With `enabled == false` the facade is inert: helpers return `None` or
/// empty results and never create scope state. The services themselves are
/// still reachable through the accessors for callers that drive them directly.
///
/// # Thread Safety
///
/// `ContinuumMemory` is cheap to clone and can be shared across tasks.
/// Different scopes never contend; one scope's cycles are serialized with
/// [`ContinuumMemory::lock_scope`].
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{system_clock, SharedClock};
use crate::compression::{MemoryCompressor, SharedSummarizer};
use crate::config::ContinuumConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::lifecycle::RetentionGate;
use crate::memory::{MemoryQuery, QueryResult, StratumManager, StratumStatistics};
use crate::orchestrator::{
    DualLoopOrchestrator, OuterLoopReport, ProcessReward, RepairInstruction, ScopeGuard,
    SercContext, ToolResult, VerificationTuple,
};
use crate::surprise::{Outcome, Prediction, SurpriseCalculator, SurpriseSignal, SurpriseStatistics};
use crate::types::{MemoryDraft, MemoryEntry, Scope, Stratum};

/// The continuum memory subsystem.
///
/// # Example
///
/// ```ignore
/// use continuum_memory::prelude::*;
///
/// let memory = ContinuumMemory::new(ContinuumConfig::enabled())?;
/// let scope = Scope::agent("alice");
///
/// memory.begin_cycle(&scope);
/// memory.observe(&scope, MemoryDraft::new("The user prefers dark mode"));
/// let reflection = memory
///     .reflect(&scope, Reflection::new("The settings API confirmed dark mode.")
///         .with_tool(ToolResult::ok("settings_api", "theme: dark")))?;
/// let report = memory.end_cycle(&scope).await?;
/// ```
#[derive(Clone)]
pub struct ContinuumMemory {
    config: Arc<ContinuumConfig>,
    clock: SharedClock,
    manager: Arc<StratumManager>,
    surprise: Arc<SurpriseCalculator>,
    compressor: Arc<MemoryCompressor>,
    gate: Arc<RetentionGate>,
    orchestrator: Arc<DualLoopOrchestrator>,
}

impl std::fmt::Debug for ContinuumMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuumMemory")
            .field("enabled", &self.config.enabled)
            .field("scopes", &self.manager.scopes().len())
            .finish()
    }
}

/// Builder for [`ContinuumMemory`] with injected collaborators.
#[derive(Debug)]
pub struct ContinuumMemoryBuilder {
    config: ContinuumConfig,
    clock: Option<SharedClock>,
    summarizer: Option<SharedSummarizer>,
}

impl ContinuumMemoryBuilder {
    /// Use `clock` for every time-dependent computation.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `summarizer` for heavy compression and summarize-mode consolidation.
    pub fn with_summarizer(mut self, summarizer: SharedSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Validate the configuration and build every service.
    pub fn build(self) -> MemoryResult<ContinuumMemory> {
        self.config.validate()?;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(system_clock);

        let surprise = Arc::new(SurpriseCalculator::new(
            config.surprise.clone(),
            config.limits.clone(),
            clock.clone(),
        ));
        let compressor = Arc::new(match self.summarizer {
            Some(summarizer) => MemoryCompressor::with_summarizer(config.compression.clone(), summarizer),
            None => MemoryCompressor::new(config.compression.clone()),
        });
        let gate = Arc::new(RetentionGate::new(
            config.retention.clone(),
            &config.strata,
            clock.clone(),
        ));
        let manager = Arc::new(
            StratumManager::new(&config, clock.clone()).with_policies(Arc::clone(gate.policy_table())),
        );
        let orchestrator = Arc::new(DualLoopOrchestrator::new(
            &config,
            Arc::clone(&manager),
            Arc::clone(&surprise),
            Arc::clone(&compressor),
            Arc::clone(&gate),
            clock.clone(),
        ));

        info!(
            enabled = config.enabled,
            surprise = config.surprise_enabled,
            consolidation = config.consolidation_enabled,
            patterns = config.pattern_detection_enabled,
            "Continuum memory initialized"
        );

        Ok(ContinuumMemory {
            config: Arc::new(config),
            clock,
            manager,
            surprise,
            compressor,
            gate,
            orchestrator,
        })
    }
}

/// Reflection-phase input for one cycle.
#[derive(Debug, Clone, Default)]
pub struct Reflection {
    pub trace: String,
    pub tool_results: Vec<ToolResult>,
    pub outcome: Option<Outcome>,
    pub prediction: Option<Prediction>,
    /// Step to name in a repair instruction
    pub target_step: Option<usize>,
}

impl Reflection {
    pub fn new(trace: impl Into<String>) -> Self {
        Self {
            trace: trace.into(),
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, result: ToolResult) -> Self {
        self.tool_results.push(result);
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_prediction(mut self, prediction: Prediction) -> Self {
        self.prediction = Some(prediction);
        self
    }

    pub fn targeting(mut self, step: usize) -> Self {
        self.target_step = Some(step);
        self
    }
}

/// What reflection produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionReport {
    pub surprise: Option<SurpriseSignal>,
    pub verification: VerificationTuple,
    /// Present only when repair was triggered
    pub repair: Option<RepairInstruction>,
    pub reward: ProcessReward,
}

/// Everything known about one scope.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStatistics {
    pub scope: Scope,
    pub strata: StratumStatistics,
    pub surprise: SurpriseStatistics,
    pub context: Option<SercContext>,
}

impl ContinuumMemory {
    /// Build with the system clock and the extractive summarizer.
    pub fn new(config: ContinuumConfig) -> MemoryResult<Self> {
        Self::builder(config).build()
    }

    /// Build from `CONTINUUM_*` environment variables.
    pub fn from_env() -> MemoryResult<Self> {
        Self::new(ContinuumConfig::from_env())
    }

    pub fn builder(config: ContinuumConfig) -> ContinuumMemoryBuilder {
        ContinuumMemoryBuilder {
            config,
            clock: None,
            summarizer: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ContinuumConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn manager(&self) -> &Arc<StratumManager> {
        &self.manager
    }

    pub fn surprise(&self) -> &Arc<SurpriseCalculator> {
        &self.surprise
    }

    pub fn compressor(&self) -> &Arc<MemoryCompressor> {
        &self.compressor
    }

    pub fn retention_gate(&self) -> &Arc<RetentionGate> {
        &self.gate
    }

    pub fn orchestrator(&self) -> &Arc<DualLoopOrchestrator> {
        &self.orchestrator
    }

    // ------------------------------------------------------------------
    // Cycle helpers
    // ------------------------------------------------------------------

    /// Serialize a whole cycle for `scope`.
    pub async fn lock_scope(&self, scope: &Scope) -> ScopeGuard {
        self.orchestrator.lock_scope(scope).await
    }

    /// Start a reasoning cycle.
    pub fn begin_cycle(&self, scope: &Scope) -> Option<SercContext> {
        if !self.config.enabled {
            return None;
        }
        Some(self.orchestrator.start_inner_loop(scope))
    }

    /// Record an observation in Working memory.
    pub fn observe(&self, scope: &Scope, draft: MemoryDraft) -> Option<MemoryEntry> {
        self.remember(scope, Stratum::Working, draft)
    }

    /// Record an entry directly in `stratum`.
    pub fn remember(&self, scope: &Scope, stratum: Stratum, draft: MemoryDraft) -> Option<MemoryEntry> {
        if !self.config.enabled {
            return None;
        }
        Some(self.manager.add_memory(scope, stratum, draft))
    }

    /// Query the scope's memories. Empty when disabled.
    pub fn recall(&self, scope: &Scope, query: &MemoryQuery) -> QueryResult {
        if !self.config.enabled {
            return QueryResult::default();
        }
        self.manager.query_memories(scope, query)
    }

    /// Run the reflection phase: surprise, verification, repair and reward.
    ///
    /// Returns `Ok(None)` when disabled.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NoActiveCycle`] if `begin_cycle` was not called for
    /// this scope.
    pub fn reflect(&self, scope: &Scope, reflection: Reflection) -> MemoryResult<Option<ReflectionReport>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let surprise = match reflection.outcome {
            Some(ref outcome) => Some(self.orchestrator.process_surprise_signal(
                scope,
                outcome,
                reflection.prediction.clone(),
            )?),
            None => {
                if let Some(prediction) = reflection.prediction.clone() {
                    if self.config.surprise_enabled {
                        self.surprise.store_prediction(Prediction {
                            scope: scope.clone(),
                            ..prediction
                        });
                    }
                }
                None
            }
        };

        let verification =
            self.orchestrator
                .generate_verification(scope, &reflection.trace, &reflection.tool_results)?;

        let repair = if self.orchestrator.should_trigger_repair(scope) {
            self.orchestrator.switch_to_verifier_mode(scope);
            Some(
                self.orchestrator
                    .generate_repair_instruction(scope, reflection.target_step)?,
            )
        } else {
            self.orchestrator.switch_to_solver_mode(scope);
            None
        };

        Ok(Some(ReflectionReport {
            surprise,
            verification,
            repair,
            reward: self.orchestrator.calculate_process_reward(scope),
        }))
    }

    /// Finish a cycle, running the outer loop if it is due.
    pub async fn end_cycle(&self, scope: &Scope) -> MemoryResult<Option<OuterLoopReport>> {
        if !self.config.enabled || !self.orchestrator.should_run_outer_loop(scope) {
            return Ok(None);
        }
        self.orchestrator.run_outer_loop(scope).await.map(Some)
    }

    /// Run the outer loop for `scope` now.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Disabled`] when the subsystem is off,
    /// [`MemoryError::NoActiveCycle`] for a scope with no cycle.
    pub async fn run_outer_loop(&self, scope: &Scope) -> MemoryResult<OuterLoopReport> {
        if !self.config.enabled {
            return Err(MemoryError::Disabled);
        }
        self.orchestrator.run_outer_loop(scope).await
    }

    /// Run every due outer loop concurrently, one per scope.
    ///
    /// Failures are logged and skipped.
    pub async fn run_due_outer_loops(&self) -> Vec<OuterLoopReport> {
        if !self.config.enabled {
            return Vec::new();
        }
        let due = self.orchestrator.due_scopes();
        debug!(scopes = due.len(), "Running due outer loops");

        let runs = due.iter().map(|scope| self.orchestrator.run_outer_loop(scope));
        join_all(runs)
            .await
            .into_iter()
            .zip(&due)
            .filter_map(|(result, scope)| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Outer loop failed");
                    None
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Scope management
    // ------------------------------------------------------------------

    pub fn statistics(&self, scope: &Scope) -> ScopeStatistics {
        ScopeStatistics {
            scope: scope.clone(),
            strata: self.manager.get_statistics(scope),
            surprise: self.surprise.get_statistics(scope),
            context: self.orchestrator.get_context(scope),
        }
    }

    /// Forget everything about `scope` across all services.
    pub fn clear(&self, scope: &Scope) -> bool {
        let memories = self.manager.clear(scope);
        let surprise = self.surprise.clear(scope);
        let context = self.orchestrator.clear(scope);
        memories || surprise || context
    }
}
