/// Dual-Loop Orchestrator: per-scope reasoning state machine.
///
/// ```text
///  ┌──────────────────────── inner loop (every cycle) ────────────────────────┐
///  │ start_inner_loop → process_surprise_signal → generate_verification       │
///  │        → should_trigger_repair → generate_repair_instruction             │
///  │        → calculate_process_reward → should_promote_memory                │
///  └──────────────────────────────────────────────────────────────────────────┘
///                 every `outer_loop_frequency` inner loops
///  ┌──────────────────────────────── outer loop ──────────────────────────────┐
///  │ reset inner count → retention gate on due strata → pattern detection     │
///  │        → consolidation sweep → promotion of best-retained entries        │
///  └──────────────────────────────────────────────────────────────────────────┘
/// ```
///
/// # Serialization
///
/// Contexts live in a `DashMap<Scope, SercContext>`, so single calls are
/// atomic per scope and different scopes never contend. A whole cycle spans
/// many calls; drivers serialize cycles with [`DualLoopOrchestrator::lock_scope`].
/// [`DualLoopOrchestrator::run_outer_loop`] takes the same lock, and a driver
/// already holding the guard calls [`DualLoopOrchestrator::run_outer_loop_locked`].
///
/// # Failure semantics
///
/// Reads on an unknown scope return a default (`None`, `false`, zero reward).
/// Verification, repair and surprise processing on a scope with no started
/// inner loop fail with [`MemoryError::NoActiveCycle`].
pub mod context;
mod reward;
mod verification;

pub use context::{
    PatchType, ProcessReward, PromotionDecision, ReasoningMode, RepairAction, RepairInstruction,
    SercContext, ToolResult, ToolVerification, VerificationTuple,
};

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::compression::MemoryCompressor;
use crate::config::{ContinuumConfig, InputLimits, OrchestratorConfig};
use crate::error::{MemoryError, MemoryResult};
use crate::lifecycle::{PromotionPlanner, RetentionGate, RetentionStatistics};
use crate::memory::StratumManager;
use crate::processes::{ProcessRunner, ProcessStats, SweepResult};
use crate::surprise::{Outcome, Prediction, SurpriseCalculator, SurpriseSignal};
use crate::types::{MemoryEntry, MemoryId, Scope, Stratum};

/// Exclusive hold on one scope's cycle.
#[derive(Debug)]
pub struct ScopeGuard {
    scope: Scope,
    _guard: OwnedMutexGuard<()>,
}

impl ScopeGuard {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// What one outer loop did.
#[derive(Debug, Clone, Serialize)]
pub struct OuterLoopReport {
    pub scope: Scope,
    pub cycle_number: u64,
    /// Strata whose maintenance was due
    pub strata_updated: Vec<Stratum>,
    pub retention: BTreeMap<Stratum, RetentionStatistics>,
    /// Entries removed by the retention gate
    pub removed: usize,
    pub consolidation: Vec<SweepResult>,
    pub patterns_detected: usize,
    pub promoted: Vec<MemoryId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub active_scopes: usize,
    pub inner_loops: u64,
    pub outer_loops: u64,
    pub verifications: u64,
    pub repairs: u64,
    pub promotions: u64,
    pub processes: ProcessStats,
}

/// Coordinates the inner reasoning loop and the outer maintenance loop.
#[derive(Debug)]
pub struct DualLoopOrchestrator {
    contexts: DashMap<Scope, SercContext>,
    scope_locks: DashMap<Scope, Arc<AsyncMutex<()>>>,

    manager: Arc<StratumManager>,
    surprise: Arc<SurpriseCalculator>,
    compressor: Arc<MemoryCompressor>,
    gate: Arc<RetentionGate>,

    processes: ProcessRunner,
    planner: PromotionPlanner,

    config: OrchestratorConfig,
    limits: InputLimits,
    surprise_enabled: bool,
    consolidation_enabled: bool,
    pattern_detection_enabled: bool,
    clock: SharedClock,

    inner_loops: AtomicU64,
    outer_loops: AtomicU64,
    verifications: AtomicU64,
    repairs: AtomicU64,
    promotions: AtomicU64,
}

impl DualLoopOrchestrator {
    /// Build an orchestrator over the given services.
    ///
    /// # Arguments
    ///
    /// * `config` - Flags, orchestrator tunables and input limits are read from it
    /// * `manager` - Store the outer loop maintains
    /// * `surprise` - Calculator fed by `process_surprise_signal`
    /// * `compressor` - Used for promotion and consolidation
    /// * `gate` - Retention gate driving decay and promotion ranking
    /// * `clock` - Time source for context timestamps
    pub fn new(
        config: &ContinuumConfig,
        manager: Arc<StratumManager>,
        surprise: Arc<SurpriseCalculator>,
        compressor: Arc<MemoryCompressor>,
        gate: Arc<RetentionGate>,
        clock: SharedClock,
    ) -> Self {
        let orchestrator = config.orchestrator.clone();
        Self {
            contexts: DashMap::new(),
            scope_locks: DashMap::new(),
            manager,
            surprise,
            compressor,
            gate,
            processes: ProcessRunner::new(
                orchestrator.min_consolidation_group,
                orchestrator.min_pattern_support,
            ),
            planner: PromotionPlanner::new(
                orchestrator.promotion_batch,
                config.retention.retain_threshold,
            ),
            config: orchestrator,
            limits: config.limits.clone(),
            surprise_enabled: config.surprise_enabled,
            consolidation_enabled: config.consolidation_enabled,
            pattern_detection_enabled: config.pattern_detection_enabled,
            clock,
            inner_loops: AtomicU64::new(0),
            outer_loops: AtomicU64::new(0),
            verifications: AtomicU64::new(0),
            repairs: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Inner loop
    // ------------------------------------------------------------------

    /// Begin a reasoning cycle, creating the context if needed.
    ///
    /// Every cycle starts in Solver mode with no repairs issued.
    pub fn start_inner_loop(&self, scope: &Scope) -> SercContext {
        let now = self.clock.now();
        let snapshot = {
            let mut ctx = self
                .contexts
                .entry(scope.clone())
                .or_insert_with(|| SercContext::new(scope.clone(), now));
            ctx.cycle_number += 1;
            ctx.inner_loop_count += 1;
            ctx.repair_count = 0;
            ctx.mode = ReasoningMode::Solver;
            ctx.clone()
        };
        self.manager.increment_cycles(scope);
        self.inner_loops.fetch_add(1, Ordering::Relaxed);
        debug!(
            scope = %scope,
            cycle = snapshot.cycle_number,
            inner = snapshot.inner_loop_count,
            "Started inner loop"
        );
        snapshot
    }

    pub fn get_context(&self, scope: &Scope) -> Option<SercContext> {
        self.contexts.get(scope).map(|ctx| ctx.clone())
    }

    /// Score an outcome and attach the signal to the scope's context.
    ///
    /// A supplied `prediction` is stored first; if the outcome names no
    /// prediction it is linked to this one. Both are re-scoped to `scope`.
    /// With surprise disabled the signal is neutral.
    pub fn process_surprise_signal(
        &self,
        scope: &Scope,
        outcome: &Outcome,
        prediction: Option<Prediction>,
    ) -> MemoryResult<SurpriseSignal> {
        self.require_context(scope)?;

        let signal = if self.surprise_enabled {
            let mut outcome = outcome.clone();
            outcome.scope = scope.clone();
            if let Some(mut prediction) = prediction {
                prediction.scope = scope.clone();
                if outcome.prediction_id.is_none() {
                    outcome.prediction_id = Some(prediction.id.clone());
                }
                self.surprise.store_prediction(prediction);
            }
            self.surprise.calculate_surprise(&outcome)
        } else {
            SurpriseSignal::neutral(self.clock.now())
        };

        if let Some(mut ctx) = self.contexts.get_mut(scope) {
            ctx.surprise_signal = Some(signal.clone());
        }
        Ok(signal)
    }

    /// Verify a reasoning trace against tool results and store the result.
    pub fn generate_verification(
        &self,
        scope: &Scope,
        reasoning_trace: &str,
        tool_results: &[ToolResult],
    ) -> MemoryResult<VerificationTuple> {
        let mut ctx = self
            .contexts
            .get_mut(scope)
            .ok_or_else(|| MemoryError::NoActiveCycle { scope: scope.clone() })?;

        let tuple = verification::verify(
            reasoning_trace,
            tool_results,
            &self.limits,
            self.config.base_confidence,
        );
        ctx.verification = Some(tuple.clone());
        drop(ctx);

        self.verifications.fetch_add(1, Ordering::Relaxed);
        debug!(
            scope = %scope,
            score = tuple.score,
            confidence = tuple.confidence,
            "Generated verification"
        );
        Ok(tuple)
    }

    /// Whether the last verification's confidence is below the repair threshold.
    pub fn should_trigger_repair(&self, scope: &Scope) -> bool {
        self.contexts.get(scope).is_some_and(|ctx| {
            ctx.verification
                .as_ref()
                .is_some_and(|v| v.confidence < self.config.repair_threshold)
        })
    }

    /// Repair instruction for the current cycle.
    ///
    /// `NO_CHANGE` when there is no verification or its confidence is
    /// adequate. Otherwise `PATCH`: a failed tool calls for a tool-call patch,
    /// a successful tool the trace misreports for a parameter patch, and
    /// anything else for a reasoning patch. Without an explicit
    /// `target_step` the first offending tool's position is used.
    pub fn generate_repair_instruction(
        &self,
        scope: &Scope,
        target_step: Option<usize>,
    ) -> MemoryResult<RepairInstruction> {
        let mut ctx = self
            .contexts
            .get_mut(scope)
            .ok_or_else(|| MemoryError::NoActiveCycle { scope: scope.clone() })?;

        let Some(verification) = ctx.verification.clone() else {
            return Ok(RepairInstruction::no_change("no verification for this cycle"));
        };
        if verification.confidence >= self.config.repair_threshold {
            return Ok(RepairInstruction::no_change(format!(
                "confidence {:.2} meets threshold {:.2}",
                verification.confidence, self.config.repair_threshold
            )));
        }

        let tools = verification.tool_verifications.as_deref().unwrap_or_default();
        let failed = tools.iter().position(|t| !t.success);
        let misreported = tools.iter().position(|t| t.success && !t.consistent);
        let (patch_type, offender) = match (failed, misreported) {
            (Some(i), _) => (PatchType::ToolCall, Some(i)),
            (None, Some(i)) => (PatchType::Parameter, Some(i)),
            (None, None) => (PatchType::Reasoning, None),
        };

        ctx.repair_count += 1;
        let repair_count = ctx.repair_count;
        drop(ctx);
        self.repairs.fetch_add(1, Ordering::Relaxed);

        let target_step = target_step.or(offender);
        let culprit = offender
            .and_then(|i| tools.get(i))
            .map(|t| format!(" (tool '{}')", t.tool_name))
            .unwrap_or_default();
        let instruction = RepairInstruction {
            action: RepairAction::Patch,
            target_step,
            patch_type: Some(patch_type),
            justification: format!(
                "confidence {:.2} below threshold {:.2}{}: {}",
                verification.confidence,
                self.config.repair_threshold,
                culprit,
                verification.critique
            ),
        };
        info!(
            scope = %scope,
            patch_type = ?patch_type,
            target_step = ?target_step,
            repairs = repair_count,
            "Issued repair"
        );
        Ok(instruction)
    }

    /// Enter Verifier mode. Returns `false` for an unknown scope.
    pub fn switch_to_verifier_mode(&self, scope: &Scope) -> bool {
        self.set_mode(scope, ReasoningMode::Verifier)
    }

    /// Enter Solver mode. Returns `false` for an unknown scope.
    pub fn switch_to_solver_mode(&self, scope: &Scope) -> bool {
        self.set_mode(scope, ReasoningMode::Solver)
    }

    fn set_mode(&self, scope: &Scope, mode: ReasoningMode) -> bool {
        match self.contexts.get_mut(scope) {
            Some(mut ctx) => {
                if ctx.mode != mode {
                    debug!(scope = %scope, from = %ctx.mode, to = %mode, "Switched mode");
                    ctx.mode = mode;
                }
                true
            }
            None => {
                warn!(scope = %scope, mode = %mode, "Mode switch on unknown scope ignored");
                false
            }
        }
    }

    /// Reward for the current cycle; zero for an unknown scope.
    pub fn calculate_process_reward(&self, scope: &Scope) -> ProcessReward {
        self.contexts
            .get(scope)
            .map(|ctx| reward::process_reward(&ctx, &self.config.reward_weights))
            .unwrap_or_default()
    }

    /// Whether entries of `from` should move up, and where.
    pub fn should_promote_memory(&self, scope: &Scope, from: Stratum) -> PromotionDecision {
        let reward = self.calculate_process_reward(scope);
        let strong = reward.promotion_score >= self.config.strong_promotion_threshold;
        let target = PromotionPlanner::target_for(from, strong);
        let should_promote =
            target.is_some() && reward.promotion_score >= self.config.promotion_threshold;
        PromotionDecision {
            should_promote,
            target_stratum: if should_promote { target } else { None },
            reward,
        }
    }

    /// Promote one entry if the current reward allows it.
    ///
    /// The entry is compressed for its target and moved in one step. Returns
    /// the moved entry, or `None` when promotion is not warranted or the
    /// entry is not in `from`.
    pub async fn promote_memory(
        &self,
        scope: &Scope,
        id: &str,
        from: Stratum,
    ) -> Option<MemoryEntry> {
        let decision = self.should_promote_memory(scope, from);
        let target = decision.target_stratum?;
        self.promote_to(scope, id, from, target, decision.reward.promotion_score)
            .await
    }

    async fn promote_to(
        &self,
        scope: &Scope,
        id: &str,
        from: Stratum,
        to: Stratum,
        score: f64,
    ) -> Option<MemoryEntry> {
        let entry = self.manager.peek_memory(scope, id)?;
        if entry.stratum != from {
            return None;
        }
        let compressed = self.compressor.compress_memory(&entry, to).await;
        let rationale = format!("promoted with process reward {:.3}", score);
        let moved = self
            .manager
            .apply_transition(scope, id, from, to, &rationale, Some(&compressed))?;
        self.promotions.fetch_add(1, Ordering::Relaxed);
        Some(moved)
    }

    // ------------------------------------------------------------------
    // Outer loop
    // ------------------------------------------------------------------

    /// Whether enough inner loops have run since the last outer loop.
    pub fn should_run_outer_loop(&self, scope: &Scope) -> bool {
        self.contexts
            .get(scope)
            .is_some_and(|ctx| ctx.inner_loop_count >= self.config.outer_loop_frequency.max(1))
    }

    /// Exclusive access to `scope` for the lifetime of the guard.
    pub async fn lock_scope(&self, scope: &Scope) -> ScopeGuard {
        let lock = self
            .scope_locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        ScopeGuard {
            scope: scope.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Run the outer loop, taking the scope lock.
    pub async fn run_outer_loop(&self, scope: &Scope) -> MemoryResult<OuterLoopReport> {
        let guard = self.lock_scope(scope).await;
        self.run_outer_loop_locked(&guard).await
    }

    /// Run the outer loop under a lock the caller already holds.
    pub async fn run_outer_loop_locked(&self, guard: &ScopeGuard) -> MemoryResult<OuterLoopReport> {
        let scope = guard.scope();
        let cycle_number = {
            let mut ctx = self
                .contexts
                .get_mut(scope)
                .ok_or_else(|| MemoryError::NoActiveCycle { scope: scope.clone() })?;
            ctx.inner_loop_count = 0;
            ctx.last_outer_loop_cycle = Some(ctx.cycle_number);
            ctx.cycle_number
        };

        let mut report = OuterLoopReport {
            scope: scope.clone(),
            cycle_number,
            strata_updated: Vec::new(),
            retention: BTreeMap::new(),
            removed: 0,
            consolidation: Vec::new(),
            patterns_detected: 0,
            promoted: Vec::new(),
        };

        let momentum = self
            .surprise_enabled
            .then(|| self.surprise.momentum(scope));
        for stratum in Stratum::ALL {
            if !self.manager.should_update_stratum(scope, stratum) {
                continue;
            }
            let entries = self.manager.entries(scope, stratum);
            let results =
                self.gate
                    .apply_retention_gate_with_surprise(&entries, stratum, entries.len(), momentum);
            let doomed: Vec<MemoryId> = results
                .iter()
                .filter(|r| !r.should_retain)
                .map(|r| r.id.clone())
                .collect();
            report.removed += self.manager.remove_memories(scope, &doomed);
            report.retention.insert(stratum, self.gate.get_statistics(&results));
            self.manager.mark_stratum_updated(scope, stratum);
            report.strata_updated.push(stratum);
        }

        // Patterns first: merging Episodic would fold away their support.
        if self.pattern_detection_enabled {
            report.patterns_detected = self
                .processes
                .patterns
                .detect(&self.manager, &self.compressor, scope)
                .await?
                .len();
        }

        if self.consolidation_enabled {
            for &stratum in &report.strata_updated {
                if matches!(stratum, Stratum::Working | Stratum::Semantic) {
                    continue;
                }
                let sweep = self
                    .processes
                    .consolidation
                    .sweep(&self.manager, &self.compressor, scope, stratum)
                    .await?;
                report.consolidation.push(sweep);
            }
        }

        // Top-down so nothing climbs two tiers in one pass.
        for from in [Stratum::Episodic, Stratum::ShortTerm, Stratum::Working] {
            let decision = self.should_promote_memory(scope, from);
            let Some(to) = decision.target_stratum else {
                continue;
            };
            let entries = self.manager.entries(scope, from);
            for planned in self.planner.plan(&self.gate, &entries, from, to, momentum) {
                let promoted = self
                    .promote_to(scope, &planned.id, from, to, decision.reward.promotion_score)
                    .await;
                if let Some(entry) = promoted {
                    report.promoted.push(entry.id);
                }
            }
        }

        self.outer_loops.fetch_add(1, Ordering::Relaxed);
        info!(
            scope = %scope,
            cycle = cycle_number,
            strata = report.strata_updated.len(),
            removed = report.removed,
            merged = report.consolidation.iter().map(|s| s.merged).sum::<usize>(),
            patterns = report.patterns_detected,
            promoted = report.promoted.len(),
            "Outer loop complete"
        );
        Ok(report)
    }

    /// Scopes whose outer loop is due.
    pub fn due_scopes(&self) -> Vec<Scope> {
        let mut due: Vec<Scope> = self
            .contexts
            .iter()
            .filter(|ctx| ctx.inner_loop_count >= self.config.outer_loop_frequency.max(1))
            .map(|ctx| ctx.key().clone())
            .collect();
        due.sort();
        due
    }

    /// Drop a scope's context and lock. Returns whether a context existed.
    pub fn clear(&self, scope: &Scope) -> bool {
        self.scope_locks.remove(scope);
        self.contexts.remove(scope).is_some()
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            active_scopes: self.contexts.len(),
            inner_loops: self.inner_loops.load(Ordering::Relaxed),
            outer_loops: self.outer_loops.load(Ordering::Relaxed),
            verifications: self.verifications.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            processes: self.processes.stats(),
        }
    }

    fn require_context(&self, scope: &Scope) -> MemoryResult<()> {
        if self.contexts.contains_key(scope) {
            Ok(())
        } else {
            Err(MemoryError::NoActiveCycle { scope: scope.clone() })
        }
    }
}
