/// Per-scope reasoning state and the records the inner loop produces.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::surprise::SurpriseSignal;
use crate::types::{Scope, Stratum};

/// Stance of the reasoning coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReasoningMode {
    /// Exploring forward, trusting prior steps
    #[default]
    Solver,
    /// Checking prior output against tool evidence
    Verifier,
}

impl fmt::Display for ReasoningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasoningMode::Solver => write!(f, "solver"),
            ReasoningMode::Verifier => write!(f, "verifier"),
        }
    }
}

/// Result of one tool invocation, as reported by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: output.into(),
        }
    }
}

/// Per-tool verification sub-result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolVerification {
    pub tool_name: String,
    pub success: bool,
    /// The trace refers to this tool or its output
    pub mentioned: bool,
    /// The trace's account of this tool matches its outcome
    pub consistent: bool,
}

/// Verification of a reasoning trace against tool evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationTuple {
    /// Factual agreement in [-1, 1]
    pub score: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub critique: String,
    pub tool_verifications: Option<Vec<ToolVerification>>,
}

/// Inner-loop state for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SercContext {
    pub scope: Scope,
    pub cycle_number: u64,
    /// Inner loops since the last outer loop
    pub inner_loop_count: u64,
    pub mode: ReasoningMode,
    pub surprise_signal: Option<SurpriseSignal>,
    pub verification: Option<VerificationTuple>,
    /// Repairs issued during the current cycle
    pub repair_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_outer_loop_cycle: Option<u64>,
}

impl SercContext {
    pub(crate) fn new(scope: Scope, now: DateTime<Utc>) -> Self {
        Self {
            scope,
            cycle_number: 0,
            inner_loop_count: 0,
            mode: ReasoningMode::Solver,
            surprise_signal: None,
            verification: None,
            repair_count: 0,
            started_at: now,
            last_outer_loop_cycle: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairAction {
    Patch,
    NoChange,
}

/// What kind of fix a patch calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchType {
    Reasoning,
    ToolCall,
    Parameter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairInstruction {
    pub action: RepairAction,
    pub target_step: Option<usize>,
    pub patch_type: Option<PatchType>,
    pub justification: String,
}

impl RepairInstruction {
    pub(crate) fn no_change(justification: impl Into<String>) -> Self {
        Self {
            action: RepairAction::NoChange,
            target_step: None,
            patch_type: None,
            justification: justification.into(),
        }
    }
}

/// Scalar reward for the current cycle, with its inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReward {
    pub surprise: f64,
    pub confidence: f64,
    pub tool_verification: f64,
    pub repair_cost: f64,
    /// Combined score in [0, 1]
    pub promotion_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub should_promote: bool,
    pub target_stratum: Option<Stratum>,
    pub reward: ProcessReward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_serialization() {
        let instruction = RepairInstruction {
            action: RepairAction::Patch,
            target_step: Some(2),
            patch_type: Some(PatchType::ToolCall),
            justification: "tool failed".into(),
        };
        let json = serde_json::to_value(&instruction).unwrap();
        assert_eq!(json["action"], "PATCH");
        assert_eq!(json["patch_type"], "tool_call");
        assert_eq!(
            serde_json::to_value(RepairAction::NoChange).unwrap(),
            "NO_CHANGE"
        );
    }

    #[test]
    fn test_new_context_starts_in_solver_mode() {
        let ctx = SercContext::new(Scope::agent("a"), Utc::now());
        assert_eq!(ctx.mode, ReasoningMode::Solver);
        assert_eq!(ctx.cycle_number, 0);
        assert_eq!(ReasoningMode::Verifier.to_string(), "verifier");
    }
}
