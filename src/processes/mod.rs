/// Outer-loop maintenance processes.
///
/// These run when the orchestrator's outer loop fires:
/// - Consolidation: merges near-duplicate entries within a stratum
/// - Pattern detection: abstracts recurring episodes into Semantic entries
pub mod consolidation;
pub mod patterns;

pub use consolidation::{ConsolidationProcess, SweepResult};
pub use patterns::PatternDetector;

use serde::Serialize;

/// Process runner for the maintenance processes.
#[derive(Debug)]
pub struct ProcessRunner {
    pub consolidation: ConsolidationProcess,
    pub patterns: PatternDetector,
}

/// Counters across all runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    pub consolidation_sweeps: u64,
    pub groups_merged: u64,
    pub entries_merged: u64,
    pub pattern_runs: u64,
    pub patterns_detected: u64,
}

impl ProcessRunner {
    pub fn new(min_consolidation_group: usize, min_pattern_support: usize) -> Self {
        Self {
            consolidation: ConsolidationProcess::new(min_consolidation_group),
            patterns: PatternDetector::new(min_pattern_support),
        }
    }

    pub fn stats(&self) -> ProcessStats {
        ProcessStats {
            consolidation_sweeps: self.consolidation.sweeps(),
            groups_merged: self.consolidation.groups_merged(),
            entries_merged: self.consolidation.entries_merged(),
            pattern_runs: self.patterns.runs(),
            patterns_detected: self.patterns.detected(),
        }
    }
}
