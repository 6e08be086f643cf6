/// Memory lifecycle: what a stratum keeps and what moves up.
///
/// ## Flow
///
/// ```text
/// outer loop, per due stratum
///     │
///     ├── RetentionGate::apply_retention_gate → DecayResult per entry
///     │       └── should_retain == false → removed (reason logged)
///     │
///     └── PromotionPlanner::plan → best-scoring entries
///             └── compressed and transitioned to the next stratum
/// ```
///
/// Policies (decay rate, adaptive flag, capacity) are per stratum and can be
/// changed at runtime through the gate.
use serde::{Deserialize, Serialize};

mod policy;
mod promotion;
mod retention_gate;

pub use policy::{PolicyTable, PolicyUpdate, RetentionPolicy};
pub use promotion::{PlannedPromotion, PromotionPlanner};
pub use retention_gate::{DecayResult, RetentionGate, RetentionScore, RetentionStatistics};

/// Weighted contribution of one factor to a retention score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScoreFactor {
    /// Importance level component
    Importance(f64),
    /// Access frequency component
    Access(f64),
    /// Recency component
    Recency(f64),
    /// Surprise bonus
    Surprise(f64),
    /// Relational connectivity component
    Relational(f64),
}

impl ScoreFactor {
    /// Weighted contribution.
    pub fn value(&self) -> f64 {
        match *self {
            ScoreFactor::Importance(v)
            | ScoreFactor::Access(v)
            | ScoreFactor::Recency(v)
            | ScoreFactor::Surprise(v)
            | ScoreFactor::Relational(v) => v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScoreFactor::Importance(_) => "importance",
            ScoreFactor::Access(_) => "access",
            ScoreFactor::Recency(_) => "recency",
            ScoreFactor::Surprise(_) => "surprise",
            ScoreFactor::Relational(_) => "relational",
        }
    }
}
