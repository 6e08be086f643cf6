/// Process reward for the current inner-loop cycle.
///
/// ```text
/// promotion_score = clamp01((ws·surprise + wc·confidence + wt·tools - wr·repair)
///                           / (ws + wc + wt))
/// ```
use crate::config::RewardWeights;
use crate::orchestrator::context::{ProcessReward, SercContext};

/// Repairs at which the repair cost saturates.
const REPAIR_SATURATION: f64 = 3.0;

pub(crate) fn process_reward(ctx: &SercContext, weights: &RewardWeights) -> ProcessReward {
    let surprise = ctx
        .surprise_signal
        .as_ref()
        .map(|s| s.effective_surprise)
        .unwrap_or(0.0);
    let confidence = ctx.verification.as_ref().map(|v| v.confidence).unwrap_or(0.0);

    let tool_verification = match &ctx.verification {
        Some(v) => match &v.tool_verifications {
            Some(tools) if !tools.is_empty() => {
                tools.iter().filter(|t| t.success && t.consistent).count() as f64
                    / tools.len() as f64
            }
            _ => (v.score + 1.0) / 2.0,
        },
        None => 0.0,
    };

    let repair_cost = (ctx.repair_count as f64 / REPAIR_SATURATION).min(1.0);

    let positive = weights.surprise + weights.confidence + weights.tool_verification;
    let promotion_score = if positive > 0.0 {
        ((weights.surprise * surprise
            + weights.confidence * confidence
            + weights.tool_verification * tool_verification
            - weights.repair_cost * repair_cost)
            / positive)
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    ProcessReward {
        surprise,
        confidence,
        tool_verification,
        repair_cost,
        promotion_score,
    }
}
