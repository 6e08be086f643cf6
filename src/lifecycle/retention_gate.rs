/// Retention Gate
///
/// Scores entries and decides which ones a stratum keeps.
///
/// ## Score
///
/// Weighted sum of five factors, each in [0, 1]:
///
/// - **Importance**: the level's weight (Low 0.25 … Critical 1.0)
/// - **Access**: `1 - e^(-count / saturation)`
/// - **Recency**: `e^(-hours since last access / tau)`
/// - **Surprise**: the supplied surprise, if any
/// - **Relational**: `min(links / saturation, 1)`
///
/// ## Gate
///
/// Within capacity every entry is kept. Over capacity, adaptive strata drop
/// entries whose decayed score falls below the retain threshold and then, if
/// still over, the lowest scorers. Non-adaptive strata (LongTerm) skip the
/// threshold and only archive the lowest scorers down to capacity.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::{RetentionConfig, StrataConfig};
use crate::error::MemoryResult;
use crate::lifecycle::policy::{PolicyTable, PolicyUpdate, RetentionPolicy};
use crate::lifecycle::ScoreFactor;
use crate::types::{MemoryEntry, MemoryId, Stratum};

/// Score with its breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionScore {
    pub score: f64,
    pub factors: Vec<ScoreFactor>,
}

/// Gate verdict for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayResult {
    pub id: MemoryId,
    pub stratum: Stratum,
    pub original_score: f64,
    /// Score after the stratum's base decay rate
    pub decayed_score: f64,
    pub should_retain: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetentionStatistics {
    pub total_memories: usize,
    pub retained: usize,
    pub decayed: usize,
    pub avg_retention_score: f64,
    /// Retained entries over the stratum's capacity
    pub capacity_utilization: f64,
}

#[derive(Debug)]
pub struct RetentionGate {
    config: RetentionConfig,
    policies: Arc<PolicyTable>,
    clock: SharedClock,
}

impl RetentionGate {
    pub fn new(config: RetentionConfig, strata: &StrataConfig, clock: SharedClock) -> Self {
        let policies = Arc::new(PolicyTable::new(&config, strata));
        Self::with_policies(config, policies, clock)
    }

    /// Gate over a policy table shared with other components.
    pub fn with_policies(config: RetentionConfig, policies: Arc<PolicyTable>, clock: SharedClock) -> Self {
        Self {
            config,
            policies,
            clock,
        }
    }

    pub fn policy_table(&self) -> &Arc<PolicyTable> {
        &self.policies
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Retention score in [0, 1].
    pub fn calculate_retention_score(&self, entry: &MemoryEntry, surprise: Option<f64>) -> f64 {
        self.score_breakdown(entry, surprise).score
    }

    /// Retention score with per-factor contributions.
    pub fn score_breakdown(&self, entry: &MemoryEntry, surprise: Option<f64>) -> RetentionScore {
        let w = &self.config.weights;
        let now = self.clock.now();

        let importance = entry.importance.weight();
        let access = saturating(entry.access_count as f64, self.config.access_saturation);
        let tau = self.config.recency_tau_hours.max(f64::EPSILON);
        let recency = (-entry.hours_since_access(now) / tau).exp();
        let surprise = surprise.filter(|s| s.is_finite()).map_or(0.0, |s| s.clamp(0.0, 1.0));
        let relational = if self.config.relational_saturation <= 0.0 {
            0.0
        } else {
            (entry.related_memories.len() as f64 / self.config.relational_saturation).min(1.0)
        };

        let factors = vec![
            ScoreFactor::Importance(w.importance * importance),
            ScoreFactor::Access(w.access * access),
            ScoreFactor::Recency(w.recency * recency),
            ScoreFactor::Surprise(w.surprise_bonus * surprise),
            ScoreFactor::Relational(w.relational * relational),
        ];
        let score: f64 = factors.iter().map(ScoreFactor::value).sum();
        RetentionScore {
            score: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
            factors,
        }
    }

    /// Gate verdicts for `entries` of `stratum`, whose live size is `current_count`.
    pub fn apply_retention_gate(
        &self,
        entries: &[MemoryEntry],
        stratum: Stratum,
        current_count: usize,
    ) -> Vec<DecayResult> {
        self.apply_retention_gate_with_surprise(entries, stratum, current_count, None)
    }

    /// As [`Self::apply_retention_gate`], with a surprise level credited to
    /// every entry (e.g. the scope's momentum).
    pub fn apply_retention_gate_with_surprise(
        &self,
        entries: &[MemoryEntry],
        stratum: Stratum,
        current_count: usize,
        surprise: Option<f64>,
    ) -> Vec<DecayResult> {
        let policy = self.policies.get(stratum);
        let capacity = policy.capacity;
        let keep_factor = 1.0 - policy.base_decay_rate;

        let mut results: Vec<DecayResult> = entries
            .iter()
            .map(|entry| {
                let original_score = self.calculate_retention_score(entry, surprise);
                DecayResult {
                    id: entry.id.clone(),
                    stratum,
                    original_score,
                    decayed_score: original_score * keep_factor,
                    should_retain: true,
                    reason: String::new(),
                }
            })
            .collect();

        if current_count <= capacity {
            for result in &mut results {
                result.reason = format!("within capacity ({}/{})", current_count, capacity);
            }
            return results;
        }

        let threshold = self.config.retain_threshold;
        for result in &mut results {
            if policy.adaptive && result.decayed_score < threshold {
                result.should_retain = false;
                result.reason = format!(
                    "decayed score {:.3} below retain threshold {:.3}",
                    result.decayed_score, threshold
                );
            } else {
                result.reason = format!(
                    "decayed score {:.3} retained while over capacity ({}/{})",
                    result.decayed_score, current_count, capacity
                );
            }
        }

        // Entries the caller did not pass still occupy the tier.
        let unseen = current_count.saturating_sub(entries.len());
        let allowed = capacity.saturating_sub(unseen);
        let mut retained: Vec<usize> = (0..results.len())
            .filter(|i| results[*i].should_retain)
            .collect();
        if retained.len() > allowed {
            retained.sort_by(|a, b| {
                results[*a]
                    .decayed_score
                    .total_cmp(&results[*b].decayed_score)
                    .then_with(|| entries[*a].importance.cmp(&entries[*b].importance))
                    .then_with(|| entries[*a].last_accessed.cmp(&entries[*b].last_accessed))
            });
            let excess = retained.len() - allowed;
            for &i in retained.iter().take(excess) {
                let result = &mut results[i];
                result.should_retain = false;
                result.reason = if policy.adaptive {
                    format!(
                        "adaptive decay: lowest score {:.3} evicted to restore capacity {}",
                        result.decayed_score, capacity
                    )
                } else {
                    format!(
                        "archived: lowest score {:.3} over capacity {}",
                        result.decayed_score, capacity
                    )
                };
            }
        }

        for result in results.iter().filter(|r| !r.should_retain) {
            debug!(stratum = %stratum, id = %result.id, reason = %result.reason, "Marked for removal");
        }
        results
    }

    /// Summary of a batch of verdicts. Capacity is that of the first
    /// result's stratum.
    pub fn get_statistics(&self, results: &[DecayResult]) -> RetentionStatistics {
        let Some(first) = results.first() else {
            return RetentionStatistics::default();
        };
        let retained = results.iter().filter(|r| r.should_retain).count();
        let capacity = self.policies.get(first.stratum).capacity.max(1);
        RetentionStatistics {
            total_memories: results.len(),
            retained,
            decayed: results.len() - retained,
            avg_retention_score: results.iter().map(|r| r.original_score).sum::<f64>()
                / results.len() as f64,
            capacity_utilization: retained as f64 / capacity as f64,
        }
    }

    pub fn get_policy(&self, stratum: Stratum) -> RetentionPolicy {
        self.policies.get(stratum)
    }

    pub fn policies(&self) -> Vec<RetentionPolicy> {
        self.policies.all()
    }

    pub fn update_policy(&self, stratum: Stratum, update: PolicyUpdate) -> MemoryResult<RetentionPolicy> {
        let policy = self.policies.update(stratum, update)?;
        debug!(stratum = %stratum, rate = policy.base_decay_rate, adaptive = policy.adaptive, capacity = policy.capacity, "Updated retention policy");
        Ok(policy)
    }

    pub fn reset_policies(&self) {
        self.policies.reset();
    }
}

fn saturating(value: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 {
        return if value > 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - (-value / saturation).exp()
}
