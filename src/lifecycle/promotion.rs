/// Promotion Planning
///
/// Decides where an entry goes next and which entries of a stratum are the
/// best candidates to go there.
///
/// ## Targets
///
/// ```text
/// Working   → ShortTerm
/// ShortTerm → Episodic   (LongTerm on a strong signal)
/// Episodic  → LongTerm   (strong signal only)
/// LongTerm, Semantic: terminal (Semantic is fed by pattern abstraction)
/// ```
use serde::{Deserialize, Serialize};

use crate::lifecycle::RetentionGate;
use crate::types::{MemoryEntry, MemoryId, Stratum};

/// A planned promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPromotion {
    pub id: MemoryId,
    pub from: Stratum,
    pub to: Stratum,
    /// Retention score used to rank candidates
    pub priority: f64,
}

/// Plans promotions between strata.
#[derive(Debug, Clone)]
pub struct PromotionPlanner {
    /// Maximum promotions per stratum per plan
    batch: usize,
    /// Minimum retention score for a candidate
    min_score: f64,
}

impl PromotionPlanner {
    pub fn new(batch: usize, min_score: f64) -> Self {
        Self { batch, min_score }
    }

    /// Next stratum for an entry in `from`, given the reward signal.
    pub fn target_for(from: Stratum, strong: bool) -> Option<Stratum> {
        match (from, strong) {
            (Stratum::Working, _) => Some(Stratum::ShortTerm),
            (Stratum::ShortTerm, false) => Some(Stratum::Episodic),
            (Stratum::ShortTerm, true) => Some(Stratum::LongTerm),
            (Stratum::Episodic, true) => Some(Stratum::LongTerm),
            _ => None,
        }
    }

    /// Best candidates of `from`, highest retention score first.
    pub fn plan(
        &self,
        gate: &RetentionGate,
        entries: &[MemoryEntry],
        from: Stratum,
        to: Stratum,
        surprise: Option<f64>,
    ) -> Vec<PlannedPromotion> {
        let mut ranked: Vec<PlannedPromotion> = entries
            .iter()
            .filter(|entry| entry.stratum == from)
            .map(|entry| PlannedPromotion {
                id: entry.id.clone(),
                from,
                to,
                priority: gate.calculate_retention_score(entry, surprise),
            })
            .filter(|p| p.priority >= self.min_score)
            .collect();

        ranked.sort_by(|a, b| b.priority.total_cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        ranked.truncate(self.batch);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{RetentionConfig, StrataConfig};
    use crate::types::{ContentType, Importance, MemoryContext, MemorySource};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn entry(id: &str, stratum: Stratum, importance: Importance) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            id: id.into(),
            stratum,
            content: id.into(),
            content_type: ContentType::Text,
            importance,
            tags: BTreeSet::new(),
            source: MemorySource::default(),
            context: MemoryContext {
                agent_id: "a".into(),
                channel_id: None,
                timestamp: now,
                phase: None,
            },
            access_count: 0,
            last_accessed: now,
            created_at: now,
            related_memories: vec![],
            compression: None,
            transitions: vec![],
        }
    }

    #[test]
    fn test_targets() {
        assert_eq!(PromotionPlanner::target_for(Stratum::Working, false), Some(Stratum::ShortTerm));
        assert_eq!(PromotionPlanner::target_for(Stratum::ShortTerm, false), Some(Stratum::Episodic));
        assert_eq!(PromotionPlanner::target_for(Stratum::ShortTerm, true), Some(Stratum::LongTerm));
        assert_eq!(PromotionPlanner::target_for(Stratum::Episodic, false), None);
        assert_eq!(PromotionPlanner::target_for(Stratum::LongTerm, true), None);
        assert_eq!(PromotionPlanner::target_for(Stratum::Semantic, true), None);
    }

    #[test]
    fn test_plan_ranks_and_limits() {
        let gate = RetentionGate::new(
            RetentionConfig::default(),
            &StrataConfig::default(),
            Arc::new(ManualClock::starting_now()),
        );
        let entries = vec![
            entry("low", Stratum::Working, Importance::Low),
            entry("critical", Stratum::Working, Importance::Critical),
            entry("high", Stratum::Working, Importance::High),
            entry("elsewhere", Stratum::Episodic, Importance::Critical),
        ];

        let plan = PromotionPlanner::new(2, 0.0).plan(
            &gate,
            &entries,
            Stratum::Working,
            Stratum::ShortTerm,
            None,
        );
        let ids: Vec<_> = plan.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["critical", "high"]);
        assert!(plan.iter().all(|p| p.to == Stratum::ShortTerm));
    }
}
