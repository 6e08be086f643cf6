/// Stratum Manager: owns every entry of every scope across the five tiers.
///
/// ## Purpose
///
/// - Add, read, update and delete entries for a single owner
/// - Full-text query with stratum / importance / tag filters
/// - Atomic tier transitions with a recorded rationale
/// - Per-stratum update cadence driven by the scope's cycle counter
/// - Probabilistic decay of low-value entries
///
/// ## Concurrency
///
/// State is a `DashMap<Scope, ScopeMemory>`. Every operation takes the scope's
/// entry guard for its whole duration, so a single call is atomic with respect
/// to other calls on the same scope, and calls on different scopes only
/// contend on shard locks. Multi-call sequences (a whole cognitive cycle) must
/// be serialized by the caller; see `DualLoopOrchestrator::lock_scope`.
///
/// Capacity ceilings are the retention gate's job. The manager only enforces
/// a hard ceiling (`capacity × hard_ceiling_factor`) so no stratum can grow
/// without bound between outer loops.
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::{ContinuumConfig, InputLimits, StrataConfig};
use crate::lifecycle::PolicyTable;
use crate::memory::store::ScopeMemory;
use crate::text;
use crate::types::{
    normalize_tags, CompressionMetadata, Importance, MemoryContext, MemoryDraft,
    MemoryEntry, MemoryId, Scope, Stratum, TransitionRecord,
};

/// Query over one scope's memories.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryQuery {
    /// Free text; empty matches everything
    pub query: String,
    /// Restrict to these strata (all when `None`)
    pub strata: Option<Vec<Stratum>>,
    pub min_importance: Option<Importance>,
    /// Entry must carry at least one of these tags (ignored when empty)
    pub tags: Vec<String>,
    pub limit: usize,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            strata: None,
            min_importance: None,
            tags: Vec::new(),
            limit: 10,
        }
    }
}

impl MemoryQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn in_strata(mut self, strata: impl IntoIterator<Item = Stratum>) -> Self {
        self.strata = Some(strata.into_iter().collect());
        self
    }

    pub fn min_importance(mut self, importance: Importance) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Result of [`StratumManager::query_memories`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub memories: Vec<MemoryEntry>,
    /// Matches before `limit` was applied
    pub total_count: usize,
    pub execution_time: Duration,
}

/// Partial update of a single entry.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub importance: Option<Importance>,
    /// Replaces the tag set
    pub tags: Option<Vec<String>>,
    pub add_related: Vec<MemoryId>,
}

/// Access summary used in statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessSummary {
    pub id: MemoryId,
    pub stratum: Stratum,
    pub access_count: u64,
}

/// Per-scope statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StratumStatistics {
    pub total_memories: usize,
    pub by_stratum: BTreeMap<Stratum, usize>,
    pub by_importance: BTreeMap<Importance, usize>,
    pub average_access_count: f64,
    /// Top entries by access count, most accessed first
    pub most_accessed: Vec<AccessSummary>,
    pub estimated_bytes: usize,
    pub cycle_count: u64,
}

const MOST_ACCESSED_LIMIT: usize = 5;

/// Owns all entries for every scope across the five strata.
#[derive(Debug)]
pub struct StratumManager {
    scopes: DashMap<Scope, ScopeMemory>,
    strata: StrataConfig,
    /// Live capacities, when retention policies can change them at runtime
    policies: Option<Arc<PolicyTable>>,
    limits: InputLimits,
    clock: SharedClock,
    rng: Mutex<StdRng>,
}

impl StratumManager {
    /// Create a manager from the top-level configuration.
    pub fn new(config: &ContinuumConfig, clock: SharedClock) -> Self {
        Self::with_parts(
            config.strata.clone(),
            config.limits.clone(),
            clock,
            config.rng_seed,
        )
    }

    /// Create with explicit parts. `seed` makes decay reproducible.
    pub fn with_parts(
        strata: StrataConfig,
        limits: InputLimits,
        clock: SharedClock,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            scopes: DashMap::new(),
            strata,
            policies: None,
            limits,
            clock,
            rng: Mutex::new(rng),
        }
    }

    /// Take capacities from `policies`, so policy updates move the hard ceiling too.
    pub fn with_policies(mut self, policies: Arc<PolicyTable>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Current capacity of a stratum.
    pub fn capacity(&self, stratum: Stratum) -> usize {
        match &self.policies {
            Some(policies) => policies.get(stratum).capacity,
            None => self.strata.capacity(stratum),
        }
    }

    /// Count above which inserts evict immediately.
    pub fn hard_ceiling(&self, stratum: Stratum) -> usize {
        (self.capacity(stratum) as f64 * self.strata.hard_ceiling_factor.max(1.0)).ceil() as usize
    }

    /// Add a new entry. Assigns id and timestamps, starts the access count at zero.
    pub fn add_memory(&self, scope: &Scope, stratum: Stratum, draft: MemoryDraft) -> MemoryEntry {
        let now = self.clock.now();
        let draft = draft.clamp(&self.limits);
        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            stratum,
            content: draft.content,
            content_type: draft.content_type,
            importance: draft.importance,
            tags: draft.tags.into_iter().collect(),
            source: draft.source,
            context: MemoryContext {
                agent_id: scope.owner_id.clone(),
                channel_id: draft.channel_id,
                timestamp: now,
                phase: draft.phase,
            },
            access_count: 0,
            last_accessed: now,
            created_at: now,
            related_memories: draft.related_memories,
            compression: None,
            transitions: Vec::new(),
        };

        let mut memory = self.scopes.entry(scope.clone()).or_default();
        memory.insert(entry.clone());
        self.enforce_hard_ceiling(scope, &mut memory, stratum);

        trace!(scope = %scope, stratum = %stratum, id = %entry.id, "Added memory");
        entry
    }

    /// Read an entry, recording the access.
    pub fn get_memory(&self, scope: &Scope, id: &str) -> Option<MemoryEntry> {
        let now = self.clock.now();
        let mut memory = self.scopes.get_mut(scope)?;
        memory.touch(id, |entry| {
            entry.record_access(now);
            entry.clone()
        })
    }

    /// Read an entry without recording an access.
    pub fn peek_memory(&self, scope: &Scope, id: &str) -> Option<MemoryEntry> {
        self.scopes.get(scope)?.get(id).cloned()
    }

    /// Apply a partial update. Returns `false` when the entry does not exist.
    pub fn update_memory(&self, scope: &Scope, id: &str, update: MemoryUpdate) -> bool {
        let Some(mut memory) = self.scopes.get_mut(scope) else {
            return false;
        };
        let limits = &self.limits;
        memory
            .update(id, |entry| {
                if let Some(content) = update.content {
                    entry.content = text::truncate_chars(&content, limits.max_content_chars);
                }
                if let Some(importance) = update.importance {
                    entry.importance = importance;
                }
                if let Some(tags) = update.tags {
                    entry.tags = normalize_tags(tags, limits).into_iter().collect();
                }
                for id in update.add_related {
                    if entry.related_memories.len() >= limits.max_related {
                        break;
                    }
                    if !id.is_empty() && id != entry.id && !entry.related_memories.contains(&id) {
                        entry.related_memories.push(id);
                    }
                }
            })
            .is_some()
    }

    /// Delete an entry. Returns `false` when it does not exist.
    pub fn delete_memory(&self, scope: &Scope, id: &str) -> bool {
        self.scopes
            .get_mut(scope)
            .is_some_and(|mut memory| memory.remove(id).is_some())
    }

    /// Full-text query ordered by relevance, then recency.
    ///
    /// Returned entries count as reads: their access counters advance.
    pub fn query_memories(&self, scope: &Scope, query: &MemoryQuery) -> QueryResult {
        let started = Instant::now();
        let Some(mut memory) = self.scopes.get_mut(scope) else {
            return QueryResult {
                execution_time: started.elapsed(),
                ..Default::default()
            };
        };

        let mut terms = text::keywords(&query.query);
        if terms.is_empty() {
            terms = text::word_set(&query.query);
        }
        let phrase = text::collapse_whitespace(&query.query).to_lowercase();
        let tag_filter: HashSet<String> = normalize_tags(query.tags.clone(), &self.limits)
            .into_iter()
            .collect();
        let strata: Vec<Stratum> = query
            .strata
            .clone()
            .unwrap_or_else(|| Stratum::ALL.to_vec());

        let mut hits: Vec<(f64, DateTime<Utc>, DateTime<Utc>, MemoryId)> = Vec::new();
        for stratum in strata.into_iter().collect::<BTreeSet<_>>() {
            let store = memory.stratum(stratum);
            let candidates: Box<dyn Iterator<Item = &MemoryEntry>> = if tag_filter.is_empty() {
                Box::new(store.iter())
            } else {
                let ids: BTreeSet<&MemoryId> = tag_filter
                    .iter()
                    .filter_map(|tag| store.ids_with_tag(tag))
                    .flatten()
                    .collect();
                Box::new(ids.into_iter().filter_map(|id| store.get(id)))
            };

            for entry in candidates {
                if query.min_importance.is_some_and(|min| entry.importance < min) {
                    continue;
                }
                let relevance = if terms.is_empty() {
                    0.0
                } else {
                    let mut entry_terms = text::word_set(&entry.content);
                    entry_terms.extend(entry.tags.iter().cloned());
                    let mut score = text::coverage(&terms, &entry_terms);
                    if score <= 0.0 {
                        continue;
                    }
                    if !phrase.is_empty() && entry.content.to_lowercase().contains(&phrase) {
                        score += 0.5;
                    }
                    score
                };
                hits.push((relevance, entry.last_accessed, entry.created_at, entry.id.clone()));
            }
        }

        hits.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| b.2.cmp(&a.2))
        });

        let total_count = hits.len();
        let limit = query.limit.min(self.limits.max_query_limit);
        let now = self.clock.now();
        let memories = hits
            .into_iter()
            .take(limit)
            .filter_map(|(_, _, _, id)| {
                memory.touch(&id, |entry| {
                    entry.record_access(now);
                    entry.clone()
                })
            })
            .collect();

        QueryResult {
            memories,
            total_count,
            execution_time: started.elapsed(),
        }
    }

    /// Move an entry between strata, recording `rationale`.
    ///
    /// Returns `false` and leaves every tier untouched if the entry is not
    /// currently in `from`.
    pub fn transition_memory(
        &self,
        scope: &Scope,
        id: &str,
        from: Stratum,
        to: Stratum,
        rationale: &str,
    ) -> bool {
        self.apply_transition(scope, id, from, to, rationale, None)
            .is_some()
    }

    /// Transition that also swaps in compressed content.
    ///
    /// Only content, content type and compression metadata are taken from
    /// `compressed`; counters and links always come from the live entry.
    pub fn apply_transition(
        &self,
        scope: &Scope,
        id: &str,
        from: Stratum,
        to: Stratum,
        rationale: &str,
        compressed: Option<&MemoryEntry>,
    ) -> Option<MemoryEntry> {
        let now = self.clock.now();
        let mut memory = self.scopes.get_mut(scope)?;
        let max_history = self.limits.max_transition_history;
        let record = TransitionRecord {
            from,
            to,
            rationale: text::truncate_chars(rationale, self.limits.max_content_chars),
            at: now,
        };

        let moved = memory
            .relocate(id, from, to, |entry| {
                if let Some(c) = compressed {
                    if c.content.chars().count() <= entry.content.chars().count() {
                        entry.content = c.content.clone();
                        entry.content_type = c.content_type;
                        entry.compression = c.compression.clone();
                    }
                }
                entry.push_transition(record, max_history);
            })
            .cloned()?;

        debug!(scope = %scope, id, from = %from, to = %to, rationale, "Transitioned memory");
        self.enforce_hard_ceiling(scope, &mut memory, to);
        Some(moved)
    }

    /// Whether enough cycles have passed since the stratum's last maintenance.
    pub fn should_update_stratum(&self, scope: &Scope, stratum: Stratum) -> bool {
        self.scopes.get(scope).is_some_and(|memory| {
            let since = memory
                .cycle_count
                .saturating_sub(memory.last_updated[stratum.index()]);
            since >= stratum.update_frequency()
        })
    }

    /// Record a maintenance pass over the stratum at the current cycle.
    pub fn mark_stratum_updated(&self, scope: &Scope, stratum: Stratum) {
        if let Some(mut memory) = self.scopes.get_mut(scope) {
            memory.last_updated[stratum.index()] = memory.cycle_count;
        }
    }

    /// Advance the scope's cycle counter, returning the new value.
    pub fn increment_cycles(&self, scope: &Scope) -> u64 {
        let mut memory = self.scopes.entry(scope.clone()).or_default();
        memory.cycle_count += 1;
        memory.cycle_count
    }

    pub fn cycle_count(&self, scope: &Scope) -> u64 {
        self.scopes.get(scope).map_or(0, |m| m.cycle_count)
    }

    /// Counts, access averages and footprint for one scope.
    pub fn get_statistics(&self, scope: &Scope) -> StratumStatistics {
        let Some(memory) = self.scopes.get(scope) else {
            return StratumStatistics::default();
        };

        let mut stats = StratumStatistics {
            total_memories: memory.len(),
            cycle_count: memory.cycle_count,
            ..Default::default()
        };
        for stratum in Stratum::ALL {
            stats
                .by_stratum
                .insert(stratum, memory.stratum(stratum).len());
        }

        let mut total_access = 0u64;
        let mut accessed = Vec::with_capacity(memory.len());
        for entry in memory.iter() {
            *stats.by_importance.entry(entry.importance).or_insert(0) += 1;
            total_access = total_access.saturating_add(entry.access_count);
            stats.estimated_bytes += entry.estimated_size();
            accessed.push(AccessSummary {
                id: entry.id.clone(),
                stratum: entry.stratum,
                access_count: entry.access_count,
            });
        }

        if stats.total_memories > 0 {
            stats.average_access_count = total_access as f64 / stats.total_memories as f64;
        }
        accessed.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        accessed.truncate(MOST_ACCESSED_LIMIT);
        stats.most_accessed = accessed;
        stats
    }

    /// Probabilistically evict low-value entries of one stratum.
    ///
    /// Each entry is evicted with probability `rate × (1 − value)`, where value
    /// blends importance, recency and access frequency. Critical entries are
    /// never evicted by decay. Returns the number removed.
    pub fn apply_decay(&self, scope: &Scope, stratum: Stratum, rate: f64) -> usize {
        let rate = if rate.is_finite() {
            rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let Some(mut memory) = self.scopes.get_mut(scope) else {
            return 0;
        };
        let now = self.clock.now();

        let victims: Vec<MemoryId> = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            memory
                .stratum(stratum)
                .iter()
                .filter(|entry| entry.importance != Importance::Critical)
                .filter(|entry| {
                    let p = (rate * (1.0 - decay_value(entry, now))).clamp(0.0, 1.0);
                    rng.gen_bool(p)
                })
                .map(|entry| entry.id.clone())
                .collect()
        };

        for id in &victims {
            memory.remove(id);
            debug!(scope = %scope, stratum = %stratum, id = %id, rate, "Decayed memory");
        }
        victims.len()
    }

    /// Snapshot of a stratum's entries.
    pub fn entries(&self, scope: &Scope, stratum: Stratum) -> Vec<MemoryEntry> {
        self.scopes
            .get(scope)
            .map(|memory| memory.stratum(stratum).iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, scope: &Scope, stratum: Stratum) -> usize {
        self.scopes
            .get(scope)
            .map_or(0, |memory| memory.stratum(stratum).len())
    }

    /// Remove the given ids, skipping unknown ones. Returns how many were removed.
    pub fn remove_memories(&self, scope: &Scope, ids: &[MemoryId]) -> usize {
        let Some(mut memory) = self.scopes.get_mut(scope) else {
            return 0;
        };
        ids.iter().filter(|id| memory.remove(id).is_some()).count()
    }

    /// Replace a group of entries of one stratum with a single consolidated
    /// entry, in one step.
    ///
    /// Originals that are no longer in `stratum` are skipped. When none are
    /// left, nothing is written and `None` is returned. The new entry inherits
    /// the summed access count, the latest access time and the union of the
    /// originals' links.
    pub fn consolidate_into(
        &self,
        scope: &Scope,
        stratum: Stratum,
        originals: &[MemoryId],
        draft: MemoryDraft,
        compression: Option<CompressionMetadata>,
    ) -> Option<MemoryEntry> {
        let now = self.clock.now();
        let draft = draft.clamp(&self.limits);
        let mut memory = self.scopes.get_mut(scope)?;

        let present: Vec<MemoryEntry> = originals
            .iter()
            .filter(|id| memory.locate(id) == Some(stratum))
            .filter_map(|id| memory.get(id).cloned())
            .collect();
        if present.is_empty() {
            return None;
        }

        let original_ids: HashSet<&str> = present.iter().map(|e| e.id.as_str()).collect();
        let mut related: Vec<MemoryId> = draft.related_memories;
        for link in present.iter().flat_map(|e| e.related_memories.iter()) {
            if !original_ids.contains(link.as_str()) && !related.contains(link) {
                related.push(link.clone());
            }
        }
        related.truncate(self.limits.max_related);

        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            stratum,
            content: draft.content,
            content_type: draft.content_type,
            importance: draft.importance,
            tags: draft.tags.into_iter().collect(),
            source: draft.source,
            context: MemoryContext {
                agent_id: scope.owner_id.clone(),
                channel_id: draft.channel_id,
                timestamp: now,
                phase: draft.phase,
            },
            access_count: present
                .iter()
                .fold(0u64, |acc, e| acc.saturating_add(e.access_count)),
            last_accessed: present
                .iter()
                .map(|e| e.last_accessed)
                .max()
                .unwrap_or(now),
            created_at: now,
            related_memories: related,
            compression,
            transitions: Vec::new(),
        };

        for original in &present {
            memory.remove(&original.id);
        }
        memory.insert(entry.clone());

        debug!(
            scope = %scope,
            stratum = %stratum,
            merged = present.len(),
            id = %entry.id,
            "Consolidated memories"
        );
        Some(entry)
    }

    /// Resolve an entry's related links, pruning any that dangle.
    pub fn resolve_related(&self, scope: &Scope, id: &str) -> Vec<MemoryEntry> {
        let Some(mut memory) = self.scopes.get_mut(scope) else {
            return Vec::new();
        };
        let Some(links) = memory.get(id).map(|e| e.related_memories.clone()) else {
            return Vec::new();
        };

        let live: Vec<MemoryEntry> = links
            .iter()
            .filter_map(|link| memory.get(link).cloned())
            .collect();
        if live.len() != links.len() {
            let keep: HashSet<MemoryId> = live.iter().map(|e| e.id.clone()).collect();
            memory.touch(id, |entry| entry.related_memories.retain(|l| keep.contains(l)));
            trace!(scope = %scope, id, pruned = links.len() - live.len(), "Pruned dangling links");
        }
        live
    }

    /// Scopes that currently hold state.
    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes.iter().map(|e| e.key().clone()).collect()
    }

    pub fn has_scope(&self, scope: &Scope) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Drop everything held for a scope. Returns `false` if it had no state.
    pub fn clear(&self, scope: &Scope) -> bool {
        self.scopes.remove(scope).is_some()
    }

    /// Evict beyond the hard ceiling: oldest entry of the lowest importance first.
    fn enforce_hard_ceiling(&self, scope: &Scope, memory: &mut ScopeMemory, stratum: Stratum) {
        let ceiling = self.hard_ceiling(stratum);
        while memory.stratum(stratum).len() > ceiling {
            let victim = memory
                .stratum(stratum)
                .iter()
                .min_by(|a, b| {
                    a.importance
                        .cmp(&b.importance)
                        .then_with(|| a.last_accessed.cmp(&b.last_accessed))
                        .then_with(|| a.created_at.cmp(&b.created_at))
                })
                .map(|e| e.id.clone());
            let Some(victim) = victim else { break };
            memory.remove(&victim);
            warn!(
                scope = %scope,
                stratum = %stratum,
                id = %victim,
                ceiling,
                "Hard ceiling reached, evicted memory"
            );
        }
    }
}

/// Value of an entry for decay purposes, in [0, 1].
fn decay_value(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
    let recency = (-entry.hours_since_access(now) / 24.0).exp();
    let access = 1.0 - (-(entry.access_count as f64) / 5.0).exp();
    (0.5 * entry.importance.weight() + 0.3 * recency + 0.2 * access).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn manager_with_clock() -> (StratumManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let manager = StratumManager::with_parts(
            StrataConfig::default(),
            InputLimits::default(),
            clock.clone(),
            Some(7),
        );
        (manager, clock)
    }

    #[test]
    fn test_add_memory_assigns_fields() {
        let (manager, clock) = manager_with_clock();
        let scope = Scope::agent("alice");

        let entry = manager.add_memory(
            &scope,
            Stratum::Working,
            MemoryDraft::new("The build failed on step 3").with_tags(["build"]),
        );

        assert!(!entry.id.is_empty());
        assert_eq!(entry.stratum, Stratum::Working);
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.created_at, clock.now());
        assert_eq!(entry.context.agent_id, "alice");
        assert!(entry.tags.contains("build"));
    }

    #[test]
    fn test_get_memory_records_access() {
        let (manager, clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        let entry = manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("x"));

        for _ in 0..3 {
            clock.advance(ChronoDuration::seconds(10));
            manager.get_memory(&scope, &entry.id);
        }

        let read = manager.peek_memory(&scope, &entry.id).unwrap();
        assert_eq!(read.access_count, 3);
        assert_eq!(read.last_accessed, clock.now());
    }

    #[test]
    fn test_query_filters_and_orders() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");

        manager.add_memory(
            &scope,
            Stratum::Working,
            MemoryDraft::new("deploy of the api service failed")
                .with_importance(Importance::High)
                .with_tags(["deploy"]),
        );
        manager.add_memory(
            &scope,
            Stratum::Episodic,
            MemoryDraft::new("api latency was normal").with_importance(Importance::Low),
        );
        manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("unrelated note"));

        let result = manager.query_memories(&scope, &MemoryQuery::new("api deploy"));
        assert_eq!(result.total_count, 2);
        assert!(result.memories[0].content.contains("deploy"));

        let result = manager.query_memories(
            &scope,
            &MemoryQuery::new("api").min_importance(Importance::Medium),
        );
        assert_eq!(result.total_count, 1);

        let result = manager.query_memories(
            &scope,
            &MemoryQuery::new("").in_strata([Stratum::Episodic]),
        );
        assert_eq!(result.total_count, 1);

        let result = manager.query_memories(&scope, &MemoryQuery::new("").with_tags(["DEPLOY"]));
        assert_eq!(result.total_count, 1);

        let result = manager.query_memories(&scope, &MemoryQuery::new("").limit(1));
        assert_eq!(result.total_count, 3);
        assert_eq!(result.memories.len(), 1);
    }

    #[test]
    fn test_query_unknown_scope_is_empty() {
        let (manager, _clock) = manager_with_clock();
        let result = manager.query_memories(&Scope::agent("nobody"), &MemoryQuery::new("x"));
        assert_eq!(result.total_count, 0);
        assert!(result.memories.is_empty());
    }

    #[test]
    fn test_transition_memory() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        let entry = manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("x"));

        assert!(!manager.transition_memory(
            &scope,
            &entry.id,
            Stratum::ShortTerm,
            Stratum::Episodic,
            "wrong tier"
        ));
        assert_eq!(manager.count(&scope, Stratum::Working), 1);

        assert!(manager.transition_memory(
            &scope,
            &entry.id,
            Stratum::Working,
            Stratum::ShortTerm,
            "survived three cycles"
        ));
        let moved = manager.peek_memory(&scope, &entry.id).unwrap();
        assert_eq!(moved.stratum, Stratum::ShortTerm);
        assert_eq!(moved.transitions.len(), 1);
        assert_eq!(moved.transitions[0].rationale, "survived three cycles");
        assert_eq!(manager.count(&scope, Stratum::Working), 0);
    }

    #[test]
    fn test_transition_missing_id_changes_nothing() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("x"));
        let before = manager.get_statistics(&scope);

        assert!(!manager.transition_memory(
            &scope,
            "missing",
            Stratum::Working,
            Stratum::ShortTerm,
            "n/a"
        ));
        let after = manager.get_statistics(&scope);
        assert_eq!(before.by_stratum, after.by_stratum);
    }

    #[test]
    fn test_update_frequency() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        assert!(!manager.should_update_stratum(&scope, Stratum::Working));

        manager.increment_cycles(&scope);
        assert!(manager.should_update_stratum(&scope, Stratum::Working));
        assert!(!manager.should_update_stratum(&scope, Stratum::ShortTerm));

        manager.mark_stratum_updated(&scope, Stratum::Working);
        assert!(!manager.should_update_stratum(&scope, Stratum::Working));

        manager.increment_cycles(&scope);
        manager.increment_cycles(&scope);
        assert!(manager.should_update_stratum(&scope, Stratum::ShortTerm));
        assert!(!manager.should_update_stratum(&scope, Stratum::Episodic));
    }

    #[test]
    fn test_statistics() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        let a = manager.add_memory(
            &scope,
            Stratum::Working,
            MemoryDraft::new("a").with_importance(Importance::High),
        );
        manager.add_memory(&scope, Stratum::Episodic, MemoryDraft::new("b"));
        manager.get_memory(&scope, &a.id);
        manager.get_memory(&scope, &a.id);

        let stats = manager.get_statistics(&scope);
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.by_stratum[&Stratum::Working], 1);
        assert_eq!(stats.by_stratum[&Stratum::Semantic], 0);
        assert_eq!(stats.by_importance[&Importance::High], 1);
        assert!((stats.average_access_count - 1.0).abs() < 1e-9);
        assert_eq!(stats.most_accessed[0].id, a.id);
        assert!(stats.estimated_bytes > 0);
    }

    #[test]
    fn test_decay_never_increases_and_spares_critical() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        for i in 0..10 {
            manager.add_memory(
                &scope,
                Stratum::Working,
                MemoryDraft::new(format!("low {}", i)).with_importance(Importance::Low),
            );
        }
        manager.add_memory(
            &scope,
            Stratum::Working,
            MemoryDraft::new("keep").with_importance(Importance::Critical),
        );

        let mut previous = manager.count(&scope, Stratum::Working);
        for _ in 0..40 {
            manager.apply_decay(&scope, Stratum::Working, 0.99);
            let current = manager.count(&scope, Stratum::Working);
            assert!(current <= previous);
            previous = current;
        }
        assert_eq!(previous, 1);
    }

    #[test]
    fn test_hard_ceiling_evicts_lowest_importance() {
        let clock = Arc::new(ManualClock::starting_now());
        let mut strata = StrataConfig::default();
        strata.capacities.working = 2;
        strata.hard_ceiling_factor = 1.5;
        let manager = StratumManager::with_parts(strata, InputLimits::default(), clock, Some(1));
        let scope = Scope::agent("alice");

        let low = manager.add_memory(
            &scope,
            Stratum::Working,
            MemoryDraft::new("low").with_importance(Importance::Low),
        );
        for i in 0..3 {
            manager.add_memory(
                &scope,
                Stratum::Working,
                MemoryDraft::new(format!("high {}", i)).with_importance(Importance::High),
            );
        }

        assert_eq!(manager.count(&scope, Stratum::Working), 3);
        assert!(manager.peek_memory(&scope, &low.id).is_none());
    }

    #[test]
    fn test_consolidate_into_replaces_originals() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        let a = manager.add_memory(&scope, Stratum::Episodic, MemoryDraft::new("a"));
        let b = manager.add_memory(&scope, Stratum::Episodic, MemoryDraft::new("b"));
        manager.get_memory(&scope, &a.id);

        let merged = manager
            .consolidate_into(
                &scope,
                Stratum::Episodic,
                &[a.id.clone(), b.id.clone(), "gone".into()],
                MemoryDraft::new("a b"),
                None,
            )
            .unwrap();

        assert_eq!(manager.count(&scope, Stratum::Episodic), 1);
        assert_eq!(merged.access_count, 1);
        assert!(manager.peek_memory(&scope, &a.id).is_none());
    }

    #[test]
    fn test_resolve_related_prunes_dangling() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        let a = manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("a"));
        let b = manager.add_memory(
            &scope,
            Stratum::Working,
            MemoryDraft::new("b").with_related([a.id.clone(), "evicted".to_string()]),
        );

        let live = manager.resolve_related(&scope, &b.id);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, a.id);
        let b = manager.peek_memory(&scope, &b.id).unwrap();
        assert_eq!(b.related_memories, vec![a.id]);
    }

    #[test]
    fn test_update_and_delete() {
        let (manager, _clock) = manager_with_clock();
        let scope = Scope::agent("alice");
        let a = manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("a"));

        assert!(manager.update_memory(
            &scope,
            &a.id,
            MemoryUpdate {
                content: Some("changed".into()),
                importance: Some(Importance::Critical),
                tags: Some(vec!["Fresh".into()]),
                ..Default::default()
            }
        ));
        let updated = manager.peek_memory(&scope, &a.id).unwrap();
        assert_eq!(updated.content, "changed");
        assert_eq!(updated.importance, Importance::Critical);
        assert!(updated.tags.contains("fresh"));

        assert!(manager.delete_memory(&scope, &a.id));
        assert!(!manager.delete_memory(&scope, &a.id));
        assert!(!manager.update_memory(&scope, &a.id, MemoryUpdate::default()));
    }

    #[test]
    fn test_clear_scope() {
        let (manager, _clock) = manager_with_clock();
        let alice = Scope::agent("alice");
        let bob = Scope::agent("bob");
        manager.add_memory(&alice, Stratum::Working, MemoryDraft::new("a"));
        manager.add_memory(&bob, Stratum::Working, MemoryDraft::new("b"));

        assert!(manager.clear(&alice));
        assert!(!manager.has_scope(&alice));
        assert_eq!(manager.count(&bob, Stratum::Working), 1);
    }
}
