/// Consolidation Process: folds near-duplicate entries of a stratum into one.
///
/// Runs as part of the outer loop. Within one stratum, groups of entries that
/// are at least `similarity_threshold` similar (see
/// [`MemoryCompressor::find_similar_groups`]) are merged into a single entry
/// that keeps every distinguishing detail and the highest importance. The
/// originals are discarded in the same step the merged entry is written.
/// Episodes that a Semantic pattern links back to are left alone.
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::compression::{ConsolidationMode, MemoryCompressor};
use crate::error::MemoryResult;
use crate::memory::StratumManager;
use crate::types::{ContentType, MemoryId, Scope, Stratum};

/// Outcome of one sweep over one stratum.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepResult {
    pub stratum: Option<Stratum>,
    pub groups: usize,
    /// Originals removed
    pub merged: usize,
    /// Ids of the consolidated entries
    pub created: Vec<MemoryId>,
}

/// Consolidation sweep with running counters.
#[derive(Debug)]
pub struct ConsolidationProcess {
    min_group: usize,
    mode: ConsolidationMode,
    sweeps: AtomicU64,
    groups_merged: AtomicU64,
    entries_merged: AtomicU64,
}

impl ConsolidationProcess {
    pub fn new(min_group: usize) -> Self {
        Self {
            min_group: min_group.max(2),
            mode: ConsolidationMode::Merge,
            sweeps: AtomicU64::new(0),
            groups_merged: AtomicU64::new(0),
            entries_merged: AtomicU64::new(0),
        }
    }

    /// Merge similar groups of `stratum`. Patterns and their sources are never merged.
    pub async fn sweep(
        &self,
        manager: &StratumManager,
        compressor: &MemoryCompressor,
        scope: &Scope,
        stratum: Stratum,
    ) -> MemoryResult<SweepResult> {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let pinned = if stratum == Stratum::Episodic {
            pattern_sources(manager, scope)
        } else {
            HashSet::new()
        };
        let mut entries = manager.entries(scope, stratum);
        entries.retain(|e| e.content_type != ContentType::Pattern && !pinned.contains(&e.id));
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut result = SweepResult {
            stratum: Some(stratum),
            ..Default::default()
        };
        for group in compressor.find_similar_groups(&entries, self.min_group) {
            let members: Vec<_> = group.iter().map(|&i| entries[i].clone()).collect();
            let consolidation = compressor.consolidate_memories(&members, self.mode).await?;
            let draft = consolidation.to_draft(&scope.owner_id);

            let Some(created) = manager.consolidate_into(
                scope,
                stratum,
                &consolidation.source_ids,
                draft,
                Some(consolidation.compression.clone()),
            ) else {
                debug!(scope = %scope, stratum = %stratum, "Consolidation group vanished before commit");
                continue;
            };

            result.groups += 1;
            result.merged += members.len();
            result.created.push(created.id);
        }

        if result.groups > 0 {
            self.groups_merged.fetch_add(result.groups as u64, Ordering::Relaxed);
            self.entries_merged.fetch_add(result.merged as u64, Ordering::Relaxed);
            info!(
                scope = %scope,
                stratum = %stratum,
                groups = result.groups,
                merged = result.merged,
                "Consolidated similar memories"
            );
        }
        Ok(result)
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn groups_merged(&self) -> u64 {
        self.groups_merged.load(Ordering::Relaxed)
    }

    pub fn entries_merged(&self) -> u64 {
        self.entries_merged.load(Ordering::Relaxed)
    }
}

fn pattern_sources(manager: &StratumManager, scope: &Scope) -> HashSet<MemoryId> {
    manager
        .entries(scope, Stratum::Semantic)
        .into_iter()
        .filter(|e| e.content_type == ContentType::Pattern)
        .flat_map(|e| e.related_memories.into_iter())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CompressionConfig, InputLimits, StrataConfig};
    use crate::types::{Importance, MemoryDraft};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_merges_similar_entries() {
        let manager = StratumManager::with_parts(
            StrataConfig::default(),
            InputLimits::default(),
            Arc::new(ManualClock::starting_now()),
            Some(1),
        );
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let scope = Scope::agent("alice");

        manager.add_memory(&scope, Stratum::ShortTerm, MemoryDraft::new("Cache miss on user lookup."));
        manager.add_memory(
            &scope,
            Stratum::ShortTerm,
            MemoryDraft::new("Cache miss on user lookup again.").with_importance(Importance::High),
        );
        manager.add_memory(&scope, Stratum::ShortTerm, MemoryDraft::new("Quarterly budget approved."));

        let process = ConsolidationProcess::new(2);
        let result = process
            .sweep(&manager, &compressor, &scope, Stratum::ShortTerm)
            .await
            .unwrap();

        assert_eq!(result.groups, 1);
        assert_eq!(result.merged, 2);
        assert_eq!(manager.count(&scope, Stratum::ShortTerm), 2);

        let merged = manager.peek_memory(&scope, &result.created[0]).unwrap();
        assert_eq!(merged.importance, Importance::High);
        assert!(merged.content.contains("again"));
        assert_eq!(process.groups_merged(), 1);
        assert_eq!(process.sweeps(), 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_pattern_sources_alone() {
        let manager = StratumManager::with_parts(
            StrataConfig::default(),
            InputLimits::default(),
            Arc::new(ManualClock::starting_now()),
            Some(1),
        );
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let scope = Scope::agent("alice");

        let mut sources = Vec::new();
        for text in ["Disk full on build agent.", "Disk full on build agent again."] {
            sources.push(manager.add_memory(&scope, Stratum::Episodic, MemoryDraft::new(text)).id);
        }
        manager.add_memory(&scope, Stratum::Episodic, MemoryDraft::new("Cache miss on user lookup."));
        manager.add_memory(&scope, Stratum::Episodic, MemoryDraft::new("Cache miss on user lookup again."));
        manager.add_memory(
            &scope,
            Stratum::Semantic,
            MemoryDraft::new("Pattern 'agent-build-disk' recurring across 2 memories.")
                .with_content_type(ContentType::Pattern)
                .with_related(sources.iter().cloned()),
        );

        let result = ConsolidationProcess::new(2)
            .sweep(&manager, &compressor, &scope, Stratum::Episodic)
            .await
            .unwrap();
        assert_eq!(result.groups, 1);
        assert_eq!(result.merged, 2);
        assert_eq!(manager.count(&scope, Stratum::Episodic), 3);
        for id in &sources {
            assert!(manager.peek_memory(&scope, id).is_some());
        }
    }

    #[tokio::test]
    async fn test_sweep_on_empty_scope() {
        let manager = StratumManager::with_parts(
            StrataConfig::default(),
            InputLimits::default(),
            Arc::new(ManualClock::starting_now()),
            Some(1),
        );
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let result = ConsolidationProcess::new(2)
            .sweep(&manager, &compressor, &Scope::agent("nobody"), Stratum::Episodic)
            .await
            .unwrap();
        assert_eq!(result.groups, 0);
    }
}
