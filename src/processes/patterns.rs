/// Pattern Detection: abstracts recurring episodes into semantic knowledge.
///
/// Groups of at least `min_support` similar Episodic entries are abstracted
/// into one Semantic entry tagged `pattern:<name>` that links back to every
/// source. Sources stay in Episodic. A pattern whose tag already exists in
/// Semantic is not emitted again.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::compression::{ConsolidationMode, MemoryCompressor, PATTERN_TAG_PREFIX};
use crate::error::MemoryResult;
use crate::memory::StratumManager;
use crate::types::{ContentType, MemoryEntry, Scope, Stratum};

#[derive(Debug)]
pub struct PatternDetector {
    min_support: usize,
    runs: AtomicU64,
    detected: AtomicU64,
}

impl PatternDetector {
    pub fn new(min_support: usize) -> Self {
        Self {
            min_support: min_support.max(2),
            runs: AtomicU64::new(0),
            detected: AtomicU64::new(0),
        }
    }

    /// Detect new patterns for a scope, returning the Semantic entries created.
    pub async fn detect(
        &self,
        manager: &StratumManager,
        compressor: &MemoryCompressor,
        scope: &Scope,
    ) -> MemoryResult<Vec<MemoryEntry>> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let mut episodes = manager.entries(scope, Stratum::Episodic);
        episodes.retain(|e| e.content_type != ContentType::Pattern);
        episodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut known: HashSet<String> = manager
            .entries(scope, Stratum::Semantic)
            .into_iter()
            .flat_map(|e| e.tags.into_iter())
            .filter(|t| t.starts_with(PATTERN_TAG_PREFIX))
            .collect();

        let mut created = Vec::new();
        for group in compressor.find_similar_groups(&episodes, self.min_support) {
            let members: Vec<MemoryEntry> = group.iter().map(|&i| episodes[i].clone()).collect();
            let abstraction = compressor
                .consolidate_memories(&members, ConsolidationMode::Abstract)
                .await?;
            let Some(name) = abstraction.pattern_name.as_deref() else {
                continue;
            };

            let tag = format!("{}{}", PATTERN_TAG_PREFIX, name);
            if !known.insert(tag.clone()) {
                debug!(scope = %scope, pattern = name, "Pattern already known");
                continue;
            }

            let draft = abstraction
                .to_draft(&scope.owner_id)
                .with_related(abstraction.source_ids.iter().cloned());
            let entry = manager.add_memory(scope, Stratum::Semantic, draft);
            info!(
                scope = %scope,
                pattern = name,
                support = members.len(),
                id = %entry.id,
                "Detected pattern"
            );
            created.push(entry);
        }

        self.detected.fetch_add(created.len() as u64, Ordering::Relaxed);
        Ok(created)
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn detected(&self) -> u64 {
        self.detected.load(Ordering::Relaxed)
    }
}
