/// Memory Compressor
///
/// Shortens entries as they move toward more durable tiers and merges groups
/// of similar entries into one.
///
/// ## Intensity by target tier
///
/// | Target     | Method   | Result                                        |
/// |------------|----------|-----------------------------------------------|
/// | ShortTerm  | Light    | whitespace and repeated sentences removed     |
/// | Episodic   | Moderate | extractive summary, `moderate_ratio` of input |
/// | LongTerm   | Moderate | extractive summary, `moderate_ratio` of input |
/// | Semantic   | Heavy    | summarizer output, under half of the input    |
///
/// Compression never lengthens content. Inputs shorter than
/// `min_compress_chars` only ever get light treatment.
mod similarity;
mod summarizer;

pub use similarity::{find_similar_groups, similarity};
pub use summarizer::{ExtractiveSummarizer, SharedSummarizer, Summarizer};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CompressionConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::text;
use crate::types::{
    CompressionMetadata, CompressionMethod, ContentType, Importance, MemoryDraft, MemoryEntry,
    MemoryId, SourceKind, Stratum,
};

/// Tag prefix marking abstracted patterns.
pub const PATTERN_TAG_PREFIX: &str = "pattern:";

/// How a group of entries is folded into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsolidationMode {
    /// Keep every distinguishing detail
    Merge,
    /// One shorter synthesis
    Summarize,
    /// Name the pattern the inputs share
    Abstract,
}

/// Output of [`MemoryCompressor::consolidate_memories`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consolidation {
    pub mode: ConsolidationMode,
    pub content: String,
    pub content_type: ContentType,
    /// Highest importance among the inputs
    pub importance: Importance,
    /// Union of the inputs' tags (plus the pattern tag for `Abstract`)
    pub tags: Vec<String>,
    pub source_ids: Vec<MemoryId>,
    pub pattern_name: Option<String>,
    pub compression: CompressionMetadata,
}

impl Consolidation {
    /// Draft for storing the consolidated entry.
    pub fn to_draft(&self, agent_id: &str) -> MemoryDraft {
        MemoryDraft::new(self.content.clone())
            .with_content_type(self.content_type)
            .with_importance(self.importance)
            .with_tags(self.tags.iter().cloned())
            .with_source(SourceKind::Consolidation, Some(agent_id.to_string()))
    }
}

/// Compresses entries on tier transitions and consolidates groups.
#[derive(Debug, Clone)]
pub struct MemoryCompressor {
    config: CompressionConfig,
    summarizer: SharedSummarizer,
}

impl MemoryCompressor {
    /// Compressor using the extractive summarizer for heavy compression.
    pub fn new(config: CompressionConfig) -> Self {
        Self::with_summarizer(config, Arc::new(ExtractiveSummarizer))
    }

    pub fn with_summarizer(config: CompressionConfig, summarizer: SharedSummarizer) -> Self {
        Self { config, summarizer }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Method applied when moving into `target`. Nothing is compressed on
    /// the way into Working.
    pub fn method_for(target: Stratum) -> Option<CompressionMethod> {
        match target {
            Stratum::Working => None,
            Stratum::ShortTerm => Some(CompressionMethod::Light),
            Stratum::Episodic | Stratum::LongTerm => Some(CompressionMethod::Moderate),
            Stratum::Semantic => Some(CompressionMethod::Heavy),
        }
    }

    /// Compressed copy of `entry` for `target`.
    ///
    /// The returned entry carries compression metadata whose
    /// `original_length` is the length before the first compression ever
    /// applied to this entry. Content length never increases.
    pub async fn compress_memory(&self, entry: &MemoryEntry, target: Stratum) -> MemoryEntry {
        let mut out = entry.clone();
        out.stratum = target;
        let Some(method) = Self::method_for(target) else {
            return out;
        };

        let len = entry.content_len();
        let compressible = len >= self.config.min_compress_chars;
        let content = match method {
            CompressionMethod::Light => light(&entry.content),
            _ if !compressible => light(&entry.content),
            CompressionMethod::Moderate => {
                let target_chars = ratio_target(len, self.config.moderate_ratio);
                ExtractiveSummarizer::extract(&entry.content, target_chars)
            }
            CompressionMethod::Heavy => {
                let target_chars = ratio_target(len, self.config.heavy_ratio).min(len.saturating_sub(1) / 2);
                self.summarize_bounded(&entry.content, target_chars).await
            }
        };

        let content = if content.is_empty()
            || content.chars().count() > len
            || content.len() > entry.content.len()
        {
            entry.content.clone()
        } else {
            content
        };

        let new_len = content.chars().count();
        let original_length = entry
            .compression
            .as_ref()
            .map_or(len, |c| c.original_length.max(len));
        let applied = if compressible { method } else { CompressionMethod::Light };

        if new_len < len && applied != CompressionMethod::Light {
            out.content_type = ContentType::Summary;
        }
        out.content = content;
        out.compression = Some(CompressionMetadata {
            original_length,
            compression_ratio: ratio(new_len, original_length),
            method: applied,
        });

        debug!(
            id = %entry.id,
            target = %target,
            method = %applied,
            before = len,
            after = new_len,
            "Compressed memory"
        );
        out
    }

    /// Fold a group of entries into one.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidInput`] for an empty group.
    pub async fn consolidate_memories(
        &self,
        entries: &[MemoryEntry],
        mode: ConsolidationMode,
    ) -> MemoryResult<Consolidation> {
        if entries.is_empty() {
            return Err(MemoryError::invalid_input("cannot consolidate an empty group"));
        }

        let mut ordered: Vec<&MemoryEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let importance = ordered
            .iter()
            .map(|e| e.importance)
            .max()
            .unwrap_or_default();
        let mut tags: BTreeSet<String> = ordered.iter().flat_map(|e| e.tags.iter().cloned()).collect();
        let source_ids: Vec<MemoryId> = ordered.iter().map(|e| e.id.clone()).collect();
        let original_length: usize = ordered.iter().map(|e| e.content_len()).sum();

        let (content, content_type, pattern_name, method) = match mode {
            ConsolidationMode::Merge => (
                merge_details(&ordered),
                ContentType::Summary,
                None,
                CompressionMethod::Light,
            ),
            ConsolidationMode::Summarize => {
                let joined = joined_content(&ordered);
                let target_chars = ratio_target(original_length, self.config.moderate_ratio)
                    .max(self.config.min_compress_chars.min(original_length));
                (
                    self.summarize_bounded(&joined, target_chars).await,
                    ContentType::Summary,
                    None,
                    CompressionMethod::Moderate,
                )
            }
            ConsolidationMode::Abstract => {
                let name = name_pattern(&ordered);
                tags.insert(format!("{}{}", PATTERN_TAG_PREFIX, name));
                let joined = joined_content(&ordered);
                let gist = ExtractiveSummarizer::extract(&joined, 160);
                let content = format!(
                    "Pattern '{}' recurring across {} memories: {}",
                    name,
                    ordered.len(),
                    gist
                );
                (content, ContentType::Pattern, Some(name), CompressionMethod::Heavy)
            }
        };

        let new_len = content.chars().count();
        debug!(
            mode = ?mode,
            inputs = ordered.len(),
            before = original_length,
            after = new_len,
            "Consolidated memories"
        );

        Ok(Consolidation {
            mode,
            content,
            content_type,
            importance,
            tags: tags.into_iter().collect(),
            source_ids,
            pattern_name,
            compression: CompressionMetadata {
                original_length,
                compression_ratio: ratio(new_len, original_length),
                method,
            },
        })
    }

    /// Lexical and tag similarity, in [0, 1].
    pub fn similarity(&self, a: &MemoryEntry, b: &MemoryEntry) -> f64 {
        similarity(a, b, &self.config)
    }

    pub fn are_similar(&self, a: &MemoryEntry, b: &MemoryEntry, threshold: f64) -> bool {
        self.similarity(a, b) >= threshold
    }

    /// Groups of at least `min_size` entries linked by the configured
    /// similarity threshold.
    pub fn find_similar_groups(&self, entries: &[MemoryEntry], min_size: usize) -> Vec<Vec<usize>> {
        find_similar_groups(entries, self.config.similarity_threshold, min_size, &self.config)
    }

    /// Summarizer output capped at `target_chars`, with extractive fallback.
    async fn summarize_bounded(&self, text: &str, target_chars: usize) -> String {
        let summary = match self.summarizer.summarize(text, target_chars).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!("Summarizer returned empty output, using extractive fallback");
                ExtractiveSummarizer::extract(text, target_chars)
            }
            Err(e) => {
                warn!(error = %e, "Summarizer failed, using extractive fallback");
                ExtractiveSummarizer::extract(text, target_chars)
            }
        };
        let bounded = text::truncate_at_word(&text::collapse_whitespace(&summary), target_chars);
        if bounded.is_empty() {
            text::truncate_chars(text, target_chars)
        } else {
            bounded
        }
    }
}

/// Collapse whitespace and drop sentences already seen.
fn light(content: &str) -> String {
    let collapsed = text::collapse_whitespace(content);
    let sentences = text::sentences(&collapsed);
    if sentences.len() < 2 {
        return collapsed;
    }
    let mut seen = HashSet::new();
    sentences
        .into_iter()
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ratio_target(len: usize, ratio: f64) -> usize {
    ((len as f64) * ratio.clamp(0.0, 1.0)).floor() as usize
}

fn ratio(new_len: usize, original: usize) -> f64 {
    if original == 0 {
        1.0
    } else {
        new_len as f64 / original as f64
    }
}

fn joined_content(entries: &[&MemoryEntry]) -> String {
    entries
        .iter()
        .map(|e| e.content.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First entry in full, then only sentences adding keywords not yet covered.
///
/// A sentence without keywords is kept unless the same text is already present.
fn merge_details(entries: &[&MemoryEntry]) -> String {
    let mut covered: HashSet<String> = HashSet::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut parts: Vec<String> = Vec::new();
    for entry in entries {
        for sentence in text::sentences(&text::collapse_whitespace(&entry.content)) {
            let keywords = text::keywords(&sentence);
            let adds_detail = if keywords.is_empty() {
                !seen.contains(&sentence.to_lowercase())
            } else {
                parts.is_empty() || keywords.iter().any(|k| !covered.contains(k))
            };
            if adds_detail {
                covered.extend(keywords);
                seen.insert(sentence.to_lowercase());
                parts.push(sentence);
            }
        }
    }
    parts.join(" ")
}

/// Up to three keywords shared by most inputs, joined with '-'.
fn name_pattern(entries: &[&MemoryEntry]) -> String {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        for keyword in text::keywords(&entry.content) {
            *frequency.entry(keyword).or_insert(0) += 1;
        }
    }

    let needed = if entries.len() <= 1 { 1 } else { entries.len().div_ceil(2).max(2) };
    let mut shared: Vec<(String, usize)> = frequency
        .into_iter()
        .filter(|(_, count)| *count >= needed)
        .collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let name = shared
        .into_iter()
        .take(3)
        .map(|(word, _)| word)
        .collect::<Vec<_>>()
        .join("-");
    if name.is_empty() {
        entries
            .iter()
            .flat_map(|e| e.tags.iter())
            .find(|t| !t.starts_with(PATTERN_TAG_PREFIX))
            .cloned()
            .unwrap_or_else(|| "recurring-episode".to_string())
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryContext, MemorySource};
    use chrono::{Duration, Utc};

    fn entry(id: &str, content: &str, importance: Importance, age_secs: i64) -> MemoryEntry {
        let at = Utc::now() - Duration::seconds(age_secs);
        MemoryEntry {
            id: id.into(),
            stratum: Stratum::Working,
            content: content.into(),
            content_type: ContentType::Text,
            importance,
            tags: BTreeSet::new(),
            source: MemorySource::default(),
            context: MemoryContext {
                agent_id: "a".into(),
                channel_id: None,
                timestamp: at,
                phase: None,
            },
            access_count: 0,
            last_accessed: at,
            created_at: at,
            related_memories: vec![],
            compression: None,
            transitions: vec![],
        }
    }

    const LONG: &str = "The deployment pipeline failed during the database migration step. \
        The migration step timed out after ten minutes of waiting on a table lock. \
        A long running analytics query was holding the table lock on the orders table. \
        Killing the analytics query released the lock and the migration completed. \
        Future deployments should schedule migrations outside the analytics window.";

    #[derive(Debug)]
    struct FailingSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _text: &str, _target: usize) -> MemoryResult<String> {
            Err(MemoryError::Summarization("model offline".into()))
        }
    }

    #[derive(Debug)]
    struct VerboseSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for VerboseSummarizer {
        async fn summarize(&self, text: &str, _target: usize) -> MemoryResult<String> {
            Ok(format!("{} {}", text, text))
        }
    }

    #[tokio::test]
    async fn test_light_compression_removes_repeats() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let e = entry("m", "Cache  warmed.  Cache warmed. Requests served.", Importance::Low, 0);
        let out = compressor.compress_memory(&e, Stratum::ShortTerm).await;

        assert_eq!(out.content, "Cache warmed. Requests served.");
        assert_eq!(out.compression.as_ref().map(|c| c.method), Some(CompressionMethod::Light));
        assert_eq!(out.stratum, Stratum::ShortTerm);
    }

    #[tokio::test]
    async fn test_moderate_and_heavy_ratios() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let e = entry("m", LONG, Importance::Medium, 0);
        let len = e.content_len();

        let moderate = compressor.compress_memory(&e, Stratum::Episodic).await;
        assert!(moderate.content_len() <= (len as f64 * 0.6) as usize);
        assert_eq!(moderate.content_type, ContentType::Summary);

        let heavy = compressor.compress_memory(&e, Stratum::Semantic).await;
        assert!(heavy.content_len() * 2 < len);
        let meta = heavy.compression.unwrap();
        assert_eq!(meta.original_length, len);
        assert_eq!(meta.method, CompressionMethod::Heavy);
        assert!(meta.compression_ratio < 0.5);
    }

    #[tokio::test]
    async fn test_original_length_survives_repeated_compression() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let e = entry("m", LONG, Importance::Medium, 0);
        let once = compressor.compress_memory(&e, Stratum::Episodic).await;
        let twice = compressor.compress_memory(&once, Stratum::Semantic).await;
        assert_eq!(twice.compression.unwrap().original_length, e.content_len());
    }

    #[tokio::test]
    async fn test_short_input_is_not_summarized() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let e = entry("m", "Tiny note.", Importance::Medium, 0);
        let out = compressor.compress_memory(&e, Stratum::Semantic).await;
        assert_eq!(out.content, "Tiny note.");
        assert_eq!(out.compression.unwrap().method, CompressionMethod::Light);
    }

    #[tokio::test]
    async fn test_summarizer_failure_and_overlong_output_are_contained() {
        let e = entry("m", LONG, Importance::Medium, 0);
        let len = e.content_len();

        let failing = MemoryCompressor::with_summarizer(CompressionConfig::default(), Arc::new(FailingSummarizer));
        let out = failing.compress_memory(&e, Stratum::Semantic).await;
        assert!(!out.content.is_empty());
        assert!(out.content_len() * 2 < len);

        let verbose = MemoryCompressor::with_summarizer(CompressionConfig::default(), Arc::new(VerboseSummarizer));
        let out = verbose.compress_memory(&e, Stratum::Semantic).await;
        assert!(out.content_len() * 2 < len);
    }

    #[tokio::test]
    async fn test_working_target_is_untouched() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let e = entry("m", LONG, Importance::Medium, 0);
        let out = compressor.compress_memory(&e, Stratum::Working).await;
        assert_eq!(out.content, LONG);
        assert!(out.compression.is_none());
    }

    #[tokio::test]
    async fn test_consolidate_merge_keeps_details_and_max_importance() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let a = entry("a", "Login failed for user alice.", Importance::Low, 20);
        let b = entry("b", "Login failed for user alice. Password expired yesterday.", Importance::High, 10);

        let merged = compressor
            .consolidate_memories(&[b, a], ConsolidationMode::Merge)
            .await
            .unwrap();
        assert_eq!(merged.content, "Login failed for user alice. Password expired yesterday.");
        assert_eq!(merged.importance, Importance::High);
        assert_eq!(merged.source_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_consolidate_merge_keeps_keywordless_sentences() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let group = [
            entry("a", "Build agent disk full.", Importance::Medium, 30),
            entry("b", "Build agent disk full. x = 5", Importance::Medium, 20),
            entry("c", "Build agent disk full. 👍", Importance::Medium, 15),
            entry("d", "Build agent disk full. x = 5", Importance::Medium, 10),
        ];

        let merged = compressor
            .consolidate_memories(&group, ConsolidationMode::Merge)
            .await
            .unwrap();
        assert_eq!(merged.content, "Build agent disk full. x = 5 👍");
        assert_eq!(merged.source_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_consolidate_abstract_names_pattern() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let entries = vec![
            entry("a", "Disk full on build agent seven.", Importance::Medium, 30),
            entry("b", "Disk full again on build agent three.", Importance::Medium, 20),
            entry("c", "Build agent disk full alert fired.", Importance::Medium, 10),
        ];

        let pattern = compressor
            .consolidate_memories(&entries, ConsolidationMode::Abstract)
            .await
            .unwrap();
        let name = pattern.pattern_name.clone().unwrap();
        assert!(pattern.content.contains(&name));
        assert_eq!(pattern.content_type, ContentType::Pattern);
        assert!(pattern.tags.iter().any(|t| t == &format!("pattern:{}", name)));
        for word in name.split('-') {
            assert!(["agent", "build", "disk", "full"].contains(&word));
        }
    }

    #[tokio::test]
    async fn test_consolidate_summarize_is_shorter() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let entries = vec![
            entry("a", LONG, Importance::Medium, 20),
            entry("b", LONG, Importance::Medium, 10),
        ];
        let summary = compressor
            .consolidate_memories(&entries, ConsolidationMode::Summarize)
            .await
            .unwrap();
        assert!(summary.compression.compression_ratio < 1.0);
    }

    #[tokio::test]
    async fn test_consolidate_empty_group_is_rejected() {
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let err = compressor
            .consolidate_memories(&[], ConsolidationMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput { .. }));
    }
}
