/// Pluggable summarization.
///
/// Heavy (Semantic-tier) compression and `Summarize` consolidation call out
/// to a [`Summarizer`]. Production deployments plug in a model-backed
/// implementation; [`ExtractiveSummarizer`] is the deterministic default and
/// also the fallback whenever the plugged-in summarizer fails.
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::MemoryResult;
use crate::text;

/// Text → shorter text.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync + Debug {
    /// Summarize `text` to at most `target_chars` characters.
    ///
    /// # Arguments
    ///
    /// * `text` - The content to summarize
    /// * `target_chars` - Upper bound on the result length, in chars
    ///
    /// Implementations may return longer output; callers truncate. Errors are
    /// reported as [`crate::MemoryError::Summarization`].
    async fn summarize(&self, text: &str, target_chars: usize) -> MemoryResult<String>;
}

pub type SharedSummarizer = Arc<dyn Summarizer>;

/// Picks the highest-scoring sentences that fit the budget, in original order.
///
/// A sentence scores the average corpus frequency of its keywords, so
/// sentences about the text's dominant topic win.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn extract(text: &str, target_chars: usize) -> String {
        let collapsed = text::collapse_whitespace(text);
        if collapsed.chars().count() <= target_chars {
            return collapsed;
        }
        if target_chars == 0 {
            return String::new();
        }

        let sentences = text::sentences(&collapsed);
        let mut frequency: HashMap<String, usize> = HashMap::new();
        for word in text::words(&collapsed) {
            if word.chars().count() > 1 && !text::is_stopword(&word) {
                *frequency.entry(word).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(idx, sentence)| {
                let keywords = text::keywords(sentence);
                let score = if keywords.is_empty() {
                    0.0
                } else {
                    keywords
                        .iter()
                        .map(|k| frequency.get(k).copied().unwrap_or(0) as f64)
                        .sum::<f64>()
                        / keywords.len() as f64
                };
                (idx, score)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut chosen: Vec<usize> = Vec::new();
        let mut used = 0usize;
        for (idx, _) in &ranked {
            let len = sentences[*idx].chars().count();
            let extra = if chosen.is_empty() { len } else { len + 1 };
            if used + extra <= target_chars {
                chosen.push(*idx);
                used += extra;
            }
        }

        if chosen.is_empty() {
            let best = ranked.first().map_or(collapsed.as_str(), |(idx, _)| sentences[*idx].as_str());
            return text::truncate_at_word(best, target_chars);
        }

        chosen.sort_unstable();
        chosen
            .into_iter()
            .map(|idx| sentences[idx].as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait::async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str, target_chars: usize) -> MemoryResult<String> {
        Ok(Self::extract(text, target_chars))
    }
}
