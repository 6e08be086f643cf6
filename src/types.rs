/// Common types used throughout continuum memory.
///
/// This module defines the memory data model: the [`MemoryEntry`] that every
/// tier stores, the [`Scope`] that partitions all state, and the small enums
/// (strata, importance, sources) the rest of the crate reasons about.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::config::InputLimits;
use crate::text;

/// Identifier of a memory entry.
pub type MemoryId = String;

/// Kind of owner a scope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OwnerKind {
    /// A single agent
    Agent,
    /// A shared channel
    Channel,
}

/// Owner key that partitions every piece of mutable memory state.
///
/// Stratum storage, cycle counters, decay timers, prediction buffers and
/// reasoning contexts are all keyed by scope. Two scopes never share
/// mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    /// Agent or channel
    pub kind: OwnerKind,
    /// Owner identifier
    pub owner_id: String,
}

impl Scope {
    /// Create a scope for an agent.
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            kind: OwnerKind::Agent,
            owner_id: id.into(),
        }
    }

    /// Create a scope for a channel.
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: OwnerKind::Channel,
            owner_id: id.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OwnerKind::Agent => write!(f, "agent:{}", self.owner_id),
            OwnerKind::Channel => write!(f, "channel:{}", self.owner_id),
        }
    }
}

/// The five temporal memory tiers, ordered from least to most permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stratum {
    /// Immediate scratch context of the current cycles
    Working,
    /// Recent observations that survived a few cycles
    ShortTerm,
    /// Compressed episodes
    Episodic,
    /// Durable knowledge, bounded by explicit archival
    LongTerm,
    /// Abstracted facts and patterns
    Semantic,
}

impl Stratum {
    /// All strata, least permanent first.
    pub const ALL: [Stratum; 5] = [
        Stratum::Working,
        Stratum::ShortTerm,
        Stratum::Episodic,
        Stratum::LongTerm,
        Stratum::Semantic,
    ];

    /// Default capacity ceiling of the tier.
    pub fn default_capacity(self) -> usize {
        match self {
            Stratum::Working => 50,
            Stratum::ShortTerm => 200,
            Stratum::Episodic => 500,
            Stratum::LongTerm => 2000,
            Stratum::Semantic => 1000,
        }
    }

    /// Number of cycles between maintenance passes over the tier.
    pub fn update_frequency(self) -> u64 {
        match self {
            Stratum::Working => 1,
            Stratum::ShortTerm => 3,
            Stratum::Episodic => 10,
            Stratum::LongTerm | Stratum::Semantic => 50,
        }
    }

    /// Position in the permanence ordering (0 = least permanent).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name, also used in configuration keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Stratum::Working => "working",
            Stratum::ShortTerm => "short_term",
            Stratum::Episodic => "episodic",
            Stratum::LongTerm => "long_term",
            Stratum::Semantic => "semantic",
        }
    }
}

impl fmt::Display for Stratum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stratum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "working" => Ok(Stratum::Working),
            "short_term" | "shortterm" => Ok(Stratum::ShortTerm),
            "episodic" => Ok(Stratum::Episodic),
            "long_term" | "longterm" => Ok(Stratum::LongTerm),
            "semantic" => Ok(Stratum::Semantic),
            _ => Err(format!("Unknown stratum: {}", s)),
        }
    }
}

/// Importance level of an entry. Ordered: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Importance {
    /// All levels, lowest first.
    pub const ALL: [Importance; 4] = [
        Importance::Low,
        Importance::Medium,
        Importance::High,
        Importance::Critical,
    ];

    /// Normalized weight in (0, 1].
    pub fn weight(self) -> f64 {
        match self {
            Importance::Low => 0.25,
            Importance::Medium => 0.5,
            Importance::High => 0.75,
            Importance::Critical => 1.0,
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Importance::Low => write!(f, "low"),
            Importance::Medium => write!(f, "medium"),
            Importance::High => write!(f, "high"),
            Importance::Critical => write!(f, "critical"),
        }
    }
}

/// Tag describing what the content of an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentType {
    #[default]
    Text,
    /// Serialized structured data
    Structured,
    /// Output of summarization or merge
    Summary,
    /// Abstracted pattern
    Pattern,
}

/// Phase of the external cognitive cycle that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CognitivePhase {
    Observation,
    Reasoning,
    Planning,
    Action,
    Reflection,
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceKind {
    #[default]
    Observation,
    Reasoning,
    ToolResult,
    Message,
    /// Produced by consolidation or pattern detection
    Consolidation,
    External,
}

/// Source descriptor: kind plus originating agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemorySource {
    pub kind: SourceKind,
    pub agent_id: Option<String>,
}

impl MemorySource {
    pub fn new(kind: SourceKind, agent_id: Option<String>) -> Self {
        Self { kind, agent_id }
    }
}

/// Context an entry was recorded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub agent_id: String,
    pub channel_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub phase: Option<CognitivePhase>,
}

/// How an entry's content was compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionMethod {
    /// Whitespace and redundancy trimming
    Light,
    /// Extractive summary to a fraction of the original
    Moderate,
    /// Abstraction to core facts
    Heavy,
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMethod::Light => write!(f, "light"),
            CompressionMethod::Moderate => write!(f, "moderate"),
            CompressionMethod::Heavy => write!(f, "heavy"),
        }
    }
}

/// Metadata attached to an entry once it has been compressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetadata {
    /// Content length in chars before the first compression
    pub original_length: usize,
    /// Current length divided by `original_length`
    pub compression_ratio: f64,
    pub method: CompressionMethod,
}

/// One recorded tier change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Stratum,
    pub to: Stratum,
    pub rationale: String,
    pub at: DateTime<Utc>,
}

/// The atomic unit of memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub stratum: Stratum,
    pub content: String,
    pub content_type: ContentType,
    pub importance: Importance,
    pub tags: BTreeSet<String>,
    pub source: MemorySource,
    pub context: MemoryContext,
    /// Only ever increases
    pub access_count: u64,
    /// Only ever moves forward
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Non-owning back-links; may dangle after eviction
    pub related_memories: Vec<MemoryId>,
    pub compression: Option<CompressionMetadata>,
    /// Bounded tier-change history, oldest first
    pub transitions: Vec<TransitionRecord>,
}

impl MemoryEntry {
    /// Content length in chars.
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Record one read. `last_accessed` never moves backwards.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    /// Hours since the last access, never negative.
    pub fn hours_since_access(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.last_accessed);
        (elapsed.num_milliseconds().max(0) as f64) / 3_600_000.0
    }

    /// Append a transition record, dropping the oldest beyond `max_history`.
    ///
    /// The newest record is always kept.
    pub(crate) fn push_transition(&mut self, record: TransitionRecord, max_history: usize) {
        let max_history = max_history.max(1);
        self.transitions.push(record);
        if self.transitions.len() > max_history {
            let excess = self.transitions.len() - max_history;
            self.transitions.drain(..excess);
        }
    }

    /// Rough in-memory footprint in bytes.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<MemoryEntry>()
            + self.id.len()
            + self.content.len()
            + self.tags.iter().map(|t| t.len() + 24).sum::<usize>()
            + self.related_memories.iter().map(|r| r.len() + 24).sum::<usize>()
            + self.context.agent_id.len()
            + self.context.channel_id.as_ref().map_or(0, |c| c.len())
            + self
                .transitions
                .iter()
                .map(|t| t.rationale.len() + std::mem::size_of::<TransitionRecord>())
                .sum::<usize>()
    }
}

/// Caller-supplied description of a new entry.
///
/// `add_memory` assigns the id, timestamps and counters; everything here is
/// clamped against [`InputLimits`] before it is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDraft {
    pub content: String,
    pub content_type: ContentType,
    pub importance: Importance,
    pub tags: Vec<String>,
    pub source: MemorySource,
    pub channel_id: Option<String>,
    pub phase: Option<CognitivePhase>,
    pub related_memories: Vec<MemoryId>,
}

impl MemoryDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
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

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_source(mut self, kind: SourceKind, agent_id: Option<String>) -> Self {
        self.source = MemorySource::new(kind, agent_id);
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_phase(mut self, phase: CognitivePhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_related<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MemoryId>,
    {
        self.related_memories.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Clamp untrusted fields to the configured limits.
    pub(crate) fn clamp(mut self, limits: &InputLimits) -> Self {
        self.content = text::truncate_chars(&self.content, limits.max_content_chars);
        self.tags = normalize_tags(self.tags, limits);
        let mut seen = HashSet::new();
        self.related_memories
            .retain(|id| !id.is_empty() && seen.insert(id.clone()));
        self.related_memories.truncate(limits.max_related);
        self
    }
}

/// Trim, lowercase, drop empties and cap both count and length of tags.
pub(crate) fn normalize_tags<I>(tags: I, limits: &InputLimits) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let tag = text::truncate_chars(tag.trim(), limits.max_tag_chars).to_lowercase();
        if tag.is_empty() || !seen.insert(tag.clone()) {
            continue;
        }
        out.push(tag);
        if out.len() >= limits.max_tags {
            break;
        }
    }
    out
}
