/// Lexical similarity between entries and grouping of near-duplicates.
///
/// Similarity is a weighted blend of keyword overlap (content) and tag
/// overlap. When neither entry carries tags, content overlap alone decides.
/// Content with no keywords overlaps with nothing, not even itself.
/// Groups are connected components of the "at least `threshold` similar"
/// graph, found with union-find.
use std::collections::{BTreeMap, HashSet};

use crate::config::CompressionConfig;
use crate::text;
use crate::types::MemoryEntry;

/// Similarity in [0, 1].
pub fn similarity(a: &MemoryEntry, b: &MemoryEntry, config: &CompressionConfig) -> f64 {
    let keywords_a = text::keywords(&a.content);
    let keywords_b = text::keywords(&b.content);
    let content = if keywords_a.is_empty() || keywords_b.is_empty() {
        0.0
    } else {
        text::jaccard(&keywords_a, &keywords_b)
    };
    if a.tags.is_empty() && b.tags.is_empty() {
        return content;
    }

    let tags_a: HashSet<&String> = a.tags.iter().collect();
    let tags_b: HashSet<&String> = b.tags.iter().collect();
    let tags = text::jaccard(&tags_a, &tags_b);

    let total = config.content_weight + config.tag_weight;
    if total <= 0.0 {
        return content;
    }
    ((config.content_weight * content + config.tag_weight * tags) / total).clamp(0.0, 1.0)
}

/// Groups (by index into `entries`) of at least `min_size` mutually linked
/// entries, ordered by their first member.
pub fn find_similar_groups(
    entries: &[MemoryEntry],
    threshold: f64,
    min_size: usize,
    config: &CompressionConfig,
) -> Vec<Vec<usize>> {
    let n = entries.len();
    if n < min_size.max(2) {
        return Vec::new();
    }

    let mut parent: Vec<usize> = (0..n).collect();
    let mut rank = vec![0usize; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if similarity(&entries[i], &entries[j], config) >= threshold {
                union(&mut parent, &mut rank, i, j);
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }

    let mut groups: Vec<Vec<usize>> = components
        .into_values()
        .filter(|group| group.len() >= min_size.max(2))
        .collect();
    groups.sort_by_key(|group| group[0]);
    groups
}

fn find(parent: &mut [usize], i: usize) -> usize {
    if parent[i] != i {
        parent[i] = find(parent, parent[i]);
    }
    parent[i]
}

fn union(parent: &mut [usize], rank: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra == rb {
        return;
    }
    if rank[ra] < rank[rb] {
        parent[ra] = rb;
    } else if rank[ra] > rank[rb] {
        parent[rb] = ra;
    } else {
        parent[rb] = ra;
        rank[ra] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentType, Importance, MemoryContext, MemorySource, Stratum};
    use chrono::Utc;

    fn entry(content: &str, tags: &[&str]) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            id: content.to_string(),
            stratum: Stratum::Episodic,
            content: content.into(),
            content_type: ContentType::Text,
            importance: Importance::Medium,
            tags: tags.iter().map(|t| t.to_string()).collect(),
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
    fn test_similarity_blend() {
        let config = CompressionConfig::default();
        let a = entry("deploy api service failed", &["deploy"]);
        let b = entry("deploy api service failed", &["deploy"]);
        assert!((similarity(&a, &b, &config) - 1.0).abs() < 1e-9);

        let c = entry("deploy api service failed", &["incident"]);
        assert!((similarity(&a, &c, &config) - 0.7).abs() < 1e-9);

        let d = entry("lunch menu tomorrow", &[]);
        let e = entry("quarterly budget review", &[]);
        assert_eq!(similarity(&d, &e, &config), 0.0);
    }

    #[test]
    fn test_find_similar_groups() {
        let config = CompressionConfig::default();
        let entries = vec![
            entry("cache miss on user lookup", &[]),
            entry("weekly planning notes", &[]),
            entry("cache miss on user lookup again", &[]),
            entry("cache miss user lookup", &[]),
        ];
        let groups = find_similar_groups(&entries, 0.6, 2, &config);
        assert_eq!(groups, vec![vec![0, 2, 3]]);

        assert!(find_similar_groups(&entries, 0.6, 4, &config).is_empty());
    }

    #[test]
    fn test_keywordless_content_is_never_similar() {
        let config = CompressionConfig::default();
        let entries = vec![entry("👍", &[]), entry("🔥 🔥", &[]), entry("x = 5", &[])];
        for a in &entries {
            for b in &entries {
                assert_eq!(similarity(a, b, &config), 0.0);
            }
        }
        assert!(find_similar_groups(&entries, 0.1, 2, &config).is_empty());

        let keyed = entry("x = 5", &["math"]);
        let other = entry("🔥", &["math"]);
        let tags_only = config.tag_weight / (config.content_weight + config.tag_weight);
        assert!((similarity(&keyed, &other, &config) - tags_only).abs() < 1e-9);
    }
}
