/// Text utilities shared by query relevance, novelty scoring, similarity
/// and compression.
///
/// All lengths are measured in chars, never bytes, so truncation is always
/// safe on multi-byte content.
use regex::Regex;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}_]+(?:'[\p{L}]+)?").expect("valid word regex"));

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]*").expect("valid sentence regex"));

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "of", "on", "or",
    "she", "so", "that", "the", "their", "then", "there", "these", "they", "this", "to",
    "was", "we", "were", "what", "when", "which", "while", "who", "will", "with", "you",
];

/// Lowercased word tokens in order of appearance.
pub fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Set of all lowercased words.
pub fn word_set(text: &str) -> HashSet<String> {
    words(text).into_iter().collect()
}

/// Whether a lowercased token is a stopword.
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Content-bearing words: lowercased, no stopwords, no single chars.
pub fn keywords(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !is_stopword(w))
        .collect()
}

/// Split into trimmed, non-empty sentences, keeping terminal punctuation.
pub fn sentences(text: &str) -> Vec<String> {
    SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Collapse all runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Jaccard overlap of two sets. Two empty sets are identical.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Share of `needles` present in `haystack`. Empty needles give 0.
pub fn coverage<T: Eq + Hash>(needles: &HashSet<T>, haystack: &HashSet<T>) -> f64 {
    if needles.is_empty() {
        return 0.0;
    }
    needles.iter().filter(|n| haystack.contains(*n)).count() as f64 / needles.len() as f64
}

/// First `max_chars` chars of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Truncate to at most `max_chars`, preferring the last word boundary.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    let hard = truncate_chars(text, max_chars);
    if hard.len() == text.len() {
        return hard;
    }
    match hard.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => hard[..idx].trim_end().to_string(),
        _ => hard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwords_sorted() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn test_words_and_keywords() {
        assert_eq!(words("The cat's HAT, 42!"), vec!["the", "cat's", "hat", "42"]);
        let kw = keywords("The deploy of the API failed");
        assert!(kw.contains("deploy"));
        assert!(kw.contains("api"));
        assert!(!kw.contains("the"));
    }

    #[test]
    fn test_sentences() {
        let s = sentences("First one. Second one!\nThird");
        assert_eq!(s, vec!["First one.", "Second one!", "Third"]);
    }

    #[test]
    fn test_jaccard() {
        let a = word_set("alpha beta gamma");
        let b = word_set("beta gamma delta");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&HashSet::<String>::new(), &HashSet::new()), 1.0);
    }

    #[test]
    fn test_truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_at_word("alpha beta gamma", 12), "alpha beta");
        assert_eq!(truncate_at_word("alphabetagamma", 5), "alpha");
    }
}
