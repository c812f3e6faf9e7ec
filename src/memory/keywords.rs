//! Keyword list codec
//!
//! Preference entries travel as a single delimiter-joined string. This module
//! splits that string into tokens, merges token lists without duplicates and
//! renders them back.

use std::collections::HashSet;

/// Canonical "no data" value for both history and preferences
pub const NO_DATA: &str = "none";

/// Marker the keyword extractor emits when it found nothing
const LEGACY_NO_DATA: &str = "无";

/// Joins keywords in the rendered form (fullwidth comma)
pub const KEYWORD_SEPARATOR: &str = "，";

const SPLIT_CHARS: [char; 5] = [',', '，', '、', ';', '；'];

/// True for inputs that carry no keywords at all
pub fn is_empty_marker(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed == NO_DATA || trimmed == LEGACY_NO_DATA
}

/// Split a keyword list on ASCII and East-Asian commas, trimming each token
pub fn split_keywords(raw: &str) -> Vec<String> {
    if is_empty_marker(raw) {
        return Vec::new();
    }

    raw.split(&SPLIT_CHARS[..])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ordered union of `existing` and `incoming`, capped to `max` entries.
///
/// Order is by most recent mention: existing tokens that `incoming` does not
/// repeat come first, then every incoming token in the order it first appears.
/// When the union is larger than `max`, tokens are dropped from the front, so
/// a keyword mentioned again in this call always survives the cap.
pub fn merge_keywords(existing: &[String], incoming: &[String], max: usize) -> Vec<String> {
    let mentioned: HashSet<&str> = incoming.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged: Vec<String> = Vec::with_capacity(existing.len() + incoming.len());

    let kept = existing
        .iter()
        .filter(|token| !mentioned.contains(token.as_str()));
    for token in kept.chain(incoming.iter()) {
        if seen.insert(token.as_str()) {
            merged.push(token.clone());
        }
    }

    if merged.len() > max {
        let excess = merged.len() - max;
        merged.drain(..excess);
    }

    merged
}

pub fn render_keywords(keywords: &[String]) -> String {
    keywords.join(KEYWORD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_handles_mixed_separators() {
        let parts = split_keywords(" fishing, movies，tea 、 jazz;; ");
        assert_eq!(parts, tokens(&["fishing", "movies", "tea", "jazz"]));
    }

    #[test]
    fn test_split_empty_markers() {
        assert!(split_keywords("").is_empty());
        assert!(split_keywords("   ").is_empty());
        assert!(split_keywords(NO_DATA).is_empty());
        assert!(split_keywords("无").is_empty());
        assert!(split_keywords(" , ，、").is_empty());
    }

    #[test]
    fn test_merge_drops_duplicates_and_moves_mentions_last() {
        let merged = merge_keywords(
            &tokens(&["fishing", "movies"]),
            &tokens(&["tea", "fishing", "tea"]),
            50,
        );
        assert_eq!(merged, tokens(&["movies", "tea", "fishing"]));
    }

    #[test]
    fn test_merge_caps_by_dropping_oldest() {
        let existing: Vec<String> = (0..50).map(|i| format!("k{}", i)).collect();
        let merged = merge_keywords(&existing, &tokens(&["fresh"]), 50);

        assert_eq!(merged.len(), 50);
        assert_eq!(merged.first().map(String::as_str), Some("k1"));
        assert_eq!(merged.last().map(String::as_str), Some("fresh"));
    }

    #[test]
    fn test_cap_keeps_keyword_mentioned_again() {
        let existing: Vec<String> = (0..50).map(|i| format!("k{}", i)).collect();
        let merged = merge_keywords(&existing, &tokens(&["k0", "fresh"]), 50);

        assert_eq!(merged.len(), 50);
        assert!(merged.contains(&"k0".to_string()));
        assert!(!merged.contains(&"k1".to_string()));
        assert_eq!(&merged[48..], &tokens(&["k0", "fresh"])[..]);
    }

    #[test]
    fn test_render_then_split_is_stable() {
        let merged = tokens(&["fishing", "movies"]);
        let rendered = render_keywords(&merged);
        assert_eq!(rendered, "fishing，movies");
        assert_eq!(split_keywords(&rendered), merged);
    }
}
