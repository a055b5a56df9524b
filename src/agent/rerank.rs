// src/agent/rerank.rs
// Heuristic reranking of retrieval hits
//
// Reorders vector hits with boosts the raw similarity cannot see:
// entry-type agreement with the query, keyword and phrase overlap, and
// a mild length preference. Scores stay in [0, 1].

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::kb::KbHit;

const STOP_WORDS: [&str; 10] = ["the", "a", "an", "is", "are", "was", "were", "but", "and", "or"];

static QUERY_PATTERNS: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad rerank pattern {p}: {e}")))
            .collect()
    };
    vec![
        ("error", compile(&[r"\berror\b", r"\bfail\b", r"\bnot work\b", r"\bbroken\b"])),
        ("how_to", compile(&[r"\bhow to\b", r"\bhow do\b", r"\bsteps\b", r"\bprocess\b"])),
        ("troubleshoot", compile(&[r"\bnot showing\b", r"\bmissing\b", r"\bcan'?t see\b"])),
        ("definition", compile(&[r"\bwhat is\b", r"\bwhat are\b", r"\bdefine\b"])),
    ]
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap_or_else(|e| panic!("bad word pattern: {e}")));

/// Reranker with a configured result cap
pub struct Reranker {
    max_results: usize,
}

impl Reranker {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }

    /// Rerank hits by boosted relevance, truncating to `max_results`.
    /// The raw similarity on each hit is left untouched; the boosted
    /// score only drives the ordering. Boosted scores stay in [0, 1].
    pub fn rerank(&self, hits: Vec<KbHit>, query: &str) -> Vec<KbHit> {
        if hits.is_empty() {
            return hits;
        }

        let query_type = detect_query_type(query);
        let keywords = extract_keywords(query);
        let bigrams = extract_bigrams(query);

        let mut scored: Vec<(f32, KbHit)> = hits
            .into_iter()
            .map(|hit| (score_hit(&hit, query_type, &keywords, &bigrams), hit))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.max_results);

        debug!(query_type, results = scored.len(), "Reranked results");
        scored.into_iter().map(|(_, hit)| hit).collect()
    }
}

fn detect_query_type(query: &str) -> &'static str {
    let query_lower = query.to_lowercase();
    for (query_type, patterns) in QUERY_PATTERNS.iter() {
        if patterns.iter().any(|p| p.is_match(&query_lower)) {
            return query_type;
        }
    }
    "general"
}

/// Keywords are lowercase non-stop-words longer than two characters
fn extract_keywords(query: &str) -> Vec<String> {
    let query_lower = query.to_lowercase();
    WORD.find_iter(&query_lower)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Adjacent word pairs, skipping very short ones
fn extract_bigrams(query: &str) -> Vec<String> {
    let query_lower = query.to_lowercase();
    let words: Vec<&str> = query_lower.split_whitespace().collect();
    words
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .filter(|phrase| phrase.len() > 5)
        .collect()
}

fn score_hit(hit: &KbHit, query_type: &str, keywords: &[String], bigrams: &[String]) -> f32 {
    let base = hit.score;
    let content = hit.content.to_lowercase();
    let title = hit.title().to_lowercase();

    let mut boost = 0.0f32;

    // Entry-type agreement
    match (query_type, hit.entry_type.as_str()) {
        ("error", "error") | ("how_to", "how_to") | ("definition", "definition") => boost += 0.2,
        ("troubleshoot", _)
            if ["fix", "solve", "troubleshoot"].iter().any(|w| content.contains(w)) =>
        {
            boost += 0.15
        }
        _ => {}
    }

    // Keyword density in content and title
    if !keywords.is_empty() {
        let content_matches = keywords.iter().filter(|k| content.contains(k.as_str())).count();
        boost += content_matches as f32 / keywords.len() as f32 * 0.1;

        let title_matches = keywords.iter().filter(|k| title.contains(k.as_str())).count();
        if title_matches > 0 {
            boost += title_matches as f32 / keywords.len() as f32 * 0.15;
        }
    }

    // Exact phrase matches
    for bigram in bigrams {
        if content.contains(bigram.as_str()) {
            boost += 0.1;
        }
    }

    // Length preference: short focused content over walls of text
    let word_count = content.split_whitespace().count();
    if word_count < 100 {
        boost += 0.05;
    } else if word_count > 500 {
        boost -= 0.05;
    }

    (base + boost).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, entry_type: &str, title: &str, content: &str, score: f32) -> KbHit {
        KbHit {
            id: id.into(),
            parent_entry_id: None,
            parent_title: Some(title.into()),
            chunk_index: None,
            total_chunks: None,
            section_type: None,
            entry_type: entry_type.into(),
            user_class: "external".into(),
            category: None,
            tags: vec![],
            related_titles: vec![],
            content: content.into(),
            score,
        }
    }

    #[test]
    fn test_truncates_and_clamps() {
        let reranker = Reranker::new(3);
        let hits = vec![
            hit("1", "how_to", "Upload Photos Guide", "how to upload photos step by step", 0.95),
            hit("2", "how_to", "Upload Photos Guide", "upload photos quickly", 0.9),
            hit("3", "definition", "Photos", "photos are images", 0.5),
            hit("4", "workflow", "Approvals", "approval chain", 0.4),
        ];
        let reranked = reranker.rerank(hits, "how do I upload photos");
        assert_eq!(reranked.len(), 3);
        for h in &reranked {
            assert!((0.0..=1.0).contains(&h.score), "score {}", h.score);
        }
    }

    #[test]
    fn test_similarity_scores_survive_reranking() {
        let reranker = Reranker::new(2);
        let hits = vec![
            hit("1", "how_to", "Upload Photos Guide", "how to upload photos", 0.61),
            hit("2", "definition", "Photos", "photos are images", 0.73),
        ];
        let reranked = reranker.rerank(hits, "how do I upload photos");
        let mut scores: Vec<f32> = reranked.iter().map(|h| h.score).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(scores, vec![0.61, 0.73]);
    }

    #[test]
    fn test_type_match_outranks_raw_similarity() {
        let reranker = Reranker::new(3);
        let hits = vec![
            hit("def", "definition", "Photos", "photos are listing images", 0.62),
            hit("howto", "how_to", "Upload Photos Guide", "how to upload photos", 0.60),
        ];
        let reranked = reranker.rerank(hits, "how do I upload photos");
        assert_eq!(reranked[0].id, "howto");
    }

    #[test]
    fn test_empty_input_passthrough() {
        let reranker = Reranker::new(3);
        assert!(reranker.rerank(vec![], "anything").is_empty());
    }

    #[test]
    fn test_detect_query_type() {
        assert_eq!(detect_query_type("upload error 405"), "error");
        assert_eq!(detect_query_type("how to add a tenant"), "how_to");
        assert_eq!(detect_query_type("photos not showing"), "troubleshoot");
        assert_eq!(detect_query_type("what is a listing"), "definition");
        assert_eq!(detect_query_type("tenants"), "general");
    }

    #[test]
    fn test_keywords_drop_stop_words() {
        let keywords = extract_keywords("what is the upload process");
        assert!(keywords.contains(&"upload".to_string()));
        assert!(keywords.contains(&"process".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"is".to_string()));
    }

    #[test]
    fn test_short_content_beats_long_at_equal_similarity() {
        let reranker = Reranker::new(2);
        let long_content = "word ".repeat(600);
        let hits = vec![
            hit("long", "how_to", "Guide", &long_content, 0.7),
            hit("short", "how_to", "Guide", "short focused answer", 0.7),
        ];
        let reranked = reranker.rerank(hits, "plain question");
        assert_eq!(reranked[0].id, "short");
    }
}
