// src/agent/parent.rs
// Parent document reconstruction
//
// When a query asks for the complete picture ("how do I...", "walk me
// through...") the matched chunks are expanded to every chunk of their
// parent entries. Specific queries ("what is step 3") keep only the
// chunks the search matched.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::http::SEARCH_DEADLINE;
use crate::kb::{KbHit, SearchFilter, VectorIndex};
use crate::utils::with_deadline;

static COMPREHENSIVE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bhow\s+(do\s+i|to|can\s+i)\s+\w+",
        r"\bwhat\s+(is\s+the|are\s+the)\s+steps",
        r"\b(all|entire|complete|full|whole)\b",
        r"\bstep\s+by\s+step\b",
        r"\bwalk\s+me\s+through\b",
        r"\bguide\b",
        r"\bprocess\b",
        r"\bprocedure\b",
        r"^how\s+(do\s+i|to|can\s+i)\s+\w+\s*\??$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad comprehensive pattern {p}: {e}")))
    .collect()
});

static SPECIFIC: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bstep\s+\d+\b",
        r"\bwhat\s+(is|does|means?)\b",
        r"\berror\b",
        r"\bissue\b",
        r"\bproblem\b",
        r"\b(which|where|when)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad specific pattern {p}: {e}")))
    .collect()
});

/// True when the query wants the full parent document rather than the
/// matched chunks. Specific patterns short-circuit to false; ambiguous
/// queries stay specific to avoid over-fetching.
pub fn needs_full_context(query: &str) -> bool {
    let query_lower = query.to_lowercase();
    let query_lower = query_lower.trim();

    if SPECIFIC.iter().any(|p| p.is_match(query_lower)) {
        return false;
    }
    COMPREHENSIVE.iter().any(|p| p.is_match(query_lower))
}

/// Expands matched chunks to full parent documents
pub struct ParentExpansion {
    index: Arc<dyn VectorIndex>,
    /// Extra chunks requested beyond total_chunks, in case it is stale
    refetch_buffer: usize,
}

impl ParentExpansion {
    pub fn new(index: Arc<dyn VectorIndex>, refetch_buffer: usize) -> Self {
        Self { index, refetch_buffer }
    }

    /// Expand `hits` to whole parents when the query warrants it.
    ///
    /// At most one refetch is issued per parent per query; a failed
    /// refetch falls back to the chunks already matched for that parent.
    /// The cached query embedding is reused for every refetch.
    pub async fn expand(&self, hits: Vec<KbHit>, query: &str, embedding: &[f32]) -> Vec<KbHit> {
        if hits.is_empty() || !needs_full_context(query) {
            debug!("Query is specific, keeping matched chunks only");
            return hits;
        }

        // Group by parent, preserving first-seen parent order
        let mut parent_order: Vec<String> = Vec::new();
        let mut groups: std::collections::HashMap<String, Vec<KbHit>> =
            std::collections::HashMap::new();
        let mut standalone = Vec::new();

        for hit in hits {
            match hit.parent_entry_id.clone() {
                Some(parent_id) => {
                    if !groups.contains_key(&parent_id) {
                        parent_order.push(parent_id.clone());
                    }
                    groups.entry(parent_id).or_default().push(hit);
                }
                None => standalone.push(hit),
            }
        }

        if groups.is_empty() {
            return standalone;
        }

        info!(parents = groups.len(), "Expanding parent documents");

        let mut expanded = Vec::new();
        for parent_id in &parent_order {
            let Some(mut matched) = groups.remove(parent_id) else {
                continue;
            };
            let total = matched
                .iter()
                .filter_map(|h| h.total_chunks)
                .max()
                .unwrap_or(0) as usize;

            let mut chunks = if matched.len() >= total {
                debug!(parent_id, total, "Already holding every chunk of parent");
                matched
            } else {
                match self.refetch_parent(parent_id, total, embedding).await {
                    Some(fetched) if !fetched.is_empty() => fetched,
                    _ => {
                        warn!(parent_id, "Parent refetch failed, keeping matched chunks");
                        matched.sort_by_key(|h| h.chunk_index.unwrap_or(u32::MAX));
                        matched
                    }
                }
            };

            chunks.sort_by_key(|h| h.chunk_index.unwrap_or(u32::MAX));
            expanded.extend(chunks);
        }

        expanded.extend(standalone);
        dedupe_by_id(expanded)
    }

    async fn refetch_parent(
        &self,
        parent_id: &str,
        total: usize,
        embedding: &[f32],
    ) -> Option<Vec<KbHit>> {
        let filter = SearchFilter {
            parent_entry_id: Some(parent_id.to_string()),
            ..SearchFilter::default()
        };
        let k = total + self.refetch_buffer;

        let result = with_deadline(
            "vector_search",
            SEARCH_DEADLINE,
            self.index.search(embedding, &filter, k),
        )
        .await;

        match result {
            Ok(chunks) => {
                info!(parent_id, fetched = chunks.len(), "Refetched parent chunks");
                Some(chunks)
            }
            Err(e) => {
                warn!(parent_id, error = %e, "Parent refetch errored");
                None
            }
        }
    }
}

/// Deduplicate by chunk id, keeping first occurrence. Hits without an id
/// are kept unconditionally.
fn dedupe_by_id(hits: Vec<KbHit>) -> Vec<KbHit> {
    let mut seen: HashSet<String> = HashSet::new();
    hits.into_iter()
        .filter(|hit| hit.id.is_empty() || seen.insert(hit.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comprehensive_queries() {
        for query in [
            "how do I upload photos",
            "how to create a listing?",
            "what are the steps for onboarding",
            "walk me through the whole setup",
            "complete guide to maintenance requests",
            "step by step tenant screening",
        ] {
            assert!(needs_full_context(query), "query: {query}");
        }
    }

    #[test]
    fn test_specific_queries_short_circuit() {
        for query in [
            "what is step 3 of uploading photos",
            "what is an API key",
            "how do I fix error 405",
            "which plan includes automation",
            "where is the export button",
            "problem with the entire sync process",
        ] {
            assert!(!needs_full_context(query), "query: {query}");
        }
    }

    #[test]
    fn test_ambiguous_queries_stay_specific() {
        assert!(!needs_full_context("upload photos"));
        assert!(!needs_full_context("tenant screening"));
    }

    fn hit(id: &str, parent: Option<&str>, index: u32, total: u32) -> KbHit {
        KbHit {
            id: id.into(),
            parent_entry_id: parent.map(String::from),
            parent_title: parent.map(|p| format!("{p} title")),
            chunk_index: Some(index),
            total_chunks: Some(total),
            section_type: None,
            entry_type: "how_to".into(),
            user_class: "external".into(),
            category: None,
            tags: vec![],
            related_titles: vec![],
            content: format!("chunk {id}"),
            score: 0.8,
        }
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let hits = vec![hit("a", None, 0, 1), hit("b", None, 0, 1), hit("a", None, 0, 1)];
        let deduped = dedupe_by_id(hits);
        assert_eq!(deduped.len(), 2);
    }

    struct FakeIndex {
        parent_chunks: Vec<KbHit>,
    }

    #[async_trait::async_trait]
    impl VectorIndex for FakeIndex {
        async fn search(
            &self,
            _vector: &[f32],
            filter: &SearchFilter,
            _k: usize,
        ) -> crate::Result<Vec<KbHit>> {
            assert!(filter.parent_entry_id.is_some());
            Ok(self.parent_chunks.clone())
        }

        async fn probe(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_expand_fills_parent_holes() {
        // Search matched chunk 2 of 3; the refetch returns all three.
        let index = Arc::new(FakeIndex {
            parent_chunks: vec![
                hit("p1-2", Some("p1"), 2, 3),
                hit("p1-0", Some("p1"), 0, 3),
                hit("p1-1", Some("p1"), 1, 3),
            ],
        });
        let expansion = ParentExpansion::new(index, 5);

        let matched = vec![hit("p1-1", Some("p1"), 1, 3)];
        let expanded = expansion
            .expand(matched, "how do I upload photos", &[0.0; 4])
            .await;

        let ids: Vec<&str> = expanded.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-0", "p1-1", "p1-2"]);
    }

    #[tokio::test]
    async fn test_expand_skips_when_complete() {
        struct PanicIndex;
        #[async_trait::async_trait]
        impl VectorIndex for PanicIndex {
            async fn search(
                &self,
                _vector: &[f32],
                _filter: &SearchFilter,
                _k: usize,
            ) -> crate::Result<Vec<KbHit>> {
                panic!("refetch must not run when every chunk is already matched");
            }
            async fn probe(&self) -> crate::Result<()> {
                Ok(())
            }
        }

        let expansion = ParentExpansion::new(Arc::new(PanicIndex), 5);
        let matched = vec![hit("p1-1", Some("p1"), 1, 2), hit("p1-0", Some("p1"), 0, 2)];
        let expanded = expansion
            .expand(matched, "how do I upload photos", &[0.0; 4])
            .await;

        let ids: Vec<&str> = expanded.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-0", "p1-1"]);
    }

    #[tokio::test]
    async fn test_specific_query_skips_expansion() {
        let expansion = ParentExpansion::new(
            Arc::new(FakeIndex { parent_chunks: vec![] }),
            5,
        );
        let matched = vec![hit("p1-1", Some("p1"), 1, 3)];
        let expanded = expansion
            .expand(matched.clone(), "what is step 3 of uploading photos", &[0.0; 4])
            .await;
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].id, "p1-1");
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_matched_chunks() {
        struct FailingIndex;
        #[async_trait::async_trait]
        impl VectorIndex for FailingIndex {
            async fn search(
                &self,
                _vector: &[f32],
                _filter: &SearchFilter,
                _k: usize,
            ) -> crate::Result<Vec<KbHit>> {
                Err(crate::AgentError::TransientUpstream {
                    stage: "vector_search",
                    message: "down".into(),
                })
            }
            async fn probe(&self) -> crate::Result<()> {
                Ok(())
            }
        }

        let expansion = ParentExpansion::new(Arc::new(FailingIndex), 5);
        let matched = vec![hit("p1-1", Some("p1"), 1, 3)];
        let expanded = expansion
            .expand(matched, "how do I upload photos", &[0.0; 4])
            .await;
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].id, "p1-1");
    }
}
