// src/agent/search.rs
// Multi-stage fallback search over the chunked KB index
//
// Strategy: filter by the classified entry type first, then
// progressively loosen. The query is embedded exactly once; every
// attempt reuses the cached vector.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::agent::classifier::QueryTag;
use crate::analytics::{SearchAttempt, SearchExecution, TokenTracker};
use crate::embeddings::{Embedder, estimate_tokens};
use crate::error::Result;
use crate::http::{EMBEDDING_DEADLINE, SEARCH_DEADLINE};
use crate::kb::{KbHit, SearchFilter, VectorIndex};
use crate::utils::with_deadline;

/// Result of the fallback chain
#[derive(Debug)]
pub struct SearchOutcome {
    pub hits: Vec<KbHit>,
    pub attempts: Vec<SearchAttempt>,
    /// Cached query embedding, reused by parent reconstruction
    pub embedding: Vec<f32>,
    pub execution: SearchExecution,
}

/// Vector search with progressive fallback
pub struct SearchStrategy {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    meter: Arc<TokenTracker>,
    top_k: usize,
    similarity_threshold: f32,
}

impl SearchStrategy {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        meter: Arc<TokenTracker>,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            index,
            embedder,
            meter,
            top_k,
            similarity_threshold,
        }
    }

    /// Run the fallback chain for an enhanced query.
    ///
    /// An embedding failure fails the whole query; a search failure is
    /// treated as an empty attempt so the chain keeps going.
    pub async fn run(
        &self,
        query: &str,
        tag: QueryTag,
        user_class: Option<&str>,
        related_title: Option<&str>,
        session_id: &str,
    ) -> Result<SearchOutcome> {
        // Embed once, reuse everywhere
        let embed_started = Instant::now();
        let embedding = with_deadline(
            "embedding",
            EMBEDDING_DEADLINE,
            self.embedder.embed(query),
        )
        .await?;
        let embedding_time_ms = embed_started.elapsed().as_secs_f64() * 1000.0;

        self.meter
            .track_embedding(session_id, &self.embedder.model_name(), estimate_tokens(query));

        let user_class = user_class.filter(|c| !c.eq_ignore_ascii_case("both"));
        let mut attempts = Vec::new();
        let mut execution = SearchExecution {
            similarity_threshold: self.similarity_threshold,
            embedding_time_ms,
            ..SearchExecution::default()
        };

        // Primary: entry-type filter when the classifier was confident
        let entry_type = tag.entry_type();
        let primary_label = match entry_type {
            Some(_) => format!("primary:{}", tag.as_str()),
            None => "primary:broad_search".to_string(),
        };
        let primary_filter = SearchFilter {
            entry_type: entry_type.map(String::from),
            user_class: user_class.map(String::from),
            parent_entry_id: None,
        };

        let mut hits = self
            .attempt(
                &embedding,
                primary_filter,
                related_title,
                &primary_label,
                &mut attempts,
                Some(&mut execution),
            )
            .await;

        // Fallback: drop the entry-type filter (only if one was applied)
        if hits.is_empty() && entry_type.is_some() {
            info!(tag = tag.as_str(), "No results, retrying without entry-type filter");
            let filter = SearchFilter {
                user_class: user_class.map(String::from),
                ..SearchFilter::default()
            };
            hits = self
                .attempt(&embedding, filter, related_title, "fallback:no_filter", &mut attempts, None)
                .await;
        }

        // Type-cross fallback: failed how-to queries often live in error entries
        if hits.is_empty() && tag == QueryTag::Howto {
            info!("No results for howto, trying error entries");
            let filter = SearchFilter {
                entry_type: Some("error".into()),
                user_class: user_class.map(String::from),
                parent_entry_id: None,
            };
            hits = self
                .attempt(&embedding, filter, related_title, "fallback:error", &mut attempts, None)
                .await;
        }

        // Keyword-cross fallback: misclassified definition queries about errors
        if hits.is_empty() && tag == QueryTag::Definition && query.to_lowercase().contains("error")
        {
            info!("Definition query mentions 'error', trying error entries");
            let filter = SearchFilter {
                entry_type: Some("error".into()),
                user_class: user_class.map(String::from),
                parent_entry_id: None,
            };
            hits = self
                .attempt(
                    &embedding,
                    filter,
                    related_title,
                    "fallback:error_detected",
                    &mut attempts,
                    None,
                )
                .await;
        }

        Ok(SearchOutcome {
            hits,
            attempts,
            embedding,
            execution,
        })
    }

    /// One attempt: search, threshold-filter, constrain to the related
    /// title when targeted, cap to top K. Index errors read as empty.
    async fn attempt(
        &self,
        embedding: &[f32],
        filter: SearchFilter,
        related_title: Option<&str>,
        label: &str,
        attempts: &mut Vec<SearchAttempt>,
        execution: Option<&mut SearchExecution>,
    ) -> Vec<KbHit> {
        let search_started = Instant::now();
        let raw = match with_deadline(
            "vector_search",
            SEARCH_DEADLINE,
            self.index.search(embedding, &filter, self.top_k),
        )
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(label, error = %e, "Search attempt failed, treating as empty");
                Vec::new()
            }
        };
        let search_time_ms = search_started.elapsed().as_secs_f64() * 1000.0;
        let matched = raw.len();

        let mut hits: Vec<KbHit> = raw
            .into_iter()
            .filter(|hit| hit.score >= self.similarity_threshold)
            .collect();

        if let Some(needle) = related_title {
            let needle = needle.to_lowercase();
            hits.retain(|hit| hit.title().to_lowercase().contains(&needle));
        }

        hits.truncate(self.top_k);

        if let Some(execution) = execution {
            execution.filters_applied = filter.as_map();
            execution.documents_scanned = self.top_k;
            execution.documents_matched = matched;
            execution.documents_returned = hits.len();
            execution.search_time_ms = search_time_ms;
        }

        attempts.push(SearchAttempt {
            label: label.to_string(),
            entry_type: filter.entry_type,
            results: hits.len(),
        });

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::pricing::PriceTable;
    use std::sync::Mutex as StdMutex;

    struct FakeEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
        fn model_name(&self) -> String {
            "text-embedding-3-small".into()
        }
        fn dimensions(&self) -> usize {
            3
        }
        async fn probe(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Scripted index: pops one canned response per search call
    struct ScriptedIndex {
        responses: StdMutex<Vec<Vec<KbHit>>>,
        seen_filters: StdMutex<Vec<SearchFilter>>,
    }

    impl ScriptedIndex {
        fn new(responses: Vec<Vec<KbHit>>) -> Self {
            Self {
                responses: StdMutex::new(responses),
                seen_filters: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl VectorIndex for ScriptedIndex {
        async fn search(
            &self,
            _vector: &[f32],
            filter: &SearchFilter,
            _k: usize,
        ) -> Result<Vec<KbHit>> {
            self.seen_filters.lock().unwrap().push(filter.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(vec![])
            } else {
                Ok(responses.remove(0))
            }
        }
        async fn probe(&self) -> Result<()> {
            Ok(())
        }
    }

    fn hit(id: &str, title: &str, score: f32) -> KbHit {
        KbHit {
            id: id.into(),
            parent_entry_id: Some("p1".into()),
            parent_title: Some(title.into()),
            chunk_index: Some(0),
            total_chunks: Some(1),
            section_type: None,
            entry_type: "how_to".into(),
            user_class: "external".into(),
            category: None,
            tags: vec![],
            related_titles: vec![],
            content: "content".into(),
            score,
        }
    }

    fn strategy(index: Arc<ScriptedIndex>) -> SearchStrategy {
        SearchStrategy::new(
            index,
            Arc::new(FakeEmbedder),
            Arc::new(TokenTracker::new(Arc::new(PriceTable::load(None).unwrap()))),
            3,
            0.5,
        )
    }

    #[tokio::test]
    async fn test_primary_hit_stops_chain() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![hit("1", "Guide", 0.8)]]));
        let outcome = strategy(index.clone())
            .run("how do I upload photos", QueryTag::Howto, None, None, "s1")
            .await
            .unwrap();

        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].label, "primary:howto");
        let filters = index.seen_filters.lock().unwrap();
        assert_eq!(filters[0].entry_type.as_deref(), Some("how_to"));
    }

    #[tokio::test]
    async fn test_threshold_drops_weak_hits() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![
            hit("strong", "Guide", 0.8),
            hit("weak", "Guide", 0.3),
        ]]));
        let outcome = strategy(index)
            .run("how do I upload photos", QueryTag::Howto, None, None, "s1")
            .await
            .unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].id, "strong");
        assert_eq!(outcome.execution.documents_matched, 2);
        assert_eq!(outcome.execution.documents_returned, 1);
    }

    #[tokio::test]
    async fn test_fallback_chain_for_howto() {
        // primary empty, no-filter empty, error fallback hits
        let index = Arc::new(ScriptedIndex::new(vec![
            vec![],
            vec![],
            vec![hit("err", "Fixing Upload Failures", 0.7)],
        ]));
        let outcome = strategy(index.clone())
            .run("how do I upload photos", QueryTag::Howto, None, None, "s1")
            .await
            .unwrap();

        let labels: Vec<&str> = outcome.attempts.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["primary:howto", "fallback:no_filter", "fallback:error"]);
        assert_eq!(outcome.hits.len(), 1);

        let filters = index.seen_filters.lock().unwrap();
        assert_eq!(filters[1].entry_type, None);
        assert_eq!(filters[2].entry_type.as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn test_general_tag_searches_broad() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![]]));
        let outcome = strategy(index.clone())
            .run("upload photos", QueryTag::General, None, None, "s1")
            .await
            .unwrap();

        // No entry-type filter applied, so no no-filter fallback either
        let labels: Vec<&str> = outcome.attempts.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["primary:broad_search"]);
        let filters = index.seen_filters.lock().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].entry_type, None);
    }

    #[tokio::test]
    async fn test_definition_error_keyword_fallback() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![], vec![], vec![
            hit("e", "Error 405", 0.7),
        ]]));
        let outcome = strategy(index)
            .run("what does error 405 mean", QueryTag::Definition, None, None, "s1")
            .await
            .unwrap();
        let labels: Vec<&str> = outcome.attempts.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["primary:definition", "fallback:no_filter", "fallback:error_detected"]
        );
    }

    #[tokio::test]
    async fn test_related_title_constrains_hits() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![
            hit("1", "Upload Photos Guide", 0.8),
            hit("2", "Tenant Screening", 0.9),
        ]]));
        let outcome = strategy(index)
            .run(
                "photo size limits",
                QueryTag::General,
                None,
                Some("upload photos"),
                "s1",
            )
            .await
            .unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].id, "1");
    }

    #[tokio::test]
    async fn test_user_class_filter_passes_through() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![]]));
        strategy(index.clone())
            .run("upload photos", QueryTag::General, Some("external"), None, "s1")
            .await
            .unwrap();
        let filters = index.seen_filters.lock().unwrap();
        assert_eq!(filters[0].user_class.as_deref(), Some("external"));
    }

    #[tokio::test]
    async fn test_both_user_class_means_no_filter() {
        let index = Arc::new(ScriptedIndex::new(vec![vec![]]));
        strategy(index.clone())
            .run("upload photos", QueryTag::General, Some("both"), None, "s1")
            .await
            .unwrap();
        let filters = index.seen_filters.lock().unwrap();
        assert_eq!(filters[0].user_class, None);
    }

    #[tokio::test]
    async fn test_index_error_reads_as_empty() {
        struct FailingIndex;
        #[async_trait::async_trait]
        impl VectorIndex for FailingIndex {
            async fn search(
                &self,
                _vector: &[f32],
                _filter: &SearchFilter,
                _k: usize,
            ) -> Result<Vec<KbHit>> {
                Err(crate::AgentError::TransientUpstream {
                    stage: "vector_search",
                    message: "down".into(),
                })
            }
            async fn probe(&self) -> Result<()> {
                Ok(())
            }
        }

        let strategy = SearchStrategy::new(
            Arc::new(FailingIndex),
            Arc::new(FakeEmbedder),
            Arc::new(TokenTracker::new(Arc::new(PriceTable::load(None).unwrap()))),
            3,
            0.5,
        );
        let outcome = strategy
            .run("how do I upload photos", QueryTag::Howto, None, None, "s1")
            .await
            .unwrap();
        assert!(outcome.hits.is_empty());
        // Chain still ran: primary, no_filter, error
        assert_eq!(outcome.attempts.len(), 3);
    }
}
