// src/agent/orchestrator.rs
// Top-level per-query state machine
//
// Ingest -> classify -> intelligence -> routed retrieval -> parent
// reconstruction -> rerank -> generate -> escalate -> commit. The
// caller holds the session lock for the whole call, so per-session
// mutations never interleave.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::agent::classifier::{QueryTag, classify};
use crate::agent::escalate::{EscalationEngine, shape_response};
use crate::agent::intelligence::{QueryIntelligence, Routing};
use crate::agent::parent::{ParentExpansion, needs_full_context};
use crate::agent::rerank::Reranker;
use crate::agent::respond::ResponseGenerator;
use crate::agent::search::SearchStrategy;
use crate::analytics::{MetricsCollector, QueryMetrics, SearchAttempt, TokenTracker};
use crate::error::Result;
use crate::kb::KbHit;
use crate::memory::{SessionManager, SessionState, TurnMetadata, TurnRole};
use crate::prompts::PromptSet;
use crate::utils::truncate_chars;

/// Cap on the related-doc titles remembered per session
const MAX_RELATED_DOCS: usize = 12;

const INTERNAL_ERROR_RESPONSE: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";

/// A source reference shown to the caller
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub section: String,
    pub confidence: f32,
    pub content_preview: String,
    pub entry_type: String,
    pub user_type: String,
    pub similarity_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SourceRef {
    fn from_hit(hit: &KbHit) -> Self {
        Self {
            title: hit.title().to_string(),
            section: hit.entry_type.clone(),
            confidence: hit.score,
            content_preview: truncate_chars(&hit.content, 200),
            entry_type: hit.entry_type.clone(),
            user_type: hit.user_class.clone(),
            similarity_score: hit.score,
            category: hit.category.clone(),
        }
    }

    /// Synthetic source for the answer-from-context branch
    fn conversation_context() -> Self {
        Self {
            title: "Conversation Context".into(),
            section: "context".into(),
            confidence: 0.9,
            content_preview: String::new(),
            entry_type: "context".into(),
            user_type: "both".into(),
            similarity_score: 0.9,
            category: None,
        }
    }
}

/// Category, intent and tags extracted by query intelligence
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub intent: String,
    pub tags: Vec<String>,
}

/// Structured response payload for one query
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub response: String,
    pub confidence: f32,
    pub classification_confidence: f32,
    pub sources: Vec<SourceRef>,
    pub query_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    pub search_attempts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_metadata: Option<QueryMetadata>,
    pub requires_escalation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_metrics: Option<QueryMetrics>,
}

/// What the routed stages hand back for the commit step
struct StageOutput {
    response: String,
    confidence: f32,
    sources: Vec<SourceRef>,
    routing: Option<Routing>,
    enhanced_query: Option<String>,
    query_metadata: Option<QueryMetadata>,
    requires_escalation: bool,
    hits: Vec<KbHit>,
}

/// Composes the pipeline components and drives one query at a time
pub struct Orchestrator {
    intelligence: QueryIntelligence,
    search: SearchStrategy,
    parent: ParentExpansion,
    reranker: Reranker,
    responder: ResponseGenerator,
    escalation: EscalationEngine,
    sessions: Arc<SessionManager>,
    meter: Arc<TokenTracker>,
    prompts: Arc<PromptSet>,
}

impl Orchestrator {
    pub fn new(
        intelligence: QueryIntelligence,
        search: SearchStrategy,
        parent: ParentExpansion,
        reranker: Reranker,
        responder: ResponseGenerator,
        escalation: EscalationEngine,
        sessions: Arc<SessionManager>,
        meter: Arc<TokenTracker>,
        prompts: Arc<PromptSet>,
    ) -> Self {
        Self {
            intelligence,
            search,
            parent,
            reranker,
            responder,
            escalation,
            sessions,
            meter,
            prompts,
        }
    }

    /// Process one query. The caller must hold the session lock that
    /// guards `state`. Always returns a reply; stage failures without a
    /// local fallback become a civil internal-error response that is
    /// still committed to the turn log and analytics buffer.
    pub async fn process_query(
        &self,
        query: &str,
        session_id: &str,
        state: &mut SessionState,
        user_class: Option<&str>,
    ) -> AgentReply {
        let mut metrics = MetricsCollector::start(query);

        // Ingest: the user turn lands in the cache before anything else
        if let Err(e) = self
            .sessions
            .add_message(state, TurnRole::User, query, None, None)
            .await
        {
            warn!(session_id, error = %e, "Failed to append user turn");
        }

        metrics.start_timer("classification");
        let (tag, classification_confidence) = classify(query);
        metrics.record_classification(tag.as_str(), classification_confidence);
        info!(session_id, tag = tag.as_str(), classification_confidence, "Query classified");

        let output = if tag == QueryTag::Greeting {
            self.greeting_output(&mut metrics)
        } else {
            match self
                .run_stages(query, session_id, state, tag, user_class, &mut metrics)
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    error!(session_id, error = %e, "Query pipeline failed");
                    metrics.record_error(&format!("{}: {e}", e.kind()));
                    StageOutput {
                        response: INTERNAL_ERROR_RESPONSE.to_string(),
                        confidence: 0.0,
                        sources: vec![],
                        routing: None,
                        enhanced_query: None,
                        query_metadata: None,
                        requires_escalation: false,
                        hits: vec![],
                    }
                }
            }
        };

        self.commit(session_id, state, tag, classification_confidence, output, metrics)
            .await
    }

    fn greeting_output(&self, metrics: &mut MetricsCollector) -> StageOutput {
        metrics.record_results(0, 0, 1.0, &[]);
        StageOutput {
            response: self.prompts.greeting.trim().to_string(),
            confidence: 1.0,
            sources: vec![],
            routing: None,
            enhanced_query: None,
            query_metadata: None,
            requires_escalation: false,
            hits: vec![],
        }
    }

    /// Stages 3..8: intelligence, routed retrieval, rerank, generation
    /// and escalation.
    async fn run_stages(
        &self,
        query: &str,
        session_id: &str,
        state: &mut SessionState,
        tag: QueryTag,
        user_class: Option<&str>,
        metrics: &mut MetricsCollector,
    ) -> Result<StageOutput> {
        let context = self.sessions.get_context_for_llm(session_id).await;

        metrics.start_timer("query_intelligence");
        let analysis = self
            .intelligence
            .analyze(
                query,
                tag,
                (!context.is_empty()).then_some(context.formatted.as_str()),
                &state.related_docs,
                session_id,
            )
            .await;
        metrics.record_intelligence(
            &analysis.query.enhanced,
            analysis.routing.as_str(),
            analysis.query.category.as_deref(),
            Some(&analysis.query.intent),
            &analysis.query.tags,
        );
        info!(
            session_id,
            routing = analysis.routing.as_str(),
            enhanced = %analysis.query.enhanced,
            "Query analyzed"
        );

        let query_metadata = QueryMetadata {
            category: analysis.query.category.clone(),
            intent: analysis.query.intent.clone(),
            tags: analysis.query.tags.clone(),
        };

        let (mut response, confidence, sources, hits, has_results) = match analysis.routing {
            Routing::AnswerFromContext => {
                metrics.start_timer("response_generation");
                let response = match self
                    .responder
                    .generate(query, &[], &context.formatted, session_id)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(session_id, error = %e, "Context-only generation failed");
                        metrics.record_error(&e.to_string());
                        return Ok(self.apology_output(&analysis, query_metadata, metrics).await);
                    }
                };
                metrics.record_response_generation();
                metrics.record_results(0, 0, 0.9, &[]);
                (response, 0.9, vec![SourceRef::conversation_context()], vec![], true)
            }

            Routing::SearchKbTargeted | Routing::FullRag => {
                let related_title = match analysis.routing {
                    Routing::SearchKbTargeted => analysis.matched_related_doc.as_deref(),
                    _ => None,
                };

                let outcome = self
                    .search
                    .run(&analysis.query.enhanced, tag, user_class, related_title, session_id)
                    .await?;
                metrics.record_search_execution(outcome.execution.clone());
                metrics.record_search_attempts(&outcome.attempts);

                let mut hits = outcome.hits;

                if !hits.is_empty() && needs_full_context(&analysis.query.enhanced) {
                    hits = self
                        .parent
                        .expand(hits, &analysis.query.enhanced, &outcome.embedding)
                        .await;
                    metrics.push_search_attempt(SearchAttempt {
                        label: format!("parent_retrieval:expanded_to_{}", hits.len()),
                        entry_type: None,
                        results: hits.len(),
                    });
                }

                if hits.is_empty() {
                    // All fallbacks dry: escalation shapes the reply below
                    metrics.record_results(0, 0, 0.0, &[]);
                    metrics.start_timer("response_generation");
                    let response = match self.responder.generate_fallback(query, session_id).await {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(session_id, error = %e, "Fallback generation failed");
                            metrics.record_error(&e.to_string());
                            INTERNAL_ERROR_RESPONSE.to_string()
                        }
                    };
                    metrics.record_response_generation();
                    (response, 0.3, vec![], vec![], false)
                } else {
                    let best_confidence = hits.iter().map(|h| h.score).fold(0.0, f32::max);

                    let rerank_started = std::time::Instant::now();
                    let reranked = self.reranker.rerank(hits, &analysis.query.enhanced);
                    metrics.record_rerank_time(rerank_started.elapsed().as_secs_f64() * 1000.0);

                    let sources: Vec<SourceRef> =
                        reranked.iter().map(SourceRef::from_hit).collect();

                    metrics.start_timer("response_generation");
                    // A failed generation degrades to the apology at zero
                    // confidence; escalation then fires on the low score.
                    let (response, confidence) = match self
                        .responder
                        .generate(query, &reranked, &context.formatted, session_id)
                        .await
                    {
                        Ok(text) => (text, best_confidence),
                        Err(e) => {
                            warn!(session_id, error = %e, "Response generation failed");
                            metrics.record_error(&e.to_string());
                            (INTERNAL_ERROR_RESPONSE.to_string(), 0.0)
                        }
                    };
                    metrics.record_response_generation();
                    metrics.record_results(
                        sources.len(),
                        sources.len(),
                        best_confidence,
                        &reranked,
                    );

                    (response, confidence, sources, reranked, true)
                }
            }
        };

        // Escalation sees the raw confidence and the recent turn log
        let decision = self
            .escalation
            .check(query, has_results, confidence, &context.messages)
            .await;
        metrics.record_escalation(
            decision.should_escalate,
            decision.reason.as_str(),
            decision.kind.as_str(),
        );
        response = shape_response(&response, &decision);

        // A user-requested handoff hides whatever retrieval produced
        let sources = if decision.reason == crate::agent::escalate::EscalationReason::UserRequested
        {
            vec![]
        } else {
            sources
        };

        Ok(StageOutput {
            response,
            confidence,
            sources,
            routing: Some(analysis.routing),
            enhanced_query: Some(analysis.query.enhanced.clone()),
            query_metadata: Some(query_metadata),
            requires_escalation: decision.should_escalate,
            hits,
        })
    }

    /// Canned apology used when the response generator itself fails.
    /// Escalation still runs and fires on the zero confidence.
    async fn apology_output(
        &self,
        analysis: &crate::agent::intelligence::QueryAnalysis,
        query_metadata: QueryMetadata,
        metrics: &mut MetricsCollector,
    ) -> StageOutput {
        let decision = self
            .escalation
            .check(&analysis.query.original, true, 0.0, &[])
            .await;
        metrics.record_escalation(
            decision.should_escalate,
            decision.reason.as_str(),
            decision.kind.as_str(),
        );
        StageOutput {
            response: shape_response(INTERNAL_ERROR_RESPONSE, &decision),
            confidence: 0.0,
            sources: vec![],
            routing: Some(analysis.routing),
            enhanced_query: Some(analysis.query.enhanced.clone()),
            query_metadata: Some(query_metadata),
            requires_escalation: decision.should_escalate,
            hits: vec![],
        }
    }

    /// Commit: assistant turn with metadata, analytics record, related
    /// docs, finalized timers and cost.
    async fn commit(
        &self,
        session_id: &str,
        state: &mut SessionState,
        tag: QueryTag,
        classification_confidence: f32,
        output: StageOutput,
        mut metrics: MetricsCollector,
    ) -> AgentReply {
        let cost = self.meter.breakdown(session_id);
        metrics.record_cost(cost.clone());
        let final_metrics = metrics.finalize();

        let turn_metadata = TurnMetadata {
            confidence: Some(output.confidence),
            query_type: Some(tag.as_str().to_string()),
            sources_used: output.sources.iter().map(|s| s.title.clone()).collect(),
            requires_escalation: Some(output.requires_escalation),
            cost: Some(cost.for_display()),
            error: final_metrics.error.clone(),
        };

        if let Err(e) = self
            .sessions
            .add_message(
                state,
                TurnRole::Assistant,
                &output.response,
                Some(turn_metadata),
                Some(final_metrics.clone()),
            )
            .await
        {
            warn!(session_id, error = %e, "Failed to append assistant turn");
        }

        remember_related_docs(state, &output.hits);

        AgentReply {
            response: output.response,
            confidence: output.confidence,
            classification_confidence,
            sources: output.sources,
            query_type: tag.as_str().to_string(),
            routing: output.routing.map(|r| r.as_str().to_string()),
            search_attempts: final_metrics
                .search_attempts
                .iter()
                .map(|a| a.label.clone())
                .collect(),
            enhanced_query: output.enhanced_query,
            query_metadata: output.query_metadata,
            requires_escalation: output.requires_escalation,
            debug_metrics: Some(final_metrics),
        }
    }
}

/// Fold the titles surfaced by this query into the session's
/// related-doc set: cited parent titles plus each chunk's related list.
fn remember_related_docs(state: &mut SessionState, hits: &[KbHit]) {
    for hit in hits {
        let mut titles: Vec<&str> = Vec::new();
        if let Some(parent_title) = hit.parent_title.as_deref() {
            titles.push(parent_title);
        }
        titles.extend(hit.related_titles.iter().map(String::as_str));

        for title in titles {
            if !state
                .related_docs
                .iter()
                .any(|known| known.eq_ignore_ascii_case(title))
            {
                state.related_docs.push(title.to_string());
            }
        }
    }
    if state.related_docs.len() > MAX_RELATED_DOCS {
        let excess = state.related_docs.len() - MAX_RELATED_DOCS;
        state.related_docs.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_with_titles(parent: &str, related: &[&str]) -> KbHit {
        KbHit {
            id: "c1".into(),
            parent_entry_id: Some("p1".into()),
            parent_title: Some(parent.into()),
            chunk_index: None,
            total_chunks: None,
            section_type: None,
            entry_type: "how_to".into(),
            user_class: "external".into(),
            category: None,
            tags: vec![],
            related_titles: related.iter().map(|s| s.to_string()).collect(),
            content: "c".into(),
            score: 0.8,
        }
    }

    fn empty_state() -> SessionState {
        SessionState {
            info: crate::memory::SessionInfo {
                id: "s1".into(),
                created_at: chrono::Utc::now(),
                last_activity: chrono::Utc::now(),
                user_info: None,
                message_count: 0,
            },
            summary_counter: 0,
            related_docs: vec![],
        }
    }

    #[test]
    fn test_remember_related_docs_dedupes_case_insensitively() {
        let mut state = empty_state();
        remember_related_docs(
            &mut state,
            &[hit_with_titles("Upload Photos Guide", &["Photo Limits"])],
        );
        remember_related_docs(
            &mut state,
            &[hit_with_titles("upload photos guide", &["photo limits"])],
        );
        assert_eq!(state.related_docs, vec!["Upload Photos Guide", "Photo Limits"]);
    }

    #[test]
    fn test_remember_related_docs_caps_oldest_first() {
        let mut state = empty_state();
        for i in 0..20 {
            remember_related_docs(&mut state, &[hit_with_titles(&format!("Doc {i}"), &[])]);
        }
        assert_eq!(state.related_docs.len(), MAX_RELATED_DOCS);
        assert_eq!(state.related_docs[0], "Doc 8");
        assert_eq!(state.related_docs.last().map(String::as_str), Some("Doc 19"));
    }

    #[test]
    fn test_source_ref_shapes() {
        let source = SourceRef::conversation_context();
        assert_eq!(source.title, "Conversation Context");
        assert_eq!(source.confidence, 0.9);

        let hit = hit_with_titles("Upload Photos Guide", &[]);
        let source = SourceRef::from_hit(&hit);
        assert_eq!(source.title, "Upload Photos Guide");
        assert_eq!(source.section, "how_to");
        assert_eq!(source.similarity_score, 0.8);
    }
}
