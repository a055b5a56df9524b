// src/agent/intelligence.rs
// Query intelligence: one LLM call deciding routing, enhancement and
// metadata extraction
//
// Replaces separate follow-up detection and query-enhancement calls.
// The model's answer is advisory; the routing coherence rules below are
// what the orchestrator actually branches on.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::agent::classifier::QueryTag;
use crate::analytics::{Operation, TokenTracker};
use crate::http::CHAT_DEADLINE;
use crate::llm::{ChatMessage, ChatModel};
use crate::utils::json::parse_llm_json;
use crate::utils::with_deadline;

/// Routing decision for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    AnswerFromContext,
    SearchKbTargeted,
    FullRag,
}

impl Routing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnswerFromContext => "answer_from_context",
            Self::SearchKbTargeted => "search_kb_targeted",
            Self::FullRag => "full_rag",
        }
    }
}

/// Enhanced query with extracted metadata
#[derive(Debug, Clone)]
pub struct StructuredQuery {
    pub original: String,
    pub enhanced: String,
    pub category: Option<String>,
    pub intent: String,
    pub tags: Vec<String>,
}

/// Complete analysis with routing decision
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub is_followup: bool,
    pub can_answer_from_context: bool,
    /// Title from the supplied related-doc list, when matched
    pub matched_related_doc: Option<String>,
    pub routing: Routing,
    pub query: StructuredQuery,
    pub confidence: f32,
}

#[derive(Debug, Default, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    is_followup: bool,
    #[serde(default)]
    can_answer_from_context: bool,
    #[serde(default)]
    matched_related_doc: Option<String>,
    #[serde(default)]
    enhanced_query: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Single-call query analyzer
pub struct QueryIntelligence {
    chat: Arc<dyn ChatModel>,
    meter: Arc<TokenTracker>,
}

impl QueryIntelligence {
    pub fn new(chat: Arc<dyn ChatModel>, meter: Arc<TokenTracker>) -> Self {
        Self { chat, meter }
    }

    /// Analyze a query. Never fails: LLM errors and unparseable output
    /// fall back to a full-RAG analysis built from the classifier tag.
    pub async fn analyze(
        &self,
        query: &str,
        tag: QueryTag,
        conversation_context: Option<&str>,
        related_docs: &[String],
        session_id: &str,
    ) -> QueryAnalysis {
        let prompt = build_analysis_prompt(query, tag, conversation_context, related_docs);

        let result = with_deadline(
            "llm_chat",
            CHAT_DEADLINE,
            self.chat.chat(vec![ChatMessage::user(prompt)]),
        )
        .await;

        let chat_result = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Query intelligence call failed, using fallback analysis");
                return fallback_analysis(query, tag);
            }
        };

        if let Some(usage) = chat_result.usage {
            self.meter.track_chat(
                session_id,
                Operation::QueryIntelligence,
                &self.chat.model_name(),
                &usage,
            );
        }

        let raw: RawAnalysis = match parse_llm_json(&chat_result.content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Unparseable query intelligence output, using fallback");
                return fallback_analysis(query, tag);
            }
        };

        resolve_analysis(raw, query, tag, related_docs)
    }
}

/// Apply the routing coherence rules to the model's raw answer.
///
/// `can_answer_from_context` wins outright; a related-doc match is only
/// honoured when the title actually appears in the supplied list.
fn resolve_analysis(
    raw: RawAnalysis,
    query: &str,
    tag: QueryTag,
    related_docs: &[String],
) -> QueryAnalysis {
    let matched_related_doc = raw.matched_related_doc.and_then(|candidate| {
        let found = related_docs
            .iter()
            .find(|title| title.eq_ignore_ascii_case(&candidate));
        if found.is_none() {
            debug!(candidate = %candidate, "Discarding related doc not in the supplied list");
        }
        found.cloned()
    });

    let routing = if raw.can_answer_from_context {
        Routing::AnswerFromContext
    } else if matched_related_doc.is_some() {
        Routing::SearchKbTargeted
    } else {
        Routing::FullRag
    };

    let enhanced = raw
        .enhanced_query
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| query.to_string());

    QueryAnalysis {
        is_followup: raw.is_followup,
        can_answer_from_context: raw.can_answer_from_context,
        matched_related_doc,
        routing,
        query: StructuredQuery {
            original: query.to_string(),
            enhanced,
            category: raw.category,
            intent: raw.intent.unwrap_or_else(|| tag.as_str().to_string()),
            tags: raw.tags,
        },
        confidence: raw.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
    }
}

/// Analysis used when the LLM is unavailable or returns garbage
fn fallback_analysis(query: &str, tag: QueryTag) -> QueryAnalysis {
    QueryAnalysis {
        is_followup: false,
        can_answer_from_context: false,
        matched_related_doc: None,
        routing: Routing::FullRag,
        query: StructuredQuery {
            original: query.to_string(),
            enhanced: query.to_string(),
            category: None,
            intent: tag.as_str().to_string(),
            tags: vec![],
        },
        confidence: 0.5,
    }
}

fn build_analysis_prompt(
    query: &str,
    tag: QueryTag,
    conversation_context: Option<&str>,
    related_docs: &[String],
) -> String {
    let mut parts = vec![
        "Analyze this user query and provide a routing decision.".to_string(),
        String::new(),
        format!("Query: \"{query}\""),
        format!("Type: {}", tag.as_str()),
    ];

    if let Some(context) = conversation_context.filter(|c| !c.trim().is_empty()) {
        parts.push(String::new());
        parts.push("Previous conversation:".to_string());
        parts.push(context.to_string());
    }

    if !related_docs.is_empty() {
        parts.push(String::new());
        parts.push("Related documents from previous responses:".to_string());
        for doc in related_docs {
            parts.push(format!("  - {doc}"));
        }
    }

    parts.push(String::new());
    parts.push(
        r#"Determine:
1. Is this a follow-up to the conversation above? (true/false)
2. Can it be answered using ONLY the conversation history? (true/false)
3. Does it match any related document by topic? (document title or null)
4. Enhance the query for knowledge-base search: resolve pronouns from the
   conversation, clarify intent, keep it concise.
5. Extract category (main topic area), intent (what the user wants to
   accomplish) and up to 3 tags.

Respond with JSON only:
{
  "is_followup": true/false,
  "can_answer_from_context": true/false,
  "matched_related_doc": "title" or null,
  "enhanced_query": "...",
  "category": "...",
  "intent": "...",
  "tags": [...],
  "confidence": 0.0-1.0
}"#
        .to_string(),
    );

    parts.join("\n")
}
