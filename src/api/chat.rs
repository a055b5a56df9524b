// src/api/chat.rs
// Chat endpoints: test (full debug), support (internal), customer
// (external). Same pipeline underneath; the endpoints differ in the
// user-class retrieval filter and which fields they reveal.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::{AgentReply, QueryMetadata, SourceRef};
use crate::analytics::QueryMetrics;
use crate::api::error::ApiError;
use crate::api::rate_limit::{EndpointClass, client_identifier};
use crate::api::state::AppState;
use crate::error::AgentError;

/// Chat request shared by every agent endpoint
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_info: Option<serde_json::Value>,
}

/// Full-visibility response for the test agent
#[derive(Debug, Serialize)]
pub struct TestAgentResponse {
    pub response: String,
    pub session_id: String,
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
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_metrics: Option<QueryMetrics>,
}

/// Source view without index internals, for support staff
#[derive(Debug, Serialize)]
pub struct CleanSource {
    pub title: String,
    pub section: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub content_preview: String,
    pub entry_type: String,
    pub user_type: String,
}

impl From<&SourceRef> for CleanSource {
    fn from(source: &SourceRef) -> Self {
        Self {
            title: source.title.clone(),
            section: source.section.clone(),
            confidence: source.confidence,
            category: source.category.clone(),
            content_preview: source.content_preview.clone(),
            entry_type: source.entry_type.clone(),
            user_type: source.user_type.clone(),
        }
    }
}

/// Clean response for internal support staff
#[derive(Debug, Serialize)]
pub struct SupportAgentResponse {
    pub response: String,
    pub session_id: String,
    pub confidence: f32,
    pub sources: Vec<CleanSource>,
    pub query_type: String,
    pub timestamp: String,
    pub requires_escalation: bool,
}

/// Minimal response for customers
#[derive(Debug, Serialize)]
pub struct CustomerAgentResponse {
    pub response: String,
    pub session_id: String,
    pub requires_escalation: bool,
    pub timestamp: String,
}

/// Rate-limit, resolve the session, run the pipeline under the session
/// lock. Shared by all three endpoints.
async fn run_query(
    state: &AppState,
    headers: &HeaderMap,
    request: &ChatRequest,
    user_class: Option<&str>,
) -> Result<(String, AgentReply), ApiError> {
    if request.message.trim().is_empty() {
        return Err(AgentError::InvalidInput("message must not be empty".into()).into());
    }

    let forwarded_for = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok());
    let identifier = client_identifier(request.user_info.as_ref(), forwarded_for);
    state
        .rate_limiter
        .check(&identifier, EndpointClass::Query)
        .map_err(ApiError::RateLimited)?;

    // Reuse the caller's session when it is still alive, else start fresh
    let session_id = match &request.session_id {
        Some(id) if state.sessions.get_session(id).await.is_some() => id.clone(),
        _ => state.sessions.create_session(request.user_info.clone()).await,
    };

    let handle = state
        .sessions
        .handle(&session_id)
        .await
        .ok_or_else(|| AgentError::SessionNotFound(session_id.clone()))?;
    let mut session_state = handle.state.lock().await;

    let reply = state
        .orchestrator
        .process_query(&request.message, &session_id, &mut session_state, user_class)
        .await;

    Ok((session_id, reply))
}

/// Test agent: no user-class filter, every debug field exposed
pub async fn test_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<TestAgentResponse>, ApiError> {
    info!(message = %request.message.chars().take(50).collect::<String>(), "Test agent query");
    let (session_id, reply) = run_query(&state, &headers, &request, None).await?;

    Ok(Json(TestAgentResponse {
        response: reply.response,
        session_id,
        confidence: reply.confidence,
        classification_confidence: reply.classification_confidence,
        sources: reply.sources,
        query_type: reply.query_type,
        routing: reply.routing,
        search_attempts: reply.search_attempts,
        enhanced_query: reply.enhanced_query,
        query_metadata: reply.query_metadata,
        requires_escalation: reply.requires_escalation,
        timestamp: Utc::now().to_rfc3339(),
        debug_metrics: reply.debug_metrics,
    }))
}

/// Support agent: internal entries only, clean sources, no debug noise
pub async fn support_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<SupportAgentResponse>, ApiError> {
    info!(message = %request.message.chars().take(50).collect::<String>(), "Support agent query");
    let (session_id, reply) = run_query(&state, &headers, &request, Some("internal")).await?;

    Ok(Json(SupportAgentResponse {
        response: reply.response,
        session_id,
        confidence: reply.confidence,
        sources: reply.sources.iter().map(CleanSource::from).collect(),
        query_type: reply.query_type,
        timestamp: Utc::now().to_rfc3339(),
        requires_escalation: reply.requires_escalation,
    }))
}

/// Customer agent: external entries only, answer and escalation flag
pub async fn customer_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<CustomerAgentResponse>, ApiError> {
    info!(message = %request.message.chars().take(50).collect::<String>(), "Customer agent query");
    let (session_id, reply) = run_query(&state, &headers, &request, Some("external")).await?;

    Ok(Json(CustomerAgentResponse {
        response: reply.response,
        session_id,
        requires_escalation: reply.requires_escalation,
        timestamp: Utc::now().to_rfc3339(),
    }))
}
