// src/api/session.rs
// Session info, history and explicit end

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use crate::api::error::ApiError;
use crate::api::state::AppState;

/// GET /api/agent/session/{session_id}
pub async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state
        .sessions
        .get_session(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found or expired: {session_id}")))?;

    Ok(Json(json!({
        "session_id": info.id,
        "created_at": info.created_at.to_rfc3339(),
        "last_activity": info.last_activity.to_rfc3339(),
        "message_count": info.message_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    10
}

/// GET /api/agent/history/{session_id}?limit=
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state
        .sessions
        .get_session(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found or expired: {session_id}")))?;

    let history = state.sessions.cache().turns(&session_id, params.limit).await;
    Ok(Json(json!({
        "session_id": session_id,
        "history": history,
        "total_messages": info.message_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_end_reason")]
    pub reason: String,
}

fn default_end_reason() -> String {
    "completed".to_string()
}

/// POST /api/agent/session/{session_id}/end
///
/// The only steady-state path that writes durably: flushes the final
/// summary, analytics batch, user counters and recent-sessions list.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<EndSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .end_session(&session_id, request.agent_id.as_deref(), &request.reason)
        .await?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": "ended",
        "reason": request.reason,
    })))
}
