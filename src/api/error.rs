// src/api/error.rs
// HTTP error mapping
//
// Upstream details stay in the logs; response bodies are civil and
// structured.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::api::rate_limit::RateLimitInfo;
use crate::error::AgentError;

/// HTTP-facing error
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    RateLimited(RateLimitInfo),
    NotFound(String),
    Internal(AgentError),
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::SessionNotFound(id) => {
                ApiError::NotFound(format!("Session not found or expired: {id}"))
            }
            AgentError::InvalidInput(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited(info) => {
                let body = json!({
                    "error": "Rate limit exceeded",
                    "message": format!(
                        "Too many requests. Try again in {} seconds.",
                        info.retry_after_secs
                    ),
                    "limit": info.limit,
                    "reset_in_seconds": info.retry_after_secs,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", header_value(info.limit));
                headers.insert("X-RateLimit-Remaining", header_value(info.remaining));
                headers.insert("X-RateLimit-Reset", header_value(info.reset_epoch));
                headers.insert(header::RETRY_AFTER, header_value(info.retry_after_secs));
                response
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "bad_request", "message": message})),
            )
                .into_response(),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "not_found", "message": message})),
            )
                .into_response(),
            ApiError::Internal(err) => {
                error!(error = %err, kind = err.kind(), "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "internal_error",
                        "type": err.kind(),
                        "message": "Internal server error - check logs for details",
                    })),
                )
                    .into_response()
            }
        }
    }
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}
