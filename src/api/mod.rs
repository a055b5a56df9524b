// src/api/mod.rs
// HTTP surface: chat endpoints, session endpoints, health, rate limiting

pub mod chat;
pub mod error;
pub mod health;
pub mod rate_limit;
pub mod session;
pub mod state;

pub use error::ApiError;
pub use rate_limit::{EndpointClass, RateLimiter};
pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agent/test", post(chat::test_agent))
        .route("/api/agent/support", post(chat::support_agent))
        .route("/api/agent/customer", post(chat::customer_agent))
        .route("/api/agent/session/{session_id}", get(session::session_info))
        .route("/api/agent/session/{session_id}/end", post(session::end_session))
        .route("/api/agent/history/{session_id}", get(session::session_history))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
