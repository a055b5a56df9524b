// src/api/state.rs
// Shared application state
//
// Every collaborator is constructed once in main and injected here; no
// module reaches for globals.

use std::sync::Arc;

use crate::agent::Orchestrator;
use crate::api::rate_limit::RateLimiter;
use crate::config::AgentConfig;
use crate::embeddings::Embedder;
use crate::kb::VectorIndex;
use crate::llm::ChatModel;
use crate::memory::SessionManager;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionManager>,
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub rate_limiter: Arc<RateLimiter>,
}
