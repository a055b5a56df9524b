// src/error.rs
// Standardized error types for the agent service

use thiserror::Error;

/// Main error type for the propkb library
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("transient upstream failure in {stage}: {message}")]
    TransientUpstream { stage: &'static str, message: String },

    #[error("permanent upstream failure in {stage}: {message}")]
    PermanentUpstream { stage: &'static str, message: String },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("malformed LLM output: {0}")]
    MalformedLlmOutput(String),

    #[error("no documents retrieved after all fallbacks")]
    EmptyRetrieval,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("query cancelled by caller")]
    Cancelled,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Whether this error should be retried at a higher layer
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::TransientUpstream { .. } | AgentError::Timeout { .. }
        )
    }

    /// Short machine-readable kind, used in analytics metadata and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidInput(_) => "invalid_input",
            AgentError::SessionNotFound(_) => "session_not_found",
            AgentError::TransientUpstream { .. } => "transient_upstream",
            AgentError::PermanentUpstream { .. } => "permanent_upstream",
            AgentError::Timeout { .. } => "timeout",
            AgentError::MalformedLlmOutput(_) => "malformed_llm_output",
            AgentError::EmptyRetrieval => "empty_retrieval",
            AgentError::RateLimited => "rate_limited",
            AgentError::Cancelled => "cancelled",
            AgentError::Cache(_) => "cache",
            AgentError::Archive(_) => "archive",
            AgentError::Index(_) => "index",
            AgentError::Embedding(_) => "embedding",
            AgentError::Llm(_) => "llm",
            AgentError::Config(_) => "config",
            AgentError::Json(_) => "json",
            AgentError::Io(_) => "io",
            AgentError::Http(_) => "http",
            AgentError::Internal(_) => "internal",
            AgentError::Anyhow(_) => "internal",
        }
    }
}

impl From<String> for AgentError {
    fn from(s: String) -> Self {
        AgentError::Internal(s)
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            AgentError::Cancelled
        } else {
            AgentError::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = AgentError::TransientUpstream {
            stage: "vector_search",
            message: "503".into(),
        };
        assert!(err.is_transient());
        assert!(
            !AgentError::PermanentUpstream {
                stage: "llm_chat",
                message: "401".into(),
            }
            .is_transient()
        );
        assert!(
            AgentError::Timeout {
                stage: "embedding",
                secs: 10
            }
            .is_transient()
        );
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(AgentError::EmptyRetrieval.kind(), "empty_retrieval");
        assert_eq!(AgentError::RateLimited.kind(), "rate_limited");
        assert_eq!(AgentError::Cancelled.kind(), "cancelled");
    }
}
