// src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

pub mod pricing;

pub use pricing::{ChatCost, PriceTable};

use tracing::{debug, info, warn};

/// API keys and endpoints loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// LLM provider key (PROPKB_LLM_API_KEY or OPENAI_API_KEY)
    pub llm: Option<String>,
    /// Qdrant API key, optional for local deployments (QDRANT_API_KEY)
    pub qdrant: Option<String>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        let llm = read_var("PROPKB_LLM_API_KEY").or_else(|| read_var("OPENAI_API_KEY"));
        let qdrant = read_var("QDRANT_API_KEY");

        let keys = Self { llm, qdrant };
        keys.log_status();
        keys
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Log which keys are available without exposing values
    fn log_status(&self) {
        if self.llm.is_none() {
            warn!("No LLM API key configured - chat and embedding calls will fail");
        } else {
            debug!("LLM API key loaded");
        }
    }
}

/// Tunables for the query pipeline
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Result cap applied after threshold filtering
    pub max_search_results: usize,
    /// Escalation floor: best similarity strictly below this escalates
    pub min_confidence_score: f32,
    /// Retrieval similarity floor; reranking handles precision above it
    pub similarity_threshold: f32,
    /// Extra chunks requested on a parent refetch, in case total_chunks lies
    pub parent_fetch_buffer: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_search_results: 3,
            min_confidence_score: 0.7,
            similarity_threshold: 0.5,
            parent_fetch_buffer: 5,
        }
    }
}

/// Tunables for conversation memory
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// TTL on cached conversation keys
    pub cache_ttl_secs: u64,
    /// Turns retained per session in the cache
    pub cached_turns: usize,
    /// Recent turns handed to the LLM as context
    pub context_messages: usize,
    /// Messages between rolling-summary regenerations
    pub summary_interval: u32,
    /// Inactivity age after which a session reads as not found
    pub session_timeout_secs: i64,
    /// Hard cap on session lifetime, forces an end even when active
    pub session_max_secs: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 7200,
            cached_turns: 8,
            context_messages: 5,
            summary_interval: 5,
            session_timeout_secs: 1800,
            session_max_secs: 86_400,
        }
    }
}

/// Per-endpoint-class rate limits (requests, window seconds)
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub query: (u32, u64),
    pub default: (u32, u64),
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            query: (20, 1800),
            default: (50, 300),
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_keys: ApiKeys,
    /// OpenAI-compatible API base (PROPKB_LLM_BASE_URL)
    pub llm_base_url: String,
    /// Chat model name (PROPKB_CHAT_MODEL)
    pub chat_model: String,
    /// Embedding model name (PROPKB_EMBEDDING_MODEL)
    pub embedding_model: String,
    /// Embedding dimensions (PROPKB_EMBEDDING_DIMENSIONS)
    pub embedding_dimensions: usize,
    /// Qdrant endpoint (PROPKB_QDRANT_URL)
    pub qdrant_url: String,
    /// Qdrant collection holding KB chunks (PROPKB_COLLECTION)
    pub collection: String,
    /// Redis endpoint for the conversation cache (PROPKB_REDIS_URL)
    pub redis_url: Option<String>,
    /// SQLite path for the end-of-session archive (PROPKB_ARCHIVE_PATH)
    pub archive_path: String,
    /// Override path for the YAML prompt file (PROPKB_PROMPTS_FILE)
    pub prompts_file: Option<String>,
    /// Override path for the YAML price table (PROPKB_PRICING_FILE)
    pub pricing_file: Option<String>,
    pub query: QueryConfig,
    pub memory: MemoryConfig,
    pub rate_limits: RateLimitConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_keys: ApiKeys::default(),
            llm_base_url: "https://api.openai.com/v1".into(),
            chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 1536,
            qdrant_url: "http://localhost:6334".into(),
            collection: "propkb_chunks".into(),
            redis_url: None,
            archive_path: "propkb.db".into(),
            prompts_file: None,
            pricing_file: None,
            query: QueryConfig::default(),
            memory: MemoryConfig::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");
        let defaults = Self::default();

        Self {
            api_keys: ApiKeys::from_env(),
            llm_base_url: read_var("PROPKB_LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            chat_model: read_var("PROPKB_CHAT_MODEL").unwrap_or(defaults.chat_model),
            embedding_model: read_var("PROPKB_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimensions: read_parsed("PROPKB_EMBEDDING_DIMENSIONS")
                .unwrap_or(defaults.embedding_dimensions),
            qdrant_url: read_var("PROPKB_QDRANT_URL").unwrap_or(defaults.qdrant_url),
            collection: read_var("PROPKB_COLLECTION").unwrap_or(defaults.collection),
            redis_url: read_var("PROPKB_REDIS_URL"),
            archive_path: read_var("PROPKB_ARCHIVE_PATH").unwrap_or(defaults.archive_path),
            prompts_file: read_var("PROPKB_PROMPTS_FILE"),
            pricing_file: read_var("PROPKB_PRICING_FILE"),
            query: QueryConfig {
                max_search_results: read_parsed("PROPKB_MAX_SEARCH_RESULTS")
                    .unwrap_or(defaults.query.max_search_results),
                min_confidence_score: read_parsed("PROPKB_MIN_CONFIDENCE_SCORE")
                    .unwrap_or(defaults.query.min_confidence_score),
                similarity_threshold: read_parsed("PROPKB_SIMILARITY_THRESHOLD")
                    .unwrap_or(defaults.query.similarity_threshold),
                parent_fetch_buffer: defaults.query.parent_fetch_buffer,
            },
            memory: MemoryConfig {
                cache_ttl_secs: read_parsed("PROPKB_CACHE_TTL_SECS")
                    .unwrap_or(defaults.memory.cache_ttl_secs),
                cached_turns: read_parsed("PROPKB_CACHED_TURNS")
                    .unwrap_or(defaults.memory.cached_turns),
                context_messages: read_parsed("PROPKB_CONTEXT_MESSAGES")
                    .unwrap_or(defaults.memory.context_messages),
                summary_interval: read_parsed("PROPKB_SUMMARY_INTERVAL")
                    .unwrap_or(defaults.memory.summary_interval),
                session_timeout_secs: read_parsed("PROPKB_SESSION_TIMEOUT_SECS")
                    .unwrap_or(defaults.memory.session_timeout_secs),
                session_max_secs: read_parsed("PROPKB_SESSION_MAX_SECS")
                    .unwrap_or(defaults.memory.session_max_secs),
            },
            rate_limits: RateLimitConfig::default(),
        }
    }

    /// Validate the configuration, returning a human-readable report
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if !self.api_keys.has_llm() {
            validation.add_error(
                "No LLM API key configured. Set PROPKB_LLM_API_KEY or OPENAI_API_KEY.",
            );
        }
        if self.redis_url.is_none() {
            validation.add_warning(
                "PROPKB_REDIS_URL not set - conversation cache will run in-process only",
            );
        }
        if self.query.max_search_results == 0 {
            validation.add_error("PROPKB_MAX_SEARCH_RESULTS must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.query.min_confidence_score) {
            validation.add_error("PROPKB_MIN_CONFIDENCE_SCORE must be within [0, 1]");
        }
        if self.memory.summary_interval == 0 {
            validation.add_error("PROPKB_SUMMARY_INTERVAL must be at least 1");
        }

        validation
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }
        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for w in &self.warnings {
                lines.push(format!("  - {}", w));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    read_var(name).and_then(|v| v.parse().ok())
}
