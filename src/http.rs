// src/http.rs
// Shared HTTP client for all outbound network operations

use std::time::Duration;

/// Default request timeout (covers LLM chat calls)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-stage deadlines from the resource model
pub const EMBEDDING_DEADLINE: Duration = Duration::from_secs(10);
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(15);
pub const CHAT_DEADLINE: Duration = Duration::from_secs(30);
pub const CACHE_DEADLINE: Duration = Duration::from_secs(5);

/// Create the shared HTTP client with appropriate defaults.
///
/// Created once at startup and handed to every module that needs HTTP
/// access. Uses connection pooling internally.
pub fn create_shared_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_shared_client() {
        let client = create_shared_client();
        drop(client);
    }

    #[test]
    fn test_stage_deadlines() {
        assert_eq!(EMBEDDING_DEADLINE, Duration::from_secs(10));
        assert_eq!(SEARCH_DEADLINE, Duration::from_secs(15));
        assert_eq!(CHAT_DEADLINE, Duration::from_secs(30));
        assert_eq!(CACHE_DEADLINE, Duration::from_secs(5));
    }
}
