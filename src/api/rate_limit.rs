// src/api/rate_limit.rs
// Keyed sliding-window rate limiter
//
// Per-identifier request timestamps in a window; the exceeded branch
// carries enough numbers to fill the X-RateLimit-* headers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::config::RateLimitConfig;

/// Endpoint classes with distinct budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Chat/query endpoints
    Query,
    /// Everything else
    Default,
}

/// Snapshot of a caller's budget, used for response headers
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch: u64,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}

/// In-memory sliding-window limiter keyed by caller identifier
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: StdMutex<HashMap<String, VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: StdMutex::new(HashMap::new()),
        }
    }

    fn budget(&self, class: EndpointClass) -> (u32, u64) {
        match class {
            EndpointClass::Query => self.config.query,
            EndpointClass::Default => self.config.default,
        }
    }

    /// Check and record one request. Ok carries the post-request budget
    /// snapshot; Err means the caller is over its limit.
    pub fn check(
        &self,
        identifier: &str,
        class: EndpointClass,
    ) -> Result<RateLimitInfo, RateLimitInfo> {
        self.check_at(identifier, class, now_epoch())
    }

    fn check_at(
        &self,
        identifier: &str,
        class: EndpointClass,
        now: u64,
    ) -> Result<RateLimitInfo, RateLimitInfo> {
        let (limit, window_secs) = self.budget(class);
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let timestamps = windows.entry(identifier.to_string()).or_default();

        while timestamps
            .front()
            .is_some_and(|&t| t + window_secs <= now)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= limit as usize {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let retry_after = (oldest + window_secs).saturating_sub(now);
            warn!(identifier, count = timestamps.len(), limit, "Rate limit exceeded");
            return Err(RateLimitInfo {
                limit,
                remaining: 0,
                reset_epoch: oldest + window_secs,
                window_secs,
                retry_after_secs: retry_after,
            });
        }

        timestamps.push_back(now);
        Ok(RateLimitInfo {
            limit,
            remaining: limit - timestamps.len() as u32,
            reset_epoch: now + window_secs,
            window_secs,
            retry_after_secs: 0,
        })
    }

    /// Drop identifiers with no requests in the last hour
    pub fn cleanup(&self) {
        let cutoff = now_epoch().saturating_sub(3600);
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        windows.retain(|_, timestamps| {
            while timestamps.front().is_some_and(|&t| t < cutoff) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Identifier for rate limiting: user email, then agent id, then the
/// forwarded client address.
pub fn client_identifier(
    user_info: Option<&serde_json::Value>,
    forwarded_for: Option<&str>,
) -> String {
    if let Some(user_info) = user_info {
        if let Some(email) = user_info.get("email").and_then(|v| v.as_str()) {
            return format!("user:{email}");
        }
        if let Some(agent_id) = user_info.get("agent_id").and_then(|v| v.as_str()) {
            return format!("agent:{agent_id}");
        }
    }
    if let Some(forwarded) = forwarded_for {
        if let Some(ip) = forwarded.split(',').next() {
            return format!("ip:{}", ip.trim());
        }
    }
    "ip:unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(query_limit: u32, window: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            query: (query_limit, window),
            default: (50, 300),
        })
    }

    #[test]
    fn test_allows_until_limit() {
        let limiter = limiter(3, 60);
        for i in 0..3 {
            let info = limiter.check_at("user:a", EndpointClass::Query, 100).unwrap();
            assert_eq!(info.remaining, 2 - i);
        }
        let err = limiter.check_at("user:a", EndpointClass::Query, 100).unwrap_err();
        assert_eq!(err.remaining, 0);
        assert_eq!(err.retry_after_secs, 60);
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(2, 60);
        limiter.check_at("user:a", EndpointClass::Query, 0).unwrap();
        limiter.check_at("user:a", EndpointClass::Query, 1).unwrap();
        assert!(limiter.check_at("user:a", EndpointClass::Query, 2).is_err());
        // First request ages out of the window
        assert!(limiter.check_at("user:a", EndpointClass::Query, 61).is_ok());
    }

    #[test]
    fn test_identifiers_are_independent() {
        let limiter = limiter(1, 60);
        limiter.check_at("user:a", EndpointClass::Query, 0).unwrap();
        assert!(limiter.check_at("user:b", EndpointClass::Query, 0).is_ok());
    }

    #[test]
    fn test_identifier_preference_order() {
        let with_email = serde_json::json!({"email": "a@example.com", "agent_id": "BID-1"});
        assert_eq!(client_identifier(Some(&with_email), None), "user:a@example.com");

        let with_agent = serde_json::json!({"agent_id": "BID-1"});
        assert_eq!(client_identifier(Some(&with_agent), None), "agent:BID-1");

        assert_eq!(
            client_identifier(None, Some("203.0.113.9, 10.0.0.1")),
            "ip:203.0.113.9"
        );
        assert_eq!(client_identifier(None, None), "ip:unknown");
    }
}
