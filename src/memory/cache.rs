// src/memory/cache.rs
// Conversation cache: Redis with per-key TTL, in-process fallback
//
// Keys: `context:<session_id>` holds the turn list newest-first,
// `session:<session_id>:summary` holds the rolling summary blob.
// Every append is one pipelined round trip (LPUSH + LTRIM + EXPIRE).

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::http::CACHE_DEADLINE;
use crate::memory::types::{RollingSummary, Turn};

/// Cache health for the service health surface
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub connected: bool,
    /// True when the remote backend is unavailable and the process-local
    /// store is serving reads and writes
    pub degraded: bool,
    pub fallback_sessions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Default)]
struct LocalSession {
    /// Newest first, mirroring the Redis list layout
    turns: Vec<Turn>,
    summary: Option<RollingSummary>,
}

/// Conversation cache with automatic degrade to process-local storage
pub struct ConversationCache {
    redis: Option<ConnectionManager>,
    local: StdMutex<HashMap<String, LocalSession>>,
    degraded: AtomicBool,
    max_turns: usize,
    ttl_secs: u64,
}

impl ConversationCache {
    /// Connect to Redis; falls back to in-process storage when the
    /// backend is unreachable at startup.
    pub async fn connect(url: Option<&str>, max_turns: usize, ttl_secs: u64) -> Self {
        let redis = match url {
            Some(url) => match Self::open_redis(url).await {
                Ok(manager) => {
                    info!("Conversation cache connected to Redis");
                    Some(manager)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, using in-process conversation cache");
                    None
                }
            },
            None => None,
        };

        let degraded = redis.is_none();
        Self {
            redis,
            local: StdMutex::new(HashMap::new()),
            degraded: AtomicBool::new(degraded),
            max_turns,
            ttl_secs,
        }
    }

    /// Purely in-process cache, used in tests and keyless deployments
    pub fn in_memory(max_turns: usize, ttl_secs: u64) -> Self {
        Self {
            redis: None,
            local: StdMutex::new(HashMap::new()),
            degraded: AtomicBool::new(true),
            max_turns,
            ttl_secs,
        }
    }

    async fn open_redis(url: &str) -> std::result::Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        tokio::time::timeout(CACHE_DEADLINE, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::IoError, "connect timed out"))
            })?
    }

    fn context_key(session_id: &str) -> String {
        format!("context:{session_id}")
    }

    fn summary_key(session_id: &str) -> String {
        format!("session:{session_id}:summary")
    }

    fn mark_degraded(&self, what: &str, err: &dyn std::fmt::Display) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(error = %err, what, "Cache backend failing, degrading to in-process storage");
        }
    }

    /// Append a turn, keeping the most recent `max_turns` and refreshing
    /// the key's expiry.
    pub async fn add_turn(&self, session_id: &str, turn: &Turn) -> Result<()> {
        if let Some(manager) = &self.redis {
            let encoded = serde_json::to_string(turn)?;
            let key = Self::context_key(session_id);
            let mut conn = manager.clone();

            let mut pipe = redis::pipe();
            pipe.lpush(&key, encoded)
                .ltrim(&key, 0, self.max_turns as isize - 1)
                .expire(&key, self.ttl_secs as i64);

            let op = pipe.query_async::<()>(&mut conn);
            match tokio::time::timeout(CACHE_DEADLINE, op).await {
                Ok(Ok(())) => {
                    self.degraded.store(false, Ordering::Relaxed);
                    return Ok(());
                }
                Ok(Err(e)) => self.mark_degraded("append", &e),
                Err(_) => self.mark_degraded("append", &"deadline elapsed"),
            }
        }

        self.add_turn_local(session_id, turn);
        Ok(())
    }

    fn add_turn_local(&self, session_id: &str, turn: &Turn) {
        let mut local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        let entry = local.entry(session_id.to_string()).or_default();
        entry.turns.insert(0, turn.clone());
        entry.turns.truncate(self.max_turns);
    }

    /// Most recent `limit` turns in chronological order
    pub async fn turns(&self, session_id: &str, limit: usize) -> Vec<Turn> {
        if let Some(manager) = &self.redis {
            let key = Self::context_key(session_id);
            let mut conn = manager.clone();
            let mut cmd = redis::cmd("LRANGE");
            cmd.arg(&key).arg(0).arg(limit as isize - 1);
            let op = cmd.query_async::<Vec<String>>(&mut conn);

            match tokio::time::timeout(CACHE_DEADLINE, op).await {
                Ok(Ok(raw)) => {
                    let mut turns: Vec<Turn> = raw
                        .iter()
                        .filter_map(|entry| serde_json::from_str(entry).ok())
                        .collect();
                    turns.reverse();
                    return turns;
                }
                Ok(Err(e)) => self.mark_degraded("read", &e),
                Err(_) => self.mark_degraded("read", &"deadline elapsed"),
            }
        }

        let local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        let mut turns: Vec<Turn> = local
            .get(session_id)
            .map(|s| s.turns.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        turns.reverse();
        turns
    }

    /// Store the rolling summary blob with the session TTL
    pub async fn store_summary(&self, session_id: &str, summary: &RollingSummary) -> Result<()> {
        if let Some(manager) = &self.redis {
            let encoded = serde_json::to_string(summary)?;
            let key = Self::summary_key(session_id);
            let mut conn = manager.clone();
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(encoded).arg("EX").arg(self.ttl_secs);
            let op = cmd.query_async::<()>(&mut conn);

            match tokio::time::timeout(CACHE_DEADLINE, op).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => self.mark_degraded("summary write", &e),
                Err(_) => self.mark_degraded("summary write", &"deadline elapsed"),
            }
        }

        let mut local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        local.entry(session_id.to_string()).or_default().summary = Some(summary.clone());
        Ok(())
    }

    pub async fn summary(&self, session_id: &str) -> Option<RollingSummary> {
        if let Some(manager) = &self.redis {
            let key = Self::summary_key(session_id);
            let mut conn = manager.clone();
            let mut cmd = redis::cmd("GET");
            cmd.arg(&key);
            let op = cmd.query_async::<Option<String>>(&mut conn);

            match tokio::time::timeout(CACHE_DEADLINE, op).await {
                Ok(Ok(raw)) => return raw.and_then(|s| serde_json::from_str(&s).ok()),
                Ok(Err(e)) => self.mark_degraded("summary read", &e),
                Err(_) => self.mark_degraded("summary read", &"deadline elapsed"),
            }
        }

        let local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        local.get(session_id).and_then(|s| s.summary.clone())
    }

    /// Drop everything cached for a session
    pub async fn clear_session(&self, session_id: &str) {
        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            let mut cmd = redis::cmd("DEL");
            cmd.arg(Self::context_key(session_id))
                .arg(Self::summary_key(session_id));
            let op = cmd.query_async::<()>(&mut conn);
            match tokio::time::timeout(CACHE_DEADLINE, op).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.mark_degraded("clear", &e),
                Err(_) => self.mark_degraded("clear", &"deadline elapsed"),
            }
        }

        let mut local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        local.remove(session_id);
    }

    pub async fn health(&self) -> CacheHealth {
        let fallback_sessions = {
            let local = self.local.lock().unwrap_or_else(|p| p.into_inner());
            local.len()
        };

        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            let started = Instant::now();
            let cmd = redis::cmd("PING");
            let op = cmd.query_async::<String>(&mut conn);
            match tokio::time::timeout(CACHE_DEADLINE, op).await {
                Ok(Ok(_)) => {
                    return CacheHealth {
                        connected: true,
                        degraded: self.degraded.load(Ordering::Relaxed),
                        fallback_sessions,
                        latency_ms: Some(started.elapsed().as_millis() as u64),
                    };
                }
                _ => {
                    return CacheHealth {
                        connected: false,
                        degraded: true,
                        fallback_sessions,
                        latency_ms: None,
                    };
                }
            }
        }

        CacheHealth {
            connected: false,
            degraded: true,
            fallback_sessions,
            latency_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::TurnRole;

    #[tokio::test]
    async fn test_append_preserves_order() {
        let cache = ConversationCache::in_memory(8, 7200);
        cache.add_turn("s1", &Turn::user("first")).await.unwrap();
        cache
            .add_turn("s1", &Turn::assistant("second", None))
            .await
            .unwrap();
        cache.add_turn("s1", &Turn::user("third")).await.unwrap();

        let turns = cache.turns("s1", 8).await;
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(turns[1].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent() {
        let cache = ConversationCache::in_memory(3, 7200);
        for i in 0..5 {
            cache
                .add_turn("s1", &Turn::user(format!("m{i}")))
                .await
                .unwrap();
        }
        let turns = cache.turns("s1", 10).await;
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_limit_returns_newest() {
        let cache = ConversationCache::in_memory(8, 7200);
        for i in 0..6 {
            cache
                .add_turn("s1", &Turn::user(format!("m{i}")))
                .await
                .unwrap();
        }
        let turns = cache.turns("s1", 2).await;
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);
    }

    #[tokio::test]
    async fn test_summary_roundtrip_and_clear() {
        let cache = ConversationCache::in_memory(8, 7200);
        let summary = RollingSummary {
            summary: "User is uploading photos".into(),
            current_topic: Some("photos".into()),
            conversation_state: Default::default(),
            key_facts: vec!["uses mobile app".into()],
            updated_at: chrono::Utc::now(),
        };
        cache.store_summary("s1", &summary).await.unwrap();
        assert!(cache.summary("s1").await.is_some());

        cache.clear_session("s1").await;
        assert!(cache.summary("s1").await.is_none());
        assert!(cache.turns("s1", 8).await.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_degradation() {
        let cache = ConversationCache::in_memory(8, 7200);
        let health = cache.health().await;
        assert!(!health.connected);
        assert!(health.degraded);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let cache = ConversationCache::in_memory(8, 7200);
        cache.add_turn("a", &Turn::user("for a")).await.unwrap();
        cache.add_turn("b", &Turn::user("for b")).await.unwrap();
        assert_eq!(cache.turns("a", 8).await.len(), 1);
        assert_eq!(cache.turns("b", 8).await[0].content, "for b");
    }
}
