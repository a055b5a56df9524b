// src/memory/session.rs
// Session lifecycle and per-session serialisation
//
// Every per-session mutation goes through this manager. Each session
// carries an async mutex; the orchestrator holds it for the whole query
// so turn appends, analytics buffering and the summary counter can
// never interleave within one session, while distinct sessions run
// fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::{AnalyticsBuffer, QueryMetrics, QueryRecord, TokenTracker};
use crate::archive::{Archive, SessionEndBatch};
use crate::config::MemoryConfig;
use crate::error::{AgentError, Result};
use crate::memory::cache::ConversationCache;
use crate::memory::summary::Summarizer;
use crate::memory::types::{LlmContext, SessionInfo, Turn, TurnMetadata, TurnRole};

/// Mutable per-session state, guarded by the session mutex
pub struct SessionState {
    pub info: SessionInfo,
    /// Messages since the last rolling summary
    pub summary_counter: u32,
    /// Related-document titles surfaced by earlier answers
    pub related_docs: Vec<String>,
}

/// Handle owning a session's lock and state
pub struct SessionHandle {
    pub state: Mutex<SessionState>,
}

/// Owns the per-session lifecycle and composes cache, analytics buffer,
/// cost meter, summariser and archive.
pub struct SessionManager {
    cache: Arc<ConversationCache>,
    buffer: Arc<AnalyticsBuffer>,
    meter: Arc<TokenTracker>,
    summarizer: Arc<Summarizer>,
    archive: Arc<dyn Archive>,
    config: MemoryConfig,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionManager {
    pub fn new(
        cache: Arc<ConversationCache>,
        buffer: Arc<AnalyticsBuffer>,
        meter: Arc<TokenTracker>,
        summarizer: Arc<Summarizer>,
        archive: Arc<dyn Archive>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            cache,
            buffer,
            meter,
            summarizer,
            archive,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn analytics(&self) -> &AnalyticsBuffer {
        &self.buffer
    }

    /// Create a fresh session with an opaque id
    pub async fn create_session(&self, user_info: Option<serde_json::Value>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let handle = Arc::new(SessionHandle {
            state: Mutex::new(SessionState {
                info: SessionInfo {
                    id: session_id.clone(),
                    created_at: now,
                    last_activity: now,
                    user_info,
                    message_count: 0,
                },
                summary_counter: 0,
                related_docs: Vec::new(),
            }),
        });

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.clone(), handle);
        info!(session_id = %session_id, "Session created");
        session_id
    }

    /// Look up a live session handle, enforcing the inactivity timeout
    /// and the extended lifetime cap. Expired sessions are flushed and
    /// surface as not found; a successful lookup refreshes activity.
    pub async fn handle(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        }?;

        let expiry = {
            let mut state = handle.state.lock().await;
            let now = Utc::now();
            let inactive_secs = (now - state.info.last_activity).num_seconds();
            let age_secs = (now - state.info.created_at).num_seconds();

            if age_secs > self.config.session_max_secs {
                Some("max_duration")
            } else if inactive_secs > self.config.session_timeout_secs {
                Some("timeout")
            } else {
                state.info.last_activity = now;
                None
            }
        };

        match expiry {
            Some(reason) => {
                info!(session_id, reason, "Session expired, flushing");
                if let Err(e) = self.end_session(session_id, None, reason).await {
                    warn!(session_id, error = %e, "Expiry flush failed");
                }
                None
            }
            None => Some(handle),
        }
    }

    /// Session metadata, or None when unknown/expired
    pub async fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        let handle = self.handle(session_id).await?;
        let state = handle.state.lock().await;
        Some(state.info.clone())
    }

    /// Append a turn. Assistant turns also buffer an analytics record
    /// keyed to the preceding user turn, and every append advances the
    /// summary counter; hitting the interval triggers the rolling
    /// summariser (after the turn is already in the cache).
    pub async fn add_message(
        &self,
        state: &mut SessionState,
        role: TurnRole,
        content: &str,
        metadata: Option<TurnMetadata>,
        metrics: Option<QueryMetrics>,
    ) -> Result<()> {
        let session_id = state.info.id.clone();
        let turn = Turn {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata,
        };
        self.cache.add_turn(&session_id, &turn).await?;

        state.info.message_count += 1;
        state.info.last_activity = Utc::now();

        if role == TurnRole::Assistant {
            // The preceding user turn is the question this turn answers
            let recent = self.cache.turns(&session_id, 2).await;
            let query_text = recent
                .iter()
                .rev()
                .find(|t| t.role == TurnRole::User)
                .map(|t| t.content.clone())
                .unwrap_or_else(|| "Unknown query".to_string());

            self.buffer.push(
                &session_id,
                QueryRecord {
                    query_text,
                    response_text: content.to_string(),
                    timestamp: Utc::now(),
                    metrics: metrics.unwrap_or_default(),
                },
            );
        }

        state.summary_counter += 1;
        // Only assistant appends may trigger the summariser: the interval
        // can be reached mid-query, and the summary must never run
        // between a question and its answer.
        if role == TurnRole::Assistant && state.summary_counter >= self.config.summary_interval {
            self.refresh_rolling_summary(&session_id).await;
            // Reset even on failure so a broken summariser cannot spin
            state.summary_counter = 0;
        }

        Ok(())
    }

    async fn refresh_rolling_summary(&self, session_id: &str) {
        let previous = self.cache.summary(session_id).await;
        let recent = self
            .cache
            .turns(session_id, self.config.summary_interval as usize)
            .await;
        if recent.is_empty() {
            return;
        }

        match self
            .summarizer
            .rolling(previous.as_ref(), &recent, session_id)
            .await
        {
            Ok(summary) => {
                if let Err(e) = self.cache.store_summary(session_id, &summary).await {
                    warn!(session_id, error = %e, "Failed to store rolling summary");
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "Rolling summary failed, keeping previous");
            }
        }
    }

    /// Conversation context for LLM calls: recent turns, the rolling
    /// summary, and a pre-formatted block joining both.
    pub async fn get_context_for_llm(&self, session_id: &str) -> LlmContext {
        let messages = self
            .cache
            .turns(session_id, self.config.context_messages)
            .await;
        let summary = self.cache.summary(session_id).await;

        let mut lines = Vec::new();
        if let Some(ref summary) = summary {
            lines.push("=== CONVERSATION SUMMARY ===".to_string());
            lines.push(format!("Overview: {}", summary.summary));
            if let Some(ref topic) = summary.current_topic {
                lines.push(format!("Current Topic: {topic}"));
            }
            lines.push(format!("State: {}", summary.conversation_state.as_str()));
            if !summary.key_facts.is_empty() {
                lines.push(format!("Key Facts: {}", summary.key_facts.join(", ")));
            }
            lines.push(String::new());
        }
        if !messages.is_empty() {
            lines.push("=== RECENT MESSAGES ===".to_string());
            for turn in &messages {
                lines.push(format!("{}: {}", turn.role.as_str().to_uppercase(), turn.content));
            }
        }

        LlmContext {
            messages,
            summary,
            formatted: lines.join("\n"),
        }
    }

    /// End a session: one batch write (final summary, analytics, user
    /// counters, recent sessions), then clear every live trace of it.
    /// Archive failure is logged and dropped; the cache is cleared
    /// regardless so a stuck session cannot survive its own end.
    pub async fn end_session(
        &self,
        session_id: &str,
        agent_id: Option<&str>,
        reason: &str,
    ) -> Result<()> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?
        };
        let state = handle.state.lock().await;

        info!(session_id, reason, "Ending session");

        let all_turns = self.cache.turns(session_id, 100).await;
        let queries = self.buffer.take(session_id);
        let cost = self.meter.breakdown(session_id);
        let final_summary = self.summarizer.final_summary(&all_turns, session_id).await;

        let agent_id = agent_id
            .map(String::from)
            .or_else(|| {
                state
                    .info
                    .user_info
                    .as_ref()
                    .and_then(|u| u.get("agent_id"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| "anonymous".to_string());

        let batch = SessionEndBatch {
            session_id: session_id.to_string(),
            agent_id,
            reason: reason.to_string(),
            final_summary,
            queries,
            cost,
            user_info: state.info.user_info.clone(),
            ended_at: Utc::now(),
        };

        if let Err(e) = self.archive.write_session_end(batch).await {
            // Accept data loss over a stuck session
            warn!(session_id, error = %e, "End-of-session archive write failed, dropping batch");
        }

        self.cache.clear_session(session_id).await;
        self.meter.clear(session_id);
        info!(session_id, "Session ended and cleared");
        Ok(())
    }

    /// Flush sessions whose inactivity exceeds the timeout. Returns how
    /// many were ended. Run periodically from a background task.
    pub async fn sweep_expired(&self) -> usize {
        let candidates: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        let mut ended = 0;
        for session_id in candidates {
            let expired = {
                let sessions = self.sessions.read().await;
                match sessions.get(&session_id) {
                    Some(handle) => {
                        let state = handle.state.lock().await;
                        let now = Utc::now();
                        (now - state.info.last_activity).num_seconds()
                            > self.config.session_timeout_secs
                            || (now - state.info.created_at).num_seconds()
                                > self.config.session_max_secs
                    }
                    None => false,
                }
            };
            if expired && self.end_session(&session_id, None, "timeout").await.is_ok() {
                ended += 1;
            }
        }
        ended
    }
}
