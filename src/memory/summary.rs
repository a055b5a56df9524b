// src/memory/summary.rs
// Rolling and end-of-session conversation summarisation

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::http::CHAT_DEADLINE;
use crate::llm::{ChatMessage, ChatModel};
use crate::memory::types::{ConversationState, FinalSummary, RollingSummary, Turn};
use crate::utils::json::parse_llm_json;
use crate::utils::with_deadline;

const ROLLING_PROMPT: &str = r#"You maintain a compact running summary of a support conversation.

Previous summary (may be empty):
{previous}

New messages since that summary:
{messages}

Produce an updated summary. Respond with JSON only:
{
  "summary": "2-4 sentence narrative of the conversation so far",
  "current_topic": "what the user is working on right now",
  "conversation_state": "exploring" | "troubleshooting" | "completing",
  "key_facts": ["short factual statements worth remembering", ...]
}"#;

const FINAL_PROMPT: &str = r#"Summarise this completed support conversation.

CONVERSATION:
{messages}

Respond with JSON only:
{
  "summary": "2-3 sentence overview of what happened",
  "topics": ["main topics discussed", ...],
  "resolution_status": "resolved" | "partial" | "escalated" | "abandoned",
  "user_satisfaction": "satisfied" | "neutral" | "frustrated" | "unknown",
  "key_issues": "main problems or questions raised",
  "outcome": "what was achieved or decided"
}"#;

#[derive(Debug, Deserialize)]
struct RawRollingSummary {
    summary: String,
    #[serde(default)]
    current_topic: Option<String>,
    #[serde(default)]
    conversation_state: ConversationState,
    #[serde(default)]
    key_facts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFinalSummary {
    summary: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    resolution_status: Option<String>,
    #[serde(default)]
    user_satisfaction: Option<String>,
    #[serde(default)]
    key_issues: Option<String>,
    #[serde(default)]
    outcome: Option<String>,
}

/// Generates rolling and final summaries via the chat model
pub struct Summarizer {
    chat: Arc<dyn ChatModel>,
}

impl Summarizer {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Condense the previous summary plus the newest turns into an
    /// updated rolling summary. Errors propagate so the caller can keep
    /// the previous summary in place.
    pub async fn rolling(
        &self,
        previous: Option<&RollingSummary>,
        turns: &[Turn],
        session_id: &str,
    ) -> Result<RollingSummary> {
        let prompt = ROLLING_PROMPT
            .replace(
                "{previous}",
                previous.map(|s| s.summary.as_str()).unwrap_or("(none)"),
            )
            .replace("{messages}", &format_turns(turns));

        let result = with_deadline(
            "llm_chat",
            CHAT_DEADLINE,
            self.chat.chat(vec![ChatMessage::user(prompt)]),
        )
        .await?;

        let raw: RawRollingSummary = parse_llm_json(&result.content)?;
        info!(
            session_id,
            topic = raw.current_topic.as_deref().unwrap_or("unknown"),
            state = raw.conversation_state.as_str(),
            "Rolling summary updated"
        );

        Ok(RollingSummary {
            summary: raw.summary,
            current_topic: raw.current_topic,
            conversation_state: raw.conversation_state,
            key_facts: raw.key_facts,
            updated_at: Utc::now(),
        })
    }

    /// Summarise an entire session for the archive. Never fails: LLM
    /// problems degrade to a heuristic summary.
    pub async fn final_summary(&self, turns: &[Turn], session_id: &str) -> FinalSummary {
        if turns.len() < 2 {
            return FinalSummary {
                summary: "Brief session with minimal interaction".into(),
                topics: vec![],
                resolution_status: Some("incomplete".into()),
                user_satisfaction: Some("unknown".into()),
                key_issues: None,
                outcome: None,
                message_count: turns.len(),
                duration_seconds: duration_seconds(turns),
            };
        }

        let prompt = FINAL_PROMPT.replace("{messages}", &format_turns(turns));

        let parsed: Result<RawFinalSummary> = match with_deadline(
            "llm_chat",
            CHAT_DEADLINE,
            self.chat.chat(vec![ChatMessage::user(prompt)]),
        )
        .await
        {
            Ok(result) => parse_llm_json(&result.content),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(raw) => FinalSummary {
                summary: raw.summary,
                topics: raw.topics,
                resolution_status: raw.resolution_status,
                user_satisfaction: raw.user_satisfaction,
                key_issues: raw.key_issues,
                outcome: raw.outcome,
                message_count: turns.len(),
                duration_seconds: duration_seconds(turns),
            },
            Err(e) => {
                warn!(session_id, error = %e, "Final summary generation failed, using fallback");
                fallback_final_summary(turns)
            }
        }
    }
}

fn format_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            let content: String = t.content.chars().take(500).collect();
            format!("{}: {}", t.role.as_str().to_uppercase(), content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn duration_seconds(turns: &[Turn]) -> Option<i64> {
    let first = turns.first()?.timestamp;
    let last = turns.last()?.timestamp;
    Some((last - first).num_seconds())
}

/// Keyword-driven summary used when the LLM cannot produce one
fn fallback_final_summary(turns: &[Turn]) -> FinalSummary {
    let mut topics = Vec::new();
    for turn in turns.iter().filter(|t| t.role == crate::memory::types::TurnRole::User) {
        let content = turn.content.to_lowercase();
        if content.contains("error") && !topics.contains(&"error resolution".to_string()) {
            topics.push("error resolution".to_string());
        }
        if content.contains("listing") && !topics.contains(&"listing management".to_string()) {
            topics.push("listing management".to_string());
        }
        if ["how", "what", "define"].iter().any(|w| content.contains(w))
            && !topics.contains(&"information request".to_string())
        {
            topics.push("information request".to_string());
        }
    }
    if topics.is_empty() {
        topics.push("general inquiry".to_string());
    }

    FinalSummary {
        summary: format!("Support session with {} messages", turns.len()),
        topics,
        resolution_status: Some("unknown".into()),
        user_satisfaction: Some("unknown".into()),
        key_issues: None,
        outcome: Some("Session completed".into()),
        message_count: turns.len(),
        duration_seconds: duration_seconds(turns),
    }
}
