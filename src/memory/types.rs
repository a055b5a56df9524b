// src/memory/types.rs
// Session, turn, and summary records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::CostBreakdown;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Metadata attached to an assistant turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_escalation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single message in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>, metadata: Option<TurnMetadata>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Coarse conversation phase tracked by the rolling summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    #[default]
    Exploring,
    Troubleshooting,
    Completing,
    #[serde(other)]
    Unknown,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploring => "exploring",
            Self::Troubleshooting => "troubleshooting",
            Self::Completing => "completing",
            Self::Unknown => "unknown",
        }
    }
}

/// Compact representation of older conversation turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingSummary {
    pub summary: String,
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub conversation_state: ConversationState,
    #[serde(default)]
    pub key_facts: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Session metadata
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<serde_json::Value>,
    pub message_count: u32,
}

/// Conversation context handed to LLM calls
#[derive(Debug, Clone, Default)]
pub struct LlmContext {
    pub messages: Vec<Turn>,
    pub summary: Option<RollingSummary>,
    /// Pre-formatted block joining summary and recent messages
    pub formatted: String,
}

impl LlmContext {
    pub fn is_empty(&self) -> bool {
        self.formatted.trim().is_empty()
    }
}

/// End-of-session summary written to the archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSummary {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub resolution_status: Option<String>,
    #[serde(default)]
    pub user_satisfaction: Option<String>,
    #[serde(default)]
    pub key_issues: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_roundtrip() {
        let turn = Turn::assistant(
            "Click Add Photos.",
            Some(TurnMetadata {
                confidence: Some(0.9),
                query_type: Some("howto".into()),
                sources_used: vec!["Upload Photos Guide".into()],
                requires_escalation: Some(false),
                cost: None,
                error: None,
            }),
        );
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, TurnRole::Assistant);
        assert_eq!(back.content, "Click Add Photos.");
        assert_eq!(back.metadata.unwrap().confidence, Some(0.9));
    }

    #[test]
    fn test_conversation_state_tolerant_parse() {
        let state: ConversationState = serde_json::from_str("\"troubleshooting\"").unwrap();
        assert_eq!(state, ConversationState::Troubleshooting);
        let odd: ConversationState = serde_json::from_str("\"pondering\"").unwrap();
        assert_eq!(odd, ConversationState::Unknown);
    }
}
