// src/agent/escalate.rs
// Escalation decision and response shaping
//
// Three escalation scenarios: the user asks for a human, retrieval came
// back empty, or the best similarity sits below the confidence floor.

use std::sync::Arc;

use tracing::{info, warn};

use crate::http::CHAT_DEADLINE;
use crate::llm::{ChatMessage, ChatModel};
use crate::memory::types::Turn;
use crate::utils::with_deadline;

/// Why a query escalates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    UserRequested,
    NoResultsFound,
    LowConfidence,
    None,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequested => "user_requested",
            Self::NoResultsFound => "no_results_found",
            Self::LowConfidence => "low_confidence",
            Self::None => "none",
        }
    }
}

/// How urgently to escalate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationType {
    Immediate,
    Conditional,
    None,
}

impl EscalationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Conditional => "conditional",
            Self::None => "none",
        }
    }
}

/// How the response text gets shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStrategy {
    OfferTicket,
    AskIfHelps,
    None,
}

/// Escalation outcome for one query
#[derive(Debug, Clone, Copy)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub reason: EscalationReason,
    pub kind: EscalationType,
    pub strategy: ResponseStrategy,
}

impl EscalationDecision {
    pub fn none() -> Self {
        Self {
            should_escalate: false,
            reason: EscalationReason::None,
            kind: EscalationType::None,
            strategy: ResponseStrategy::None,
        }
    }
}

const HANDOFF_LINE: &str = "I'll help you raise a support ticket right away. Our team will get back to you shortly. Would you like to proceed?";

const NO_RESULTS_SUFFIX: &str = "I don't have enough information to fully answer this. Would you like me to create a support ticket so our team can help you directly?";

const ASK_IF_HELPS_SUFFIX: &str = "Does this help answer your question, or would you like me to create a support ticket for more detailed assistance?";

/// Decides whether and how to hand the user to a human
pub struct EscalationEngine {
    chat: Arc<dyn ChatModel>,
    confidence_floor: f32,
}

impl EscalationEngine {
    pub fn new(chat: Arc<dyn ChatModel>, confidence_floor: f32) -> Self {
        Self {
            chat,
            confidence_floor,
        }
    }

    /// Evaluate the three escalation scenarios in priority order.
    /// Confidence exactly at the floor does NOT escalate.
    pub async fn check(
        &self,
        query: &str,
        has_results: bool,
        best_confidence: f32,
        recent_turns: &[Turn],
    ) -> EscalationDecision {
        if self.detect_escalation_request(query, recent_turns).await {
            info!("User explicitly requested human help");
            return EscalationDecision {
                should_escalate: true,
                reason: EscalationReason::UserRequested,
                kind: EscalationType::Immediate,
                strategy: ResponseStrategy::OfferTicket,
            };
        }

        if !has_results {
            return EscalationDecision {
                should_escalate: true,
                reason: EscalationReason::NoResultsFound,
                kind: EscalationType::Immediate,
                strategy: ResponseStrategy::OfferTicket,
            };
        }

        if best_confidence < self.confidence_floor {
            return EscalationDecision {
                should_escalate: true,
                reason: EscalationReason::LowConfidence,
                kind: EscalationType::Conditional,
                strategy: ResponseStrategy::AskIfHelps,
            };
        }

        EscalationDecision::none()
    }

    /// Constrained LLM Yes/No classification of an explicit handoff
    /// request. Fails safe: detection errors read as "no".
    async fn detect_escalation_request(&self, query: &str, recent_turns: &[Turn]) -> bool {
        let context = recent_turns
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|t| format!("{}: {}", t.role.as_str(), t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"Analyze this user message and determine if they are requesting to speak with a human agent or raise a support ticket.

Conversation context:
{}

Current user message:
{query}

The user IS requesting escalation if they explicitly ask for a human, agent or support person, ask to create or raise a ticket, say the bot isn't helping and want human help, or answer "yes" to a ticket offer.

The user is NOT requesting escalation if they simply have a question (even a frustrated one), are clarifying, or decline an escalation offer.

Return ONLY "YES" or "NO"."#,
            if context.is_empty() { "No previous context" } else { context.as_str() },
        );

        let result = with_deadline(
            "llm_chat",
            CHAT_DEADLINE,
            self.chat.chat(vec![ChatMessage::user(prompt)]),
        )
        .await;

        match result {
            Ok(r) => r.content.trim().to_uppercase().starts_with("YES"),
            Err(e) => {
                warn!(error = %e, "Escalation detection failed, assuming no");
                false
            }
        }
    }
}

/// Shape the user-visible answer according to the decision
pub fn shape_response(base_response: &str, decision: &EscalationDecision) -> String {
    match (decision.kind, decision.strategy) {
        (EscalationType::Immediate, ResponseStrategy::OfferTicket) => {
            if decision.reason == EscalationReason::UserRequested {
                // The handoff line replaces the answer entirely
                HANDOFF_LINE.to_string()
            } else {
                format!("{base_response}\n\n{NO_RESULTS_SUFFIX}")
            }
        }
        (EscalationType::Conditional, ResponseStrategy::AskIfHelps) => {
            format!("{base_response}\n\n{ASK_IF_HELPS_SUFFIX}")
        }
        _ => base_response.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::ChatResult;

    struct YesNoModel {
        answer: &'static str,
    }

    #[async_trait::async_trait]
    impl ChatModel for YesNoModel {
        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatResult> {
            Ok(ChatResult {
                request_id: "r".into(),
                content: self.answer.to_string(),
                usage: None,
                duration_ms: 1,
            })
        }
        fn model_name(&self) -> String {
            "fake".into()
        }
        async fn probe(&self) -> Result<()> {
            Ok(())
        }
    }

    fn engine(answer: &'static str) -> EscalationEngine {
        EscalationEngine::new(Arc::new(YesNoModel { answer }), 0.7)
    }

    #[tokio::test]
    async fn test_user_request_wins() {
        let decision = engine("YES")
            .check("please get me a human", true, 0.95, &[])
            .await;
        assert!(decision.should_escalate);
        assert_eq!(decision.reason, EscalationReason::UserRequested);
        assert_eq!(decision.kind, EscalationType::Immediate);
    }

    #[tokio::test]
    async fn test_no_results_escalates_immediately() {
        let decision = engine("NO").check("moon landing", false, 0.0, &[]).await;
        assert!(decision.should_escalate);
        assert_eq!(decision.reason, EscalationReason::NoResultsFound);
        assert_eq!(decision.kind, EscalationType::Immediate);
    }

    #[tokio::test]
    async fn test_low_confidence_is_conditional() {
        let decision = engine("NO").check("question", true, 0.55, &[]).await;
        assert!(decision.should_escalate);
        assert_eq!(decision.reason, EscalationReason::LowConfidence);
        assert_eq!(decision.kind, EscalationType::Conditional);
    }

    #[tokio::test]
    async fn test_confidence_at_floor_does_not_escalate() {
        let decision = engine("NO").check("question", true, 0.7, &[]).await;
        assert!(!decision.should_escalate);
        assert_eq!(decision.reason, EscalationReason::None);
    }

    #[tokio::test]
    async fn test_detection_failure_fails_safe() {
        struct BrokenModel;
        #[async_trait::async_trait]
        impl ChatModel for BrokenModel {
            async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatResult> {
                Err(crate::AgentError::Llm("down".into()))
            }
            fn model_name(&self) -> String {
                "broken".into()
            }
            async fn probe(&self) -> Result<()> {
                Ok(())
            }
        }
        let engine = EscalationEngine::new(Arc::new(BrokenModel), 0.7);
        let decision = engine.check("get me a human", true, 0.9, &[]).await;
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_shape_user_requested_replaces_answer() {
        let decision = EscalationDecision {
            should_escalate: true,
            reason: EscalationReason::UserRequested,
            kind: EscalationType::Immediate,
            strategy: ResponseStrategy::OfferTicket,
        };
        let shaped = shape_response("irrelevant retrieval answer", &decision);
        assert_eq!(shaped, HANDOFF_LINE);
    }

    #[test]
    fn test_shape_no_results_appends_offer() {
        let decision = EscalationDecision {
            should_escalate: true,
            reason: EscalationReason::NoResultsFound,
            kind: EscalationType::Immediate,
            strategy: ResponseStrategy::OfferTicket,
        };
        let shaped = shape_response("Base answer.", &decision);
        assert!(shaped.starts_with("Base answer."));
        assert!(shaped.ends_with(NO_RESULTS_SUFFIX));
    }

    #[test]
    fn test_shape_low_confidence_asks_if_helps() {
        let decision = EscalationDecision {
            should_escalate: true,
            reason: EscalationReason::LowConfidence,
            kind: EscalationType::Conditional,
            strategy: ResponseStrategy::AskIfHelps,
        };
        let shaped = shape_response("Base answer.", &decision);
        assert!(shaped.contains("Does this help answer your question"));
    }

    #[test]
    fn test_shape_no_escalation_passthrough() {
        let shaped = shape_response("Base answer.", &EscalationDecision::none());
        assert_eq!(shaped, "Base answer.");
    }
}
