// src/agent/respond.rs
// Final answer generation with source-attributed passages

use std::sync::Arc;

use tracing::{debug, info};

use crate::analytics::{Operation, TokenTracker};
use crate::error::Result;
use crate::http::CHAT_DEADLINE;
use crate::kb::KbHit;
use crate::llm::{ChatMessage, ChatModel};
use crate::prompts::PromptSet;
use crate::utils::{render_template, with_deadline};

/// Generates the user-visible answer
pub struct ResponseGenerator {
    chat: Arc<dyn ChatModel>,
    meter: Arc<TokenTracker>,
    prompts: Arc<PromptSet>,
    max_passages: usize,
}

impl ResponseGenerator {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        meter: Arc<TokenTracker>,
        prompts: Arc<PromptSet>,
        max_passages: usize,
    ) -> Self {
        Self {
            chat,
            meter,
            prompts,
            max_passages,
        }
    }

    /// Generate an answer from retrieval passages and conversation
    /// context. An empty hit list produces an empty passages block; the
    /// context-only branch uses exactly this entry point.
    pub async fn generate(
        &self,
        query: &str,
        hits: &[KbHit],
        conversation_context: &str,
        session_id: &str,
    ) -> Result<String> {
        let passages = format_passages(hits, self.max_passages);
        self.invoke(query, &passages, conversation_context, session_id)
            .await
    }

    /// Fallback entry point used when retrieval came back empty
    pub async fn generate_fallback(&self, query: &str, session_id: &str) -> Result<String> {
        debug!("Generating fallback response without KB passages");
        self.invoke(query, "", "No previous conversation", session_id)
            .await
    }

    async fn invoke(
        &self,
        query: &str,
        passages: &str,
        conversation_context: &str,
        session_id: &str,
    ) -> Result<String> {
        let conversation_context = if conversation_context.trim().is_empty() {
            "No previous conversation"
        } else {
            conversation_context
        };

        let prompt = render_template(
            &self.prompts.response_generator,
            &[
                ("conversation_context", conversation_context),
                ("context", passages),
                ("query", query),
            ],
        );

        let result = with_deadline(
            "llm_chat",
            CHAT_DEADLINE,
            self.chat.chat(vec![
                ChatMessage::system(self.prompts.system.clone()),
                ChatMessage::user(prompt),
            ]),
        )
        .await?;

        if let Some(usage) = result.usage {
            self.meter.track_chat(
                session_id,
                Operation::ResponseGeneration,
                &self.chat.model_name(),
                &usage,
            );
        }

        info!(chars = result.content.len(), "Response generated");
        Ok(result.content)
    }
}

/// Format passages with inline source headers:
/// `[Source n: <title> (<entry_type>, confidence 0.nn)]`
pub fn format_passages(hits: &[KbHit], max_passages: usize) -> String {
    hits.iter()
        .take(max_passages)
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[Source {}: {} ({}, confidence {:.2})]\n{}",
                i + 1,
                hit.title(),
                hit.entry_type,
                hit.score,
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, entry_type: &str, content: &str, score: f32) -> KbHit {
        KbHit {
            id: "c1".into(),
            parent_entry_id: None,
            parent_title: Some(title.into()),
            chunk_index: None,
            total_chunks: None,
            section_type: None,
            entry_type: entry_type.into(),
            user_class: "external".into(),
            category: None,
            tags: vec![],
            related_titles: vec![],
            content: content.into(),
            score,
        }
    }

    #[test]
    fn test_format_passages_headers() {
        let hits = vec![
            hit("Upload Photos Guide", "how_to", "Click Add Photos.", 0.82),
            hit("Photo Limits", "definition", "Max 20 photos.", 0.61),
        ];
        let formatted = format_passages(&hits, 3);
        assert!(formatted.contains("[Source 1: Upload Photos Guide (how_to, confidence 0.82)]"));
        assert!(formatted.contains("[Source 2: Photo Limits (definition, confidence 0.61)]"));
        assert!(formatted.contains("Click Add Photos."));
    }

    #[test]
    fn test_format_passages_caps_count() {
        let hits: Vec<KbHit> = (0..5)
            .map(|i| hit(&format!("T{i}"), "how_to", "c", 0.8))
            .collect();
        let formatted = format_passages(&hits, 3);
        assert!(formatted.contains("[Source 3:"));
        assert!(!formatted.contains("[Source 4:"));
    }

    #[test]
    fn test_format_passages_empty() {
        assert_eq!(format_passages(&[], 3), "");
    }
}
