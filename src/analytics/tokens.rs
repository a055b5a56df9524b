// src/analytics/tokens.rs
// Token and cost meter keyed by (session, operation)

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use tracing::debug;

use crate::analytics::cost::CostBreakdown;
use crate::config::pricing::{PriceTable, round8};
use crate::llm::Usage;

/// Metered operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Embedding,
    QueryIntelligence,
    ResponseGeneration,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::QueryIntelligence => "query_intelligence",
            Self::ResponseGeneration => "response_generation",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct OpUsage {
    input_tokens: u64,
    output_tokens: u64,
    cost: f64,
}

/// Attributes token counts and monetary cost to (session, operation).
///
/// Access is serialised per session by the session lock held across a
/// query; the inner mutex only guards the map itself.
pub struct TokenTracker {
    pricing: Arc<PriceTable>,
    sessions: StdMutex<HashMap<String, HashMap<Operation, OpUsage>>>,
}

impl TokenTracker {
    pub fn new(pricing: Arc<PriceTable>) -> Self {
        Self {
            pricing,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Record usage from a chat call
    pub fn track_chat(&self, session_id: &str, operation: Operation, model: &str, usage: &Usage) {
        let cost = self
            .pricing
            .chat_cost(model, usage.prompt_tokens as u64, usage.completion_tokens as u64);

        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let entry = sessions
            .entry(session_id.to_string())
            .or_default()
            .entry(operation)
            .or_default();
        entry.input_tokens += usage.prompt_tokens as u64;
        entry.output_tokens += usage.completion_tokens as u64;
        entry.cost = round8(entry.cost + cost.total_cost);

        debug!(
            session_id,
            operation = operation.as_str(),
            input = usage.prompt_tokens,
            output = usage.completion_tokens,
            cost = cost.total_cost,
            "Tracked chat usage"
        );
    }

    /// Record usage from an embedding call (tokens only, no output)
    pub fn track_embedding(&self, session_id: &str, model: &str, tokens: u64) {
        let cost = self.pricing.embedding_cost(model, tokens);

        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let entry = sessions
            .entry(session_id.to_string())
            .or_default()
            .entry(Operation::Embedding)
            .or_default();
        entry.input_tokens += tokens;
        entry.cost = round8(entry.cost + cost);

        debug!(session_id, tokens, cost, "Tracked embedding usage");
    }

    /// Cumulative breakdown for a session
    pub fn breakdown(&self, session_id: &str) -> CostBreakdown {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let Some(ops) = sessions.get(session_id) else {
            return CostBreakdown::default();
        };

        let get = |op: Operation| ops.get(&op).copied().unwrap_or_default();
        let embedding = get(Operation::Embedding);
        let intelligence = get(Operation::QueryIntelligence);
        let response = get(Operation::ResponseGeneration);

        let total_cost = round8(embedding.cost + intelligence.cost + response.cost);
        let total_tokens = embedding.input_tokens
            + intelligence.input_tokens
            + intelligence.output_tokens
            + response.input_tokens
            + response.output_tokens;

        CostBreakdown {
            embedding_cost: embedding.cost,
            query_intelligence_cost: intelligence.cost,
            response_generation_cost: response.cost,
            total_cost,
            embedding_tokens: embedding.input_tokens,
            query_intelligence_input_tokens: intelligence.input_tokens,
            query_intelligence_output_tokens: intelligence.output_tokens,
            response_input_tokens: response.input_tokens,
            response_output_tokens: response.output_tokens,
            total_tokens,
        }
    }

    /// Drop all counters for a session (called at session end)
    pub fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TokenTracker {
        TokenTracker::new(Arc::new(PriceTable::load(None).unwrap()))
    }

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_breakdown_accumulates_by_operation() {
        let meter = tracker();
        meter.track_chat("s1", Operation::QueryIntelligence, "gpt-4o-mini", &usage(100, 40));
        meter.track_chat("s1", Operation::ResponseGeneration, "gpt-4o-mini", &usage(800, 120));
        meter.track_embedding("s1", "text-embedding-3-small", 24);

        let breakdown = meter.breakdown("s1");
        assert_eq!(breakdown.query_intelligence_input_tokens, 100);
        assert_eq!(breakdown.query_intelligence_output_tokens, 40);
        assert_eq!(breakdown.response_input_tokens, 800);
        assert_eq!(breakdown.response_output_tokens, 120);
        assert_eq!(breakdown.embedding_tokens, 24);
        assert_eq!(breakdown.total_tokens, 100 + 40 + 800 + 120 + 24);
    }

    #[test]
    fn test_total_cost_is_sum_of_operations() {
        let meter = tracker();
        meter.track_chat("s1", Operation::QueryIntelligence, "gpt-4o-mini", &usage(1000, 500));
        meter.track_chat("s1", Operation::ResponseGeneration, "gpt-4o-mini", &usage(2000, 900));
        meter.track_embedding("s1", "text-embedding-3-small", 500);

        let b = meter.breakdown("s1");
        let summed = round8(
            b.embedding_cost + b.query_intelligence_cost + b.response_generation_cost,
        );
        assert!((b.total_cost - summed).abs() < 1e-6);
    }

    #[test]
    fn test_sessions_do_not_leak_into_each_other() {
        let meter = tracker();
        meter.track_embedding("a", "text-embedding-3-small", 100);
        assert_eq!(meter.breakdown("b"), CostBreakdown::default());
    }

    #[test]
    fn test_clear_resets_session() {
        let meter = tracker();
        meter.track_embedding("s1", "text-embedding-3-small", 100);
        meter.clear("s1");
        assert_eq!(meter.breakdown("s1"), CostBreakdown::default());
    }
}
