// src/analytics/cost.rs
// Cost and token breakdown for a session's LLM usage

use serde::{Deserialize, Serialize};

use crate::config::pricing::round6;

/// Costs and token counts attributed to one session, split by operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    // Costs (currency)
    pub embedding_cost: f64,
    pub query_intelligence_cost: f64,
    pub response_generation_cost: f64,
    pub total_cost: f64,

    // Token counts
    pub embedding_tokens: u64,
    pub query_intelligence_input_tokens: u64,
    pub query_intelligence_output_tokens: u64,
    pub response_input_tokens: u64,
    pub response_output_tokens: u64,
    pub total_tokens: u64,
}

impl CostBreakdown {
    /// Round monetary fields to display precision (six fractional digits)
    pub fn for_display(&self) -> Self {
        Self {
            embedding_cost: round6(self.embedding_cost),
            query_intelligence_cost: round6(self.query_intelligence_cost),
            response_generation_cost: round6(self.response_generation_cost),
            total_cost: round6(self.total_cost),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_rounding() {
        let breakdown = CostBreakdown {
            embedding_cost: 0.00000213,
            response_generation_cost: 0.00045678,
            total_cost: 0.00045891,
            ..Default::default()
        };
        let display = breakdown.for_display();
        assert_eq!(display.embedding_cost, 0.000002);
        assert_eq!(display.response_generation_cost, 0.000457);
        assert_eq!(display.total_cost, 0.000459);
    }
}
