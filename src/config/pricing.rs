// src/config/pricing.rs
// Model price table for cost attribution
//
// Prices are currency per 1M tokens, loaded from YAML with a default
// entry for models the table does not list.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use crate::error::{AgentError, Result};

const EMBEDDED_PRICING: &str = include_str!("../../config/model_pricing.yaml");

/// Chat model pricing
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChatModelPrice {
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
}

/// Embedding model pricing
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EmbeddingModelPrice {
    pub cost_per_1m_tokens: f64,
}

/// Fallback prices for unlisted models
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DefaultPrice {
    pub embedding_cost_per_1m: f64,
    pub chat_input_cost_per_1m: f64,
    pub chat_output_cost_per_1m: f64,
}

/// Cost of a single chat call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatCost {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Price table indexed by model name
#[derive(Debug, Clone, Deserialize)]
pub struct PriceTable {
    #[serde(default)]
    chat_models: HashMap<String, ChatModelPrice>,
    #[serde(default)]
    embedding_models: HashMap<String, EmbeddingModelPrice>,
    default: DefaultPrice,
}

impl PriceTable {
    /// Load from an optional YAML file path, falling back to the embedded table
    pub fn load(path: Option<&str>) -> Result<Self> {
        let raw = match path {
            Some(p) => std::fs::read_to_string(p)
                .map_err(|e| AgentError::Config(format!("cannot read price table {p}: {e}")))?,
            None => EMBEDDED_PRICING.to_string(),
        };
        serde_yaml::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("invalid price table: {e}")))
    }

    /// Cost of a chat call, rounded for aggregation
    pub fn chat_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> ChatCost {
        let (input_per_1m, output_per_1m) = match self.chat_models.get(model) {
            Some(p) => (p.input_cost_per_1m, p.output_cost_per_1m),
            None => {
                warn!(model, "No pricing for chat model, using default");
                (
                    self.default.chat_input_cost_per_1m,
                    self.default.chat_output_cost_per_1m,
                )
            }
        };

        let input_cost = round8(input_tokens as f64 / 1_000_000.0 * input_per_1m);
        let output_cost = round8(output_tokens as f64 / 1_000_000.0 * output_per_1m);
        ChatCost {
            input_cost,
            output_cost,
            total_cost: round8(input_cost + output_cost),
        }
    }

    /// Cost of embedding `tokens` tokens, rounded for aggregation
    pub fn embedding_cost(&self, model: &str, tokens: u64) -> f64 {
        let per_1m = match self.embedding_models.get(model) {
            Some(p) => p.cost_per_1m_tokens,
            None => {
                warn!(model, "No pricing for embedding model, using default");
                self.default.embedding_cost_per_1m
            }
        };
        round8(tokens as f64 / 1_000_000.0 * per_1m)
    }
}

/// Aggregation precision: eight fractional digits
pub fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Display precision: six fractional digits
pub fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
