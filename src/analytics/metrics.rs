// src/analytics/metrics.rs
// Per-query execution metrics with named timers

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::analytics::cost::CostBreakdown;
use crate::kb::KbHit;

/// Vector search execution stats
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchExecution {
    pub filters_applied: BTreeMap<String, String>,
    pub documents_scanned: usize,
    pub documents_matched: usize,
    pub documents_returned: usize,
    pub similarity_threshold: f32,
    pub embedding_time_ms: f64,
    pub search_time_ms: f64,
    pub rerank_time_ms: f64,
}

/// One attempt in the fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAttempt {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    pub results: usize,
}

/// Compact chunk reference recorded per query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub title: String,
    pub entry_type: String,
    pub score: f32,
}

impl From<&KbHit> for RetrievedChunk {
    fn from(hit: &KbHit) -> Self {
        Self {
            id: hit.id.clone(),
            title: hit.title().to_string(),
            entry_type: hit.entry_type.clone(),
            score: hit.score,
        }
    }
}

/// Complete execution metrics for one query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_text: String,
    pub query_type: String,
    pub classification_confidence: f32,

    #[serde(default)]
    pub enhanced_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_intent: Option<String>,
    #[serde(default)]
    pub query_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,

    pub search_execution: SearchExecution,
    #[serde(default)]
    pub search_attempts: Vec<SearchAttempt>,

    pub sources_found: usize,
    pub sources_used: usize,
    pub best_confidence: f32,
    #[serde(default)]
    pub retrieved_chunks: Vec<RetrievedChunk>,

    pub total_time_ms: f64,
    pub classification_time_ms: f64,
    pub query_intelligence_time_ms: f64,
    pub response_generation_time_ms: f64,

    pub cost_breakdown: CostBreakdown,

    pub escalated: bool,
    pub escalation_reason: String,
    pub escalation_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects metrics across the stages of one query
pub struct MetricsCollector {
    metrics: QueryMetrics,
    timers: HashMap<&'static str, Instant>,
}

impl MetricsCollector {
    pub fn start(query_text: &str) -> Self {
        let mut collector = Self {
            metrics: QueryMetrics {
                query_text: query_text.to_string(),
                escalation_reason: "none".into(),
                escalation_type: "none".into(),
                ..Default::default()
            },
            timers: HashMap::new(),
        };
        collector.start_timer("total");
        collector
    }

    pub fn start_timer(&mut self, name: &'static str) {
        self.timers.insert(name, Instant::now());
    }

    fn stop_timer(&mut self, name: &'static str) -> f64 {
        self.timers
            .remove(name)
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn record_classification(&mut self, query_type: &str, confidence: f32) {
        self.metrics.query_type = query_type.to_string();
        self.metrics.classification_confidence = confidence;
        self.metrics.classification_time_ms = self.stop_timer("classification");
    }

    pub fn record_intelligence(
        &mut self,
        enhanced_query: &str,
        routing: &str,
        category: Option<&str>,
        intent: Option<&str>,
        tags: &[String],
    ) {
        self.metrics.enhanced_query = enhanced_query.to_string();
        self.metrics.routing = Some(routing.to_string());
        self.metrics.query_category = category.map(String::from);
        self.metrics.query_intent = intent.map(String::from);
        self.metrics.query_tags = tags.to_vec();
        self.metrics.query_intelligence_time_ms = self.stop_timer("query_intelligence");
    }

    pub fn record_search_execution(&mut self, execution: SearchExecution) {
        self.metrics.search_execution = execution;
    }

    pub fn record_search_attempts(&mut self, attempts: &[SearchAttempt]) {
        self.metrics.search_attempts = attempts.to_vec();
    }

    pub fn push_search_attempt(&mut self, attempt: SearchAttempt) {
        self.metrics.search_attempts.push(attempt);
    }

    pub fn record_rerank_time(&mut self, rerank_time_ms: f64) {
        self.metrics.search_execution.rerank_time_ms = rerank_time_ms;
    }

    pub fn record_results(&mut self, found: usize, used: usize, best_confidence: f32, hits: &[KbHit]) {
        self.metrics.sources_found = found;
        self.metrics.sources_used = used;
        self.metrics.best_confidence = best_confidence;
        self.metrics.retrieved_chunks = hits.iter().map(RetrievedChunk::from).collect();
    }

    pub fn record_response_generation(&mut self) {
        self.metrics.response_generation_time_ms = self.stop_timer("response_generation");
    }

    pub fn record_escalation(&mut self, escalated: bool, reason: &str, kind: &str) {
        self.metrics.escalated = escalated;
        self.metrics.escalation_reason = reason.to_string();
        self.metrics.escalation_type = kind.to_string();
    }

    pub fn record_cost(&mut self, cost: CostBreakdown) {
        self.metrics.cost_breakdown = cost;
    }

    pub fn record_error(&mut self, error: &str) {
        self.metrics.error = Some(error.to_string());
    }

    /// Stop the total timer and hand the metrics out
    pub fn finalize(mut self) -> QueryMetrics {
        self.metrics.total_time_ms = self.stop_timer("total");
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stage_timings_sum_close_to_total() {
        let mut collector = MetricsCollector::start("how do I upload photos");

        collector.start_timer("classification");
        std::thread::sleep(Duration::from_millis(5));
        collector.record_classification("howto", 0.8);

        collector.start_timer("query_intelligence");
        std::thread::sleep(Duration::from_millis(5));
        collector.record_intelligence("upload photos to a listing", "full_rag", None, None, &[]);

        collector.start_timer("response_generation");
        std::thread::sleep(Duration::from_millis(5));
        collector.record_response_generation();

        let metrics = collector.finalize();
        let stage_sum = metrics.classification_time_ms
            + metrics.query_intelligence_time_ms
            + metrics.response_generation_time_ms
            + metrics.search_execution.embedding_time_ms
            + metrics.search_execution.search_time_ms
            + metrics.search_execution.rerank_time_ms;

        assert!(metrics.total_time_ms >= stage_sum);
        assert!((metrics.total_time_ms - stage_sum).abs() < 50.0);
    }

    #[test]
    fn test_unstarted_timer_reads_zero() {
        let mut collector = MetricsCollector::start("q");
        collector.record_classification("general", 0.5);
        assert_eq!(collector.metrics.classification_time_ms, 0.0);
    }

    #[test]
    fn test_defaults() {
        let metrics = MetricsCollector::start("q").finalize();
        assert_eq!(metrics.escalation_reason, "none");
        assert_eq!(metrics.escalation_type, "none");
        assert!(!metrics.escalated);
        assert!(metrics.error.is_none());
    }
}
