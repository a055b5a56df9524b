// src/analytics/mod.rs
// Per-query telemetry: cost attribution, timing, buffered records

pub mod buffer;
pub mod cost;
pub mod metrics;
pub mod tokens;

pub use buffer::{AnalyticsBuffer, QueryRecord};
pub use cost::CostBreakdown;
pub use metrics::{MetricsCollector, QueryMetrics, RetrievedChunk, SearchAttempt, SearchExecution};
pub use tokens::{Operation, TokenTracker};
