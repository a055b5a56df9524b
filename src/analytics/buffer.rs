// src/analytics/buffer.rs
// Per-session in-memory accumulator of query records
//
// Nothing durable is written while a session is live; the buffer is
// drained once by the end-of-session batch.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::metrics::QueryMetrics;

/// One buffered query: the user's question, the answer, and telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_text: String,
    pub response_text: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: QueryMetrics,
}

/// In-memory analytics accumulator keyed by session id
#[derive(Default)]
pub struct AnalyticsBuffer {
    inner: StdMutex<HashMap<String, Vec<QueryRecord>>>,
}

impl AnalyticsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, session_id: &str, record: QueryRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.entry(session_id.to_string()).or_default().push(record);
    }

    pub fn len(&self, session_id: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.get(session_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }

    /// Drain a session's records for the end-of-session batch
    pub fn take(&self, session_id: &str) -> Vec<QueryRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.remove(session_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str) -> QueryRecord {
        QueryRecord {
            query_text: query.to_string(),
            response_text: "answer".into(),
            timestamp: Utc::now(),
            metrics: QueryMetrics::default(),
        }
    }

    #[test]
    fn test_push_and_len() {
        let buffer = AnalyticsBuffer::new();
        assert!(buffer.is_empty("s1"));
        buffer.push("s1", record("q1"));
        buffer.push("s1", record("q2"));
        assert_eq!(buffer.len("s1"), 2);
        assert_eq!(buffer.len("other"), 0);
    }

    #[test]
    fn test_take_drains() {
        let buffer = AnalyticsBuffer::new();
        buffer.push("s1", record("q1"));
        let records = buffer.take("s1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query_text, "q1");
        assert!(buffer.is_empty("s1"));
    }
}
