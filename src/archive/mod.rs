// src/archive/mod.rs
// Durable end-of-session archive
//
// Nothing durable happens while a session is live; this module receives
// exactly one batch per session and commits it atomically: final
// summary, buffered analytics, user counters, recent-sessions list.

mod sqlite;

pub use sqlite::SqliteArchive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::analytics::{CostBreakdown, QueryRecord};
use crate::error::Result;
use crate::memory::types::FinalSummary;

/// Everything written when a session ends
#[derive(Debug, Clone)]
pub struct SessionEndBatch {
    pub session_id: String,
    pub agent_id: String,
    pub reason: String,
    pub final_summary: FinalSummary,
    pub queries: Vec<QueryRecord>,
    pub cost: CostBreakdown,
    pub user_info: Option<serde_json::Value>,
    pub ended_at: DateTime<Utc>,
}

/// Seam over the durable store. The batch is atomic at this boundary:
/// either all four writes are attempted in one transaction, or none.
#[async_trait]
pub trait Archive: Send + Sync {
    async fn write_session_end(&self, batch: SessionEndBatch) -> Result<()>;
}

/// Archive that drops everything, for ephemeral deployments and tests
#[derive(Debug, Default)]
pub struct NullArchive;

#[async_trait]
impl Archive for NullArchive {
    async fn write_session_end(&self, _batch: SessionEndBatch) -> Result<()> {
        Ok(())
    }
}
