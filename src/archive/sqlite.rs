// src/archive/sqlite.rs
// SQLite-backed archive using a deadpool connection pool

use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::archive::{Archive, SessionEndBatch};
use crate::error::{AgentError, Result};
use crate::utils::truncate_chars;

/// Recent-sessions list cap per user
const RECENT_SESSIONS_CAP: usize = 5;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_summaries (
    session_id   TEXT PRIMARY KEY,
    agent_id     TEXT NOT NULL,
    reason       TEXT NOT NULL,
    summary_json TEXT NOT NULL,
    query_count  INTEGER NOT NULL,
    total_cost   REAL NOT NULL,
    ended_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS query_analytics (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id    TEXT NOT NULL,
    agent_id      TEXT NOT NULL,
    query_text    TEXT NOT NULL,
    response_text TEXT NOT NULL,
    metrics_json  TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_query_analytics_session ON query_analytics(session_id);

CREATE TABLE IF NOT EXISTS user_stats (
    agent_id       TEXT PRIMARY KEY,
    total_sessions INTEGER NOT NULL DEFAULT 0,
    total_queries  INTEGER NOT NULL DEFAULT 0,
    total_cost     REAL NOT NULL DEFAULT 0,
    user_info_json TEXT,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_recent_sessions (
    agent_id      TEXT PRIMARY KEY,
    sessions_json TEXT NOT NULL
);
"#;

/// SQLite archive behind an async connection pool
pub struct SqliteArchive {
    pool: Pool,
}

impl SqliteArchive {
    /// Open (and migrate) the archive at the given path
    pub async fn open(path: &str) -> Result<Self> {
        let archive = Self::build(path)?;
        archive.migrate().await?;
        info!(path, "Archive opened");
        Ok(archive)
    }

    /// Shared in-memory archive, for tests
    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!("file:archive_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let archive = Self::build(&uri)?;
        archive.migrate().await?;
        Ok(archive)
    }

    fn build(conn_str: &str) -> Result<Self> {
        let pool = Config::new(conn_str)
            .builder(Runtime::Tokio1)
            .map_err(|e| AgentError::Archive(format!("pool builder failed: {e}")))?
            .max_size(4)
            .build()
            .map_err(|e| AgentError::Archive(format!("pool build failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn migrate(&self) -> Result<()> {
        self.interact(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(|e| AgentError::Archive(format!("migration failed: {e}")))
        })
        .await
    }

    /// Run a closure against a pooled connection on the blocking pool
    async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AgentError::Archive(format!("no connection available: {e}")))?;

        conn.interact(f)
            .await
            .map_err(|e| AgentError::Archive(format!("interact failed: {e}")))?
    }

    /// Number of analytics rows stored for a session (test/admin support)
    pub async fn query_count(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.interact(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM query_analytics WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(|e| AgentError::Archive(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl Archive for SqliteArchive {
    async fn write_session_end(&self, batch: SessionEndBatch) -> Result<()> {
        let summary_json = serde_json::to_string(&batch.final_summary)?;
        let ended_at = batch.ended_at.to_rfc3339();
        let user_info_json = batch
            .user_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let recent_entry = serde_json::json!({
            "session_id": batch.session_id,
            "date": ended_at,
            "summary": truncate_chars(&batch.final_summary.summary, 200),
        });

        let queries: Vec<(String, String, String, String)> = batch
            .queries
            .iter()
            .map(|q| {
                Ok((
                    q.query_text.clone(),
                    q.response_text.clone(),
                    serde_json::to_string(&q.metrics)?,
                    q.timestamp.to_rfc3339(),
                ))
            })
            .collect::<Result<_>>()?;

        let query_count = queries.len();
        let total_cost = batch.cost.total_cost;
        let session_id = batch.session_id.clone();
        let agent_id = batch.agent_id.clone();
        let reason = batch.reason.clone();

        self.interact(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| AgentError::Archive(e.to_string()))?;

            tx.execute(
                "INSERT OR REPLACE INTO session_summaries
                     (session_id, agent_id, reason, summary_json, query_count, total_cost, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![session_id, agent_id, reason, summary_json, query_count as i64, total_cost, ended_at],
            )
            .map_err(|e| AgentError::Archive(e.to_string()))?;

            for (query_text, response_text, metrics_json, created_at) in &queries {
                tx.execute(
                    "INSERT INTO query_analytics
                         (session_id, agent_id, query_text, response_text, metrics_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![session_id, agent_id, query_text, response_text, metrics_json, created_at],
                )
                .map_err(|e| AgentError::Archive(e.to_string()))?;
            }

            tx.execute(
                "INSERT INTO user_stats (agent_id, total_sessions, total_queries, total_cost, user_info_json, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(agent_id) DO UPDATE SET
                     total_sessions = total_sessions + 1,
                     total_queries  = total_queries + excluded.total_queries,
                     total_cost     = total_cost + excluded.total_cost,
                     user_info_json = COALESCE(excluded.user_info_json, user_info_json),
                     updated_at     = excluded.updated_at",
                params![agent_id, query_count as i64, total_cost, user_info_json, ended_at],
            )
            .map_err(|e| AgentError::Archive(e.to_string()))?;

            // Prepend to the user's recent sessions, capped
            let existing: Option<String> = tx
                .query_row(
                    "SELECT sessions_json FROM user_recent_sessions WHERE agent_id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .ok();
            let mut recent: Vec<serde_json::Value> = existing
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            recent.insert(0, recent_entry);
            recent.truncate(RECENT_SESSIONS_CAP);
            let sessions_json = serde_json::to_string(&recent)
                .map_err(|e| AgentError::Archive(e.to_string()))?;

            tx.execute(
                "INSERT INTO user_recent_sessions (agent_id, sessions_json)
                 VALUES (?1, ?2)
                 ON CONFLICT(agent_id) DO UPDATE SET sessions_json = excluded.sessions_json",
                params![agent_id, sessions_json],
            )
            .map_err(|e| AgentError::Archive(e.to_string()))?;

            tx.commit().map_err(|e| AgentError::Archive(e.to_string()))?;
            debug!(session_id = %session_id, query_count, "Session batch archived");
            Ok(())
        })
        .await
    }
}
