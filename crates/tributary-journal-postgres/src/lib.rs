//! PostgreSQL implementation of the tributary workflow journal.
//!
//! This crate provides a durable implementation of the `WorkflowJournal`
//! trait, so event and project workflows survive process restarts: a
//! re-started workflow replays its recorded steps instead of running them
//! again, and a completed workflow returns its stored output.
//!
//! # Features
//!
//! - Idempotent `begin` via `INSERT ... ON CONFLICT`
//! - First-write-wins step recording
//! - Cleanup of old completed runs
//! - Journal health statistics
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE workflow_runs (
//!     workflow_id TEXT PRIMARY KEY,
//!     status TEXT NOT NULL DEFAULT 'running',
//!     output JSONB,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE workflow_steps (
//!     workflow_id TEXT NOT NULL REFERENCES workflow_runs (workflow_id) ON DELETE CASCADE,
//!     step_id TEXT NOT NULL,
//!     output JSONB NOT NULL,
//!     recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (workflow_id, step_id)
//! );
//!
//! CREATE INDEX idx_workflow_runs_completed ON workflow_runs (updated_at)
//!     WHERE status = 'completed';
//! ```
//!
//! [`PgWorkflowJournal::ensure_schema`] creates these if they are missing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tributary::IngestorBuilder;
//! use tributary_journal_postgres::PgWorkflowJournal;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let journal = PgWorkflowJournal::new(pool);
//! journal.ensure_schema().await?;
//!
//! let ingestor = IngestorBuilder::new(stores, pubsub, runner)
//!     .with_journal(Arc::new(journal))
//!     .build();
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use tributary::durable::{BeginOutcome, WorkflowJournal};
use tributary::{Result, TributaryError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_runs (
    workflow_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'running',
    output JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS workflow_steps (
    workflow_id TEXT NOT NULL REFERENCES workflow_runs (workflow_id) ON DELETE CASCADE,
    step_id TEXT NOT NULL,
    output JSONB NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (workflow_id, step_id)
);

CREATE INDEX IF NOT EXISTS idx_workflow_runs_completed ON workflow_runs (updated_at)
    WHERE status = 'completed';
"#;

/// Lifecycle of a journaled workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            _ => None,
        }
    }
}

fn db_error(err: sqlx::Error) -> TributaryError {
    TributaryError::store(format!("workflow journal: {err}"))
}

/// PostgreSQL workflow journal implementation.
#[derive(Clone)]
pub struct PgWorkflowJournal {
    pool: PgPool,
}

impl PgWorkflowJournal {
    /// Create a new PostgreSQL workflow journal.
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the journal tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        info!("workflow journal schema ready");
        Ok(())
    }
}

#[async_trait]
impl WorkflowJournal for PgWorkflowJournal {
    /// Register a run, or report what an earlier run left behind.
    async fn begin(&self, workflow_id: &str) -> Result<BeginOutcome> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (workflow_id, status)
            VALUES ($1, 'running')
            ON CONFLICT (workflow_id) DO NOTHING
            "#,
        )
        .bind(workflow_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let row = sqlx::query(
            r#"
            SELECT
                r.status,
                r.output,
                EXISTS (
                    SELECT 1 FROM workflow_steps s WHERE s.workflow_id = r.workflow_id
                ) AS has_steps
            FROM workflow_runs r
            WHERE r.workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let status: String = row.get("status");
        let output: Option<Value> = row.get("output");
        let has_steps: bool = row.get("has_steps");

        match (RunStatus::parse(&status), output) {
            (Some(RunStatus::Completed), Some(output)) => Ok(BeginOutcome::Completed(output)),
            (Some(_), _) => {
                debug!(workflow_id, resumed = has_steps, "journal run begun");
                Ok(BeginOutcome::Started { resumed: has_steps })
            }
            (None, _) => Err(TributaryError::store(format!(
                "workflow journal: unknown status {status:?} for {workflow_id}"
            ))),
        }
    }

    async fn load_step(&self, workflow_id: &str, step_id: &str) -> Result<Option<Value>> {
        let row = sqlx::query(
            r#"
            SELECT output
            FROM workflow_steps
            WHERE workflow_id = $1 AND step_id = $2
            "#,
        )
        .bind(workflow_id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| row.get("output")))
    }

    /// Record a step result. The first recorded result for a step wins.
    async fn record_step(&self, workflow_id: &str, step_id: &str, output: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (workflow_id, step_id, output)
            VALUES ($1, $2, $3)
            ON CONFLICT (workflow_id, step_id) DO NOTHING
            "#,
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(output)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn complete(&self, workflow_id: &str, output: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (workflow_id, status, output)
            VALUES ($1, 'completed', $2)
            ON CONFLICT (workflow_id) DO UPDATE
            SET status = 'completed',
                output = EXCLUDED.output,
                updated_at = NOW()
            "#,
        )
        .bind(workflow_id)
        .bind(output)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

/// Utility functions for journal maintenance.
impl PgWorkflowJournal {
    /// Delete completed runs (and their steps) last touched before
    /// `older_than`. Re-ingesting a deleted event runs it again.
    ///
    /// This should be run periodically by a maintenance worker.
    pub async fn cleanup_completed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_runs
            WHERE status = 'completed'
              AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    /// Get statistics about journal size.
    pub async fn stats(&self) -> Result<JournalStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                (SELECT COUNT(*) FROM workflow_steps) AS steps
            FROM workflow_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(JournalStats {
            running: row.get("running"),
            completed: row.get("completed"),
            steps: row.get("steps"),
        })
    }
}

/// Workflow journal statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub running: i64,
    pub completed: i64,
    pub steps: i64,
}

impl JournalStats {
    pub fn runs(&self) -> i64 {
        self.running + self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_value() {
        for status in [RunStatus::Running, RunStatus::Completed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("dead_letter"), None);
    }

    #[test]
    fn schema_declares_both_tables() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS workflow_runs"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS workflow_steps"));
        assert!(SCHEMA.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn stats_total_runs() {
        let stats = JournalStats {
            running: 2,
            completed: 5,
            steps: 40,
        };
        assert_eq!(stats.runs(), 7);
    }
}
