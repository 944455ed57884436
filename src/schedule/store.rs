/// Durable SQLite schedule store
///
/// Shared by concurrent scheduler instances; the compare-and-set advance is
/// what keeps duplicate clock ticks from double-firing one schedule.
/// Timestamps are stored as unix milliseconds.

use crate::error::{EngineError, Result};
use crate::schedule::types::Schedule;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};

/// SQLite-backed schedule persistence
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schedules table. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                timezone TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                next_execution INTEGER,
                last_execution INTEGER,
                execution_count INTEGER NOT NULL DEFAULT 0,
                armed_job_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_schedules_workflow
            ON schedules(workflow_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one active schedule per workflow, enforced in the store
        // itself so concurrent scheduler instances cannot race past the
        // registry's read-then-write check.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_schedules_one_active
            ON schedules(workflow_id) WHERE is_active = 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules
                (id, workflow_id, cron_expression, timezone, is_active,
                 next_execution, last_execution, execution_count, armed_job_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.workflow_id)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.is_active)
        .bind(schedule.next_execution.map(millis))
        .bind(schedule.last_execution.map(millis))
        .bind(schedule.execution_count)
        .bind(&schedule.armed_job_id)
        .execute(&self.pool)
        .await
        .map_err(active_conflict)?;
        Ok(())
    }

    pub async fn update(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules SET
                workflow_id = ?, cron_expression = ?, timezone = ?, is_active = ?,
                next_execution = ?, last_execution = ?, execution_count = ?, armed_job_id = ?
            WHERE id = ?
            "#,
        )
        .bind(&schedule.workflow_id)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.is_active)
        .bind(schedule.next_execution.map(millis))
        .bind(schedule.last_execution.map(millis))
        .bind(schedule.execution_count)
        .bind(&schedule.armed_job_id)
        .bind(&schedule.id)
        .execute(&self.pool)
        .await
        .map_err(active_conflict)?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// The active schedule for a workflow, if any. Backs the one-active-
    /// schedule-per-workflow invariant.
    pub async fn active_for_workflow(&self, workflow_id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE workflow_id = ? AND is_active = 1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// Active schedules whose next execution is at or before `now`.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM schedules
            WHERE is_active = 1 AND next_execution IS NOT NULL AND next_execution <= ?
            ORDER BY next_execution ASC
            "#,
        )
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Compare-and-set advance: records the firing and moves next_execution
    /// forward only if no other scheduler instance got there first.
    ///
    /// Returns false when the claim was lost.
    pub async fn claim_advance(
        &self,
        id: &str,
        expected_next: DateTime<Utc>,
        new_next: DateTime<Utc>,
        fired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE schedules SET
                last_execution = ?,
                execution_count = execution_count + 1,
                next_execution = ?
            WHERE id = ? AND is_active = 1 AND next_execution = ?
            "#,
        )
        .bind(millis(fired_at))
        .bind(millis(new_next))
        .bind(id)
        .bind(millis(expected_next))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY workflow_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }
}

/// A unique-index violation means a second active schedule for the same
/// workflow; everything else stays a storage error.
fn active_conflict(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => EngineError::Conflict(
            "workflow already has an active schedule".to_string(),
        ),
        _ => EngineError::Storage(err),
    }
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Schedule {
    Schedule {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        cron_expression: row.get("cron_expression"),
        timezone: row.get("timezone"),
        is_active: row.get("is_active"),
        next_execution: from_millis(row.get("next_execution")),
        last_execution: from_millis(row.get("last_execution")),
        execution_count: row.get("execution_count"),
        armed_job_id: row.get("armed_job_id"),
    }
}
