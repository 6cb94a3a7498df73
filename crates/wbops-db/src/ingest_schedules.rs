//! Database operations for `ingest_schedules`.
//!
//! Cron expressions and timezones are validated by the caller (API layer)
//! before they reach these functions; `next_run_at` only ever moves forward.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

const SCHEDULE_COLUMNS: &str = "id, project_id, source_code, job_code, cron_expr, timezone, \
     is_enabled, next_run_at, created_at, updated_at";

/// A row from the `ingest_schedules` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IngestScheduleRow {
    pub id: i64,
    pub project_id: i64,
    pub source_code: String,
    pub job_code: String,
    pub cron_expr: String,
    pub timezone: String,
    pub is_enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone)]
pub struct NewIngestSchedule {
    pub project_id: i64,
    pub source_code: String,
    pub job_code: String,
    pub cron_expr: String,
    pub timezone: String,
    pub is_enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Partial update for a schedule; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub is_enabled: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Creates a schedule. The partial unique index rejects a second enabled
/// schedule for the same (project, source, job).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including the uniqueness
/// violation).
pub async fn create_schedule(
    pool: &PgPool,
    new: &NewIngestSchedule,
) -> Result<IngestScheduleRow, DbError> {
    let sql = format!(
        "INSERT INTO ingest_schedules \
             (project_id, source_code, job_code, cron_expr, timezone, is_enabled, next_run_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {SCHEDULE_COLUMNS}"
    );
    let row = sqlx::query_as::<_, IngestScheduleRow>(&sql)
        .bind(new.project_id)
        .bind(&new.source_code)
        .bind(&new.job_code)
        .bind(&new.cron_expr)
        .bind(&new.timezone)
        .bind(new.is_enabled)
        .bind(new.next_run_at)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// Fetches a schedule by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no row exists.
pub async fn get_schedule(pool: &PgPool, id: i64) -> Result<IngestScheduleRow, DbError> {
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM ingest_schedules WHERE id = $1");
    sqlx::query_as::<_, IngestScheduleRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Lists all schedules for a project.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_schedules(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<IngestScheduleRow>, DbError> {
    let sql = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM ingest_schedules \
         WHERE project_id = $1 \
         ORDER BY source_code, job_code"
    );
    let rows = sqlx::query_as::<_, IngestScheduleRow>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Applies a partial update.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no row exists.
pub async fn update_schedule(
    pool: &PgPool,
    id: i64,
    update: &ScheduleUpdate,
) -> Result<IngestScheduleRow, DbError> {
    let sql = format!(
        "UPDATE ingest_schedules \
         SET cron_expr = COALESCE($2, cron_expr), \
             timezone = COALESCE($3, timezone), \
             is_enabled = COALESCE($4, is_enabled), \
             next_run_at = COALESCE($5, next_run_at), \
             updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {SCHEDULE_COLUMNS}"
    );
    sqlx::query_as::<_, IngestScheduleRow>(&sql)
        .bind(id)
        .bind(update.cron_expr.as_deref())
        .bind(update.timezone.as_deref())
        .bind(update.is_enabled)
        .bind(update.next_run_at)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Deletes a schedule. Runs keep their `schedule_id` as NULL afterwards.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no row exists.
pub async fn delete_schedule(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM ingest_schedules WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Enabled schedules that are due at `now` (or have never been stamped).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_due_schedules(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<IngestScheduleRow>, DbError> {
    let sql = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM ingest_schedules \
         WHERE is_enabled AND (next_run_at IS NULL OR next_run_at <= $1) \
         ORDER BY next_run_at ASC NULLS FIRST"
    );
    let rows = sqlx::query_as::<_, IngestScheduleRow>(&sql)
        .bind(now)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Advances `next_run_at` monotonically: the stamp only moves forward.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn advance_next_run_at(
    pool: &PgPool,
    id: i64,
    next_run_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE ingest_schedules \
         SET next_run_at = $2, updated_at = NOW() \
         WHERE id = $1 AND (next_run_at IS NULL OR next_run_at < $2)",
    )
    .bind(id)
    .bind(next_run_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Pushes `next_run_at` forward unconditionally to back off rate-limit
/// pressure (the runner calls this when a run ends `rate_limited`).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn push_next_run_at(
    pool: &PgPool,
    id: i64,
    next_run_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE ingest_schedules \
         SET next_run_at = GREATEST(next_run_at, $2), updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(next_run_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
