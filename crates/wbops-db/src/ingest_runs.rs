//! Database operations for `ingest_runs`: the audit and coordination record
//! for a single job execution.
//!
//! The exclusion invariant (at most one queued/running row per
//! (project, source, job)) is enforced by two cooperating mechanisms: the
//! partial unique index on `status = 'running'`, and the transaction-scoped
//! advisory lock taken by [`create_queued_exclusive`] before looking for an
//! active row.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::postgres::PgExecutor;
use sqlx::PgPool;
use wbops_core::run_lock_key;

use crate::DbError;

const RUN_COLUMNS: &str = "id, schedule_id, project_id, source_code, job_code, triggered_by, \
     status, params, stats, error_message, error_trace, worker_task_id, meta, \
     started_at, finished_at, duration_ms, heartbeat_at, created_at, updated_at";

const ERROR_MESSAGE_MAX_CHARS: usize = 500;
const ERROR_TRACE_MAX_CHARS: usize = 50_000;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `ingest_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IngestRunRow {
    pub id: i64,
    pub schedule_id: Option<i64>,
    pub project_id: i64,
    pub source_code: String,
    pub job_code: String,
    pub triggered_by: String,
    pub status: String,
    pub params: Option<serde_json::Value>,
    pub stats: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub worker_task_id: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a queued run.
#[derive(Debug, Clone)]
pub struct NewIngestRun {
    pub schedule_id: Option<i64>,
    pub project_id: i64,
    pub source_code: String,
    pub job_code: String,
    pub triggered_by: String,
    pub params: Option<serde_json::Value>,
}

/// Result of an exclusive queued-run creation.
#[derive(Debug)]
pub struct CreateQueuedOutcome {
    pub run: IngestRunRow,
    /// Id of a stale run that was transitioned to `timeout` to make room.
    pub unlocked_stale_run_id: Option<i64>,
}

/// Optional filters for [`list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilters {
    pub source_code: Option<String>,
    pub job_code: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Stuck detection (pure)
// ---------------------------------------------------------------------------

/// Most recent sign of life on a run.
#[must_use]
pub fn last_activity_at(run: &IngestRunRow) -> DateTime<Utc> {
    let mut latest = run.created_at.max(run.updated_at);
    if let Some(ts) = run.started_at {
        latest = latest.max(ts);
    }
    if let Some(ts) = run.heartbeat_at {
        latest = latest.max(ts);
    }
    latest
}

/// Whether an active run has gone silent for longer than its TTL.
#[must_use]
pub fn is_stuck(run: &IngestRunRow, now: DateTime<Utc>, stuck_ttl_secs: i64) -> bool {
    now - last_activity_at(run) > Duration::seconds(stuck_ttl_secs)
}

fn system_action_patch(action: &str, reason_code: &str, actor: &str) -> serde_json::Value {
    json!({
        "system_action": {
            "type": action,
            "reason_code": reason_code,
            "actor": actor,
            "at": Utc::now().to_rfc3339(),
        }
    })
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ---------------------------------------------------------------------------
// Creation & exclusion
// ---------------------------------------------------------------------------

/// Creates a queued run under the advisory-lock exclusion protocol.
///
/// Within one transaction: takes `pg_try_advisory_xact_lock` on the stable
/// hash of the job triple, looks for an active (queued/running) run, and
/// either rejects creation or — when the active run's last activity is older
/// than `stuck_ttl_secs` — transitions it to `timeout` with the given reason
/// code before inserting the fresh queued row. Commit releases the lock.
///
/// # Errors
///
/// - [`DbError::LockNotAcquired`] on advisory lock contention.
/// - [`DbError::ActiveRunExists`] when a live active run holds the slot.
/// - [`DbError::Sqlx`] on query failure.
pub async fn create_queued_exclusive(
    pool: &PgPool,
    new: &NewIngestRun,
    stuck_ttl_secs: i64,
    stuck_reason_code: &str,
    actor: &str,
) -> Result<CreateQueuedOutcome, DbError> {
    let mut tx = pool.begin().await?;

    let lock_key = run_lock_key(new.project_id, &new.source_code, &new.job_code);
    let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
        .bind(lock_key)
        .fetch_one(&mut *tx)
        .await?;
    if !locked {
        return Err(DbError::LockNotAcquired {
            project_id: new.project_id,
            source_code: new.source_code.clone(),
            job_code: new.job_code.clone(),
        });
    }

    let active = get_active_run_on(
        &mut *tx,
        new.project_id,
        &new.source_code,
        &new.job_code,
    )
    .await?;

    let mut unlocked_stale_run_id = None;
    if let Some(active) = active {
        if !is_stuck(&active, Utc::now(), stuck_ttl_secs) {
            return Err(DbError::ActiveRunExists {
                run_id: active.id,
                project_id: new.project_id,
                source_code: new.source_code.clone(),
                job_code: new.job_code.clone(),
            });
        }
        let reason_text = format!("no heartbeat for more than {stuck_ttl_secs}s");
        mark_timeout_on(
            &mut *tx,
            active.id,
            stuck_reason_code,
            &reason_text,
            actor,
        )
        .await?;
        unlocked_stale_run_id = Some(active.id);
    }

    let run = insert_queued_on(&mut *tx, new).await?;
    tx.commit().await?;

    Ok(CreateQueuedOutcome {
        run,
        unlocked_stale_run_id,
    })
}

async fn insert_queued_on(
    executor: impl PgExecutor<'_>,
    new: &NewIngestRun,
) -> Result<IngestRunRow, DbError> {
    let sql = format!(
        "INSERT INTO ingest_runs \
             (schedule_id, project_id, source_code, job_code, triggered_by, status, params) \
         VALUES ($1, $2, $3, $4, $5, 'queued', $6) \
         RETURNING {RUN_COLUMNS}"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(new.schedule_id)
        .bind(new.project_id)
        .bind(&new.source_code)
        .bind(&new.job_code)
        .bind(&new.triggered_by)
        .bind(new.params.as_ref())
        .fetch_one(executor)
        .await?;
    Ok(row)
}

/// Writes a terminal `skipped` run stub.
///
/// Used by the scheduler when exclusion rejects a scheduled creation: the
/// rejection is auditable without ever occupying the active slot.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_skipped_stub(
    pool: &PgPool,
    new: &NewIngestRun,
    reason_code: &str,
    actor: &str,
) -> Result<IngestRunRow, DbError> {
    let meta = system_action_patch("skipped", reason_code, actor);
    let stats = json!({"ok": false, "reason": reason_code});
    let sql = format!(
        "INSERT INTO ingest_runs \
             (schedule_id, project_id, source_code, job_code, triggered_by, status, \
              params, stats, meta, finished_at) \
         VALUES ($1, $2, $3, $4, $5, 'skipped', $6, $7, $8, NOW()) \
         RETURNING {RUN_COLUMNS}"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(new.schedule_id)
        .bind(new.project_id)
        .bind(&new.source_code)
        .bind(&new.job_code)
        .bind(&new.triggered_by)
        .bind(new.params.as_ref())
        .bind(stats)
        .bind(meta)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Transitions a queued run to `running` and stamps `started_at`.
///
/// The partial unique index guards the transition: a concurrent running row
/// for the same triple surfaces as [`DbError::ActiveRunExists`], which the
/// worker treats as a signal to abort before touching any external API.
///
/// # Errors
///
/// - [`DbError::InvalidRunTransition`] if the row is no longer `queued`.
/// - [`DbError::ActiveRunExists`] on unique-index conflict.
/// - [`DbError::NotFound`] if the run id does not exist.
pub async fn start_running(pool: &PgPool, id: i64) -> Result<IngestRunRow, DbError> {
    let run = get_run(pool, id).await?;

    let sql = format!(
        "UPDATE ingest_runs \
         SET status = 'running', started_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'queued' \
         RETURNING {RUN_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await;

    match updated {
        Ok(Some(row)) => Ok(row),
        Ok(None) => Err(DbError::InvalidRunTransition {
            id,
            expected_status: "queued",
        }),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return Err(DbError::ActiveRunExists {
                        run_id: id,
                        project_id: run.project_id,
                        source_code: run.source_code,
                        job_code: run.job_code,
                    });
                }
            }
            Err(e.into())
        }
    }
}

/// Heartbeat: bumps `heartbeat_at` and `updated_at` on a running run.
///
/// Returns `false` when the row is no longer running — the runner should
/// treat that as a cancellation signal and stop cleanly.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn heartbeat(pool: &PgPool, id: i64) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE ingest_runs \
         SET heartbeat_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Overwrites the `stats` blob on a running run (UI progress; not
/// authoritative for correctness).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_progress(
    pool: &PgPool,
    id: i64,
    stats: &serde_json::Value,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE ingest_runs \
         SET stats = $2, updated_at = NOW() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(stats)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Finalizes a run as `success`. CAS from `running`: a sweeper that already
/// flipped the row to `timeout` wins, and the runner's late write is refused.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] when the row is not `running`.
pub async fn finish_success(
    pool: &PgPool,
    id: i64,
    stats: Option<&serde_json::Value>,
) -> Result<IngestRunRow, DbError> {
    let sql = format!(
        "UPDATE ingest_runs \
         SET status = 'success', \
             finished_at = NOW(), \
             duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT, \
             stats = COALESCE($2, stats), \
             updated_at = NOW() \
         WHERE id = $1 AND status = 'running' \
         RETURNING {RUN_COLUMNS}"
    );
    sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(id)
        .bind(stats)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        })
}

/// Finalizes a run as `failed`. Same CAS discipline as [`finish_success`].
/// `error_message` is truncated to 500 chars and `error_trace` to 50 000.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] when the row is not `running`.
pub async fn finish_failed(
    pool: &PgPool,
    id: i64,
    error_message: &str,
    error_trace: &str,
    stats: Option<&serde_json::Value>,
) -> Result<IngestRunRow, DbError> {
    let sql = format!(
        "UPDATE ingest_runs \
         SET status = 'failed', \
             finished_at = NOW(), \
             duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT, \
             error_message = $2, \
             error_trace = $3, \
             stats = COALESCE($4, stats), \
             updated_at = NOW() \
         WHERE id = $1 AND status = 'running' \
         RETURNING {RUN_COLUMNS}"
    );
    sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(id)
        .bind(truncate_chars(error_message, ERROR_MESSAGE_MAX_CHARS))
        .bind(truncate_chars(error_trace, ERROR_TRACE_MAX_CHARS))
        .bind(stats)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        })
}

async fn mark_timeout_on(
    executor: impl PgExecutor<'_>,
    id: i64,
    reason_code: &str,
    reason_text: &str,
    actor: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    let meta_patch = system_action_patch("timeout", reason_code, actor);
    let stats = json!({"ok": false, "reason": reason_code});
    let sql = format!(
        "UPDATE ingest_runs \
         SET status = 'timeout', \
             finished_at = NOW(), \
             duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT, \
             error_message = $2, \
             stats = COALESCE(stats, '{{}}'::jsonb) || $3, \
             meta = COALESCE(meta, '{{}}'::jsonb) || $4, \
             updated_at = NOW() \
         WHERE id = $1 AND status IN ('queued', 'running') \
         RETURNING {RUN_COLUMNS}"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(id)
        .bind(truncate_chars(reason_text, ERROR_MESSAGE_MAX_CHARS))
        .bind(stats)
        .bind(meta_patch)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// Transitions an active (queued/running) run to `timeout`, recording the
/// system action in `meta`. Returns `None` when the run was no longer active.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_timeout(
    pool: &PgPool,
    id: i64,
    reason_code: &str,
    reason_text: &str,
    actor: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    mark_timeout_on(pool, id, reason_code, reason_text, actor).await
}

/// Transitions an active (queued/running) run to `skipped`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_skipped(
    pool: &PgPool,
    id: i64,
    reason_code: &str,
    reason_text: Option<&str>,
    actor: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    let meta_patch = system_action_patch("skipped", reason_code, actor);
    let stats = json!({"ok": false, "reason": reason_code});
    let sql = format!(
        "UPDATE ingest_runs \
         SET status = 'skipped', \
             finished_at = NOW(), \
             error_message = COALESCE($2, error_message), \
             stats = COALESCE(stats, '{{}}'::jsonb) || $3, \
             meta = COALESCE(meta, '{{}}'::jsonb) || $4, \
             updated_at = NOW() \
         WHERE id = $1 AND status IN ('queued', 'running') \
         RETURNING {RUN_COLUMNS}"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(id)
        .bind(reason_text.map(|t| truncate_chars(t, ERROR_MESSAGE_MAX_CHARS)))
        .bind(stats)
        .bind(meta_patch)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Records the worker task identifier on a run, for operator debugging.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_worker_task_id(pool: &PgPool, id: i64, task_id: &str) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE ingest_runs SET worker_task_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Fetches a single run by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no row exists.
pub async fn get_run(pool: &PgPool, id: i64) -> Result<IngestRunRow, DbError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM ingest_runs WHERE id = $1");
    sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

async fn get_active_run_on(
    executor: impl PgExecutor<'_>,
    project_id: i64,
    source_code: &str,
    job_code: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM ingest_runs \
         WHERE project_id = $1 AND source_code = $2 AND job_code = $3 \
           AND status IN ('queued', 'running') \
         ORDER BY created_at DESC \
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(project_id)
        .bind(source_code)
        .bind(job_code)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// The running row for a job triple, if any. At most one exists (partial
/// unique index).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_running_run(
    pool: &PgPool,
    project_id: i64,
    source_code: &str,
    job_code: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM ingest_runs \
         WHERE project_id = $1 AND source_code = $2 AND job_code = $3 \
           AND status = 'running' \
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(project_id)
        .bind(source_code)
        .bind(job_code)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Most recent queued/running run for a job triple, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_active_run(
    pool: &PgPool,
    project_id: i64,
    source_code: &str,
    job_code: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    get_active_run_on(pool, project_id, source_code, job_code).await
}

/// Whether a queued/running run exists for a job triple.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn has_active_run(
    pool: &PgPool,
    project_id: i64,
    source_code: &str,
    job_code: &str,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ingest_runs \
         WHERE project_id = $1 AND source_code = $2 AND job_code = $3 \
           AND status IN ('queued', 'running')",
    )
    .bind(project_id)
    .bind(source_code)
    .bind(job_code)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Most recent run of any status for a job triple.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_last_run(
    pool: &PgPool,
    project_id: i64,
    source_code: &str,
    job_code: &str,
) -> Result<Option<IngestRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM ingest_runs \
         WHERE project_id = $1 AND source_code = $2 AND job_code = $3 \
         ORDER BY started_at DESC NULLS LAST, created_at DESC \
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(project_id)
        .bind(source_code)
        .bind(job_code)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Lists a project's runs with optional filters, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_runs(
    pool: &PgPool,
    project_id: i64,
    filters: &RunFilters,
    limit: i64,
) -> Result<Vec<IngestRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM ingest_runs \
         WHERE project_id = $1 \
           AND ($2::text IS NULL OR source_code = $2) \
           AND ($3::text IS NULL OR job_code = $3) \
           AND ($4::text IS NULL OR status = $4) \
           AND ($5::timestamptz IS NULL OR started_at >= $5) \
           AND ($6::timestamptz IS NULL OR started_at <= $6) \
         ORDER BY started_at DESC NULLS LAST, created_at DESC \
         LIMIT $7"
    );
    let rows = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(project_id)
        .bind(filters.source_code.as_deref())
        .bind(filters.job_code.as_deref())
        .bind(filters.status.as_deref())
        .bind(filters.date_from)
        .bind(filters.date_to)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Oldest queued runs, up to `limit`. The worker attempts [`start_running`]
/// on each; the CAS decides the winner under concurrency.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_queued(pool: &PgPool, limit: i64) -> Result<Vec<IngestRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM ingest_runs \
         WHERE status = 'queued' \
         ORDER BY created_at ASC \
         LIMIT $1"
    );
    let rows = sqlx::query_as::<_, IngestRunRow>(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Active runs whose last activity is older than `stuck_ttl_secs`.
///
/// Used by the sweeper; the final stuck decision is re-checked in Rust via
/// [`is_stuck`] to keep one definition of "last activity".
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_runs(pool: &PgPool) -> Result<Vec<IngestRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM ingest_runs \
         WHERE status IN ('queued', 'running') \
         ORDER BY created_at ASC"
    );
    let rows = sqlx::query_as::<_, IngestRunRow>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_timestamps(
        created_mins_ago: i64,
        heartbeat_mins_ago: Option<i64>,
    ) -> IngestRunRow {
        let now = Utc::now();
        let created = now - Duration::minutes(created_mins_ago);
        IngestRunRow {
            id: 1,
            schedule_id: None,
            project_id: 1,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            triggered_by: "manual".to_owned(),
            status: "running".to_owned(),
            params: None,
            stats: None,
            error_message: None,
            error_trace: None,
            worker_task_id: None,
            meta: None,
            started_at: Some(created),
            finished_at: None,
            duration_ms: None,
            heartbeat_at: heartbeat_mins_ago.map(|m| now - Duration::minutes(m)),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn fresh_heartbeat_is_not_stuck() {
        let run = run_with_timestamps(40, Some(1));
        assert!(!is_stuck(&run, Utc::now(), 1200));
    }

    #[test]
    fn stale_heartbeat_is_stuck() {
        let run = run_with_timestamps(60, Some(40));
        assert!(is_stuck(&run, Utc::now(), 1200));
    }

    #[test]
    fn missing_heartbeat_falls_back_to_other_timestamps() {
        let run = run_with_timestamps(5, None);
        assert!(!is_stuck(&run, Utc::now(), 1200));

        let old = run_with_timestamps(60, None);
        assert!(is_stuck(&old, Utc::now(), 1200));
    }

    #[test]
    fn last_activity_takes_the_maximum() {
        let mut run = run_with_timestamps(60, Some(50));
        run.updated_at = Utc::now() - Duration::minutes(2);
        let age = Utc::now() - last_activity_at(&run);
        assert!(age < Duration::minutes(3), "updated_at should win: {age}");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "я".repeat(600);
        let truncated = truncate_chars(&s, ERROR_MESSAGE_MAX_CHARS);
        assert_eq!(truncated.chars().count(), 500);
    }
}
