//! Run orchestration service over the `ingest_runs` table: exclusive
//! creation with job validation, and the start transition with one
//! stale-unlock retry.

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use wbops_core::{reason, AppConfig, TriggeredBy};
use wbops_db::{CreateQueuedOutcome, IngestRunRow, NewIngestRun};

use crate::error::IngestError;
use crate::registry::JobRegistry;

/// Creates a queued run under the full exclusion protocol.
///
/// Validates the job against the registry (fail closed), resolves the job's
/// stuck TTL, and delegates to the advisory-lock transaction. A stuck active
/// run is transitioned to `timeout` with `reason_code = "manual_stuck"`
/// before the new row is inserted.
///
/// # Errors
///
/// - [`IngestError::JobNotFound`] — unknown (source, job).
/// - [`IngestError::LockNotAcquired`] — advisory lock contention.
/// - [`IngestError::ActiveRunExists`] — a live run holds the slot.
#[allow(clippy::too_many_arguments)]
pub async fn create_queued(
    pool: &PgPool,
    registry: &JobRegistry,
    config: &AppConfig,
    project_id: i64,
    source_code: &str,
    job_code: &str,
    schedule_id: Option<i64>,
    triggered_by: TriggeredBy,
    params: Option<Value>,
    actor: &str,
) -> Result<CreateQueuedOutcome, IngestError> {
    if registry.get(source_code, job_code).is_none() {
        return Err(IngestError::JobNotFound {
            source_code: source_code.to_owned(),
            job_code: job_code.to_owned(),
        });
    }
    let ttl = registry.stuck_ttl_secs(source_code, job_code, ttl_i64(config));

    let new = NewIngestRun {
        schedule_id,
        project_id,
        source_code: source_code.to_owned(),
        job_code: job_code.to_owned(),
        triggered_by: triggered_by.as_str().to_owned(),
        params,
    };
    let outcome =
        wbops_db::create_queued_exclusive(pool, &new, ttl, reason::MANUAL_STUCK, actor)
            .await
            .map_err(IngestError::from_db)?;

    if let Some(stale_id) = outcome.unlocked_stale_run_id {
        tracing::warn!(
            project_id,
            source_code,
            job_code,
            stale_run_id = stale_id,
            "unlocked stale active run before creating a new one"
        );
    }
    Ok(outcome)
}

/// Transitions a queued run to running. On a unique-index conflict the
/// conflicting run is checked for staleness once: a silent run is timed out
/// with `reason_code = "stale_unlock_conflict"` and the start is retried;
/// a live run surfaces [`IngestError::ActiveRunExists`] — the caller must
/// abort before touching any external API.
///
/// # Errors
///
/// - [`IngestError::ActiveRunExists`] — a live run holds the running slot.
/// - [`IngestError::Db`] — the row is not queued anymore, or query failure.
pub async fn start_with_stale_retry(
    pool: &PgPool,
    registry: &JobRegistry,
    config: &AppConfig,
    run: &IngestRunRow,
) -> Result<IngestRunRow, IngestError> {
    match wbops_db::start_running(pool, run.id).await {
        Ok(row) => Ok(row),
        Err(first_err @ wbops_db::DbError::ActiveRunExists { .. }) => {
            let ttl = registry.stuck_ttl_secs(&run.source_code, &run.job_code, ttl_i64(config));
            let active =
                wbops_db::get_running_run(pool, run.project_id, &run.source_code, &run.job_code)
                    .await?;
            let Some(active) = active.filter(|a| a.id != run.id) else {
                return Err(IngestError::from_db(first_err));
            };
            if !wbops_db::is_stuck(&active, Utc::now(), ttl) {
                return Err(IngestError::ActiveRunExists { run_id: active.id });
            }
            let reason_text = format!("no heartbeat for more than {ttl}s");
            wbops_db::mark_timeout(
                pool,
                active.id,
                reason::STALE_UNLOCK_CONFLICT,
                &reason_text,
                "system",
            )
            .await?;
            tracing::warn!(
                run_id = run.id,
                stale_run_id = active.id,
                "timed out stale running conflict; retrying start"
            );
            wbops_db::start_running(pool, run.id)
                .await
                .map_err(IngestError::from_db)
        }
        Err(other) => Err(IngestError::from_db(other)),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn ttl_i64(config: &AppConfig) -> i64 {
    config.stuck_ttl_secs as i64
}
