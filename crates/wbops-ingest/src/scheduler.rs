//! Per-tenant schedule evaluation. One cooperative tick: load due schedules,
//! advance `next_run_at` (always — a skip never consumes a tick), then try
//! to create the queued run under the normal exclusion.

use chrono::Utc;
use sqlx::PgPool;
use wbops_core::{cron, reason, AppConfig, TriggeredBy};
use wbops_db::{IngestScheduleRow, NewIngestRun};

use crate::error::IngestError;
use crate::registry::JobRegistry;
use crate::runs;

/// Outcome counters of one tick, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub created: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Evaluates all due schedules once. Never blocks on a runner: creation
/// either queues a run for the worker or writes a `skipped` stub.
pub async fn tick(
    pool: &PgPool,
    registry: &JobRegistry,
    config: &AppConfig,
) -> Result<TickReport, IngestError> {
    let now = Utc::now();
    let due = wbops_db::list_due_schedules(pool, now).await?;
    let mut report = TickReport {
        due: due.len(),
        ..TickReport::default()
    };

    for schedule in due {
        match process_schedule(pool, registry, config, &schedule).await {
            Ok(created) => {
                if created {
                    report.created += 1;
                } else {
                    report.skipped += 1;
                }
            }
            Err(e) => {
                report.errored += 1;
                tracing::error!(
                    schedule_id = schedule.id,
                    project_id = schedule.project_id,
                    job = %schedule.job_code,
                    error = %e,
                    "scheduler: schedule processing failed"
                );
            }
        }
    }

    if report.due > 0 {
        tracing::info!(
            due = report.due,
            created = report.created,
            skipped = report.skipped,
            errored = report.errored,
            "scheduler: tick complete"
        );
    }
    Ok(report)
}

async fn process_schedule(
    pool: &PgPool,
    registry: &JobRegistry,
    config: &AppConfig,
    schedule: &IngestScheduleRow,
) -> Result<bool, IngestError> {
    // Advance first: even a rejected creation must not leave the schedule
    // due, or the next tick would hammer the same row.
    match next_instant(schedule) {
        Ok(next) => {
            wbops_db::advance_next_run_at(pool, schedule.id, next).await?;
        }
        Err(e) => {
            // Expressions are validated at write time; a row that fails to
            // parse anyway is disabled rather than retried forever.
            tracing::error!(schedule_id = schedule.id, error = %e, "scheduler: disabling schedule with invalid cron");
            wbops_db::update_schedule(
                pool,
                schedule.id,
                &wbops_db::ScheduleUpdate {
                    is_enabled: Some(false),
                    ..wbops_db::ScheduleUpdate::default()
                },
            )
            .await?;
            return Err(e);
        }
    }

    let created = runs::create_queued(
        pool,
        registry,
        config,
        schedule.project_id,
        &schedule.source_code,
        &schedule.job_code,
        Some(schedule.id),
        TriggeredBy::Scheduled,
        None,
        "scheduler",
    )
    .await;

    match created {
        Ok(_) => Ok(true),
        Err(IngestError::ActiveRunExists { .. } | IngestError::LockNotAcquired) => {
            wbops_db::insert_skipped_stub(
                pool,
                &NewIngestRun {
                    schedule_id: Some(schedule.id),
                    project_id: schedule.project_id,
                    source_code: schedule.source_code.clone(),
                    job_code: schedule.job_code.clone(),
                    triggered_by: TriggeredBy::Scheduled.as_str().to_owned(),
                    params: None,
                },
                reason::ACTIVE_RUN_EXISTS,
                "scheduler",
            )
            .await?;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn next_instant(
    schedule: &IngestScheduleRow,
) -> Result<chrono::DateTime<Utc>, IngestError> {
    let tz = cron::parse_timezone(&schedule.timezone)?;
    cron::next_occurrence(&schedule.cron_expr, tz, Utc::now())?
        .ok_or_else(|| IngestError::Cron(cron::CronError::InvalidExpression {
            expr: schedule.cron_expr.clone(),
            reason: "no upcoming occurrence".to_owned(),
        }))
}
