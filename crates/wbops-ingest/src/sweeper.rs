//! Proactive stuck-run sweeper. Complements the opportunistic create-time
//! unlock: runs that nobody tries to restart still get reaped.

use chrono::Utc;
use sqlx::PgPool;
use wbops_core::{reason, AppConfig};

use crate::error::IngestError;
use crate::registry::JobRegistry;

/// Marks every active run whose last activity is older than its job's stuck
/// TTL as `timeout`. Returns the number of runs reaped.
///
/// # Errors
///
/// Returns [`IngestError::Db`] on query failure.
pub async fn sweep(
    pool: &PgPool,
    registry: &JobRegistry,
    config: &AppConfig,
) -> Result<usize, IngestError> {
    let now = Utc::now();
    #[allow(clippy::cast_possible_wrap)]
    let default_ttl = config.stuck_ttl_secs as i64;

    let mut reaped = 0usize;
    for run in wbops_db::list_active_runs(pool).await? {
        let ttl = registry.stuck_ttl_secs(&run.source_code, &run.job_code, default_ttl);
        if !wbops_db::is_stuck(&run, now, ttl) {
            continue;
        }
        let last_activity = wbops_db::last_activity_at(&run);
        let reason_text = format!(
            "no activity since {} (ttl {ttl}s)",
            last_activity.to_rfc3339()
        );
        match wbops_db::mark_timeout(pool, run.id, reason::SWEEPER_STALE, &reason_text, "sweeper")
            .await?
        {
            Some(_) => {
                reaped += 1;
                tracing::warn!(
                    run_id = run.id,
                    project_id = run.project_id,
                    job = %run.job_code,
                    last_activity = %last_activity,
                    "sweeper: marked stuck run timeout"
                );
            }
            None => {
                // The run finished between the listing and the mark; fine.
            }
        }
    }
    Ok(reaped)
}
