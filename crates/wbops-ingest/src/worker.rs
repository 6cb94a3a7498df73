//! Queued-run worker: claims the oldest queued runs, drives them through the
//! registry, and finalizes from the returned outcome. Concurrency is bounded
//! by a semaphore; the start CAS decides claims under races.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use wbops_core::{AppConfig, TokenCipher};
use wbops_db::IngestRunRow;

use crate::context::RunContext;
use crate::error::IngestError;
use crate::registry::{JobOutcome, JobRegistry};
use crate::runs;

pub struct Worker {
    pool: PgPool,
    config: Arc<AppConfig>,
    cipher: Arc<dyn TokenCipher>,
    registry: Arc<JobRegistry>,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    #[must_use]
    pub fn new(
        pool: PgPool,
        config: Arc<AppConfig>,
        cipher: Arc<dyn TokenCipher>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let permits = config.worker_max_concurrent_runs.max(1);
        Self {
            pool,
            config,
            cipher,
            registry,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Polls for queued runs forever. Spawn this once per process.
    pub async fn run_loop(self: Arc<Self>) {
        let poll_interval = std::time::Duration::from_secs(self.config.worker_poll_interval_secs);
        loop {
            match wbops_db::list_queued(&self.pool, 20).await {
                Ok(queued) => {
                    for run in queued {
                        let worker = Arc::clone(&self);
                        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                            return;
                        };
                        tokio::spawn(async move {
                            worker.claim_and_execute(run).await;
                            drop(permit);
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "worker: failed to poll queued runs");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn claim_and_execute(&self, run: IngestRunRow) {
        let started =
            match runs::start_with_stale_retry(&self.pool, &self.registry, &self.config, &run)
                .await
            {
                Ok(row) => row,
                Err(IngestError::ActiveRunExists { run_id }) => {
                    tracing::warn!(
                        run_id = run.id,
                        conflicting_run_id = run_id,
                        "worker: start conflict, leaving run queued"
                    );
                    return;
                }
                Err(IngestError::Db(wbops_db::DbError::InvalidRunTransition { .. })) => {
                    // Another worker won the claim.
                    return;
                }
                Err(e) => {
                    tracing::error!(run_id = run.id, error = %e, "worker: start failed");
                    return;
                }
            };

        let task_id = format!("{}-{}", std::process::id(), started.id);
        if let Err(e) = wbops_db::set_worker_task_id(&self.pool, started.id, &task_id).await {
            tracing::debug!(run_id = started.id, error = %e, "worker: task id not recorded");
        }

        tracing::info!(
            run_id = started.id,
            project_id = started.project_id,
            source = %started.source_code,
            job = %started.job_code,
            triggered_by = %started.triggered_by,
            "worker: run started"
        );

        let ctx = RunContext::for_run(
            self.pool.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.cipher),
            Arc::clone(&self.registry),
            &started,
        );
        execute_and_finalize(&ctx, &started.source_code, &started.job_code).await;
    }
}

/// Runs the registry dispatch for an already-running run and finalizes the
/// row from the outcome.
pub async fn execute_and_finalize(ctx: &RunContext, source_code: &str, job_code: &str) -> bool {
    let outcome = ctx.registry.execute(ctx, source_code, job_code).await;
    finalize_outcome(ctx, source_code, job_code, outcome).await
}

/// Finalizes a running run from a runner outcome. The finish operations are
/// CAS from `running`: a run the sweeper flipped mid-flight refuses the late
/// write, which is the cancellation contract. Returns whether the run ended
/// `success`.
pub async fn finalize_outcome(
    ctx: &RunContext,
    source_code: &str,
    job_code: &str,
    outcome: Result<JobOutcome, IngestError>,
) -> bool {
    match outcome {
        Ok(JobOutcome::Success { stats }) => {
            match wbops_db::finish_success(&ctx.pool, ctx.run_id, Some(&stats)).await {
                Ok(_) => {
                    tracing::info!(run_id = ctx.run_id, job = job_code, "run finished");
                    true
                }
                Err(e) => {
                    tracing::warn!(run_id = ctx.run_id, error = %e, "success write refused");
                    false
                }
            }
        }
        Ok(JobOutcome::Failure {
            reason,
            message,
            stats,
        }) => {
            tracing::warn!(run_id = ctx.run_id, job = job_code, reason = %reason, "run failed");
            if let Err(e) =
                wbops_db::finish_failed(&ctx.pool, ctx.run_id, &message, &message, Some(&stats))
                    .await
            {
                tracing::warn!(run_id = ctx.run_id, error = %e, "failure write refused");
            }
            false
        }
        Ok(JobOutcome::AlreadyFinalized) => false,
        Err(IngestError::JobNotFound { .. }) => {
            let stats = json!({"ok": false, "reason": wbops_core::reason::JOB_NOT_FOUND});
            let message = format!("no runner registered for {source_code}/{job_code}");
            if let Err(e) =
                wbops_db::finish_failed(&ctx.pool, ctx.run_id, &message, &message, Some(&stats))
                    .await
            {
                tracing::warn!(run_id = ctx.run_id, error = %e, "failure write refused");
            }
            false
        }
        Err(e) => {
            let failure = crate::registry::classify_runner_error(&e);
            if let JobOutcome::Failure {
                reason,
                message,
                stats,
            } = failure
            {
                tracing::warn!(run_id = ctx.run_id, job = job_code, reason = %reason, "run failed");
                if let Err(e) =
                    wbops_db::finish_failed(&ctx.pool, ctx.run_id, &message, &message, Some(&stats))
                        .await
                {
                    tracing::warn!(run_id = ctx.run_id, error = %e, "failure write refused");
                }
            }
            false
        }
    }
}
