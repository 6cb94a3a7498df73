//! Background job wiring.
//!
//! Initialises a [`JobScheduler`] at server startup with the two process
//! ticks (per-tenant schedule evaluation and the stale-run sweeper), and
//! spawns the queued-run worker loop.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use wbops_core::{AppConfig, TokenCipher};
use wbops_ingest::{JobRegistry, Worker};

/// Builds and starts the background scheduler, and spawns the worker.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process — dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn start_background_jobs(
    pool: PgPool,
    config: Arc<AppConfig>,
    cipher: Arc<dyn TokenCipher>,
    registry: Arc<JobRegistry>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_schedule_tick(&scheduler, pool.clone(), Arc::clone(&config), Arc::clone(&registry))
        .await?;
    register_sweeper(&scheduler, pool.clone(), Arc::clone(&config), Arc::clone(&registry)).await?;

    let worker = Arc::new(Worker::new(pool, config, cipher, registry));
    tokio::spawn(worker.run_loop());

    scheduler.start().await?;
    Ok(scheduler)
}

/// Registers the per-tenant schedule evaluation tick.
async fn register_schedule_tick(
    scheduler: &JobScheduler,
    pool: PgPool,
    config: Arc<AppConfig>,
    registry: Arc<JobRegistry>,
) -> Result<(), JobSchedulerError> {
    let every = config.scheduler_tick_secs.clamp(5, 300);
    let expr = format!("*/{every} * * * * *");

    let job = Job::new_async(expr.as_str(), move |_uuid, _lock| {
        let pool = pool.clone();
        let config = Arc::clone(&config);
        let registry = Arc::clone(&registry);

        Box::pin(async move {
            if let Err(e) = wbops_ingest::tick(&pool, &registry, &config).await {
                tracing::error!(error = %e, "scheduler: tick failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Registers the periodic stale-run sweep.
async fn register_sweeper(
    scheduler: &JobScheduler,
    pool: PgPool,
    config: Arc<AppConfig>,
    registry: Arc<JobRegistry>,
) -> Result<(), JobSchedulerError> {
    let every_mins = (config.sweeper_interval_secs / 60).clamp(1, 60);
    let expr = format!("0 */{every_mins} * * * *");

    let job = Job::new_async(expr.as_str(), move |_uuid, _lock| {
        let pool = pool.clone();
        let config = Arc::clone(&config);
        let registry = Arc::clone(&registry);

        Box::pin(async move {
            match wbops_ingest::sweep(&pool, &registry, &config).await {
                Ok(0) => {}
                Ok(reaped) => tracing::info!(reaped, "sweeper: reaped stuck runs"),
                Err(e) => tracing::error!(error = %e, "sweeper: sweep failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
