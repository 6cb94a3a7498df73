//! Integration tests for the scheduler tick, the sweeper, and the start
//! transition's stale-unlock retry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use wbops_core::{AppConfig, Environment, TriggeredBy};
use wbops_db::{NewIngestRun, NewIngestSchedule};
use wbops_ingest::{IngestError, JobRegistry};

fn test_config() -> AppConfig {
    AppConfig {
        database_url: String::new(),
        env: Environment::Test,
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        log_level: "info".to_owned(),
        api_bearer_token: None,
        wb_token_fallback: None,
        db_max_connections: 5,
        db_min_connections: 1,
        db_acquire_timeout_secs: 5,
        http_timeout_secs: 5,
        http_user_agent: "wbops-test".to_owned(),
        wb_min_interval_ms: 0,
        wb_max_retries: 0,
        wb_backoff_base_secs: 0,
        wb_page_size: 100,
        storefront_page_size: 100,
        storefront_sleep_base_ms: 0,
        storefront_sleep_jitter_ms: 0,
        storefront_max_total_retry_wait_secs: 600,
        storefront_max_runtime_secs: 3600,
        storefront_rate_limit_backoff_mins: 30,
        scheduler_tick_secs: 30,
        sweeper_interval_secs: 300,
        stuck_ttl_secs: 1200,
        worker_max_concurrent_runs: 2,
        worker_poll_interval_secs: 1,
        internal_data_dir: "/tmp/wbops-test".into(),
        internal_download_max_bytes: 1024 * 1024,
    }
}

async fn backdate_run(pool: &PgPool, run_id: i64, minutes: i32) {
    sqlx::query(
        "UPDATE ingest_runs \
         SET created_at = NOW() - make_interval(mins => $2), \
             updated_at = NOW() - make_interval(mins => $2), \
             started_at = NOW() - make_interval(mins => $2), \
             heartbeat_at = NOW() - make_interval(mins => $2) \
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(minutes)
    .execute(pool)
    .await
    .expect("backdate run");
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn due_schedule_creates_a_queued_run_and_advances(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    let schedule = wbops_db::create_schedule(
        &pool,
        &NewIngestSchedule {
            project_id: 1,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            cron_expr: "*/5 * * * *".to_owned(),
            timezone: "UTC".to_owned(),
            is_enabled: true,
            next_run_at: Some(Utc::now() - Duration::minutes(1)),
        },
    )
    .await
    .expect("schedule");

    let report = wbops_ingest::tick(&pool, &registry, &config).await.expect("tick");
    assert_eq!(report.due, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 0);

    let runs = wbops_db::list_runs(&pool, 1, &wbops_db::RunFilters::default(), 10)
        .await
        .expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "queued");
    assert_eq!(runs[0].triggered_by, "scheduled");
    assert_eq!(runs[0].schedule_id, Some(schedule.id));

    let advanced = wbops_db::get_schedule(&pool, schedule.id).await.expect("schedule");
    assert!(advanced.next_run_at.expect("stamped") > Utc::now());
}

#[sqlx::test(migrations = "../../migrations")]
async fn exclusion_rejection_writes_a_skipped_stub_and_still_advances(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    let schedule = wbops_db::create_schedule(
        &pool,
        &NewIngestSchedule {
            project_id: 1,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            cron_expr: "*/5 * * * *".to_owned(),
            timezone: "UTC".to_owned(),
            is_enabled: true,
            next_run_at: Some(Utc::now() - Duration::minutes(1)),
        },
    )
    .await
    .expect("schedule");

    // First tick queues a run and keeps it active.
    wbops_ingest::tick(&pool, &registry, &config).await.expect("first tick");

    // Force the schedule due again while the queued run is still active.
    sqlx::query("UPDATE ingest_schedules SET next_run_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(schedule.id)
        .execute(&pool)
        .await
        .expect("force due");

    let report = wbops_ingest::tick(&pool, &registry, &config).await.expect("second tick");
    assert_eq!(report.due, 1);
    assert_eq!(report.created, 0);
    assert_eq!(report.skipped, 1);

    let runs = wbops_db::list_runs(&pool, 1, &wbops_db::RunFilters::default(), 10)
        .await
        .expect("runs");
    assert_eq!(runs.len(), 2);
    let stub = runs
        .iter()
        .find(|r| r.status == "skipped")
        .expect("skipped stub exists");
    assert_eq!(stub.stats.as_ref().expect("stats")["reason"], "active_run_exists");

    // The skip did not consume the tick: next_run_at advanced anyway.
    let advanced = wbops_db::get_schedule(&pool, schedule.id).await.expect("schedule");
    assert!(advanced.next_run_at.expect("stamped") > Utc::now());
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn sweeper_reaps_only_stuck_runs(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    let stuck = wbops_ingest::create_queued(
        &pool, &registry, &config, 1, "wildberries", "products", None,
        TriggeredBy::Manual, None, "test",
    )
    .await
    .expect("create stuck");
    wbops_db::start_running(&pool, stuck.run.id).await.expect("start");
    backdate_run(&pool, stuck.run.id, 40).await;

    let fresh = wbops_ingest::create_queued(
        &pool, &registry, &config, 2, "wildberries", "products", None,
        TriggeredBy::Manual, None, "test",
    )
    .await
    .expect("create fresh");
    wbops_db::start_running(&pool, fresh.run.id).await.expect("start");

    let reaped = wbops_ingest::sweep(&pool, &registry, &config).await.expect("sweep");
    assert_eq!(reaped, 1);

    let swept = wbops_db::get_run(&pool, stuck.run.id).await.expect("run");
    assert_eq!(swept.status, "timeout");
    assert_eq!(
        swept.meta.expect("meta")["system_action"]["reason_code"],
        "sweeper_stale"
    );

    let alive = wbops_db::get_run(&pool, fresh.run.id).await.expect("run");
    assert_eq!(alive.status, "running");
}

#[sqlx::test(migrations = "../../migrations")]
async fn sweeper_respects_per_job_ttl_overrides(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    // 40 minutes of silence: over the 1200 s default, under the
    // supplier_stocks 3600 s override.
    let supplier = wbops_ingest::create_queued(
        &pool, &registry, &config, 1, "wildberries", "supplier_stocks", None,
        TriggeredBy::Manual, None, "test",
    )
    .await
    .expect("create");
    wbops_db::start_running(&pool, supplier.run.id).await.expect("start");
    backdate_run(&pool, supplier.run.id, 40).await;

    let reaped = wbops_ingest::sweep(&pool, &registry, &config).await.expect("sweep");
    assert_eq!(reaped, 0, "supplier_stocks at 40min is within its 3600s TTL");

    backdate_run(&pool, supplier.run.id, 70).await;
    let reaped = wbops_ingest::sweep(&pool, &registry, &config).await.expect("sweep");
    assert_eq!(reaped, 1);
}

// ---------------------------------------------------------------------------
// Start transition
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn start_conflict_with_live_run_aborts(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    let first = wbops_ingest::create_queued(
        &pool, &registry, &config, 1, "wildberries", "products", None,
        TriggeredBy::Manual, None, "test",
    )
    .await
    .expect("create");
    wbops_db::start_running(&pool, first.run.id).await.expect("start");

    // Bypass the creation protocol to manufacture a second queued row.
    let second = wbops_db::insert_skipped_stub(
        &pool,
        &NewIngestRun {
            schedule_id: None,
            project_id: 1,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            triggered_by: "manual".to_owned(),
            params: None,
        },
        "active_run_exists",
        "test",
    )
    .await
    .expect("stub");
    sqlx::query("UPDATE ingest_runs SET status = 'queued', finished_at = NULL WHERE id = $1")
        .bind(second.id)
        .execute(&pool)
        .await
        .expect("requeue");
    let second = wbops_db::get_run(&pool, second.id).await.expect("second");

    let result =
        wbops_ingest::start_with_stale_retry(&pool, &registry, &config, &second).await;
    assert!(
        matches!(result, Err(IngestError::ActiveRunExists { run_id }) if run_id == first.run.id),
        "live conflict must abort: {result:?}"
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn start_conflict_with_stale_run_unlocks_and_retries(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    let first = wbops_ingest::create_queued(
        &pool, &registry, &config, 1, "wildberries", "products", None,
        TriggeredBy::Manual, None, "test",
    )
    .await
    .expect("create");
    wbops_db::start_running(&pool, first.run.id).await.expect("start");
    backdate_run(&pool, first.run.id, 40).await;

    let second = wbops_db::insert_skipped_stub(
        &pool,
        &NewIngestRun {
            schedule_id: None,
            project_id: 1,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            triggered_by: "manual".to_owned(),
            params: None,
        },
        "active_run_exists",
        "test",
    )
    .await
    .expect("stub");
    sqlx::query("UPDATE ingest_runs SET status = 'queued', finished_at = NULL WHERE id = $1")
        .bind(second.id)
        .execute(&pool)
        .await
        .expect("requeue");
    let second = wbops_db::get_run(&pool, second.id).await.expect("second");

    let started = wbops_ingest::start_with_stale_retry(&pool, &registry, &config, &second)
        .await
        .expect("stale conflict must unlock and start");
    assert_eq!(started.status, "running");

    let old = wbops_db::get_run(&pool, first.run.id).await.expect("old");
    assert_eq!(old.status, "timeout");
    assert_eq!(
        old.meta.expect("meta")["system_action"]["reason_code"],
        "stale_unlock_conflict"
    );
}

// ---------------------------------------------------------------------------
// Job validation on create
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn unknown_jobs_fail_closed_on_create(pool: PgPool) {
    let registry = Arc::new(JobRegistry::new());
    let config = test_config();

    let result = wbops_ingest::create_queued(
        &pool, &registry, &config, 1, "wildberries", "teleport", None,
        TriggeredBy::Manual, None, "test",
    )
    .await;
    assert!(matches!(result, Err(IngestError::JobNotFound { .. })));

    let runs = wbops_db::list_runs(&pool, 1, &wbops_db::RunFilters::default(), 10)
        .await
        .expect("runs");
    assert!(runs.is_empty(), "no run row may exist for an unknown job");
}
