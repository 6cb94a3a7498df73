//! Integration tests for the run lifecycle, exclusion protocol, and the
//! snapshot/event tables. Each test gets its own migrated database.

use serde_json::json;
use sqlx::PgPool;
use wbops_db::{DbError, NewIngestRun};

fn products_run(project_id: i64) -> NewIngestRun {
    NewIngestRun {
        schedule_id: None,
        project_id,
        source_code: "wildberries".to_owned(),
        job_code: "products".to_owned(),
        triggered_by: "manual".to_owned(),
        params: None,
    }
}

const TTL: i64 = 1200;

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
// Exclusion
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn second_create_is_rejected_while_run_is_active(pool: PgPool) {
    let first = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("first create");
    assert_eq!(first.run.status, "queued");
    assert!(first.unlocked_stale_run_id.is_none());

    let second =
        wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t").await;
    assert!(
        matches!(second, Err(DbError::ActiveRunExists { run_id, .. }) if run_id == first.run.id),
        "expected ActiveRunExists, got: {second:?}"
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn different_jobs_and_projects_do_not_conflict(pool: PgPool) {
    wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("project 1 products");

    let mut stocks = products_run(1);
    stocks.job_code = "stocks".to_owned();
    wbops_db::create_queued_exclusive(&pool, &stocks, TTL, "manual_stuck", "t")
        .await
        .expect("same project, different job");

    wbops_db::create_queued_exclusive(&pool, &products_run(2), TTL, "manual_stuck", "t")
        .await
        .expect("different project, same job");
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_active_run_is_timed_out_and_replaced(pool: PgPool) {
    let first = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    let running = wbops_db::start_running(&pool, first.run.id)
        .await
        .expect("start");
    assert_eq!(running.status, "running");

    // 40 minutes of silence with a 20-minute TTL.
    backdate_run(&pool, first.run.id, 40).await;

    let outcome = wbops_db::create_queued_exclusive(
        &pool,
        &products_run(1),
        TTL,
        "manual_stuck",
        "admin@example.com",
    )
    .await
    .expect("stuck run should be unlocked");

    assert_eq!(outcome.unlocked_stale_run_id, Some(first.run.id));
    assert_eq!(outcome.run.status, "queued");

    let old = wbops_db::get_run(&pool, first.run.id).await.expect("old run");
    assert_eq!(old.status, "timeout");
    let meta = old.meta.expect("meta recorded");
    assert_eq!(meta["system_action"]["reason_code"], "manual_stuck");
    assert_eq!(meta["system_action"]["actor"], "admin@example.com");
}

#[sqlx::test(migrations = "../../migrations")]
async fn fresh_active_run_is_not_unlocked(pool: PgPool) {
    let first = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    wbops_db::start_running(&pool, first.run.id).await.expect("start");
    wbops_db::heartbeat(&pool, first.run.id).await.expect("heartbeat");

    let second =
        wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t").await;
    assert!(matches!(second, Err(DbError::ActiveRunExists { .. })));
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn start_requires_queued_status(pool: PgPool) {
    let created = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    wbops_db::start_running(&pool, created.run.id).await.expect("start");

    let again = wbops_db::start_running(&pool, created.run.id).await;
    assert!(matches!(
        again,
        Err(DbError::InvalidRunTransition { expected_status: "queued", .. })
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn finish_success_is_cas_from_running(pool: PgPool) {
    let created = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    wbops_db::start_running(&pool, created.run.id).await.expect("start");

    let stats = json!({"ok": true, "pages": 3});
    let finished = wbops_db::finish_success(&pool, created.run.id, Some(&stats))
        .await
        .expect("finish");
    assert_eq!(finished.status, "success");
    assert!(finished.finished_at.is_some());
    assert!(finished.duration_ms.is_some());
    assert_eq!(finished.stats.expect("stats")["pages"], 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn finish_after_sweeper_timeout_is_refused(pool: PgPool) {
    let created = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    wbops_db::start_running(&pool, created.run.id).await.expect("start");

    let swept = wbops_db::mark_timeout(&pool, created.run.id, "sweeper_stale", "no heartbeat", "sweeper")
        .await
        .expect("mark timeout");
    assert!(swept.is_some());

    let late = wbops_db::finish_success(&pool, created.run.id, None).await;
    assert!(
        matches!(late, Err(DbError::InvalidRunTransition { expected_status: "running", .. })),
        "late finish must lose the race: {late:?}"
    );

    // And the heartbeat now reports the run as gone.
    let alive = wbops_db::heartbeat(&pool, created.run.id).await.expect("heartbeat");
    assert!(!alive);
}

#[sqlx::test(migrations = "../../migrations")]
async fn mark_timeout_only_touches_active_runs(pool: PgPool) {
    let created = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    wbops_db::start_running(&pool, created.run.id).await.expect("start");
    wbops_db::finish_success(&pool, created.run.id, None).await.expect("finish");

    let marked = wbops_db::mark_timeout(&pool, created.run.id, "manual", "forced", "admin")
        .await
        .expect("query ok");
    assert!(marked.is_none(), "terminal runs must not flip to timeout");
}

#[sqlx::test(migrations = "../../migrations")]
async fn error_fields_are_truncated(pool: PgPool) {
    let created = wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create");
    wbops_db::start_running(&pool, created.run.id).await.expect("start");

    let long_message = "x".repeat(2_000);
    let long_trace = "y".repeat(80_000);
    let failed = wbops_db::finish_failed(&pool, created.run.id, &long_message, &long_trace, None)
        .await
        .expect("finish failed");
    assert_eq!(failed.error_message.expect("message").len(), 500);
    assert_eq!(failed.error_trace.expect("trace").len(), 50_000);
}

#[sqlx::test(migrations = "../../migrations")]
async fn skipped_stub_is_terminal_and_audited(pool: PgPool) {
    let stub = wbops_db::insert_skipped_stub(
        &pool,
        &products_run(1),
        "active_run_exists",
        "scheduler",
    )
    .await
    .expect("stub");
    assert_eq!(stub.status, "skipped");
    assert!(stub.finished_at.is_some());
    assert_eq!(stub.stats.expect("stats")["reason"], "active_run_exists");

    // A stub never blocks subsequent creation.
    wbops_db::create_queued_exclusive(&pool, &products_run(1), TTL, "manual_stuck", "t")
        .await
        .expect("create after stub");
}

// ---------------------------------------------------------------------------
// Snapshot & event tables
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn spp_event_emitted_only_on_distinct_transition(pool: PgPool) {
    use wbops_db::NewCurrentMetric;
    let now = chrono::Utc::now();

    let metric = |spp: Option<i32>| NewCurrentMetric {
        nm_id: 555,
        current_price_showcase: None,
        current_spp_percent: spp,
    };

    // First observation: no previous row, no event.
    let (_, events) =
        wbops_db::upsert_current_metrics_with_events(&pool, 1, 10, now, &[metric(Some(10))])
            .await
            .expect("first upsert");
    assert_eq!(events, 0);

    // 10 -> 15: exactly one event.
    let (_, events) =
        wbops_db::upsert_current_metrics_with_events(&pool, 1, 11, now, &[metric(Some(15))])
            .await
            .expect("second upsert");
    assert_eq!(events, 1);

    // 15 -> 15: no event.
    let (_, events) =
        wbops_db::upsert_current_metrics_with_events(&pool, 1, 12, now, &[metric(Some(15))])
            .await
            .expect("third upsert");
    assert_eq!(events, 0);

    // 15 -> NULL: distinct, one event.
    let (_, events) =
        wbops_db::upsert_current_metrics_with_events(&pool, 1, 13, now, &[metric(None)])
            .await
            .expect("fourth upsert");
    assert_eq!(events, 1);

    // NULL -> NULL: equal, no event.
    let (_, events) =
        wbops_db::upsert_current_metrics_with_events(&pool, 1, 14, now, &[metric(None)])
            .await
            .expect("fifth upsert");
    assert_eq!(events, 0);

    let all = wbops_db::list_spp_events(&pool, 1).await.expect("events");
    assert_eq!(all.len(), 2);
    let change = all
        .iter()
        .find(|e| e.spp_percent == Some(15))
        .expect("10->15 event");
    assert_eq!(change.prev_spp_percent, Some(10));
    assert_eq!(change.ingest_run_id, Some(11));
}

#[sqlx::test(migrations = "../../migrations")]
async fn supplier_stock_overlap_is_absorbed(pool: PgPool) {
    use wbops_db::NewSupplierStockRow;
    let row = NewSupplierStockRow {
        last_change_date: chrono::Utc::now(),
        warehouse_name: "Koledino".to_owned(),
        nm_id: 100,
        supplier_article: Some("SKU-100".to_owned()),
        barcode: "4600000000001".to_owned(),
        tech_size: None,
        quantity: 5,
        quantity_full: Some(7),
        in_way_to_client: None,
        in_way_from_client: None,
        price: None,
        discount: None,
        raw: json!({"nmId": 100}),
    };

    let first = wbops_db::insert_supplier_stock_rows(&pool, &[row.clone()])
        .await
        .expect("first insert");
    assert_eq!(first, 1);

    // Back-to-back rerun over the overlap window: zero net new rows.
    let second = wbops_db::insert_supplier_stock_rows(&pool, &[row])
        .await
        .expect("second insert");
    assert_eq!(second, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn latest_rrp_batch_wins(pool: PgPool) {
    use rust_decimal::Decimal;
    use wbops_db::NewRrpRow;

    let batch = |price: i64| {
        vec![NewRrpRow {
            vendor_code_norm: "ABC-1".to_owned(),
            rrp_price: Some(Decimal::new(price, 0)),
            rrp_stock: Some(3),
        }]
    };

    wbops_db::insert_rrp_batch(&pool, 1, Some(1), &batch(1000))
        .await
        .expect("first batch");
    // Batches are keyed by insertion timestamp; force distinct instants.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    wbops_db::insert_rrp_batch(&pool, 1, Some(2), &batch(1100))
        .await
        .expect("second batch");

    let latest = wbops_db::latest_rrp_rows(&pool, 1).await.expect("latest");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].rrp_price, Some(Decimal::new(1100, 0)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn showcase_bucket_conflicts_are_dropped(pool: PgPool) {
    use wbops_db::NewShowcaseBucket;
    let hour = chrono::Utc::now()
        .date_naive()
        .and_hms_opt(12, 0, 0)
        .expect("valid hour")
        .and_utc();
    let bucket = NewShowcaseBucket {
        nm_id: 9,
        price_showcase: None,
        spp_percent: Some(5),
        snapshot_at: hour,
    };

    let first = wbops_db::insert_showcase_buckets(&pool, 1, 1, &[bucket.clone()])
        .await
        .expect("first");
    assert_eq!(first, 1);
    let second = wbops_db::insert_showcase_buckets(&pool, 1, 2, &[bucket])
        .await
        .expect("second");
    assert_eq!(second, 0, "same hour bucket must be dropped");
}

// ---------------------------------------------------------------------------
// Internal Data snapshots
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn snapshot_versions_increment_and_expose_rrp_rows(pool: PgPool) {
    use rust_decimal::Decimal;
    use wbops_db::{NewSnapshot, NormalizedProductRow, SnapshotStatus};

    let settings = wbops_db::upsert_settings(
        &pool,
        1,
        "url",
        Some("https://tenant.example.com/catalog.csv"),
        None,
        None,
        Some("csv"),
        &json!({"fields": {"internal_sku": {"key": "sku"}, "rrp": {"key": "price"}}}),
    )
    .await
    .expect("settings");

    let new_snapshot = |imported: i32, failed: i32| NewSnapshot {
        settings_id: Some(settings.id),
        source_mode: "url".to_owned(),
        source_url: settings.source_url.clone(),
        file_storage_key: None,
        file_original_name: None,
        file_format: Some("csv".to_owned()),
        rows_total: imported + failed,
        rows_imported: imported,
        rows_failed: failed,
        status: if failed == 0 {
            SnapshotStatus::Success
        } else {
            SnapshotStatus::Partial
        },
        error_summary: None,
    };

    let rows = vec![
        NormalizedProductRow {
            internal_sku: "A-1".to_owned(),
            name: Some("First".to_owned()),
            lifecycle_status: None,
            attributes: Some(json!({"stock": "4"})),
            rrp: Some(Decimal::new(99900, 2)),
            cost: None,
            identifiers: vec![("wildberries".to_owned(), "123".to_owned())],
        },
        NormalizedProductRow {
            internal_sku: "A-2".to_owned(),
            name: None,
            lifecycle_status: None,
            attributes: None,
            rrp: None,
            cost: Some(Decimal::new(50000, 2)),
            identifiers: vec![],
        },
    ];

    let first = wbops_db::create_snapshot_with_rows(&pool, 1, &new_snapshot(2, 0), &rows, &[])
        .await
        .expect("first snapshot");
    assert_eq!(first.version, 1);

    let second = wbops_db::create_snapshot_with_rows(&pool, 1, &new_snapshot(2, 1), &rows, &[])
        .await
        .expect("second snapshot");
    assert_eq!(second.version, 2);
    assert_eq!(second.status, "partial");

    let usable = wbops_db::latest_usable_snapshot(&pool, 1)
        .await
        .expect("query")
        .expect("usable snapshot");
    assert_eq!(usable.id, second.id);

    // Only the row with a non-null RRP projects out.
    let rrp_rows = wbops_db::rrp_rows_for_snapshot(&pool, usable.id)
        .await
        .expect("rrp rows");
    assert_eq!(rrp_rows.len(), 1);
    assert_eq!(rrp_rows[0].0, "A-1");
    assert_eq!(rrp_rows[0].2, Some(4));

    assert!(wbops_db::has_rrp_rows(&pool, 1).await.expect("has rrp"));
    assert!(!wbops_db::has_rrp_rows(&pool, 2).await.expect("other project"));

    // Sync status landed in the same transaction.
    let settings_after = wbops_db::get_settings(&pool, 1)
        .await
        .expect("query")
        .expect("settings row");
    assert_eq!(settings_after.last_sync_status.as_deref(), Some("partial"));
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn next_run_at_only_moves_forward(pool: PgPool) {
    use wbops_db::NewIngestSchedule;
    let schedule = wbops_db::create_schedule(
        &pool,
        &NewIngestSchedule {
            project_id: 1,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            cron_expr: "0 * * * *".to_owned(),
            timezone: "UTC".to_owned(),
            is_enabled: true,
            next_run_at: None,
        },
    )
    .await
    .expect("create schedule");

    let t1 = chrono::Utc::now() + chrono::Duration::hours(1);
    let t2 = t1 + chrono::Duration::hours(1);

    assert!(wbops_db::advance_next_run_at(&pool, schedule.id, t1).await.expect("advance"));
    assert!(wbops_db::advance_next_run_at(&pool, schedule.id, t2).await.expect("advance"));
    // Moving backwards is a no-op.
    assert!(!wbops_db::advance_next_run_at(&pool, schedule.id, t1).await.expect("advance"));

    let row = wbops_db::get_schedule(&pool, schedule.id).await.expect("get");
    // Postgres stores microseconds; compare at that precision.
    assert_eq!(
        row.next_run_at.expect("stamped").timestamp_micros(),
        t2.timestamp_micros()
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn second_enabled_schedule_for_same_job_is_rejected(pool: PgPool) {
    use wbops_db::NewIngestSchedule;
    let new = |enabled: bool| NewIngestSchedule {
        project_id: 1,
        source_code: "wildberries".to_owned(),
        job_code: "products".to_owned(),
        cron_expr: "0 * * * *".to_owned(),
        timezone: "UTC".to_owned(),
        is_enabled: enabled,
        next_run_at: None,
    };

    wbops_db::create_schedule(&pool, &new(true)).await.expect("first");
    let dup = wbops_db::create_schedule(&pool, &new(true)).await;
    assert!(dup.is_err(), "partial unique index must reject the duplicate");
    // A disabled duplicate is allowed.
    wbops_db::create_schedule(&pool, &new(false)).await.expect("disabled duplicate");
}
