use std::time::Duration;

use sqlx::migrate::Migrate;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use wbops_core::AppConfig;

// Path relative to crates/wbops-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error("invalid run state transition for id {id}: expected status '{expected_status}'")]
    InvalidRunTransition {
        id: i64,
        expected_status: &'static str,
    },
    #[error("advisory lock not acquired for (project {project_id}, {source_code}, {job_code})")]
    LockNotAcquired {
        project_id: i64,
        source_code: String,
        job_code: String,
    },
    #[error("active run {run_id} already exists for (project {project_id}, {source_code}, {job_code})")]
    ActiveRunExists {
        run_id: i64,
        project_id: i64,
        source_code: String,
        job_code: String,
    },
    #[error("category parent would form a cycle (category {category_id}, parent {parent_id})")]
    CategoryCycle { category_id: i64, parent_id: i64 },
    #[error(transparent)]
    Config(#[from] wbops_core::ConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    let applied_before = {
        let mut conn = pool.acquire().await?;
        conn.ensure_migrations_table().await?;
        conn.list_applied_migrations().await?.len()
    };

    MIGRATOR.run(pool).await?;

    let applied_after = {
        let mut conn = pool.acquire().await?;
        conn.ensure_migrations_table().await?;
        conn.list_applied_migrations().await?.len()
    };

    Ok(applied_after.saturating_sub(applied_before))
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Run a full health check: ping the pool and return a typed error on failure.
///
/// # Errors
///
/// Returns [`DbError`] if the ping fails.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    ping(pool).await?;
    Ok(())
}


pub mod finance;
pub mod ingest_runs;
pub mod ingest_schedules;
pub mod internal_categories;
pub mod internal_data;
pub mod marketplaces;
pub mod price_snapshots;
pub mod products;
pub mod rrp_snapshots;
pub mod stock_snapshots;
pub mod storefront;
pub mod supplier_stocks;
pub mod tax_statements;
pub mod warehouses;

pub use finance::{
    count_report_lines, insert_report_lines, list_reports_in_period, sum_report_line_amounts,
    upsert_finance_report, FinanceReportRow,
};
pub use ingest_runs::{
    create_queued_exclusive, finish_failed, finish_success, get_active_run, get_last_run, get_run,
    get_running_run, has_active_run, heartbeat, insert_skipped_stub, is_stuck, last_activity_at,
    list_active_runs, list_queued, list_runs, mark_skipped, mark_timeout, set_progress,
    set_worker_task_id, start_running, CreateQueuedOutcome, IngestRunRow, NewIngestRun, RunFilters,
};
pub use ingest_schedules::{
    advance_next_run_at, create_schedule, delete_schedule, get_schedule, list_due_schedules,
    list_schedules, push_next_run_at, update_schedule, IngestScheduleRow, NewIngestSchedule,
    ScheduleUpdate,
};
pub use internal_categories::{
    create_category, delete_category, get_category, list_categories, update_category, CategoryRow,
};
pub use internal_data::{
    create_snapshot_with_rows, get_settings, has_rrp_rows, latest_usable_snapshot,
    list_row_errors, rrp_rows_for_snapshot, update_sync_result, update_test_result,
    upsert_settings, InternalDataSnapshotRow, InternalDataSettingsRow, NewSnapshot,
    NormalizedProductRow, RowErrorRecord, SnapshotStatus,
};
pub use marketplaces::{
    get_connection, list_connections, upsert_connection, ConnectionRow, ConnectionUpdate,
};
pub use price_snapshots::{
    insert_price_snapshots, latest_price_rows, NewPriceSnapshot, PriceSnapshotRow,
};
pub use products::{
    list_products_with_raw, list_project_nm_ids, upsert_products, ProductRow, UpsertProduct,
};
pub use rrp_snapshots::{insert_rrp_batch, latest_rrp_rows, NewRrpRow, RrpSnapshotRow};
pub use stock_snapshots::{
    insert_stock_snapshots, latest_stock_rows, NewStockSnapshot, StockSnapshotRow,
};
pub use storefront::{
    insert_catalog_snapshots, insert_showcase_buckets, latest_catalog_rows, list_spp_events,
    upsert_current_metrics_with_events, CatalogSnapshotRow, CurrentMetricRow, NewCatalogSnapshot,
    NewCurrentMetric, NewShowcaseBucket, SppEventRow,
};
pub use supplier_stocks::{
    insert_supplier_stock_rows, max_last_change_date, NewSupplierStockRow,
};
pub use tax_statements::{upsert_tax_statement, TaxStatementRow};
pub use warehouses::{
    list_seller_warehouse_ids, replace_offices, replace_seller_warehouses, NewOffice,
    NewSellerWarehouse,
};
