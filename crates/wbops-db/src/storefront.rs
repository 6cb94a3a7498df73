//! Storefront price observations: append-only catalog snapshots, the
//! upsert-only `wb_current_metrics` row per (project, nm_id), SPP change
//! events, and hourly showcase buckets.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewCatalogSnapshot {
    pub query_value: String,
    pub page: i32,
    pub nm_id: i64,
    pub vendor_code: Option<String>,
    pub name: Option<String>,
    pub price_basic: Option<Decimal>,
    pub price_product: Option<Decimal>,
    pub sale_percent: Option<i32>,
    pub discount_calc_percent: Option<i32>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogSnapshotRow {
    pub query_value: String,
    pub page: i32,
    pub nm_id: i64,
    pub price_basic: Option<Decimal>,
    pub price_product: Option<Decimal>,
    pub sale_percent: Option<i32>,
    pub discount_calc_percent: Option<i32>,
    pub snapshot_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCurrentMetric {
    pub nm_id: i64,
    pub current_price_showcase: Option<Decimal>,
    pub current_spp_percent: Option<i32>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CurrentMetricRow {
    pub project_id: i64,
    pub nm_id: i64,
    pub current_price_showcase: Option<Decimal>,
    pub current_spp_percent: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SppEventRow {
    pub project_id: i64,
    pub nm_id: i64,
    pub prev_spp_percent: Option<i32>,
    pub spp_percent: Option<i32>,
    pub changed_at: DateTime<Utc>,
    pub ingest_run_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewShowcaseBucket {
    pub nm_id: i64,
    pub price_showcase: Option<Decimal>,
    pub spp_percent: Option<i32>,
    /// UTC hour bucket, truncated by the caller.
    pub snapshot_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Appends catalog snapshot rows. All rows of one run share `snapshot_at`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; the batch is transactional.
pub async fn insert_catalog_snapshots(
    pool: &PgPool,
    snapshot_at: DateTime<Utc>,
    ingest_run_id: Option<i64>,
    rows: &[NewCatalogSnapshot],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            "INSERT INTO frontend_catalog_price_snapshots \
                 (snapshot_at, query_value, page, nm_id, vendor_code, name, \
                  price_basic, price_product, sale_percent, discount_calc_percent, \
                  ingest_run_id, raw) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(snapshot_at)
        .bind(&row.query_value)
        .bind(row.page)
        .bind(row.nm_id)
        .bind(row.vendor_code.as_deref())
        .bind(row.name.as_deref())
        .bind(row.price_basic)
        .bind(row.price_product)
        .bind(row.sale_percent)
        .bind(row.discount_calc_percent)
        .bind(ingest_run_id)
        .bind(&row.raw)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Upserts current showcase metrics and, in the same transaction, appends a
/// `wb_spp_events` row for every nm_id whose SPP is distinct from the stored
/// value (NULL equals NULL, NULL differs from any integer).
///
/// Returns `(metrics_upserted, spp_events_inserted)`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is written on
/// failure.
pub async fn upsert_current_metrics_with_events(
    pool: &PgPool,
    project_id: i64,
    ingest_run_id: i64,
    changed_at: DateTime<Utc>,
    rows: &[NewCurrentMetric],
) -> Result<(u64, u64), DbError> {
    let mut tx = pool.begin().await?;
    let mut upserted = 0u64;
    let mut events = 0u64;
    for row in rows {
        // Event first, comparing against the stored value before the upsert
        // overwrites it. IS DISTINCT FROM gives the NULL semantics the event
        // rule requires.
        let event_result = sqlx::query(
            "INSERT INTO wb_spp_events \
                 (project_id, nm_id, prev_spp_percent, spp_percent, changed_at, ingest_run_id) \
             SELECT $1, $2, prev.current_spp_percent, $3, $4, $5 \
             FROM (SELECT current_spp_percent \
                   FROM wb_current_metrics \
                   WHERE project_id = $1 AND nm_id = $2) AS prev \
             WHERE prev.current_spp_percent IS DISTINCT FROM $3",
        )
        .bind(project_id)
        .bind(row.nm_id)
        .bind(row.current_spp_percent)
        .bind(changed_at)
        .bind(ingest_run_id)
        .execute(&mut *tx)
        .await?;
        events += event_result.rows_affected();

        let upsert_result = sqlx::query(
            "INSERT INTO wb_current_metrics \
                 (project_id, nm_id, current_price_showcase, current_spp_percent, ingest_run_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (project_id, nm_id) DO UPDATE SET \
                 current_price_showcase = EXCLUDED.current_price_showcase, \
                 current_spp_percent    = EXCLUDED.current_spp_percent, \
                 ingest_run_id          = EXCLUDED.ingest_run_id, \
                 updated_at             = NOW()",
        )
        .bind(project_id)
        .bind(row.nm_id)
        .bind(row.current_price_showcase)
        .bind(row.current_spp_percent)
        .bind(ingest_run_id)
        .execute(&mut *tx)
        .await?;
        upserted += upsert_result.rows_affected();
    }
    tx.commit().await?;
    Ok((upserted, events))
}

/// Appends hourly showcase buckets; the `(project, nm_id, snapshot_at)`
/// constraint drops rows for hours already recorded.
///
/// Returns the number of rows actually inserted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails.
pub async fn insert_showcase_buckets(
    pool: &PgPool,
    project_id: i64,
    ingest_run_id: i64,
    rows: &[NewShowcaseBucket],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for row in rows {
        let result = sqlx::query(
            "INSERT INTO wb_showcase_price_snapshots \
                 (project_id, nm_id, price_showcase, spp_percent, snapshot_at, ingest_run_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (project_id, nm_id, snapshot_at) DO NOTHING",
        )
        .bind(project_id)
        .bind(row.nm_id)
        .bind(row.price_showcase)
        .bind(row.spp_percent)
        .bind(row.snapshot_at)
        .bind(ingest_run_id)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Rows of the latest catalog snapshot for one query value (brand id).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_catalog_rows(
    pool: &PgPool,
    query_value: &str,
) -> Result<Vec<CatalogSnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, CatalogSnapshotRow>(
        "WITH latest AS ( \
             SELECT MAX(snapshot_at) AS batch_at \
             FROM frontend_catalog_price_snapshots \
             WHERE query_type = 'brand' AND query_value = $1 \
         ) \
         SELECT query_value, page, nm_id, price_basic, price_product, \
                sale_percent, discount_calc_percent, snapshot_at \
         FROM frontend_catalog_price_snapshots, latest \
         WHERE query_type = 'brand' AND query_value = $1 \
           AND snapshot_at = latest.batch_at \
         ORDER BY nm_id",
    )
    .bind(query_value)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All SPP events for a project, newest first (test/reporting helper).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_spp_events(pool: &PgPool, project_id: i64) -> Result<Vec<SppEventRow>, DbError> {
    let rows = sqlx::query_as::<_, SppEventRow>(
        "SELECT project_id, nm_id, prev_spp_percent, spp_percent, changed_at, ingest_run_id \
         FROM wb_spp_events \
         WHERE project_id = $1 \
         ORDER BY changed_at DESC, id DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
