//! Recommended-retail-price projections from Internal Data. Append-only:
//! every build writes a fresh `snapshot_at` batch, readers take the latest.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone)]
pub struct NewRrpRow {
    pub vendor_code_norm: String,
    pub rrp_price: Option<Decimal>,
    pub rrp_stock: Option<i32>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RrpSnapshotRow {
    pub vendor_code_norm: String,
    pub rrp_price: Option<Decimal>,
    pub rrp_stock: Option<i32>,
    pub snapshot_at: DateTime<Utc>,
}

/// Appends one RRP batch sharing a single `snapshot_at`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; the batch is transactional.
pub async fn insert_rrp_batch(
    pool: &PgPool,
    project_id: i64,
    ingest_run_id: Option<i64>,
    rows: &[NewRrpRow],
) -> Result<u64, DbError> {
    let batch_at = Utc::now();
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            "INSERT INTO rrp_snapshots \
                 (project_id, vendor_code_norm, rrp_price, rrp_stock, ingest_run_id, snapshot_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project_id)
        .bind(&row.vendor_code_norm)
        .bind(row.rrp_price)
        .bind(row.rrp_stock)
        .bind(ingest_run_id)
        .bind(batch_at)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Rows of the latest RRP batch for a project.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_rrp_rows(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<RrpSnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, RrpSnapshotRow>(
        "WITH latest AS ( \
             SELECT MAX(snapshot_at) AS batch_at \
             FROM rrp_snapshots \
             WHERE project_id = $1 \
         ) \
         SELECT vendor_code_norm, rrp_price, rrp_stock, snapshot_at \
         FROM rrp_snapshots, latest \
         WHERE project_id = $1 AND snapshot_at = latest.batch_at \
         ORDER BY vendor_code_norm",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
