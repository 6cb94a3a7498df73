//! Append-only seller admin price snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone)]
pub struct NewPriceSnapshot {
    pub nm_id: i64,
    pub wb_price: Option<Decimal>,
    pub wb_discount: Option<i32>,
}

/// A row from the latest price batch for a project.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PriceSnapshotRow {
    pub nm_id: i64,
    pub wb_price: Option<Decimal>,
    pub wb_discount: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Appends one batch of admin prices. All rows share the same `created_at`
/// so the latest-batch selection is well defined.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; the batch is transactional.
pub async fn insert_price_snapshots(
    pool: &PgPool,
    project_id: i64,
    ingest_run_id: Option<i64>,
    rows: &[NewPriceSnapshot],
) -> Result<u64, DbError> {
    let batch_at = Utc::now();
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            "INSERT INTO price_snapshots \
                 (project_id, nm_id, wb_price, wb_discount, ingest_run_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project_id)
        .bind(row.nm_id)
        .bind(row.wb_price)
        .bind(row.wb_discount)
        .bind(ingest_run_id)
        .bind(batch_at)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Rows of the latest price batch for a project: all rows whose `created_at`
/// equals the project's `MAX(created_at)`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_price_rows(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<PriceSnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, PriceSnapshotRow>(
        "WITH latest AS ( \
             SELECT MAX(created_at) AS batch_at \
             FROM price_snapshots \
             WHERE project_id = $1 \
         ) \
         SELECT nm_id, wb_price, wb_discount, created_at \
         FROM price_snapshots, latest \
         WHERE project_id = $1 AND created_at = latest.batch_at \
         ORDER BY nm_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
