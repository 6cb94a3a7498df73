//! Append-only FBS stock snapshots: one `snapshot_at` batch per run, latest
//! batch wins for readers.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone)]
pub struct NewStockSnapshot {
    pub nm_id: i64,
    pub warehouse_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StockSnapshotRow {
    pub nm_id: i64,
    pub warehouse_id: i64,
    pub quantity: i32,
    pub snapshot_at: DateTime<Utc>,
}

/// Appends one whole-warehouse stock batch sharing a single `snapshot_at`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; the batch is transactional.
pub async fn insert_stock_snapshots(
    pool: &PgPool,
    project_id: i64,
    ingest_run_id: Option<i64>,
    rows: &[NewStockSnapshot],
) -> Result<u64, DbError> {
    let batch_at = Utc::now();
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            "INSERT INTO stock_snapshots \
                 (project_id, nm_id, warehouse_id, quantity, ingest_run_id, snapshot_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project_id)
        .bind(row.nm_id)
        .bind(row.warehouse_id)
        .bind(row.quantity)
        .bind(ingest_run_id)
        .bind(batch_at)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Rows of the latest stock batch for a project.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_stock_rows(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<StockSnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, StockSnapshotRow>(
        "WITH latest AS ( \
             SELECT MAX(snapshot_at) AS batch_at \
             FROM stock_snapshots \
             WHERE project_id = $1 \
         ) \
         SELECT nm_id, warehouse_id, quantity, snapshot_at \
         FROM stock_snapshots, latest \
         WHERE project_id = $1 AND snapshot_at = latest.batch_at \
         ORDER BY nm_id, warehouse_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
