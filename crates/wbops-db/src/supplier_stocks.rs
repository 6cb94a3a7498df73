//! FBO supplier stock rows. Not project-scoped; attribution happens through
//! the products catalog. The uniqueness constraint over
//! `(last_change_date, nm_id, barcode, warehouse_name)` absorbs the
//! deliberate overlap window the ingester uses on restart.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone)]
pub struct NewSupplierStockRow {
    pub last_change_date: DateTime<Utc>,
    pub warehouse_name: String,
    pub nm_id: i64,
    pub supplier_article: Option<String>,
    pub barcode: String,
    pub tech_size: Option<String>,
    pub quantity: i32,
    pub quantity_full: Option<i32>,
    pub in_way_to_client: Option<i32>,
    pub in_way_from_client: Option<i32>,
    pub price: Option<Decimal>,
    pub discount: Option<i32>,
    pub raw: serde_json::Value,
}

/// Inserts a page of supplier stock rows; duplicates from the overlap window
/// are dropped by the uniqueness constraint. Returns the number actually
/// inserted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; the page is transactional.
pub async fn insert_supplier_stock_rows(
    pool: &PgPool,
    rows: &[NewSupplierStockRow],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for row in rows {
        let result = sqlx::query(
            "INSERT INTO supplier_stock_snapshots \
                 (last_change_date, warehouse_name, nm_id, supplier_article, barcode, \
                  tech_size, quantity, quantity_full, in_way_to_client, in_way_from_client, \
                  price, discount, raw) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (last_change_date, nm_id, barcode, warehouse_name) DO NOTHING",
        )
        .bind(row.last_change_date)
        .bind(&row.warehouse_name)
        .bind(row.nm_id)
        .bind(row.supplier_article.as_deref())
        .bind(&row.barcode)
        .bind(row.tech_size.as_deref())
        .bind(row.quantity)
        .bind(row.quantity_full)
        .bind(row.in_way_to_client)
        .bind(row.in_way_from_client)
        .bind(row.price)
        .bind(row.discount)
        .bind(&row.raw)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Highest `last_change_date` observed so far; the ingester restarts from
/// this minus a 2-minute overlap.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn max_last_change_date(pool: &PgPool) -> Result<Option<DateTime<Utc>>, DbError> {
    let max: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT MAX(last_change_date) FROM supplier_stock_snapshots")
            .fetch_one(pool)
            .await?;
    Ok(max)
}
