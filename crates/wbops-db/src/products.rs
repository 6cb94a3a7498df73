//! Database operations for the per-project `products` catalog.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `products` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub project_id: i64,
    pub nm_id: i64,
    pub vendor_code: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub subject_name: Option<String>,
    pub raw: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One card mapped from the WB Content API, ready for upsert.
#[derive(Debug, Clone)]
pub struct UpsertProduct {
    pub nm_id: i64,
    pub vendor_code: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub subject_name: Option<String>,
    /// Original card payload, stored verbatim for re-projection.
    pub raw: serde_json::Value,
}

/// Upserts a batch of products on `(project_id, nm_id)`.
///
/// Returns the number of rows written (inserts plus updates).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any upsert fails; the batch runs in a single
/// transaction, so a failure writes nothing.
pub async fn upsert_products(
    pool: &PgPool,
    project_id: i64,
    products: &[UpsertProduct],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for product in products {
        let result = sqlx::query(
            "INSERT INTO products \
                 (project_id, nm_id, vendor_code, title, brand, subject_name, raw) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (project_id, nm_id) DO UPDATE SET \
                 vendor_code  = EXCLUDED.vendor_code, \
                 title        = EXCLUDED.title, \
                 brand        = EXCLUDED.brand, \
                 subject_name = EXCLUDED.subject_name, \
                 raw          = EXCLUDED.raw, \
                 updated_at   = NOW()",
        )
        .bind(project_id)
        .bind(product.nm_id)
        .bind(product.vendor_code.as_deref())
        .bind(product.title.as_deref())
        .bind(product.brand.as_deref())
        .bind(product.subject_name.as_deref())
        .bind(&product.raw)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// All products for a project including the raw card payload (input to the
/// FBS stocks refresh, which needs the barcodes buried in the card).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_products_with_raw(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<ProductRow>, DbError> {
    let rows = sqlx::query_as::<_, ProductRow>(
        "SELECT id, project_id, nm_id, vendor_code, title, brand, subject_name, raw, \
                created_at, updated_at \
         FROM products \
         WHERE project_id = $1 \
         ORDER BY nm_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All nm_ids known for a project (input to the prices refresh).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_project_nm_ids(pool: &PgPool, project_id: i64) -> Result<Vec<i64>, DbError> {
    let rows: Vec<i64> =
        sqlx::query_scalar("SELECT nm_id FROM products WHERE project_id = $1 ORDER BY nm_id")
            .bind(project_id)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}
