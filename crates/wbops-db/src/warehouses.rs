//! Database operations for WB offices (global) and per-project seller
//! warehouses. Both are reference data replaced wholesale on each refresh.

use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone)]
pub struct NewOffice {
    pub office_id: i64,
    pub name: Option<String>,
    pub address: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewSellerWarehouse {
    pub warehouse_id: i64,
    pub name: String,
    pub office_id: Option<i64>,
    pub raw: serde_json::Value,
}

/// Replaces the global offices table with a fresh listing, in one transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_offices(pool: &PgPool, offices: &[NewOffice]) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM wb_offices").execute(&mut *tx).await?;
    let mut written = 0u64;
    for office in offices {
        let result = sqlx::query(
            "INSERT INTO wb_offices (office_id, name, address, raw) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (office_id) DO UPDATE SET \
                 name = EXCLUDED.name, address = EXCLUDED.address, \
                 raw = EXCLUDED.raw, updated_at = NOW()",
        )
        .bind(office.office_id)
        .bind(office.name.as_deref())
        .bind(office.address.as_deref())
        .bind(&office.raw)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Replaces a project's seller warehouses with a fresh listing.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_seller_warehouses(
    pool: &PgPool,
    project_id: i64,
    warehouses: &[NewSellerWarehouse],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM seller_warehouses WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    let mut written = 0u64;
    for warehouse in warehouses {
        let result = sqlx::query(
            "INSERT INTO seller_warehouses (project_id, warehouse_id, name, office_id, raw) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(project_id)
        .bind(warehouse.warehouse_id)
        .bind(&warehouse.name)
        .bind(warehouse.office_id)
        .bind(&warehouse.raw)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Warehouse ids registered for a project (input to the FBS stocks refresh).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_seller_warehouse_ids(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<i64>, DbError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT warehouse_id FROM seller_warehouses WHERE project_id = $1 ORDER BY warehouse_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
