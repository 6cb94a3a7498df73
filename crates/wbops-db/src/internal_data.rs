//! Internal Data storage: per-project source settings and version-numbered
//! catalog snapshots with products, identifiers, prices, costs, and
//! row-level errors.
//!
//! A snapshot build is one transaction: version allocation under a per-project
//! advisory lock, the snapshot header, all bulk upserts, the row errors, and
//! the settings sync-status update either all land or none do.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `internal_data_settings` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InternalDataSettingsRow {
    pub id: i64,
    pub project_id: i64,
    pub source_mode: String,
    pub source_url: Option<String>,
    pub file_storage_key: Option<String>,
    pub file_original_name: Option<String>,
    pub file_format: Option<String>,
    pub mapping: serde_json::Value,
    pub last_test_status: Option<String>,
    pub last_test_error: Option<String>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `internal_data_snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InternalDataSnapshotRow {
    pub id: i64,
    pub project_id: i64,
    pub settings_id: Option<i64>,
    pub version: i32,
    pub source_mode: String,
    pub source_url: Option<String>,
    pub file_storage_key: Option<String>,
    pub file_original_name: Option<String>,
    pub file_format: Option<String>,
    pub rows_total: Option<i32>,
    pub rows_imported: Option<i32>,
    pub rows_failed: Option<i32>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate outcome of one snapshot build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Every row imported.
    Success,
    /// Some rows imported, some failed.
    Partial,
    /// Nothing imported.
    Error,
}

impl SnapshotStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotStatus::Success => "success",
            SnapshotStatus::Partial => "partial",
            SnapshotStatus::Error => "error",
        }
    }
}

/// Source metadata for a snapshot header.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub settings_id: Option<i64>,
    pub source_mode: String,
    pub source_url: Option<String>,
    pub file_storage_key: Option<String>,
    pub file_original_name: Option<String>,
    pub file_format: Option<String>,
    pub rows_total: i32,
    pub rows_imported: i32,
    pub rows_failed: i32,
    pub status: SnapshotStatus,
    pub error_summary: Option<String>,
}

/// One normalized catalog row ready for persistence.
#[derive(Debug, Clone)]
pub struct NormalizedProductRow {
    pub internal_sku: String,
    pub name: Option<String>,
    pub lifecycle_status: Option<String>,
    pub attributes: Option<serde_json::Value>,
    pub rrp: Option<Decimal>,
    pub cost: Option<Decimal>,
    /// `(marketplace_code, external_sku)` pairs.
    pub identifiers: Vec<(String, String)>,
}

/// One row-level validation failure.
#[derive(Debug, Clone)]
pub struct RowErrorRecord {
    pub row_index: i32,
    pub source_key: Option<String>,
    pub error_code: String,
    pub message: String,
    pub raw_row: serde_json::Value,
    pub transforms: serde_json::Value,
    pub is_preview: bool,
}

// ---------------------------------------------------------------------------
// Settings operations
// ---------------------------------------------------------------------------

const SETTINGS_COLUMNS: &str = "id, project_id, source_mode, source_url, file_storage_key, \
     file_original_name, file_format, mapping, last_test_status, last_test_error, last_test_at, \
     last_sync_status, last_sync_error, last_sync_at, created_at, updated_at";

/// Fetches a project's Internal Data settings, if configured.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_settings(
    pool: &PgPool,
    project_id: i64,
) -> Result<Option<InternalDataSettingsRow>, DbError> {
    let sql = format!("SELECT {SETTINGS_COLUMNS} FROM internal_data_settings WHERE project_id = $1");
    let row = sqlx::query_as::<_, InternalDataSettingsRow>(&sql)
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Creates or replaces the single settings row for a project (PUT semantics).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_settings(
    pool: &PgPool,
    project_id: i64,
    source_mode: &str,
    source_url: Option<&str>,
    file_storage_key: Option<&str>,
    file_original_name: Option<&str>,
    file_format: Option<&str>,
    mapping: &serde_json::Value,
) -> Result<InternalDataSettingsRow, DbError> {
    let sql = format!(
        "INSERT INTO internal_data_settings \
             (project_id, source_mode, source_url, file_storage_key, file_original_name, \
              file_format, mapping) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (project_id) DO UPDATE SET \
             source_mode        = EXCLUDED.source_mode, \
             source_url         = EXCLUDED.source_url, \
             file_storage_key   = EXCLUDED.file_storage_key, \
             file_original_name = EXCLUDED.file_original_name, \
             file_format        = EXCLUDED.file_format, \
             mapping            = EXCLUDED.mapping, \
             updated_at         = NOW() \
         RETURNING {SETTINGS_COLUMNS}"
    );
    let row = sqlx::query_as::<_, InternalDataSettingsRow>(&sql)
        .bind(project_id)
        .bind(source_mode)
        .bind(source_url)
        .bind(file_storage_key)
        .bind(file_original_name)
        .bind(file_format)
        .bind(mapping)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// Records the outcome of a source reachability test.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_test_result(
    pool: &PgPool,
    settings_id: i64,
    status: &str,
    error: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE internal_data_settings \
         SET last_test_status = $2, last_test_error = $3, last_test_at = NOW(), \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(settings_id)
    .bind(status)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records the outcome of a sync. Normally applied inside the snapshot
/// transaction; this standalone form covers pre-snapshot failures (download
/// or parse errors).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_sync_result(
    pool: &PgPool,
    settings_id: i64,
    status: &str,
    error: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE internal_data_settings \
         SET last_sync_status = $2, last_sync_error = $3, last_sync_at = NOW(), \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(settings_id)
    .bind(status)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot build
// ---------------------------------------------------------------------------

const SNAPSHOT_COLUMNS: &str = "id, project_id, settings_id, version, source_mode, source_url, \
     file_storage_key, file_original_name, file_format, rows_total, rows_imported, rows_failed, \
     status, error, created_at";

async fn next_snapshot_version(
    tx: &mut Transaction<'_, Postgres>,
    project_id: i64,
) -> Result<i32, DbError> {
    // Per-project advisory lock serializes version allocation.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(project_id)
        .execute(&mut **tx)
        .await?;
    let max_version: Option<i32> = sqlx::query_scalar(
        "SELECT MAX(version) FROM internal_data_snapshots WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(max_version.unwrap_or(0) + 1)
}

/// Creates a snapshot with its products, identifiers, prices, costs, and row
/// errors, and stamps the settings sync status — all in one transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is written on
/// failure.
pub async fn create_snapshot_with_rows(
    pool: &PgPool,
    project_id: i64,
    new: &NewSnapshot,
    rows: &[NormalizedProductRow],
    row_errors: &[RowErrorRecord],
) -> Result<InternalDataSnapshotRow, DbError> {
    let mut tx = pool.begin().await?;
    let version = next_snapshot_version(&mut tx, project_id).await?;

    let insert_sql = format!(
        "INSERT INTO internal_data_snapshots \
             (project_id, settings_id, version, source_mode, source_url, file_storage_key, \
              file_original_name, file_format, rows_total, rows_imported, rows_failed, \
              status, error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING {SNAPSHOT_COLUMNS}"
    );
    let snapshot = sqlx::query_as::<_, InternalDataSnapshotRow>(&insert_sql)
        .bind(project_id)
        .bind(new.settings_id)
        .bind(version)
        .bind(&new.source_mode)
        .bind(new.source_url.as_deref())
        .bind(new.file_storage_key.as_deref())
        .bind(new.file_original_name.as_deref())
        .bind(new.file_format.as_deref())
        .bind(new.rows_total)
        .bind(new.rows_imported)
        .bind(new.rows_failed)
        .bind(new.status.as_str())
        .bind(new.error_summary.as_deref())
        .fetch_one(&mut *tx)
        .await?;

    for row in rows {
        let product_id: i64 = sqlx::query_scalar(
            "INSERT INTO internal_products \
                 (project_id, snapshot_id, internal_sku, name, lifecycle_status, attributes) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (project_id, snapshot_id, internal_sku) DO UPDATE SET \
                 name             = EXCLUDED.name, \
                 lifecycle_status = EXCLUDED.lifecycle_status, \
                 attributes       = EXCLUDED.attributes \
             RETURNING id",
        )
        .bind(project_id)
        .bind(snapshot.id)
        .bind(&row.internal_sku)
        .bind(row.name.as_deref())
        .bind(row.lifecycle_status.as_deref())
        .bind(row.attributes.as_ref())
        .fetch_one(&mut *tx)
        .await?;

        for (marketplace_code, external_sku) in &row.identifiers {
            sqlx::query(
                "INSERT INTO internal_product_identifiers \
                     (project_id, snapshot_id, internal_product_id, marketplace_code, external_sku) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (snapshot_id, internal_product_id, marketplace_code) DO UPDATE SET \
                     external_sku = EXCLUDED.external_sku",
            )
            .bind(project_id)
            .bind(snapshot.id)
            .bind(product_id)
            .bind(marketplace_code)
            .bind(external_sku)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO internal_product_prices (snapshot_id, internal_product_id, rrp) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (snapshot_id, internal_product_id) DO UPDATE SET \
                 rrp = EXCLUDED.rrp",
        )
        .bind(snapshot.id)
        .bind(product_id)
        .bind(row.rrp)
        .execute(&mut *tx)
        .await?;

        if row.cost.is_some() {
            sqlx::query(
                "INSERT INTO internal_product_costs (snapshot_id, internal_product_id, cost) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (snapshot_id, internal_product_id) DO UPDATE SET \
                     cost = EXCLUDED.cost",
            )
            .bind(snapshot.id)
            .bind(product_id)
            .bind(row.cost)
            .execute(&mut *tx)
            .await?;
        }
    }

    for error in row_errors {
        sqlx::query(
            "INSERT INTO internal_data_row_errors \
                 (project_id, snapshot_id, row_index, source_key, error_code, message, \
                  raw_row, transforms, is_preview) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(project_id)
        .bind(snapshot.id)
        .bind(error.row_index)
        .bind(error.source_key.as_deref())
        .bind(&error.error_code)
        .bind(&error.message)
        .bind(&error.raw_row)
        .bind(&error.transforms)
        .bind(error.is_preview)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(settings_id) = new.settings_id {
        sqlx::query(
            "UPDATE internal_data_settings \
             SET last_sync_status = $2, last_sync_error = $3, last_sync_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(settings_id)
        .bind(new.status.as_str())
        .bind(new.error_summary.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// The highest-version snapshot with status success/partial, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_usable_snapshot(
    pool: &PgPool,
    project_id: i64,
) -> Result<Option<InternalDataSnapshotRow>, DbError> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM internal_data_snapshots \
         WHERE project_id = $1 AND status IN ('success', 'partial') \
         ORDER BY version DESC \
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, InternalDataSnapshotRow>(&sql)
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// `(internal_sku, rrp, stock)` for the rows of a snapshot whose RRP is
/// non-null. Feeds the RRP snapshot build.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn rrp_rows_for_snapshot(
    pool: &PgPool,
    snapshot_id: i64,
) -> Result<Vec<(String, Decimal, Option<i32>)>, DbError> {
    let rows: Vec<(String, Decimal, Option<i32>)> = sqlx::query_as(
        "SELECT ip.internal_sku, ipp.rrp, \
                NULLIF(ip.attributes->>'stock', '')::int AS stock \
         FROM internal_product_prices ipp \
         JOIN internal_products ip ON ip.id = ipp.internal_product_id \
         WHERE ipp.snapshot_id = $1 AND ipp.rrp IS NOT NULL \
         ORDER BY ip.internal_sku",
    )
    .bind(snapshot_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Whether the project has any non-null RRP row in a usable snapshot.
/// Drives the products → `build_rrp_snapshots` chaining decision.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn has_rrp_rows(pool: &PgPool, project_id: i64) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM internal_product_prices ipp \
         JOIN internal_data_snapshots ids ON ids.id = ipp.snapshot_id \
         WHERE ids.project_id = $1 \
           AND ids.status IN ('success', 'partial') \
           AND ipp.rrp IS NOT NULL \
         LIMIT 1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Row errors for a snapshot, preview rows first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_row_errors(
    pool: &PgPool,
    snapshot_id: i64,
    limit: i64,
) -> Result<Vec<(i32, String, Option<String>)>, DbError> {
    let rows: Vec<(i32, String, Option<String>)> = sqlx::query_as(
        "SELECT row_index, error_code, message \
         FROM internal_data_row_errors \
         WHERE snapshot_id = $1 \
         ORDER BY is_preview DESC, row_index ASC \
         LIMIT $2",
    )
    .bind(snapshot_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
