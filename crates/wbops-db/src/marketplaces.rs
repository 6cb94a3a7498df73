//! Database operations for `marketplace_connections`.
//!
//! The encrypted token column never leaves this module undecrypted except
//! through the credential resolver; everything else reads connections with
//! the token masked.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

const CONNECTION_COLUMNS: &str = "id, project_id, marketplace_code, is_enabled, \
     api_token_encrypted, settings, created_at, updated_at";

/// A row from the `marketplace_connections` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectionRow {
    pub id: i64,
    pub project_id: i64,
    pub marketplace_code: String,
    pub is_enabled: bool,
    pub api_token_encrypted: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub is_enabled: Option<bool>,
    pub api_token_encrypted: Option<String>,
    pub settings: Option<serde_json::Value>,
}

/// Fetches the connection for (project, marketplace), if configured.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_connection(
    pool: &PgPool,
    project_id: i64,
    marketplace_code: &str,
) -> Result<Option<ConnectionRow>, DbError> {
    let sql = format!(
        "SELECT {CONNECTION_COLUMNS} FROM marketplace_connections \
         WHERE project_id = $1 AND marketplace_code = $2"
    );
    let row = sqlx::query_as::<_, ConnectionRow>(&sql)
        .bind(project_id)
        .bind(marketplace_code)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Lists all connections for a project.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_connections(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<ConnectionRow>, DbError> {
    let sql = format!(
        "SELECT {CONNECTION_COLUMNS} FROM marketplace_connections \
         WHERE project_id = $1 \
         ORDER BY marketplace_code"
    );
    let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Creates or updates the (project, marketplace) connection. Absent update
/// fields keep whatever the row already holds, so a settings-only PUT does
/// not wipe the stored token.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_connection(
    pool: &PgPool,
    project_id: i64,
    marketplace_code: &str,
    update: &ConnectionUpdate,
) -> Result<ConnectionRow, DbError> {
    let sql = format!(
        "INSERT INTO marketplace_connections \
             (project_id, marketplace_code, is_enabled, api_token_encrypted, settings) \
         VALUES ($1, $2, COALESCE($3, FALSE), $4, COALESCE($5, '{{}}'::jsonb)) \
         ON CONFLICT (project_id, marketplace_code) DO UPDATE SET \
             is_enabled          = COALESCE($3, marketplace_connections.is_enabled), \
             api_token_encrypted = COALESCE($4, marketplace_connections.api_token_encrypted), \
             settings            = COALESCE($5, marketplace_connections.settings), \
             updated_at          = NOW() \
         RETURNING {CONNECTION_COLUMNS}"
    );
    let row = sqlx::query_as::<_, ConnectionRow>(&sql)
        .bind(project_id)
        .bind(marketplace_code)
        .bind(update.is_enabled)
        .bind(update.api_token_encrypted.as_deref())
        .bind(update.settings.as_ref())
        .fetch_one(pool)
        .await?;
    Ok(row)
}
