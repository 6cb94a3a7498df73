//! Per-project category tree: nullable parent FK, acyclic by construction.
//! Re-parenting walks the would-be ancestor chain before writing; deleting a
//! category nulls the parent pointer of its children (FK) and the category
//! reference of dependent products.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

const CATEGORY_COLUMNS: &str =
    "id, project_id, parent_id, key, title, created_at, updated_at";

/// A row from the `internal_categories` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub project_id: i64,
    pub parent_id: Option<i64>,
    pub key: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creates a category under an optional parent.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the parent does not belong to the
/// project, or [`DbError::Sqlx`] on query failure (including duplicate keys).
pub async fn create_category(
    pool: &PgPool,
    project_id: i64,
    parent_id: Option<i64>,
    key: &str,
    title: &str,
) -> Result<CategoryRow, DbError> {
    if let Some(parent) = parent_id {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM internal_categories WHERE id = $1 AND project_id = $2",
        )
        .bind(parent)
        .bind(project_id)
        .fetch_one(pool)
        .await?;
        if exists == 0 {
            return Err(DbError::NotFound);
        }
    }
    let sql = format!(
        "INSERT INTO internal_categories (project_id, parent_id, key, title) \
         VALUES ($1, $2, $3, $4) \
         RETURNING {CATEGORY_COLUMNS}"
    );
    let row = sqlx::query_as::<_, CategoryRow>(&sql)
        .bind(project_id)
        .bind(parent_id)
        .bind(key)
        .bind(title)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// Fetches a category by id within a project.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no row exists.
pub async fn get_category(
    pool: &PgPool,
    project_id: i64,
    category_id: i64,
) -> Result<CategoryRow, DbError> {
    let sql = format!(
        "SELECT {CATEGORY_COLUMNS} FROM internal_categories WHERE id = $1 AND project_id = $2"
    );
    sqlx::query_as::<_, CategoryRow>(&sql)
        .bind(category_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Lists a project's categories, parents before children where possible.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_categories(pool: &PgPool, project_id: i64) -> Result<Vec<CategoryRow>, DbError> {
    let sql = format!(
        "SELECT {CATEGORY_COLUMNS} FROM internal_categories \
         WHERE project_id = $1 \
         ORDER BY parent_id NULLS FIRST, key"
    );
    let rows = sqlx::query_as::<_, CategoryRow>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Updates title and/or parent. A parent change walks the ancestor chain of
/// the new parent; encountering the category itself rejects the write with
/// [`DbError::CategoryCycle`].
///
/// # Errors
///
/// - [`DbError::NotFound`] when the category or new parent is missing.
/// - [`DbError::CategoryCycle`] when re-parenting would close a loop.
pub async fn update_category(
    pool: &PgPool,
    project_id: i64,
    category_id: i64,
    title: Option<&str>,
    parent_id: Option<Option<i64>>,
) -> Result<CategoryRow, DbError> {
    if let Some(Some(new_parent)) = parent_id {
        if new_parent == category_id {
            return Err(DbError::CategoryCycle {
                category_id,
                parent_id: new_parent,
            });
        }
        // Walk up from the new parent; hitting category_id means a cycle.
        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            let row = get_category(pool, project_id, current).await?;
            if row.parent_id == Some(category_id) {
                return Err(DbError::CategoryCycle {
                    category_id,
                    parent_id: new_parent,
                });
            }
            cursor = row.parent_id;
        }
    }

    let sql = format!(
        "UPDATE internal_categories \
         SET title = COALESCE($3, title), \
             parent_id = CASE WHEN $4 THEN $5 ELSE parent_id END, \
             updated_at = NOW() \
         WHERE id = $1 AND project_id = $2 \
         RETURNING {CATEGORY_COLUMNS}"
    );
    sqlx::query_as::<_, CategoryRow>(&sql)
        .bind(category_id)
        .bind(project_id)
        .bind(title)
        .bind(parent_id.is_some())
        .bind(parent_id.flatten())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Deletes a category. Children are re-rooted (FK sets parent to NULL) and
/// dependent products lose their category reference in the same transaction.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no row exists.
pub async fn delete_category(
    pool: &PgPool,
    project_id: i64,
    category_id: i64,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE internal_products SET category_id = NULL \
         WHERE project_id = $1 AND category_id = $2",
    )
    .bind(project_id)
    .bind(category_id)
    .execute(&mut *tx)
    .await?;
    let result = sqlx::query("DELETE FROM internal_categories WHERE id = $1 AND project_id = $2")
        .bind(category_id)
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    tx.commit().await?;
    Ok(())
}
