//! Tax statement aggregates derived from finance report lines. These tables
//! sit outside the snapshot model: a rebuild replaces the statement for its
//! period.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaxStatementRow {
    pub id: i64,
    pub project_id: i64,
    pub period_id: String,
    pub gross_revenue: Decimal,
    pub lines_count: i32,
    pub ingest_run_id: Option<i64>,
    pub built_at: DateTime<Utc>,
}

/// Replaces the statement for `(project, period)` and its per-report lines in
/// one transaction. Returns the statement row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn upsert_tax_statement(
    pool: &PgPool,
    project_id: i64,
    period_id: &str,
    gross_revenue: Decimal,
    ingest_run_id: Option<i64>,
    report_lines: &[(i64, Decimal, i32)],
) -> Result<TaxStatementRow, DbError> {
    let lines_count: i32 = report_lines.iter().map(|(_, _, n)| n).sum();
    let mut tx = pool.begin().await?;

    let statement = sqlx::query_as::<_, TaxStatementRow>(
        "INSERT INTO tax_statements \
             (project_id, period_id, gross_revenue, lines_count, ingest_run_id, built_at) \
         VALUES ($1, $2, $3, $4, $5, NOW()) \
         ON CONFLICT (project_id, period_id) DO UPDATE SET \
             gross_revenue = EXCLUDED.gross_revenue, \
             lines_count   = EXCLUDED.lines_count, \
             ingest_run_id = EXCLUDED.ingest_run_id, \
             built_at      = NOW() \
         RETURNING id, project_id, period_id, gross_revenue, lines_count, ingest_run_id, built_at",
    )
    .bind(project_id)
    .bind(period_id)
    .bind(gross_revenue)
    .bind(lines_count)
    .bind(ingest_run_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM tax_statement_lines WHERE statement_id = $1")
        .bind(statement.id)
        .execute(&mut *tx)
        .await?;
    for (report_id, amount, count) in report_lines {
        sqlx::query(
            "INSERT INTO tax_statement_lines (statement_id, report_id, amount, lines_count) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(statement.id)
        .bind(report_id)
        .bind(amount)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(statement)
}
