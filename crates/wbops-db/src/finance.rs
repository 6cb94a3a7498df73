//! Finance report headers and opaque line payloads.

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `wb_finance_reports` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FinanceReportRow {
    pub id: i64,
    pub project_id: i64,
    pub report_id: i64,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub currency: Option<String>,
    pub ingest_run_id: Option<i64>,
}

/// Upserts the report header for `(project, report_id)` and returns the
/// internal id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_finance_report(
    pool: &PgPool,
    project_id: i64,
    report_id: i64,
    period_from: NaiveDate,
    period_to: NaiveDate,
    currency: Option<&str>,
    ingest_run_id: Option<i64>,
) -> Result<i64, DbError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO wb_finance_reports \
             (project_id, report_id, period_from, period_to, currency, ingest_run_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (project_id, report_id) DO UPDATE SET \
             period_from   = EXCLUDED.period_from, \
             period_to     = EXCLUDED.period_to, \
             currency      = EXCLUDED.currency, \
             ingest_run_id = EXCLUDED.ingest_run_id \
         RETURNING id",
    )
    .bind(project_id)
    .bind(report_id)
    .bind(period_from)
    .bind(period_to)
    .bind(currency)
    .bind(ingest_run_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Replaces a report's lines with the given payloads. Payloads are stored
/// verbatim; typed accessors extract the few fields the reports need later.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; replacement is
/// transactional.
pub async fn insert_report_lines(
    pool: &PgPool,
    internal_report_id: i64,
    lines: &[(Option<i64>, serde_json::Value)],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM wb_finance_report_lines WHERE report_id = $1")
        .bind(internal_report_id)
        .execute(&mut *tx)
        .await?;
    let mut written = 0u64;
    for (rrd_id, payload) in lines {
        let result = sqlx::query(
            "INSERT INTO wb_finance_report_lines (report_id, rrd_id, payload) \
             VALUES ($1, $2, $3)",
        )
        .bind(internal_report_id)
        .bind(rrd_id)
        .bind(payload)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Line count for a report header (internal id).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_report_lines(pool: &PgPool, internal_report_id: i64) -> Result<i64, DbError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM wb_finance_report_lines WHERE report_id = $1")
            .bind(internal_report_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Sum of `retail_amount` across a report's lines plus the line count.
/// Lines without the field contribute zero.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn sum_report_line_amounts(
    pool: &PgPool,
    internal_report_id: i64,
) -> Result<(rust_decimal::Decimal, i64), DbError> {
    let row: (rust_decimal::Decimal, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(NULLIF(payload->>'retail_amount', '')::numeric), 0), COUNT(*) \
         FROM wb_finance_report_lines \
         WHERE report_id = $1",
    )
    .bind(internal_report_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Report headers for a project intersecting a date period.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_reports_in_period(
    pool: &PgPool,
    project_id: i64,
    period_from: NaiveDate,
    period_to: NaiveDate,
) -> Result<Vec<FinanceReportRow>, DbError> {
    let rows = sqlx::query_as::<_, FinanceReportRow>(
        "SELECT id, project_id, report_id, period_from, period_to, currency, ingest_run_id \
         FROM wb_finance_reports \
         WHERE project_id = $1 AND period_from <= $3 AND period_to >= $2 \
         ORDER BY period_from",
    )
    .bind(project_id)
    .bind(period_from)
    .bind(period_to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
