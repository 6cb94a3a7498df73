//! Tax statement build: aggregates the finance report lines of a reporting
//! period into `tax_statements`. Writes outside the snapshot model — a
//! rebuild replaces the period's statement.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use wbops_core::reason;

use crate::context::RunContext;
use crate::error::IngestError;
use crate::registry::JobOutcome;

/// `period_id` is `YYYY-MM`; resolves to the month's date bounds.
fn parse_period_id(params: &Value) -> Result<(String, NaiveDate, NaiveDate), String> {
    let period_id = params
        .get("period_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "params.period_id is required (YYYY-MM)".to_owned())?;

    let first = NaiveDate::parse_from_str(&format!("{period_id}-01"), "%Y-%m-%d")
        .map_err(|_| format!("params.period_id must be YYYY-MM, got \"{period_id}\""))?;
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next_month
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| "period out of range".to_owned())?;
    Ok((period_id.to_owned(), first, last))
}

pub async fn run(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    let (period_id, period_from, period_to) = match parse_period_id(&ctx.params) {
        Ok(parsed) => parsed,
        Err(message) => {
            return Ok(JobOutcome::failure(reason::INVALID_PARAMS, message, json!({})));
        }
    };

    let reports =
        wbops_db::list_reports_in_period(&ctx.pool, ctx.project_id, period_from, period_to)
            .await?;

    let mut gross_revenue = Decimal::ZERO;
    let mut report_lines: Vec<(i64, Decimal, i32)> = Vec::with_capacity(reports.len());
    for report in &reports {
        let (amount, count) = wbops_db::sum_report_line_amounts(&ctx.pool, report.id).await?;
        gross_revenue += amount;
        report_lines.push((report.report_id, amount, i32::try_from(count).unwrap_or(i32::MAX)));
    }

    let statement = wbops_db::upsert_tax_statement(
        &ctx.pool,
        ctx.project_id,
        &period_id,
        gross_revenue,
        Some(ctx.run_id),
        &report_lines,
    )
    .await?;

    Ok(JobOutcome::success(json!({
        "period_id": period_id,
        "reports_count": reports.len(),
        "lines_count": statement.lines_count,
        "gross_revenue": statement.gross_revenue.to_string(),
    })))
}
