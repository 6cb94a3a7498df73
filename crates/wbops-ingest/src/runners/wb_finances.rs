//! Finance report ingestion for an explicit date period. Line payloads are
//! stored opaquely, grouped under one header per (project, report_id).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use wbops_core::reason;

use crate::context::RunContext;
use crate::credentials::{resolve_wb_token, ResolvedCredentials};
use crate::error::IngestError;
use crate::heartbeat::sleep_with_heartbeat;
use crate::registry::JobOutcome;
use crate::runners::wb_client_for;

const LINE_PAGE_LIMIT: u32 = 1000;
const MAX_LINE_PAGES: u32 = 200;
// reportDetailByPeriod shares the Statistics 1-req/min budget.
const PAGE_INTERVAL_SECS: u64 = 60;

fn parse_period(params: &Value) -> Result<(NaiveDate, NaiveDate), String> {
    let date = |field: &str| -> Result<NaiveDate, String> {
        let raw = params
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("params.{field} is required (YYYY-MM-DD)"))?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| format!("params.{field} must be YYYY-MM-DD, got \"{raw}\""))
    };
    let from = date("date_from")?;
    let to = date("date_to")?;
    if from > to {
        return Err("date_from must not be after date_to".to_owned());
    }
    Ok((from, to))
}

pub async fn run(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    let (date_from, date_to) = match parse_period(&ctx.params) {
        Ok(period) => period,
        Err(message) => {
            return Ok(JobOutcome::failure(reason::INVALID_PARAMS, message, json!({})));
        }
    };

    let token = match resolve_wb_token(&ctx.pool, ctx.cipher.as_ref(), &ctx.config, ctx.project_id)
        .await?
    {
        ResolvedCredentials::Resolved(token) => token,
        ResolvedCredentials::NotConfigured | ResolvedCredentials::Disabled => {
            return Ok(JobOutcome::failure(
                reason::NO_CREDENTIALS,
                "wildberries connection is not configured or disabled",
                json!({}),
            ));
        }
    };
    let client = wb_client_for(&ctx.config, &token)?;

    // rrd_id pagination; lines are grouped per realization report.
    let mut lines_by_report: BTreeMap<i64, Vec<(Option<i64>, Value)>> = BTreeMap::new();
    let mut rrd_id = 0i64;
    let mut pages = 0u32;
    loop {
        if pages >= MAX_LINE_PAGES {
            break;
        }
        let lines = client
            .fetch_finance_report_lines(date_from, date_to, rrd_id, LINE_PAGE_LIMIT)
            .await?;
        if lines.is_empty() {
            break;
        }
        pages += 1;

        let mut last_rrd = rrd_id;
        for line in lines {
            let report_id = line
                .get("realizationreport_id")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let line_rrd = line.get("rrd_id").and_then(Value::as_i64);
            if let Some(r) = line_rrd {
                last_rrd = last_rrd.max(r);
            }
            lines_by_report
                .entry(report_id)
                .or_default()
                .push((line_rrd, line));
        }
        if last_rrd <= rrd_id {
            // No cursor progress; stop rather than loop.
            break;
        }
        rrd_id = last_rrd;

        let progress = json!({
            "phase": "wb_finances",
            "pages": pages,
            "reports": lines_by_report.len(),
            "rrd_id": rrd_id,
        });
        if !sleep_with_heartbeat(
            &ctx.pool,
            ctx.run_id,
            Duration::from_secs(PAGE_INTERVAL_SECS),
            Some(&progress),
        )
        .await
        {
            return Ok(JobOutcome::AlreadyFinalized);
        }
    }

    let mut rows_count = 0u64;
    for (report_id, lines) in &lines_by_report {
        let currency = lines
            .first()
            .and_then(|(_, line)| line.get("currency_name").and_then(Value::as_str));
        let internal_id = wbops_db::upsert_finance_report(
            &ctx.pool,
            ctx.project_id,
            *report_id,
            date_from,
            date_to,
            currency,
            Some(ctx.run_id),
        )
        .await?;
        rows_count += wbops_db::insert_report_lines(&ctx.pool, internal_id, lines).await?;
    }

    Ok(JobOutcome::success(json!({
        "period_from": date_from.to_string(),
        "period_to": date_to.to_string(),
        "reports_count": lines_by_report.len(),
        "rows_count": rows_count,
        "pages": pages,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_requires_both_dates() {
        assert!(parse_period(&json!({})).is_err());
        assert!(parse_period(&json!({"date_from": "2024-01-01"})).is_err());
        assert!(parse_period(&json!({"date_from": "2024-01-01", "date_to": "31.01.2024"})).is_err());
    }

    #[test]
    fn period_parses_and_orders() {
        let (from, to) =
            parse_period(&json!({"date_from": "2024-01-01", "date_to": "2024-01-31"}))
                .expect("period");
        assert_eq!(from.to_string(), "2024-01-01");
        assert_eq!(to.to_string(), "2024-01-31");

        assert!(parse_period(&json!({"date_from": "2024-02-01", "date_to": "2024-01-31"})).is_err());
    }
}
