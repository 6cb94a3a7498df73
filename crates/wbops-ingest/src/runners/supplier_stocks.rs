//! FBO supplier stocks ingestion.
//!
//! The Statistics endpoint is hard-limited to one request per minute and
//! paginates by `dateFrom = lastChangeDate`. Restart safety comes from a
//! 2-minute overlap against the highest stored `last_change_date`; the
//! uniqueness constraint drops the duplicates. Forward progress is verified
//! every page — a page whose maximum `lastChangeDate` does not advance the
//! window ends the run instead of looping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use wbops_core::reason;
use wbops_db::NewSupplierStockRow;
use wbops_wb::{format_date_from, SupplierStock};

use crate::context::RunContext;
use crate::credentials::{resolve_wb_token, ResolvedCredentials};
use crate::error::IngestError;
use crate::heartbeat::sleep_with_heartbeat;
use crate::registry::JobOutcome;
use crate::runners::wb_client_for;

const MAX_PAGES: u32 = 200;
const OVERLAP_MINUTES: i64 = 2;
const PAGE_INTERVAL_SECS: u64 = 60;
const DEFAULT_DATE_FROM: &str = "2019-06-20T00:00:00Z";

pub async fn run(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
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

    let mut date_from: DateTime<Utc> = match wbops_db::max_last_change_date(&ctx.pool).await? {
        Some(max) => max - chrono::Duration::minutes(OVERLAP_MINUTES),
        None => wbops_wb::parse_rfc3339_lenient(DEFAULT_DATE_FROM)
            .unwrap_or_else(|| Utc::now() - chrono::Duration::days(365)),
    };

    let mut pages = 0u32;
    let mut received_total = 0usize;
    let mut inserted_total = 0u64;

    while pages < MAX_PAGES {
        let raw_rows = client
            .fetch_supplier_stocks(&format_date_from(date_from))
            .await?;
        if raw_rows.is_empty() {
            break;
        }
        pages += 1;
        received_total += raw_rows.len();

        let mut rows: Vec<NewSupplierStockRow> = Vec::with_capacity(raw_rows.len());
        let mut page_max: Option<DateTime<Utc>> = None;
        for raw in raw_rows {
            let Some(stock) = SupplierStock::from_raw(&raw) else {
                continue;
            };
            page_max = Some(page_max.map_or(stock.last_change_date, |m| m.max(stock.last_change_date)));
            rows.push(NewSupplierStockRow {
                last_change_date: stock.last_change_date,
                warehouse_name: stock.warehouse_name,
                nm_id: stock.nm_id,
                supplier_article: stock.supplier_article,
                barcode: stock.barcode,
                tech_size: stock.tech_size,
                quantity: stock.quantity,
                quantity_full: stock.quantity_full,
                in_way_to_client: stock.in_way_to_client,
                in_way_from_client: stock.in_way_from_client,
                price: stock.price.and_then(Decimal::from_f64_retain),
                discount: stock.discount,
                raw,
            });
        }
        if !rows.is_empty() {
            inserted_total += wbops_db::insert_supplier_stock_rows(&ctx.pool, &rows).await?;
        }

        let Some(page_max) = page_max else {
            // Nothing on this page carried a usable lastChangeDate.
            break;
        };
        if page_max <= date_from {
            tracing::warn!(
                run_id = ctx.run_id,
                %page_max,
                %date_from,
                "supplier_stocks: window not advancing, stopping"
            );
            break;
        }

        // Next window: one second of overlap; dropped if it would stall.
        let mut next_from = page_max - chrono::Duration::seconds(1);
        if next_from <= date_from {
            next_from = page_max;
        }
        if next_from <= date_from {
            break;
        }
        date_from = next_from;

        let progress = json!({
            "phase": "supplier_stocks",
            "page": pages,
            "received": received_total,
            "inserted": inserted_total,
            "date_from": format_date_from(date_from),
        });
        let alive = sleep_with_heartbeat(
            &ctx.pool,
            ctx.run_id,
            Duration::from_secs(PAGE_INTERVAL_SECS),
            Some(&progress),
        )
        .await;
        if !alive {
            tracing::warn!(run_id = ctx.run_id, "supplier_stocks: run no longer running");
            return Ok(JobOutcome::AlreadyFinalized);
        }
    }

    Ok(JobOutcome::success(json!({
        "pages": pages,
        "received": received_total,
        "inserted": inserted_total,
        "final_date_from": format_date_from(date_from),
    })))
}
