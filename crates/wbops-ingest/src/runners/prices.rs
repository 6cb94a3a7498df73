//! Admin price refresh: walks the seller's goods price listing and appends
//! one `price_snapshots` batch for the project's known nm_ids.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde_json::{json, Value};
use wbops_core::reason;
use wbops_db::NewPriceSnapshot;

use crate::context::RunContext;
use crate::credentials::{resolve_wb_token, ResolvedCredentials};
use crate::error::IngestError;
use crate::registry::JobOutcome;
use crate::runners::wb_client_for;

const PAGE_LIMIT: u32 = 1000;
const MAX_PAGES: u32 = 500;

fn goods_price(good: &Value) -> Option<Decimal> {
    let first_size = good.get("sizes").and_then(Value::as_array)?.first()?;
    // discountedPrice is the seller price after the seller's own discount.
    let price = first_size
        .get("discountedPrice")
        .or_else(|| first_size.get("price"))?;
    match price {
        Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
        Value::String(s) => s.parse::<Decimal>().ok(),
        _ => None,
    }
}

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

    let project_nm_ids: HashSet<i64> =
        wbops_db::list_project_nm_ids(&ctx.pool, ctx.project_id)
            .await?
            .into_iter()
            .collect();

    let mut rows: Vec<NewPriceSnapshot> = Vec::new();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut offset = 0u32;
    let mut pages = 0u32;

    loop {
        if pages >= MAX_PAGES {
            break;
        }
        let goods = client.fetch_goods_prices(PAGE_LIMIT, offset).await?;
        if goods.is_empty() {
            break;
        }
        pages += 1;
        offset += PAGE_LIMIT;

        for good in &goods {
            let Some(nm_id) = good.get("nmID").and_then(Value::as_i64) else {
                continue;
            };
            if !project_nm_ids.is_empty() && !project_nm_ids.contains(&nm_id) {
                continue;
            }
            if !seen.insert(nm_id) {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let wb_discount = good
                .get("discount")
                .and_then(Value::as_i64)
                .map(|d| d as i32);
            rows.push(NewPriceSnapshot {
                nm_id,
                wb_price: goods_price(good),
                wb_discount,
            });
        }

        let alive = wbops_db::heartbeat(&ctx.pool, ctx.run_id).await?;
        if !alive {
            return Ok(JobOutcome::AlreadyFinalized);
        }
        let progress = json!({
            "phase": "prices",
            "pages": pages,
            "matched": rows.len(),
        });
        wbops_db::set_progress(&ctx.pool, ctx.run_id, &progress).await?;
    }

    let written =
        wbops_db::insert_price_snapshots(&ctx.pool, ctx.project_id, Some(ctx.run_id), &rows)
            .await?;
    Ok(JobOutcome::success(json!({
        "pages": pages,
        "rows": written,
    })))
}
