//! FBS stock refresh: for each seller warehouse, query amounts for the
//! project's barcodes and append one snapshot batch. Readers take the
//! latest `snapshot_at` per project.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use wbops_core::reason;
use wbops_db::NewStockSnapshot;
use wbops_wb::{card_barcodes, card_nm_id};

use crate::context::RunContext;
use crate::credentials::{resolve_wb_token, ResolvedCredentials};
use crate::error::IngestError;
use crate::heartbeat::sleep_with_heartbeat;
use crate::registry::JobOutcome;
use crate::runners::wb_client_for;

const BARCODE_CHUNK: usize = 1000;

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

    let warehouse_ids =
        wbops_db::warehouses::list_seller_warehouse_ids(&ctx.pool, ctx.project_id).await?;
    if warehouse_ids.is_empty() {
        return Ok(JobOutcome::success(json!({
            "warehouses": 0,
            "rows": 0,
            "note": "no seller warehouses registered; run the warehouses job first",
        })));
    }

    // Barcodes live inside the stored cards; each maps back to its nm_id.
    let mut nm_by_barcode: HashMap<String, i64> = HashMap::new();
    for product in wbops_db::list_products_with_raw(&ctx.pool, ctx.project_id).await? {
        if let Some(raw) = &product.raw {
            let Some(nm_id) = card_nm_id(raw).or(Some(product.nm_id)) else {
                continue;
            };
            for barcode in card_barcodes(raw) {
                nm_by_barcode.insert(barcode, nm_id);
            }
        }
    }
    if nm_by_barcode.is_empty() {
        return Ok(JobOutcome::success(json!({
            "warehouses": warehouse_ids.len(),
            "rows": 0,
            "note": "no barcodes known; run the products job first",
        })));
    }
    let barcodes: Vec<String> = nm_by_barcode.keys().cloned().collect();

    let mut rows: Vec<NewStockSnapshot> = Vec::new();
    for (index, warehouse_id) in warehouse_ids.iter().enumerate() {
        for chunk in barcodes.chunks(BARCODE_CHUNK) {
            let amounts = client.fetch_fbs_stocks(*warehouse_id, chunk).await?;
            for (sku, amount) in amounts {
                if let Some(nm_id) = nm_by_barcode.get(&sku) {
                    rows.push(NewStockSnapshot {
                        nm_id: *nm_id,
                        warehouse_id: *warehouse_id,
                        quantity: i32::try_from(amount).unwrap_or(i32::MAX),
                    });
                }
            }
        }

        let progress = json!({
            "phase": "stocks",
            "warehouses_done": index + 1,
            "warehouses_total": warehouse_ids.len(),
            "rows": rows.len(),
        });
        wbops_db::set_progress(&ctx.pool, ctx.run_id, &progress).await?;
        let alive = sleep_with_heartbeat(
            &ctx.pool,
            ctx.run_id,
            Duration::from_millis(ctx.config.wb_min_interval_ms),
            None,
        )
        .await;
        if !alive {
            return Ok(JobOutcome::AlreadyFinalized);
        }
    }

    let written = wbops_db::insert_stock_snapshots(&ctx.pool, ctx.project_id, Some(ctx.run_id), &rows)
        .await?;
    Ok(JobOutcome::success(json!({
        "warehouses": warehouse_ids.len(),
        "rows": written,
    })))
}
