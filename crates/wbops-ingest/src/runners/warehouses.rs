//! Offices (global) and seller warehouses (per project) refresh.

use serde_json::{json, Value};
use wbops_core::reason;
use wbops_db::{NewOffice, NewSellerWarehouse};

use crate::context::RunContext;
use crate::credentials::{resolve_wb_token, ResolvedCredentials};
use crate::error::IngestError;
use crate::registry::JobOutcome;
use crate::runners::wb_client_for;

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

    let offices: Vec<NewOffice> = client
        .fetch_offices()
        .await?
        .into_iter()
        .filter_map(|raw| {
            let office_id = raw.get("id").and_then(Value::as_i64)?;
            Some(NewOffice {
                office_id,
                name: raw.get("name").and_then(Value::as_str).map(str::to_owned),
                address: raw.get("address").and_then(Value::as_str).map(str::to_owned),
                raw,
            })
        })
        .collect();
    let offices_written = wbops_db::replace_offices(&ctx.pool, &offices).await?;

    let warehouses: Vec<NewSellerWarehouse> = client
        .fetch_seller_warehouses()
        .await?
        .into_iter()
        .filter_map(|raw| {
            let warehouse_id = raw.get("id").and_then(Value::as_i64)?;
            Some(NewSellerWarehouse {
                warehouse_id,
                name: raw
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                office_id: raw.get("officeId").and_then(Value::as_i64),
                raw,
            })
        })
        .collect();
    let warehouses_written =
        wbops_db::replace_seller_warehouses(&ctx.pool, ctx.project_id, &warehouses).await?;

    Ok(JobOutcome::success(json!({
        "offices": offices_written,
        "warehouses": warehouses_written,
    })))
}
