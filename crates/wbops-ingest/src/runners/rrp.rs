//! RRP snapshot builders.
//!
//! `build_rrp_snapshots` is the production path: it projects the latest
//! usable Internal Data snapshot into a fresh `rrp_snapshots` batch.
//! `rrp_xml` is the legacy path that parses the tenant's XML source
//! directly. Both are idempotent: each run appends one batch, readers take
//! the latest.

use serde_json::json;
use wbops_db::NewRrpRow;
use wbops_internal::{
    apply_mapping, download_url, parse_rows, read_upload, MappingConfig, SourceFormat,
};

use crate::context::RunContext;
use crate::error::IngestError;
use crate::registry::JobOutcome;

fn normalize_vendor_code(sku: &str) -> String {
    sku.trim().to_lowercase()
}

pub async fn run_build_snapshots(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    let Some(snapshot) = wbops_db::latest_usable_snapshot(&ctx.pool, ctx.project_id).await? else {
        // Zero source data is a legitimate no-op, mirroring jobs that import
        // nothing.
        return Ok(JobOutcome::success(json!({
            "rows": 0,
            "note": "no usable internal data snapshot",
        })));
    };

    let source_rows = wbops_db::rrp_rows_for_snapshot(&ctx.pool, snapshot.id).await?;
    let rows: Vec<NewRrpRow> = source_rows
        .iter()
        .map(|(sku, rrp, stock)| NewRrpRow {
            vendor_code_norm: normalize_vendor_code(sku),
            rrp_price: Some(*rrp),
            rrp_stock: *stock,
        })
        .collect();

    let written = wbops_db::insert_rrp_batch(&ctx.pool, ctx.project_id, Some(ctx.run_id), &rows)
        .await?;
    Ok(JobOutcome::success(json!({
        "rows": written,
        "source_snapshot_id": snapshot.id,
        "source_snapshot_version": snapshot.version,
    })))
}

pub async fn run_rrp_xml(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    let Some(settings) = wbops_db::get_settings(&ctx.pool, ctx.project_id).await? else {
        return Ok(JobOutcome::failure(
            "source_not_configured",
            "internal data source is not configured",
            json!({}),
        ));
    };
    let mapping = match MappingConfig::from_json(&settings.mapping) {
        Ok(mapping) => mapping,
        Err(e) => {
            return Ok(JobOutcome::failure("invalid_mapping", e.to_string(), json!({})));
        }
    };

    let bytes = match settings.source_mode.as_str() {
        "url" => {
            let Some(url) = settings.source_url.as_deref() else {
                return Ok(JobOutcome::failure(
                    "source_not_configured",
                    "url mode without a source_url",
                    json!({}),
                ));
            };
            let client = wbops_internal::build_client(
                ctx.config.http_timeout_secs,
                &ctx.config.http_user_agent,
            )?;
            download_url(&client, url, ctx.config.internal_download_max_bytes).await?
        }
        _ => {
            let Some(key) = settings.file_storage_key.as_deref() else {
                return Ok(JobOutcome::failure(
                    "source_not_configured",
                    "upload mode without a stored file",
                    json!({}),
                ));
            };
            read_upload(&ctx.config.internal_data_dir, key).await?
        }
    };

    let raw_rows = parse_rows(SourceFormat::Xml, &bytes)?;
    let outcome = apply_mapping(&mapping, &raw_rows);

    let rows: Vec<NewRrpRow> = outcome
        .rows
        .iter()
        .filter(|row| row.rrp.is_some())
        .map(|row| NewRrpRow {
            vendor_code_norm: normalize_vendor_code(&row.internal_sku),
            rrp_price: row.rrp,
            rrp_stock: row.stock.and_then(|s| i32::try_from(s).ok()),
        })
        .collect();
    let written = wbops_db::insert_rrp_batch(&ctx.pool, ctx.project_id, Some(ctx.run_id), &rows)
        .await?;

    Ok(JobOutcome::success(json!({
        "rows": written,
        "rows_parsed": outcome.metrics.rows_total,
        "rows_failed": outcome.metrics.rows_failed,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_codes_are_normalized_for_joining() {
        assert_eq!(normalize_vendor_code("  ABC-1 "), "abc-1");
        assert_eq!(normalize_vendor_code("ШК-77"), "шк-77");
    }
}
