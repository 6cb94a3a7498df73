//! Internal Data synchronisation: acquire → parse → map → persist, all
//! concluded in one snapshot transaction, then the chained RRP build.
//!
//! Called from the HTTP sync endpoint; the chained `build_rrp_snapshots`
//! run is enqueued for the worker under the normal exclusion.

use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::PgPool;
use wbops_core::{AppConfig, TriggeredBy};
use wbops_db::{
    InternalDataSettingsRow, NewSnapshot, NormalizedProductRow, RowErrorRecord, SnapshotStatus,
};
use wbops_internal::{
    apply_mapping, download_url, parse_rows, read_upload, InternalDataError, MappingConfig,
    MappingOutcome, SourceFormat, PREVIEW_ERRORS,
};

use crate::error::IngestError;
use crate::registry::JobRegistry;
use crate::runs;

/// What the sync endpoint reports back to the UI.
#[derive(Debug)]
pub struct SyncReport {
    pub status: SnapshotStatus,
    pub snapshot_version: i32,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub rows_failed: usize,
    pub error_summary: Option<String>,
    pub chained_build_run_id: Option<i64>,
}

/// Runs a full sync for a project.
///
/// Pre-snapshot failures (download, parse, mapping config) stamp the
/// settings sync status and propagate; once rows exist, the snapshot lands
/// atomically with its errors and the settings update.
///
/// # Errors
///
/// Returns [`IngestError::InternalData`] for acquisition/parse/mapping
/// failures and [`IngestError::Db`] for persistence failures.
pub async fn sync_now(
    pool: &PgPool,
    config: &Arc<AppConfig>,
    registry: &Arc<JobRegistry>,
    project_id: i64,
) -> Result<SyncReport, IngestError> {
    let Some(settings) = wbops_db::get_settings(pool, project_id).await? else {
        return Err(IngestError::InternalData(
            InternalDataError::SourceNotConfigured,
        ));
    };

    let mapping = match MappingConfig::from_json(&settings.mapping) {
        Ok(mapping) => mapping,
        Err(e) => {
            wbops_db::update_sync_result(pool, settings.id, "error", Some(&e.to_string())).await?;
            return Err(e.into());
        }
    };

    let (bytes, format) = match acquire(config, &settings).await {
        Ok(acquired) => acquired,
        Err(e) => {
            wbops_db::update_sync_result(pool, settings.id, "error", Some(&e.to_string())).await?;
            return Err(e);
        }
    };

    let raw_rows = match parse_rows(format, &bytes) {
        Ok(rows) => rows,
        Err(e) => {
            wbops_db::update_sync_result(pool, settings.id, "error", Some(&e.to_string())).await?;
            return Err(e.into());
        }
    };

    let outcome = apply_mapping(&mapping, &raw_rows);
    let status = aggregate_status(&outcome);
    let error_summary = (status != SnapshotStatus::Success).then(|| {
        format!(
            "{} of {} rows failed validation",
            outcome.metrics.rows_failed, outcome.metrics.rows_total
        )
    });

    let rows: Vec<NormalizedProductRow> = outcome
        .rows
        .iter()
        .map(|row| {
            let mut attributes = serde_json::Map::new();
            if let Some(stock) = row.stock {
                attributes.insert("stock".to_owned(), json!(stock.to_string()));
            }
            if let Some(barcode) = &row.barcode {
                attributes.insert("barcode".to_owned(), json!(barcode));
            }
            NormalizedProductRow {
                internal_sku: row.internal_sku.clone(),
                name: row.name.clone(),
                lifecycle_status: None,
                attributes: (!attributes.is_empty()).then(|| Value::Object(attributes)),
                rrp: row.rrp,
                cost: None,
                // The barcode is the marketplace-facing identifier mapping.
                identifiers: row
                    .barcode
                    .as_ref()
                    .map(|b| vec![("wildberries".to_owned(), b.clone())])
                    .unwrap_or_default(),
            }
        })
        .collect();

    let row_errors: Vec<RowErrorRecord> = outcome
        .errors
        .iter()
        .enumerate()
        .map(|(position, error)| RowErrorRecord {
            row_index: i32::try_from(error.row_index).unwrap_or(i32::MAX),
            source_key: Some(error.source_key.clone()),
            error_code: error.error_code.to_owned(),
            message: error.message.clone(),
            raw_row: error.raw_row.clone(),
            transforms: json!(error.transforms),
            is_preview: position < PREVIEW_ERRORS,
        })
        .collect();

    let new_snapshot = NewSnapshot {
        settings_id: Some(settings.id),
        source_mode: settings.source_mode.clone(),
        source_url: settings.source_url.clone(),
        file_storage_key: settings.file_storage_key.clone(),
        file_original_name: settings.file_original_name.clone(),
        file_format: Some(format.as_str().to_owned()),
        rows_total: i32::try_from(outcome.metrics.rows_total).unwrap_or(i32::MAX),
        rows_imported: i32::try_from(outcome.metrics.rows_imported).unwrap_or(i32::MAX),
        rows_failed: i32::try_from(outcome.metrics.rows_failed).unwrap_or(i32::MAX),
        status,
        error_summary: error_summary.clone(),
    };
    let snapshot =
        wbops_db::create_snapshot_with_rows(pool, project_id, &new_snapshot, &rows, &row_errors)
            .await?;

    tracing::info!(
        project_id,
        snapshot_id = snapshot.id,
        version = snapshot.version,
        status = status.as_str(),
        imported = outcome.metrics.rows_imported,
        failed = outcome.metrics.rows_failed,
        "internal data sync complete"
    );

    // Post-hook: a usable snapshot with data feeds the RRP projection.
    let mut chained_build_run_id = None;
    if matches!(status, SnapshotStatus::Success | SnapshotStatus::Partial)
        && outcome.metrics.rows_imported > 0
    {
        let created = runs::create_queued(
            pool,
            registry,
            config,
            project_id,
            "internal",
            "build_rrp_snapshots",
            None,
            TriggeredBy::Chained,
            Some(json!({
                "chained_from_job": "internal_data_sync",
                "chained_from_snapshot_id": snapshot.id,
            })),
            "internal_data_sync",
        )
        .await;
        match created {
            Ok(created) => chained_build_run_id = Some(created.run.id),
            Err(IngestError::ActiveRunExists { .. } | IngestError::LockNotAcquired) => {
                tracing::info!(project_id, "rrp build already queued or running");
            }
            Err(e) => {
                tracing::warn!(project_id, error = %e, "failed to chain rrp build");
            }
        }
    }

    Ok(SyncReport {
        status,
        snapshot_version: snapshot.version,
        rows_total: outcome.metrics.rows_total,
        rows_imported: outcome.metrics.rows_imported,
        rows_failed: outcome.metrics.rows_failed,
        error_summary,
        chained_build_run_id,
    })
}

async fn acquire(
    config: &AppConfig,
    settings: &InternalDataSettingsRow,
) -> Result<(Vec<u8>, SourceFormat), IngestError> {
    match settings.source_mode.as_str() {
        "url" => {
            let url = settings
                .source_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or(InternalDataError::SourceNotConfigured)?;
            let format = settings
                .file_format
                .as_deref()
                .map(SourceFormat::from_extension)
                .transpose()?
                .or_else(|| format_from_url(url))
                .ok_or_else(|| InternalDataError::UnsupportedFormat("unknown".to_owned()))?;
            let client =
                wbops_internal::build_client(config.http_timeout_secs, &config.http_user_agent)?;
            let bytes = download_url(&client, url, config.internal_download_max_bytes).await?;
            Ok((bytes, format))
        }
        "upload" => {
            let key = settings
                .file_storage_key
                .as_deref()
                .ok_or(InternalDataError::SourceNotConfigured)?;
            let format = settings
                .file_format
                .as_deref()
                .or_else(|| key.rsplit('.').next())
                .map(SourceFormat::from_extension)
                .transpose()?
                .ok_or_else(|| InternalDataError::UnsupportedFormat("unknown".to_owned()))?;
            let bytes = read_upload(&config.internal_data_dir, key).await?;
            Ok((bytes, format))
        }
        other => Err(InternalDataError::UnsupportedFormat(other.to_owned()).into()),
    }
}

fn format_from_url(url: &str) -> Option<SourceFormat> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?;
    SourceFormat::from_extension(ext).ok()
}

fn aggregate_status(outcome: &MappingOutcome) -> SnapshotStatus {
    if outcome.metrics.rows_imported == 0 && outcome.metrics.rows_failed > 0 {
        SnapshotStatus::Error
    } else if outcome.metrics.rows_failed > 0 {
        SnapshotStatus::Partial
    } else {
        SnapshotStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_extension_detection_ignores_query_strings() {
        assert_eq!(
            format_from_url("https://x.example/feed.csv?token=abc"),
            Some(SourceFormat::Csv)
        );
        assert_eq!(
            format_from_url("https://x.example/export.XML#frag"),
            Some(SourceFormat::Xml)
        );
        assert_eq!(format_from_url("https://x.example/feed"), None);
    }
}
