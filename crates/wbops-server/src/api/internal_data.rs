//! Internal Data settings, source test, and synchronous sync endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wbops_internal::{probe_url, MappingConfig};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct SettingsItem {
    project_id: i64,
    source_mode: String,
    source_url: Option<String>,
    file_original_name: Option<String>,
    file_format: Option<String>,
    mapping: Value,
    last_test_status: Option<String>,
    last_test_error: Option<String>,
    last_test_at: Option<DateTime<Utc>>,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
}

impl From<wbops_db::InternalDataSettingsRow> for SettingsItem {
    fn from(row: wbops_db::InternalDataSettingsRow) -> Self {
        Self {
            project_id: row.project_id,
            source_mode: row.source_mode,
            source_url: row.source_url,
            file_original_name: row.file_original_name,
            file_format: row.file_format,
            mapping: row.mapping,
            last_test_status: row.last_test_status,
            last_test_error: row.last_test_error,
            last_test_at: row.last_test_at,
            last_sync_status: row.last_sync_status,
            last_sync_error: row.last_sync_error,
            last_sync_at: row.last_sync_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SettingsBody {
    source_mode: String,
    source_url: Option<String>,
    file_storage_key: Option<String>,
    file_original_name: Option<String>,
    file_format: Option<String>,
    mapping: Value,
}

pub(super) async fn get_settings(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<SettingsItem>>, ApiError> {
    let row = wbops_db::get_settings(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                "internal data is not configured for this project",
            )
        })?;
    Ok(Json(ApiResponse {
        data: SettingsItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Full replacement of the settings row. The mapping is validated here so an
/// unusable configuration never reaches a sync.
pub(super) async fn put_settings(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<ApiResponse<SettingsItem>>, ApiError> {
    if !matches!(body.source_mode.as_str(), "url" | "upload") {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "source_mode must be 'url' or 'upload'",
        ));
    }
    if body.source_mode == "url"
        && body
            .source_url
            .as_deref()
            .map_or(true, |u| u.trim().is_empty())
    {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "url mode requires source_url",
        ));
    }
    if let Err(e) = MappingConfig::from_json(&body.mapping) {
        return Err(ApiError::new(req_id.0, "validation_error", e.to_string()));
    }

    let row = wbops_db::upsert_settings(
        &state.pool,
        project_id,
        &body.source_mode,
        body.source_url.as_deref(),
        body.file_storage_key.as_deref(),
        body.file_original_name.as_deref(),
        body.file_format.as_deref(),
        &body.mapping,
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: SettingsItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct TestResult {
    status: String,
    http_status: Option<u16>,
    content_type: Option<String>,
    content_length: Option<u64>,
    error: Option<String>,
}

/// Cheap reachability probe for the configured URL source. Kept light (HEAD
/// or a ranged first-KB GET) so the settings UI stays snappy.
pub(super) async fn test_source(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<TestResult>>, ApiError> {
    let settings = wbops_db::get_settings(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(req_id.0.clone(), "not_found", "internal data is not configured")
        })?;

    let Some(url) = settings.source_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "no source_url to test",
        ));
    };

    let client = wbops_internal::build_client(
        state.config.http_timeout_secs,
        &state.config.http_user_agent,
    )
    .map_err(|e| ApiError::new(req_id.0.clone(), "internal_error", e.to_string()))?;

    let result = match probe_url(&client, url).await {
        Ok(probe) => TestResult {
            status: if probe.ok { "ok" } else { "error" }.to_owned(),
            http_status: probe.http_status,
            content_type: probe.content_type,
            content_length: probe.content_length,
            error: (!probe.ok).then(|| format!("source responded {:?}", probe.http_status)),
        },
        Err(e) => TestResult {
            status: "error".to_owned(),
            http_status: None,
            content_type: None,
            content_length: None,
            error: Some(e.to_string()),
        },
    };

    wbops_db::update_test_result(&state.pool, settings.id, &result.status, result.error.as_deref())
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: result,
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct SyncResult {
    status: String,
    snapshot_version: i32,
    rows_total: usize,
    rows_imported: usize,
    rows_failed: usize,
    error_summary: Option<String>,
    chained_build_run_id: Option<i64>,
}

/// Runs a synchronous sync: acquire → parse → map → snapshot, then enqueues
/// the chained RRP build when the snapshot is usable.
pub(super) async fn sync_source(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<SyncResult>>, ApiError> {
    let report = wbops_ingest::sync_now(&state.pool, &state.config, &state.registry, project_id)
        .await
        .map_err(|e| match &e {
            wbops_ingest::IngestError::InternalData(inner) => {
                ApiError::new(req_id.0.clone(), "validation_error", inner.to_string())
            }
            other => {
                tracing::error!(error = %other, "internal data sync failed");
                ApiError::new(req_id.0.clone(), "internal_error", "sync failed")
            }
        })?;

    Ok(Json(ApiResponse {
        data: SyncResult {
            status: report.status.as_str().to_owned(),
            snapshot_version: report.snapshot_version,
            rows_total: report.rows_total,
            rows_imported: report.rows_imported,
            rows_failed: report.rows_failed,
            error_summary: report.error_summary,
            chained_build_run_id: report.chained_build_run_id,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}
