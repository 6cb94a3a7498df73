//! Ingestion control endpoints: schedules CRUD, manual triggers, run
//! listing/detail, admin mark-timeout, and the job catalog.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wbops_core::{cron, TriggeredBy};
use wbops_db::{IngestRunRow, NewIngestSchedule, RunFilters, ScheduleUpdate};

use crate::middleware::RequestId;

use super::{
    map_db_error, map_ingest_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct RunItem {
    id: i64,
    schedule_id: Option<i64>,
    project_id: i64,
    source_code: String,
    job_code: String,
    triggered_by: String,
    status: String,
    params: Option<Value>,
    stats: Option<Value>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    heartbeat_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IngestRunRow> for RunItem {
    fn from(row: IngestRunRow) -> Self {
        Self {
            id: row.id,
            schedule_id: row.schedule_id,
            project_id: row.project_id,
            source_code: row.source_code,
            job_code: row.job_code,
            triggered_by: row.triggered_by,
            status: row.status,
            params: row.params,
            stats: row.stats,
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
            duration_ms: row.duration_ms,
            heartbeat_at: row.heartbeat_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ScheduleItem {
    id: i64,
    project_id: i64,
    source_code: String,
    job_code: String,
    cron_expr: String,
    timezone: String,
    is_enabled: bool,
    next_run_at: Option<DateTime<Utc>>,
}

impl From<wbops_db::IngestScheduleRow> for ScheduleItem {
    fn from(row: wbops_db::IngestScheduleRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            source_code: row.source_code,
            job_code: row.job_code,
            cron_expr: row.cron_expr,
            timezone: row.timezone,
            is_enabled: row.is_enabled,
            next_run_at: row.next_run_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ScheduleCreateBody {
    job_code: String,
    cron_expr: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_true")]
    is_enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(super) struct ScheduleUpdateBody {
    cron_expr: Option<String>,
    timezone: Option<String>,
    is_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    source_code: Option<String>,
    job_code: Option<String>,
    status: Option<String>,
    #[serde(rename = "from")]
    date_from: Option<DateTime<Utc>>,
    #[serde(rename = "to")]
    date_to: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct ManualRunBody {
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MarkTimeoutBody {
    reason_code: Option<String>,
    reason_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct JobItem {
    source_code: String,
    job_code: String,
    title: String,
    supports_schedule: bool,
    supports_manual: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct WbJobStatusItem {
    job_code: String,
    title: String,
    has_schedule: bool,
    is_running: bool,
    last_run_at: Option<DateTime<Utc>>,
    last_status: Option<String>,
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

fn validated_next_run(
    req_id: &str,
    cron_expr: &str,
    timezone: &str,
) -> Result<DateTime<Utc>, ApiError> {
    let tz = cron::parse_timezone(timezone)
        .map_err(|e| ApiError::new(req_id.to_owned(), "validation_error", e.to_string()))?;
    cron::next_occurrence(cron_expr, tz, Utc::now())
        .map_err(|e| ApiError::new(req_id.to_owned(), "validation_error", e.to_string()))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.to_owned(),
                "validation_error",
                "cron expression has no upcoming occurrence",
            )
        })
}

pub(super) async fn list_schedules(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ScheduleItem>>>, ApiError> {
    let rows = wbops_db::list_schedules(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse {
        data: rows.into_iter().map(ScheduleItem::from).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn create_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
    Json(body): Json<ScheduleCreateBody>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduleItem>>), ApiError> {
    let Some(spec) = state.registry.get_by_job_code(&body.job_code) else {
        return Err(ApiError::new(
            req_id.0,
            "unsupported_job",
            format!("unsupported job_code '{}'", body.job_code),
        ));
    };
    if !spec.supports_schedule {
        return Err(ApiError::new(
            req_id.0,
            "unsupported_job",
            format!("job '{}' does not support schedules", body.job_code),
        ));
    }
    let next_run_at = validated_next_run(&req_id.0, &body.cron_expr, &body.timezone)?;

    let row = wbops_db::create_schedule(
        &state.pool,
        &NewIngestSchedule {
            project_id,
            source_code: spec.source.as_str().to_owned(),
            job_code: body.job_code,
            cron_expr: body.cron_expr,
            timezone: body.timezone,
            is_enabled: body.is_enabled,
            next_run_at: Some(next_run_at),
        },
    )
    .await
    .map_err(|e| match &e {
        wbops_db::DbError::Sqlx(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            ApiError::new(
                req_id.0.clone(),
                "conflict",
                "an enabled schedule already exists for this job",
            )
        }
        _ => map_db_error(req_id.0.clone(), &e),
    })?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: ScheduleItem::from(row),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn update_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(schedule_id): Path<i64>,
    Json(body): Json<ScheduleUpdateBody>,
) -> Result<Json<ApiResponse<ScheduleItem>>, ApiError> {
    let existing = wbops_db::get_schedule(&state.pool, schedule_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let cron_expr = body.cron_expr.as_deref().unwrap_or(&existing.cron_expr);
    let timezone = body.timezone.as_deref().unwrap_or(&existing.timezone);
    let next_run_at = validated_next_run(&req_id.0, cron_expr, timezone)?;

    let row = wbops_db::update_schedule(
        &state.pool,
        schedule_id,
        &ScheduleUpdate {
            cron_expr: body.cron_expr,
            timezone: body.timezone,
            is_enabled: body.is_enabled,
            next_run_at: Some(next_run_at),
        },
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: ScheduleItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn delete_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(schedule_id): Path<i64>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    wbops_db::delete_schedule(&state.pool, schedule_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse {
        data: serde_json::json!({"ok": true}),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Manual trigger for an existing schedule: 201 on accepted queue, 409 on
/// exclusion.
pub(super) async fn run_schedule_now(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(schedule_id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResponse<RunItem>>), ApiError> {
    let schedule = wbops_db::get_schedule(&state.pool, schedule_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let Some(spec) = state.registry.get(&schedule.source_code, &schedule.job_code) else {
        return Err(ApiError::new(
            req_id.0,
            "unsupported_job",
            format!("unsupported job_code '{}'", schedule.job_code),
        ));
    };
    if !spec.supports_manual {
        return Err(ApiError::new(
            req_id.0,
            "unsupported_job",
            format!("job '{}' does not support manual runs", schedule.job_code),
        ));
    }

    let outcome = wbops_ingest::create_queued(
        &state.pool,
        &state.registry,
        &state.config,
        schedule.project_id,
        &schedule.source_code,
        &schedule.job_code,
        Some(schedule.id),
        TriggeredBy::Manual,
        None,
        "manual",
    )
    .await
    .map_err(|e| map_ingest_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: RunItem::from(outcome.run),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

pub(super) async fn list_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ApiResponse<Vec<RunItem>>>, ApiError> {
    if let Some(job_code) = &query.job_code {
        if state.registry.get_by_job_code(job_code).is_none() {
            return Err(ApiError::new(
                req_id.0,
                "unsupported_job",
                format!("unsupported job_code '{job_code}'"),
            ));
        }
    }
    if let Some(source_code) = &query.source_code {
        if wbops_core::SourceCode::parse(source_code).is_none() {
            return Err(ApiError::new(
                req_id.0,
                "unsupported_job",
                format!("unsupported source_code '{source_code}'"),
            ));
        }
    }

    let filters = RunFilters {
        source_code: query.source_code,
        job_code: query.job_code,
        status: query.status,
        date_from: query.date_from,
        date_to: query.date_to,
    };
    let rows = wbops_db::list_runs(&state.pool, project_id, &filters, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: rows.into_iter().map(RunItem::from).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn get_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<i64>,
) -> Result<Json<ApiResponse<RunItem>>, ApiError> {
    let row = wbops_db::get_run(&state.pool, run_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse {
        data: RunItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Admin force-timeout; only valid while the run is queued/running.
pub(super) async fn mark_run_timeout(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((project_id, run_id)): Path<(i64, i64)>,
    Json(body): Json<MarkTimeoutBody>,
) -> Result<Json<ApiResponse<RunItem>>, ApiError> {
    let run = wbops_db::get_run(&state.pool, run_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    if run.project_id != project_id {
        return Err(ApiError::new(req_id.0, "not_found", "run not found"));
    }
    if !matches!(run.status.as_str(), "queued" | "running") {
        return Err(ApiError::new(
            req_id.0,
            "conflict",
            "run is not active (queued/running)",
        ));
    }

    let updated = wbops_db::mark_timeout(
        &state.pool,
        run_id,
        body.reason_code.as_deref().unwrap_or("manual"),
        body.reason_text.as_deref().unwrap_or("marked timeout manually"),
        "admin",
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    match updated {
        Some(row) => Ok(Json(ApiResponse {
            data: RunItem::from(row),
            meta: ResponseMeta::new(req_id.0),
        })),
        None => Err(ApiError::new(
            req_id.0,
            "conflict",
            "run status changed concurrently",
        )),
    }
}

// ---------------------------------------------------------------------------
// Jobs catalog & manual WB trigger
// ---------------------------------------------------------------------------

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<Vec<JobItem>>> {
    let data = state
        .registry
        .list()
        .into_iter()
        .map(|spec| JobItem {
            source_code: spec.source.as_str().to_owned(),
            job_code: spec.job_code.to_owned(),
            title: spec.title.to_owned(),
            supports_schedule: spec.supports_schedule,
            supports_manual: spec.supports_manual,
        })
        .collect();
    Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    })
}

pub(super) async fn wb_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<WbJobStatusItem>>>, ApiError> {
    let schedules = wbops_db::list_schedules(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let mut items = Vec::new();
    for spec in state.registry.list() {
        if spec.source != wbops_core::SourceCode::Wildberries {
            continue;
        }
        let last_run =
            wbops_db::get_last_run(&state.pool, project_id, "wildberries", spec.job_code)
                .await
                .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
        let is_running =
            wbops_db::has_active_run(&state.pool, project_id, "wildberries", spec.job_code)
                .await
                .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
        let has_schedule = schedules
            .iter()
            .any(|s| s.job_code == spec.job_code && s.is_enabled);

        items.push(WbJobStatusItem {
            job_code: spec.job_code.to_owned(),
            title: spec.title.to_owned(),
            has_schedule,
            is_running,
            last_run_at: last_run
                .as_ref()
                .and_then(|r| r.finished_at.or(r.started_at)),
            last_status: last_run.map(|r| r.status),
        });
    }

    Ok(Json(ApiResponse {
        data: items,
        meta: ResponseMeta::new(req_id.0),
    }))
}

fn validate_manual_params(job_code: &str, params: Option<&Value>) -> Result<(), String> {
    match job_code {
        "wb_finances" => {
            let params = params.ok_or("job 'wb_finances' requires params with 'date_from' and 'date_to'")?;
            for field in ["date_from", "date_to"] {
                let raw = params
                    .get(field)
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("params.{field} is required (YYYY-MM-DD)"))?;
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| format!("params.{field} must be YYYY-MM-DD"))?;
            }
            Ok(())
        }
        "build_tax_statement" => {
            params
                .and_then(|p| p.get("period_id"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(|_| ())
                .ok_or_else(|| "job 'build_tax_statement' requires params.period_id".to_owned())
        }
        _ => Ok(()),
    }
}

/// Convenience manual trigger for a Wildberries job: 201 on accepted queue,
/// 409 on exclusion, 422 on job/param errors.
pub(super) async fn run_wb_job_manual(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((project_id, job_code)): Path<(i64, String)>,
    body: Option<Json<ManualRunBody>>,
) -> Result<(StatusCode, Json<ApiResponse<RunItem>>), ApiError> {
    let Some(spec) = state.registry.get("wildberries", &job_code) else {
        return Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("job '{job_code}' not found"),
        ));
    };
    if !spec.supports_manual {
        return Err(ApiError::new(
            req_id.0,
            "unsupported_job",
            format!("job '{job_code}' does not support manual runs"),
        ));
    }

    let params = body.and_then(|Json(b)| b.params);
    if let Err(message) = validate_manual_params(&job_code, params.as_ref()) {
        return Err(ApiError::new(req_id.0, "validation_error", message));
    }

    // Link to an existing schedule when one exists, for auditability.
    let schedule_id = wbops_db::list_schedules(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .into_iter()
        .find(|s| s.job_code == job_code)
        .map(|s| s.id);

    let outcome = wbops_ingest::create_queued(
        &state.pool,
        &state.registry,
        &state.config,
        project_id,
        "wildberries",
        &job_code,
        schedule_id,
        TriggeredBy::Manual,
        params,
        "manual",
    )
    .await
    .map_err(|e| map_ingest_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: RunItem::from(outcome.run),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wb_finances_params_are_validated() {
        assert!(validate_manual_params("wb_finances", None).is_err());
        assert!(validate_manual_params("wb_finances", Some(&json!({}))).is_err());
        assert!(validate_manual_params(
            "wb_finances",
            Some(&json!({"date_from": "2024-01-01", "date_to": "bad"}))
        )
        .is_err());
        assert!(validate_manual_params(
            "wb_finances",
            Some(&json!({"date_from": "2024-01-01", "date_to": "2024-01-31"}))
        )
        .is_ok());
    }

    #[test]
    fn unparameterized_jobs_accept_missing_params() {
        assert!(validate_manual_params("products", None).is_ok());
        assert!(validate_manual_params("frontend_prices", Some(&json!({"brand_id": 5}))).is_ok());
    }

    #[test]
    fn run_item_serializes_reason_fields() {
        let item = RunItem {
            id: 1,
            schedule_id: None,
            project_id: 7,
            source_code: "wildberries".to_owned(),
            job_code: "products".to_owned(),
            triggered_by: "manual".to_owned(),
            status: "failed".to_owned(),
            params: None,
            stats: Some(json!({"ok": false, "reason": "no_credentials"})),
            error_message: Some("wildberries connection is not configured".to_owned()),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            heartbeat_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&item).expect("serialize run item");
        assert!(json.contains("\"reason\":\"no_credentials\""));
        assert!(json.contains("\"status\":\"failed\""));
    }
}
