mod categories;
mod ingest;
mod internal_data;
mod marketplaces;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use wbops_core::{AppConfig, TokenCipher};
use wbops_ingest::{IngestError, JobRegistry};

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub registry: Arc<JobRegistry>,
    pub cipher: Arc<dyn TokenCipher>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" => StatusCode::BAD_REQUEST,
            "validation_error" | "unsupported_job" => StatusCode::UNPROCESSABLE_ENTITY,
            "lock_not_acquired" | "active_run_exists" | "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(100).clamp(1, 500)
}

pub(super) fn map_db_error(request_id: String, error: &wbops_db::DbError) -> ApiError {
    match error {
        wbops_db::DbError::NotFound => ApiError::new(request_id, "not_found", "record not found"),
        other => {
            tracing::error!(error = %other, "database query failed");
            ApiError::new(request_id, "internal_error", "database query failed")
        }
    }
}

/// Maps orchestration errors onto the HTTP contract: 409 for exclusion,
/// 404/422 for job problems, 400 for bad input.
pub(super) fn map_ingest_error(request_id: String, error: &IngestError) -> ApiError {
    match error {
        IngestError::LockNotAcquired => {
            ApiError::new(request_id, "lock_not_acquired", "lock_not_acquired")
        }
        IngestError::ActiveRunExists { run_id } => ApiError::new(
            request_id,
            "active_run_exists",
            format!("run {run_id} is already queued or running"),
        ),
        IngestError::JobNotFound {
            source_code,
            job_code,
        } => ApiError::new(
            request_id,
            "not_found",
            format!("job '{source_code}/{job_code}' not found"),
        ),
        IngestError::InvalidParams(message) => {
            ApiError::new(request_id, "validation_error", message.clone())
        }
        IngestError::Db(db) => map_db_error(request_id, db),
        other => {
            tracing::error!(error = %other, "ingest operation failed");
            ApiError::new(request_id, "internal_error", "ingest operation failed")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/projects/{project_id}/ingest/schedules",
            get(ingest::list_schedules).post(ingest::create_schedule),
        )
        .route(
            "/api/v1/ingest/schedules/{schedule_id}",
            put(ingest::update_schedule).delete(ingest::delete_schedule),
        )
        .route(
            "/api/v1/ingest/schedules/{schedule_id}/run",
            post(ingest::run_schedule_now),
        )
        .route(
            "/api/v1/projects/{project_id}/ingest/runs",
            get(ingest::list_runs),
        )
        .route("/api/v1/ingest/runs/{run_id}", get(ingest::get_run))
        .route(
            "/api/v1/projects/{project_id}/ingest/runs/{run_id}/mark-timeout",
            post(ingest::mark_run_timeout),
        )
        .route("/api/v1/ingest/jobs", get(ingest::list_jobs))
        .route(
            "/api/v1/projects/{project_id}/ingestions/wb/status",
            get(ingest::wb_status),
        )
        .route(
            "/api/v1/projects/{project_id}/ingestions/wb/{job_code}/run",
            post(ingest::run_wb_job_manual),
        )
        .route(
            "/api/v1/projects/{project_id}/internal-data/settings",
            get(internal_data::get_settings).put(internal_data::put_settings),
        )
        .route(
            "/api/v1/projects/{project_id}/internal-data/test",
            post(internal_data::test_source),
        )
        .route(
            "/api/v1/projects/{project_id}/internal-data/sync",
            post(internal_data::sync_source),
        )
        .route(
            "/api/v1/projects/{project_id}/marketplaces",
            get(marketplaces::list_connections),
        )
        .route(
            "/api/v1/projects/{project_id}/marketplaces/{marketplace_code}",
            get(marketplaces::get_connection).put(marketplaces::put_connection),
        )
        .route(
            "/api/v1/projects/{project_id}/categories",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/api/v1/projects/{project_id}/categories/{category_id}",
            axum::routing::patch(categories::update_category).delete(categories::delete_category),
        )
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);

    match wbops_db::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    meta,
                }),
            )
        }
    }
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(120, Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use wbops_core::{Environment, PassthroughCipher};

    use super::*;

    #[test]
    fn normalize_limit_applies_defaults_and_bounds() {
        assert_eq!(normalize_limit(None), 100);
        assert_eq!(normalize_limit(Some(0)), 1);
        assert_eq!(normalize_limit(Some(10_000)), 500);
        assert_eq!(normalize_limit(Some(25)), 25);
    }

    #[test]
    fn exclusion_errors_map_to_conflict() {
        let response = ApiError::new("req-1", "active_run_exists", "busy").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = ApiError::new("req-1", "lock_not_acquired", "busy").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn job_errors_map_to_unprocessable() {
        let response = ApiError::new("req-1", "unsupported_job", "no manual").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let response = ApiError::new("req-1", "validation_error", "bad dates").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // -----------------------------------------------------------------------
    // Route integration tests (with DB)
    // -----------------------------------------------------------------------

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: String::new(),
            env: Environment::Test,
            bind_addr: "127.0.0.1:0".parse().expect("addr"),
            log_level: "info".to_owned(),
            api_bearer_token: None,
            wb_token_fallback: None,
            db_max_connections: 5,
            db_min_connections: 1,
            db_acquire_timeout_secs: 5,
            http_timeout_secs: 5,
            http_user_agent: "wbops-test".to_owned(),
            wb_min_interval_ms: 0,
            wb_max_retries: 0,
            wb_backoff_base_secs: 0,
            wb_page_size: 100,
            storefront_page_size: 100,
            storefront_sleep_base_ms: 0,
            storefront_sleep_jitter_ms: 0,
            storefront_max_total_retry_wait_secs: 600,
            storefront_max_runtime_secs: 3600,
            storefront_rate_limit_backoff_mins: 30,
            scheduler_tick_secs: 30,
            sweeper_interval_secs: 300,
            stuck_ttl_secs: 1200,
            worker_max_concurrent_runs: 2,
            worker_poll_interval_secs: 1,
            internal_data_dir: "/tmp/wbops-test".into(),
            internal_download_max_bytes: 1024 * 1024,
        }
    }

    fn test_app(pool: PgPool) -> Router {
        let state = AppState {
            pool,
            config: Arc::new(test_config()),
            registry: Arc::new(JobRegistry::new()),
            cipher: Arc::new(PassthroughCipher),
        };
        build_app(state, AuthState::new(None), default_rate_limit_state())
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn manual_trigger_queues_then_conflicts(pool: PgPool) {
        let (status, body) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingestions/wb/products/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "body: {body}");
        assert_eq!(body["data"]["status"], "queued");
        assert_eq!(body["data"]["triggered_by"], "manual");

        // Second trigger while the first is active: 409 active_run_exists,
        // and the run list is unchanged.
        let (status, body) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingestions/wb/products/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT, "body: {body}");
        assert_eq!(body["error"]["code"], "active_run_exists");

        let (status, body) = get_json(test_app(pool), "/api/v1/projects/1/ingest/runs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().expect("runs").len(), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn stuck_active_run_is_replaced_on_manual_trigger(pool: PgPool) {
        let (status, body) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingestions/wb/products/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let first_id = body["data"]["id"].as_i64().expect("id");
        wbops_db::start_running(&pool, first_id).await.expect("start");

        // 40 minutes of silence against the 1200 s TTL.
        sqlx::query(
            "UPDATE ingest_runs \
             SET created_at = NOW() - INTERVAL '40 minutes', \
                 updated_at = NOW() - INTERVAL '40 minutes', \
                 started_at = NOW() - INTERVAL '40 minutes', \
                 heartbeat_at = NOW() - INTERVAL '40 minutes' \
             WHERE id = $1",
        )
        .bind(first_id)
        .execute(&pool)
        .await
        .expect("backdate");

        let (status, body) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingestions/wb/products/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "body: {body}");
        assert_eq!(body["data"]["status"], "queued");

        let old = wbops_db::get_run(&pool, first_id).await.expect("old run");
        assert_eq!(old.status, "timeout");
        assert_eq!(
            old.meta.expect("meta")["system_action"]["reason_code"],
            "manual_stuck"
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn wb_finances_requires_period_params(pool: PgPool) {
        let (status, body) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingestions/wb/wb_finances/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {body}");

        let (status, _) = post_json(
            test_app(pool),
            "/api/v1/projects/1/ingestions/wb/wb_finances/run",
            serde_json::json!({"params": {"date_from": "2024-01-01", "date_to": "2024-01-31"}}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn unknown_wb_job_is_404(pool: PgPool) {
        let (status, _) = post_json(
            test_app(pool),
            "/api/v1/projects/1/ingestions/wb/teleport/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn mark_timeout_requires_an_active_run(pool: PgPool) {
        let (status, body) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingestions/wb/products/run",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let run_id = body["data"]["id"].as_i64().expect("id");

        let uri = format!("/api/v1/projects/1/ingest/runs/{run_id}/mark-timeout");
        let (status, body) = post_json(
            test_app(pool.clone()),
            &uri,
            serde_json::json!({"reason_code": "manual", "reason_text": "operator action"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["data"]["status"], "timeout");

        // Terminal runs refuse the transition.
        let (status, _) = post_json(
            test_app(pool),
            &uri,
            serde_json::json!({"reason_code": "manual"}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn schedule_create_validates_cron_and_job(pool: PgPool) {
        // wb_finances cannot be scheduled.
        let (status, _) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingest/schedules",
            serde_json::json!({"job_code": "wb_finances", "cron_expr": "0 * * * *"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        // Bad cron is rejected at write time.
        let (status, _) = post_json(
            test_app(pool.clone()),
            "/api/v1/projects/1/ingest/schedules",
            serde_json::json!({"job_code": "products", "cron_expr": "not cron"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = post_json(
            test_app(pool),
            "/api/v1/projects/1/ingest/schedules",
            serde_json::json!({
                "job_code": "products",
                "cron_expr": "0 3 * * *",
                "timezone": "Europe/Moscow"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "body: {body}");
        assert_eq!(body["data"]["source_code"], "wildberries");
        assert!(body["data"]["next_run_at"].is_string());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn jobs_catalog_lists_all_jobs(pool: PgPool) {
        let (status, body) = get_json(test_app(pool), "/api/v1/ingest/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body["data"].as_array().expect("jobs");
        assert_eq!(jobs.len(), 10);
        assert!(jobs.iter().any(|j| j["job_code"] == "build_rrp_snapshots"));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn bearer_auth_guards_protected_routes(pool: PgPool) {
        let state = AppState {
            pool,
            config: Arc::new(test_config()),
            registry: Arc::new(JobRegistry::new()),
            cipher: Arc::new(PassthroughCipher),
        };
        let app = build_app(
            state,
            AuthState::new(Some("sekrit".to_owned())),
            default_rate_limit_state(),
        );

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ingest/jobs")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ingest/jobs")
                    .header("authorization", "Bearer sekrit")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays public.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
