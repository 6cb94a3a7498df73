//! Internal category tree endpoints. Re-parenting is rejected when it would
//! close a cycle; deletion re-roots children and detaches products.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use wbops_db::CategoryRow;

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct CategoryItem {
    id: i64,
    parent_id: Option<i64>,
    key: String,
    title: String,
}

impl From<CategoryRow> for CategoryItem {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            parent_id: row.parent_id,
            key: row.key,
            title: row.title,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CategoryCreateBody {
    parent_id: Option<i64>,
    key: String,
    title: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CategoryUpdateBody {
    title: Option<String>,
    /// Present-and-null re-roots the category.
    #[serde(default, with = "double_option")]
    parent_id: Option<Option<i64>>,
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(deserializer).map(Some)
    }
}

pub(super) async fn list_categories(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<CategoryItem>>>, ApiError> {
    let rows = wbops_db::list_categories(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse {
        data: rows.into_iter().map(CategoryItem::from).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn create_category(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
    Json(body): Json<CategoryCreateBody>,
) -> Result<(StatusCode, Json<ApiResponse<CategoryItem>>), ApiError> {
    if body.key.trim().is_empty() || body.title.trim().is_empty() {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "key and title are required",
        ));
    }
    let row = wbops_db::create_category(
        &state.pool,
        project_id,
        body.parent_id,
        body.key.trim(),
        body.title.trim(),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: CategoryItem::from(row),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn update_category(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((project_id, category_id)): Path<(i64, i64)>,
    Json(body): Json<CategoryUpdateBody>,
) -> Result<Json<ApiResponse<CategoryItem>>, ApiError> {
    let row = wbops_db::update_category(
        &state.pool,
        project_id,
        category_id,
        body.title.as_deref(),
        body.parent_id,
    )
    .await
    .map_err(|e| match &e {
        wbops_db::DbError::CategoryCycle { .. } => {
            ApiError::new(req_id.0.clone(), "validation_error", e.to_string())
        }
        _ => map_db_error(req_id.0.clone(), &e),
    })?;

    Ok(Json(ApiResponse {
        data: CategoryItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn delete_category(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((project_id, category_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    wbops_db::delete_category(&state.pool, project_id, category_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse {
        data: serde_json::json!({"ok": true}),
        meta: ResponseMeta::new(req_id.0),
    }))
}
