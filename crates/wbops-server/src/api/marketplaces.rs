//! Marketplace connection settings. Tokens are write-only: reads mask to the
//! last four characters, and a PUT without a token keeps the stored one.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wbops_core::mask_token;
use wbops_db::{ConnectionRow, ConnectionUpdate};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct ConnectionItem {
    marketplace_code: String,
    is_enabled: bool,
    has_token: bool,
    token_masked: Option<String>,
    settings: Value,
}

impl ConnectionItem {
    fn from_row(row: ConnectionRow) -> Self {
        let token_masked = row
            .api_token_encrypted
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(mask_token);
        Self {
            marketplace_code: row.marketplace_code,
            is_enabled: row.is_enabled,
            has_token: token_masked.is_some(),
            token_masked,
            settings: row.settings,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ConnectionBody {
    is_enabled: Option<bool>,
    /// Plaintext token; sealed before it reaches the row. Omitting it keeps
    /// the stored token.
    api_token: Option<String>,
    settings: Option<Value>,
}

pub(super) async fn list_connections(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ConnectionItem>>>, ApiError> {
    let rows = wbops_db::list_connections(&state.pool, project_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse {
        data: rows.into_iter().map(ConnectionItem::from_row).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn get_connection(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((project_id, marketplace_code)): Path<(i64, String)>,
) -> Result<Json<ApiResponse<ConnectionItem>>, ApiError> {
    let row = wbops_db::get_connection(&state.pool, project_id, &marketplace_code)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(req_id.0.clone(), "not_found", "connection not configured")
        })?;
    Ok(Json(ApiResponse {
        data: ConnectionItem::from_row(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn put_connection(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((project_id, marketplace_code)): Path<(i64, String)>,
    Json(body): Json<ConnectionBody>,
) -> Result<Json<ApiResponse<ConnectionItem>>, ApiError> {
    let sealed = match body.api_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Some(state.cipher.encrypt(token).map_err(|e| {
            tracing::error!(error = %e, "token encryption failed");
            ApiError::new(req_id.0.clone(), "internal_error", "token storage failed")
        })?),
        None => None,
    };

    let row = wbops_db::upsert_connection(
        &state.pool,
        project_id,
        &marketplace_code,
        &ConnectionUpdate {
            is_enabled: body.is_enabled,
            api_token_encrypted: sealed,
            settings: body.settings,
        },
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: ConnectionItem::from_row(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn connection_item_never_exposes_the_raw_token() {
        let row = ConnectionRow {
            id: 1,
            project_id: 1,
            marketplace_code: "wildberries".to_owned(),
            is_enabled: true,
            api_token_encrypted: Some("eyJhbGciOiJFUzI1NiJ9.secret-token".to_owned()),
            settings: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let item = ConnectionItem::from_row(row);
        assert!(item.has_token);
        let json = serde_json::to_string(&item).expect("serialize");
        assert!(!json.contains("secret-token"));
        assert!(json.contains("••••"));
    }
}
