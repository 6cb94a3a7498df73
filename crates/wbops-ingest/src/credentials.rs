//! Credential resolution for marketplace runners.
//!
//! Token values never leave this module except as the returned plaintext for
//! client construction. They are never logged and never written into stats,
//! meta, or error fields.

use sqlx::PgPool;
use wbops_core::{AppConfig, TokenCipher};

use crate::error::IngestError;

/// Resolution result, distinguishing "never configured" from "configured but
/// disabled".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCredentials {
    Resolved(String),
    NotConfigured,
    Disabled,
}

/// Resolves the Wildberries token for a project.
///
/// The operator-wide env fallback applies only when no connection row exists
/// at all; a row that is disabled or tokenless is authoritative.
///
/// # Errors
///
/// Returns [`IngestError::Db`] on query failure or [`IngestError::Secret`]
/// when the stored token cannot be decrypted.
pub async fn resolve_wb_token(
    pool: &PgPool,
    cipher: &dyn TokenCipher,
    config: &AppConfig,
    project_id: i64,
) -> Result<ResolvedCredentials, IngestError> {
    let connection = wbops_db::get_connection(pool, project_id, "wildberries").await?;

    let Some(connection) = connection else {
        return Ok(match &config.wb_token_fallback {
            Some(token) if !token.is_empty() => ResolvedCredentials::Resolved(token.clone()),
            _ => ResolvedCredentials::NotConfigured,
        });
    };

    if !connection.is_enabled {
        return Ok(ResolvedCredentials::Disabled);
    }
    match connection.api_token_encrypted.as_deref() {
        Some(sealed) if !sealed.is_empty() => {
            Ok(ResolvedCredentials::Resolved(cipher.decrypt(sealed)?))
        }
        _ => Ok(ResolvedCredentials::NotConfigured),
    }
}
