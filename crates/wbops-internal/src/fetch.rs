//! Source acquisition: URL probing (kept cheap for the settings UI), bounded
//! downloads for sync, and upload storage keys.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::error::InternalDataError;

/// Outcome of a reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub ok: bool,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub final_url: String,
}

/// # Errors
///
/// Returns [`InternalDataError::Http`] if the client cannot be constructed.
pub fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client, InternalDataError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

/// Probes a source URL without downloading the body: HEAD first, falling
/// back to a ranged GET of the first KB for servers that reject HEAD.
///
/// # Errors
///
/// Returns [`InternalDataError::Http`] on transport failure.
pub async fn probe_url(client: &Client, url: &str) -> Result<ProbeResult, InternalDataError> {
    let head = client.head(url).send().await;
    let response = match head {
        Ok(response) if response.status() != reqwest::StatusCode::METHOD_NOT_ALLOWED => response,
        _ => {
            client
                .get(url)
                .header(reqwest::header::RANGE, "bytes=0-1023")
                .send()
                .await?
        }
    };

    let status = response.status();
    Ok(ProbeResult {
        ok: status.is_success(),
        http_status: Some(status.as_u16()),
        content_type: response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        content_length: response.content_length(),
        final_url: response.url().to_string(),
    })
}

/// Downloads a source file, refusing anything over `max_bytes`.
///
/// # Errors
///
/// - [`InternalDataError::SourceStatus`] — non-2xx from the source.
/// - [`InternalDataError::DownloadTooLarge`] — advertised or actual size over
///   the limit.
/// - [`InternalDataError::Http`] on transport failure.
pub async fn download_url(
    client: &Client,
    url: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, InternalDataError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(InternalDataError::SourceStatus {
            status: status.as_u16(),
        });
    }
    if let Some(length) = response.content_length() {
        if length > max_bytes {
            return Err(InternalDataError::DownloadTooLarge {
                limit_bytes: max_bytes,
            });
        }
    }
    let bytes = response.bytes().await?;
    if bytes.len() as u64 > max_bytes {
        return Err(InternalDataError::DownloadTooLarge {
            limit_bytes: max_bytes,
        });
    }
    Ok(bytes.to_vec())
}

/// Storage key for an uploaded source file:
/// `project_<id>/internal_<UTC timestamp>.<ext>`.
#[must_use]
pub fn upload_storage_key(project_id: i64, extension: &str, at: DateTime<Utc>) -> String {
    format!(
        "project_{project_id}/internal_{}.{}",
        at.format("%Y%m%dT%H%M%SZ"),
        extension.to_ascii_lowercase()
    )
}

/// Resolves a storage key under the data directory, rejecting path escapes.
///
/// # Errors
///
/// Returns [`InternalDataError::SourceNotConfigured`] for keys that try to
/// leave the directory.
pub fn resolve_storage_path(data_dir: &Path, key: &str) -> Result<PathBuf, InternalDataError> {
    if key.split('/').any(|segment| segment == "..") || key.starts_with('/') {
        return Err(InternalDataError::SourceNotConfigured);
    }
    Ok(data_dir.join(key))
}

/// Reads an uploaded source file.
///
/// # Errors
///
/// Returns [`InternalDataError::Io`] when the file is missing or unreadable.
pub async fn read_upload(data_dir: &Path, key: &str) -> Result<Vec<u8>, InternalDataError> {
    let path = resolve_storage_path(data_dir, key)?;
    Ok(tokio::fs::read(path).await?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn storage_key_embeds_project_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 47, 31).unwrap();
        assert_eq!(
            upload_storage_key(42, "XLSX", at),
            "project_42/internal_20240501T134731Z.xlsx"
        );
    }

    #[test]
    fn storage_paths_cannot_escape_the_data_dir() {
        let dir = Path::new("/var/data");
        assert!(resolve_storage_path(dir, "project_1/internal_x.csv").is_ok());
        assert!(resolve_storage_path(dir, "../etc/passwd").is_err());
        assert!(resolve_storage_path(dir, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn download_rejects_oversized_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalog.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let client = build_client(5, "wbops-test").expect("client");
        let url = format!("{}/catalog.csv", server.uri());

        let ok = download_url(&client, &url, 4096).await.expect("download");
        assert_eq!(ok.len(), 2048);

        let too_big = download_url(&client, &url, 1024).await;
        assert!(matches!(too_big, Err(InternalDataError::DownloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn probe_reports_status_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/xml"))
            .mount(&server)
            .await;

        let client = build_client(5, "wbops-test").expect("client");
        let probe = probe_url(&client, &format!("{}/feed.xml", server.uri()))
            .await
            .expect("probe");
        assert!(probe.ok);
        assert_eq!(probe.http_status, Some(200));
        assert_eq!(probe.content_type.as_deref(), Some("text/xml"));
    }
}
