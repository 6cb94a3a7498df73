//! HTTP client for the public storefront catalog.
//!
//! No auth. A brand's feed URL is a tenant-configured template containing a
//! `{brand_id}` placeholder and a `page` query parameter. 429s are surfaced
//! as typed errors so the runner can apply its heartbeat-aware backoff; the
//! client itself never sleeps.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::StorefrontError;

pub struct CatalogClient {
    client: Client,
}

impl CatalogClient {
    /// # Errors
    ///
    /// Returns [`StorefrontError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, StorefrontError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Expands the template for a brand and page.
    ///
    /// `{brand_id}` is substituted verbatim; the `page` query parameter is
    /// replaced when present and appended otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::InvalidUrlTemplate`] when the template does
    /// not contain `{brand_id}` or does not parse as a URL after expansion.
    pub fn brand_page_url(
        template: &str,
        brand_id: i64,
        page: u32,
    ) -> Result<String, StorefrontError> {
        if !template.contains("{brand_id}") {
            return Err(StorefrontError::InvalidUrlTemplate {
                template: template.to_owned(),
                reason: "missing {brand_id} placeholder".to_owned(),
            });
        }
        let expanded = template.replace("{brand_id}", &brand_id.to_string());
        let mut url =
            reqwest::Url::parse(&expanded).map_err(|e| StorefrontError::InvalidUrlTemplate {
                template: template.to_owned(),
                reason: e.to_string(),
            })?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| name != "page")
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("page", &page.to_string());

        Ok(url.to_string())
    }

    /// Fetches one catalog page for a brand.
    ///
    /// # Errors
    ///
    /// - [`StorefrontError::RateLimited`] — 429 (never retried here).
    /// - [`StorefrontError::UnexpectedStatus`] — other non-2xx.
    /// - [`StorefrontError::Http`] / [`StorefrontError::Deserialize`] on
    ///   transport or body failures.
    pub async fn fetch_brand_page(
        &self,
        template: &str,
        brand_id: i64,
        page: u32,
    ) -> Result<Value, StorefrontError> {
        let url = Self::brand_page_url(template, brand_id, page)?;
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(StorefrontError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(StorefrontError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| StorefrontError::Deserialize {
            context: format!("brand {brand_id} page {page}"),
            source: e,
        })
    }
}
