//! HTTP client for the Wildberries seller APIs (Content, Marketplace,
//! Statistics, Common), authenticated with the tenant's Bearer token.
//!
//! Every request goes through [`retry_with_backoff`]; the Content family is
//! additionally paced so cursor pagination never undercuts the documented
//! minimum interval. Long between-page waits (the Statistics 1-req/min limit)
//! are the runner's responsibility — they must be heartbeat-chunked.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::WbApiError;
use crate::pacing::Pacer;
use crate::retry::retry_with_backoff;
use crate::types::{CardsCursor, CardsPage};

const CONTENT_BASE: &str = "https://content-api.wildberries.ru";
const MARKETPLACE_BASE: &str = "https://marketplace-api.wildberries.ru";
const STATISTICS_BASE: &str = "https://statistics-api.wildberries.ru";
const COMMON_BASE: &str = "https://common-api.wildberries.ru";
const DISCOUNTS_BASE: &str = "https://discounts-prices-api.wildberries.ru";

#[derive(Debug, Clone)]
pub struct WbClientOptions {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Minimum interval between Content API requests.
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
}

impl Default for WbClientOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "wbops/0.1 (marketplace-ingest)".to_owned(),
            min_interval_ms: 300,
            max_retries: 3,
            backoff_base_secs: 2,
        }
    }
}

/// Client for the authenticated Wildberries seller APIs.
pub struct WbClient {
    client: Client,
    token: String,
    content_base: String,
    marketplace_base: String,
    statistics_base: String,
    common_base: String,
    discounts_base: String,
    content_pacer: Pacer,
    max_retries: u32,
    backoff_base_secs: u64,
}

impl WbClient {
    /// Creates a client pointed at the production API hosts.
    ///
    /// # Errors
    ///
    /// Returns [`WbApiError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(token: &str, options: &WbClientOptions) -> Result<Self, WbApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(options.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            token: token.to_owned(),
            content_base: CONTENT_BASE.to_owned(),
            marketplace_base: MARKETPLACE_BASE.to_owned(),
            statistics_base: STATISTICS_BASE.to_owned(),
            common_base: COMMON_BASE.to_owned(),
            discounts_base: DISCOUNTS_BASE.to_owned(),
            content_pacer: Pacer::new(Duration::from_millis(options.min_interval_ms)),
            max_retries: options.max_retries,
            backoff_base_secs: options.backoff_base_secs,
        })
    }

    /// Points every API family at one base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_owned();
        self.content_base.clone_from(&base);
        self.marketplace_base.clone_from(&base);
        self.statistics_base.clone_from(&base);
        self.discounts_base.clone_from(&base);
        self.common_base = base;
        self
    }

    // -----------------------------------------------------------------------
    // Content: cards listing (cursor pagination)
    // -----------------------------------------------------------------------

    /// Fetches one page of the Content v2 cards listing.
    ///
    /// The next cursor is present only while WB keeps returning both
    /// `cursor.updatedAt` and `cursor.nmID` alongside a non-empty page.
    ///
    /// # Errors
    ///
    /// - [`WbApiError::RateLimited`] — 429 after retries.
    /// - [`WbApiError::Unauthorized`] — 401/403 (not retried).
    /// - [`WbApiError::UnexpectedStatus`] / [`WbApiError::Http`] /
    ///   [`WbApiError::Deserialize`] on other failures.
    pub async fn fetch_cards_page(
        &self,
        cursor: Option<&CardsCursor>,
        limit: u32,
    ) -> Result<CardsPage, WbApiError> {
        self.content_pacer.pace().await;

        let url = format!("{}/content/v2/get/cards/list", self.content_base);
        let mut cursor_obj = json!({"limit": limit});
        if let Some(c) = cursor {
            cursor_obj["updatedAt"] = Value::String(c.updated_at.clone());
            cursor_obj["nmID"] = json!(c.nm_id);
        }
        let body = json!({"settings": {"cursor": cursor_obj, "filter": {"withPhoto": -1}}});

        let response = retry_with_backoff(self.max_retries, self.backoff_base_secs, || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .json(&body)
                    .send()
                    .await?;
                Self::check_status(response, "content/v2/get/cards/list").await
            }
        })
        .await?;

        let parsed: Value = serde_json::from_str(&response).map_err(|e| WbApiError::Deserialize {
            context: "cards list page".to_owned(),
            source: e,
        })?;

        let cards = parsed
            .get("cards")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let cursor_data = parsed.get("cursor");
        let total = cursor_data
            .and_then(|c| c.get("total"))
            .and_then(Value::as_i64);
        let next_cursor = if cards.is_empty() {
            None
        } else {
            cursor_data.and_then(|c| {
                let updated_at = c.get("updatedAt")?.as_str()?.to_owned();
                let nm_id = c.get("nmID")?.as_i64()?;
                Some(CardsCursor { updated_at, nm_id })
            })
        };

        Ok(CardsPage {
            cards,
            next_cursor,
            total,
        })
    }

    // -----------------------------------------------------------------------
    // Statistics: FBO supplier stocks, finance report lines
    // -----------------------------------------------------------------------

    /// Fetches one FBO supplier-stocks page. Hard limit upstream: 1 request
    /// per minute — the caller paces between pages.
    ///
    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_supplier_stocks(&self, date_from: &str) -> Result<Vec<Value>, WbApiError> {
        let url = format!(
            "{}/api/v1/supplier/stocks?dateFrom={date_from}",
            self.statistics_base
        );
        let body = self.get_with_retry(&url, "supplier/stocks").await?;
        let parsed: Value = serde_json::from_str(&body).map_err(|e| WbApiError::Deserialize {
            context: "supplier stocks page".to_owned(),
            source: e,
        })?;
        Ok(parsed.as_array().cloned().unwrap_or_default())
    }

    /// Fetches one page of finance report lines for a period, paginated by
    /// `rrdid`. Payloads are opaque; typed accessors extract fields later.
    ///
    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_finance_report_lines(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        rrd_id: i64,
        limit: u32,
    ) -> Result<Vec<Value>, WbApiError> {
        let url = format!(
            "{}/api/v5/supplier/reportDetailByPeriod?dateFrom={date_from}&dateTo={date_to}&rrdid={rrd_id}&limit={limit}",
            self.statistics_base
        );
        let body = self.get_with_retry(&url, "reportDetailByPeriod").await?;
        let parsed: Value = serde_json::from_str(&body).map_err(|e| WbApiError::Deserialize {
            context: "finance report lines".to_owned(),
            source: e,
        })?;
        Ok(parsed.as_array().cloned().unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Discounts: admin goods prices
    // -----------------------------------------------------------------------

    /// Fetches one offset page of the seller's goods price listing
    /// (`nmID`, `discount`, per-size prices).
    ///
    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_goods_prices(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>, WbApiError> {
        let url = format!(
            "{}/api/v2/list/goods/filter?limit={limit}&offset={offset}",
            self.discounts_base
        );
        let body = self.get_with_retry(&url, "list/goods/filter").await?;
        let parsed: Value = serde_json::from_str(&body).map_err(|e| WbApiError::Deserialize {
            context: "goods prices page".to_owned(),
            source: e,
        })?;
        let goods = parsed
            .get("data")
            .and_then(|d| d.get("listGoods"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(goods)
    }

    // -----------------------------------------------------------------------
    // Marketplace: offices, seller warehouses, FBS stocks
    // -----------------------------------------------------------------------

    /// Fetches FBS stock amounts for up to 1000 barcodes in one warehouse.
    /// Returns `(sku, amount)` pairs.
    ///
    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_fbs_stocks(
        &self,
        warehouse_id: i64,
        skus: &[String],
    ) -> Result<Vec<(String, i64)>, WbApiError> {
        let url = format!("{}/api/v3/stocks/{warehouse_id}", self.marketplace_base);
        let body = json!({"skus": skus});

        let response = retry_with_backoff(self.max_retries, self.backoff_base_secs, || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .json(&body)
                    .send()
                    .await?;
                Self::check_status(response, "stocks").await
            }
        })
        .await?;

        let parsed: Value = serde_json::from_str(&response).map_err(|e| WbApiError::Deserialize {
            context: format!("fbs stocks for warehouse {warehouse_id}"),
            source: e,
        })?;
        let pairs = parsed
            .get("stocks")
            .and_then(Value::as_array)
            .map(|stocks| {
                stocks
                    .iter()
                    .filter_map(|s| {
                        let sku = s.get("sku")?.as_str()?.to_owned();
                        let amount = s.get("amount")?.as_i64()?;
                        Some((sku, amount))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(pairs)
    }

    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_offices(&self) -> Result<Vec<Value>, WbApiError> {
        self.get_json_array(
            &format!("{}/api/v3/offices", self.marketplace_base),
            "offices",
        )
        .await
    }

    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_seller_warehouses(&self) -> Result<Vec<Value>, WbApiError> {
        self.get_json_array(
            &format!("{}/api/v3/warehouses", self.marketplace_base),
            "warehouses",
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Common: tariffs
    // -----------------------------------------------------------------------

    /// Fetches a tariff payload (`commission`, `box`, `pallet`, `return`),
    /// stored opaquely.
    ///
    /// # Errors
    ///
    /// See [`WbClient::fetch_cards_page`].
    pub async fn fetch_tariffs(&self, kind: &str, date: NaiveDate) -> Result<Value, WbApiError> {
        let url = format!("{}/api/v1/tariffs/{kind}?date={date}", self.common_base);
        let body = self.get_with_retry(&url, "tariffs").await?;
        serde_json::from_str(&body).map_err(|e| WbApiError::Deserialize {
            context: format!("tariffs/{kind}"),
            source: e,
        })
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    async fn get_json_array(&self, url: &str, endpoint: &str) -> Result<Vec<Value>, WbApiError> {
        let body = self.get_with_retry(url, endpoint).await?;
        let parsed: Value = serde_json::from_str(&body).map_err(|e| WbApiError::Deserialize {
            context: endpoint.to_owned(),
            source: e,
        })?;
        Ok(parsed.as_array().cloned().unwrap_or_default())
    }

    async fn get_with_retry(&self, url: &str, endpoint: &str) -> Result<String, WbApiError> {
        retry_with_backoff(self.max_retries, self.backoff_base_secs, || {
            let url = url.to_owned();
            let endpoint = endpoint.to_owned();
            async move {
                let response = self
                    .client
                    .get(&url)
                    .bearer_auth(&self.token)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .send()
                    .await?;
                Self::check_status(response, &endpoint).await
            }
        })
        .await
    }

    async fn check_status(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<String, WbApiError> {
        let status = response.status();
        let url = response.url().to_string();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(WbApiError::RateLimited {
                endpoint: endpoint.to_owned(),
                retry_after_secs,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WbApiError::Unauthorized {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WbApiError::NotFound { url });
        }
        if !status.is_success() {
            return Err(WbApiError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }
}
