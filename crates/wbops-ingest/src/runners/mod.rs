//! One runner per registered (source, job). Each is a function of the run
//! context returning a [`JobOutcome`](crate::registry::JobOutcome); the
//! well-known failure reasons are classified here, never raised through the
//! orchestrator.

pub mod frontend_prices;
pub mod prices;
pub mod products;
pub mod rrp;
pub mod stocks;
pub mod supplier_stocks;
pub mod tax;
pub mod warehouses;
pub mod wb_finances;

use wbops_core::AppConfig;
use wbops_wb::{WbClient, WbClientOptions};

use crate::error::IngestError;

/// Builds a seller API client from the app config and a resolved token.
pub(crate) fn wb_client_for(config: &AppConfig, token: &str) -> Result<WbClient, IngestError> {
    let options = WbClientOptions {
        timeout_secs: config.http_timeout_secs,
        user_agent: config.http_user_agent.clone(),
        min_interval_ms: config.wb_min_interval_ms,
        max_retries: config.wb_max_retries,
        backoff_base_secs: config.wb_backoff_base_secs,
    };
    Ok(WbClient::new(token, &options)?)
}
