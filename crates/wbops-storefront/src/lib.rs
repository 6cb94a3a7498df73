//! Public storefront catalog client: brand URL template expansion, page
//! walking helpers, response shape sniffing, and rate-limit backoff math.

mod backoff;
mod client;
mod error;
mod extract;

pub use backoff::{compute_retry_sleep_seconds, hour_bucket_utc};
pub use client::CatalogClient;
pub use error::StorefrontError;
pub use extract::{extract_expected_total, extract_products, extract_total_pages, ProductQuote};
