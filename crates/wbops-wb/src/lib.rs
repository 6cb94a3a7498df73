//! Authenticated Wildberries seller API client: Content cards pagination,
//! Statistics supplier stocks and finance lines, Marketplace warehouses, and
//! Common tariffs.

mod client;
mod error;
mod pacing;
mod retry;
mod types;

pub use client::{WbClient, WbClientOptions};
pub use error::WbApiError;
pub use pacing::Pacer;
pub use types::{
    card_barcodes, card_brand, card_nm_id, card_subject_name, card_title, card_vendor_code,
    format_date_from, parse_rfc3339_lenient, CardsCursor, CardsPage, SupplierStock,
};
