//! Typed accessors over the dynamically shaped WB payloads.
//!
//! Card and stock payloads are stored verbatim in `jsonb` columns; only the
//! handful of fields the ingest core needs are extracted here, tolerating the
//! camelCase/snake_case aliases the API has shipped over time and numeric
//! values arriving as strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cursor for the Content v2 cards listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardsCursor {
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    #[serde(rename = "nmID")]
    pub nm_id: i64,
}

/// One page of the cards listing.
#[derive(Debug)]
pub struct CardsPage {
    pub cards: Vec<Value>,
    pub next_cursor: Option<CardsCursor>,
    /// Total card count, when the endpoint advertises it.
    pub total: Option<i64>,
}

fn first_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| value.get(*name))
}

fn as_i64_lenient(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn as_f64_lenient(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

/// nm_id of a card, under any of its historical spellings.
#[must_use]
pub fn card_nm_id(card: &Value) -> Option<i64> {
    first_field(card, &["nmID", "nm_id", "nmId", "id"]).and_then(as_i64_lenient)
}

#[must_use]
pub fn card_vendor_code(card: &Value) -> Option<String> {
    first_field(card, &["vendorCode", "vendor_code", "article"])
        .and_then(as_str)
        .map(str::to_owned)
}

#[must_use]
pub fn card_title(card: &Value) -> Option<String> {
    first_field(card, &["title", "name"])
        .and_then(as_str)
        .map(str::to_owned)
}

#[must_use]
pub fn card_brand(card: &Value) -> Option<String> {
    card.get("brand").and_then(as_str).map(str::to_owned)
}

#[must_use]
pub fn card_subject_name(card: &Value) -> Option<String> {
    first_field(card, &["subjectName", "subject_name", "subject"])
        .and_then(as_str)
        .map(str::to_owned)
}

/// Barcodes of a card, collected from `sizes[].skus[]`.
#[must_use]
pub fn card_barcodes(card: &Value) -> Vec<String> {
    card.get("sizes")
        .and_then(Value::as_array)
        .map(|sizes| {
            sizes
                .iter()
                .filter_map(|size| size.get("skus").and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// One FBO stock row extracted from the Statistics API payload.
#[derive(Debug, Clone)]
pub struct SupplierStock {
    pub last_change_date: DateTime<Utc>,
    pub warehouse_name: String,
    pub nm_id: i64,
    pub supplier_article: Option<String>,
    pub barcode: String,
    pub tech_size: Option<String>,
    pub quantity: i32,
    pub quantity_full: Option<i32>,
    pub in_way_to_client: Option<i32>,
    pub in_way_from_client: Option<i32>,
    pub price: Option<f64>,
    pub discount: Option<i32>,
}

impl SupplierStock {
    /// Extracts the typed fields; returns `None` when `nmId` or
    /// `lastChangeDate` is missing or unparseable — the row cannot key into
    /// the uniqueness constraint without them.
    #[must_use]
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let nm_id =
            first_field(raw, &["nmId", "nm_id", "nmID"]).and_then(as_i64_lenient)?;
        let last_change_date = first_field(raw, &["lastChangeDate", "last_change_date"])
            .and_then(as_str)
            .and_then(parse_rfc3339_lenient)?;
        let to_i32 = |names: &[&str]| {
            first_field(raw, names)
                .and_then(as_i64_lenient)
                .and_then(|v| i32::try_from(v).ok())
        };
        Some(Self {
            last_change_date,
            warehouse_name: first_field(raw, &["warehouseName", "warehouse_name"])
                .and_then(as_str)
                .unwrap_or_default()
                .to_owned(),
            nm_id,
            supplier_article: first_field(raw, &["supplierArticle", "supplier_article"])
                .and_then(as_str)
                .map(str::to_owned),
            barcode: raw
                .get("barcode")
                .and_then(as_str)
                .unwrap_or_default()
                .to_owned(),
            tech_size: first_field(raw, &["techSize", "tech_size"])
                .and_then(as_str)
                .map(str::to_owned),
            quantity: to_i32(&["quantity", "Quantity"]).unwrap_or(0),
            quantity_full: to_i32(&["quantityFull", "quantity_full"]),
            in_way_to_client: to_i32(&["inWayToClient", "in_way_to_client"]),
            in_way_from_client: to_i32(&["inWayFromClient", "in_way_from_client"]),
            price: first_field(raw, &["Price", "price"]).and_then(as_f64_lenient),
            discount: to_i32(&["Discount", "discount"]),
        })
    }
}

/// Parses the RFC3339-ish timestamps the Statistics API emits: with offset,
/// with `Z`, or naive (treated as UTC).
#[must_use]
pub fn parse_rfc3339_lenient(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp the way the `dateFrom` query parameter expects.
#[must_use]
pub fn format_date_from(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn card_accessors_tolerate_alias_spellings() {
        let card = json!({"nmID": 123, "vendorCode": "SKU-1", "title": "Shirt", "subjectName": "Shirts"});
        assert_eq!(card_nm_id(&card), Some(123));
        assert_eq!(card_vendor_code(&card).as_deref(), Some("SKU-1"));
        assert_eq!(card_title(&card).as_deref(), Some("Shirt"));
        assert_eq!(card_subject_name(&card).as_deref(), Some("Shirts"));

        let legacy = json!({"nm_id": "456", "article": "SKU-2", "name": "Pants", "subject": "Pants"});
        assert_eq!(card_nm_id(&legacy), Some(456));
        assert_eq!(card_vendor_code(&legacy).as_deref(), Some("SKU-2"));
        assert_eq!(card_title(&legacy).as_deref(), Some("Pants"));
    }

    #[test]
    fn card_without_any_id_yields_none() {
        assert_eq!(card_nm_id(&json!({"vendorCode": "X"})), None);
    }

    #[test]
    fn supplier_stock_requires_nm_id_and_change_date() {
        let full = json!({
            "lastChangeDate": "2024-05-01T10:00:00Z",
            "warehouseName": "Koledino",
            "nmId": 77,
            "barcode": "460001",
            "quantity": 4,
            "quantityFull": 6,
            "Price": "1290.5",
            "Discount": 15
        });
        let stock = SupplierStock::from_raw(&full).expect("parses");
        assert_eq!(stock.nm_id, 77);
        assert_eq!(stock.quantity, 4);
        assert_eq!(stock.quantity_full, Some(6));
        assert!((stock.price.expect("price") - 1290.5).abs() < f64::EPSILON);
        assert_eq!(stock.discount, Some(15));

        assert!(SupplierStock::from_raw(&json!({"nmId": 1})).is_none());
        assert!(SupplierStock::from_raw(&json!({"lastChangeDate": "2024-05-01T10:00:00Z"})).is_none());
    }

    #[test]
    fn lenient_timestamp_parsing_accepts_offset_z_and_naive() {
        assert!(parse_rfc3339_lenient("2024-05-01T10:00:00+03:00").is_some());
        assert!(parse_rfc3339_lenient("2024-05-01T10:00:00Z").is_some());
        assert!(parse_rfc3339_lenient("2024-05-01T10:00:00").is_some());
        assert!(parse_rfc3339_lenient("not a date").is_none());
    }
}
