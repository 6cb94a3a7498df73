//! Shape sniffing over the storefront catalog responses.
//!
//! The catalog has shipped its products array under several shapes over time.
//! Extraction tries a fixed priority list; the first hit wins:
//!
//! 1. `products`
//! 2. `data.products` (also the nested `data.products.products`)
//! 3. `data.catalog.products`
//! 4. `data.list`
//! 5. `data.listGoods`
//! 6. `catalog.products`
//! 7. `listGoods`
//! 8. a bare array at the root

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

/// Extracts the products array from a catalog response.
#[must_use]
pub fn extract_products(data: &Value) -> Vec<Value> {
    if let Value::Array(items) = data {
        return items.clone();
    }

    if let Some(products) = data.get("products") {
        if let Some(list) = products.as_array() {
            return list.clone();
        }
    }
    if let Some(inner) = data.get("data") {
        if let Some(products) = inner.get("products") {
            if let Some(list) = products.as_array() {
                return list.clone();
            }
            // Nested: data.products.products
            if let Some(list) = products.get("products").and_then(Value::as_array) {
                return list.clone();
            }
        }
        if let Some(list) = inner
            .get("catalog")
            .and_then(|c| c.get("products"))
            .and_then(Value::as_array)
        {
            return list.clone();
        }
        if let Some(list) = inner.get("list").and_then(Value::as_array) {
            return list.clone();
        }
        if let Some(list) = inner.get("listGoods").and_then(Value::as_array) {
            return list.clone();
        }
    }
    if let Some(list) = data
        .get("catalog")
        .and_then(|c| c.get("products"))
        .and_then(Value::as_array)
    {
        return list.clone();
    }
    if let Some(list) = data.get("listGoods").and_then(Value::as_array) {
        return list.clone();
    }

    Vec::new()
}

fn positive_int(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    #[allow(clippy::cast_possible_truncation)]
    let n = n as i64;
    (n > 0).then_some(n)
}

fn pages_from_total(total: i64, page_size: i64) -> i64 {
    (total + page_size - 1) / page_size
}

/// Extracts the total page count from a first-page response: direct
/// `totalPages`/`pages`/`pageCount` fields, or computed from
/// `total`/`totalCount` at the root, under `data`, or under `data.pager`.
#[must_use]
pub fn extract_total_pages(data: &Value, page_size: u32) -> Option<i64> {
    let page_size = i64::from(page_size.max(1));
    let direct = |v: &Value| {
        for field in ["totalPages", "pages", "pageCount"] {
            if let Some(n) = v.get(field).and_then(positive_int) {
                return Some(n);
            }
        }
        for field in ["total", "totalCount"] {
            if let Some(n) = v.get(field).and_then(positive_int) {
                return Some(pages_from_total(n, page_size));
            }
        }
        None
    };

    if let Some(pages) = direct(data) {
        return Some(pages);
    }
    if let Some(inner) = data.get("data") {
        if let Some(pages) = direct(inner) {
            return Some(pages);
        }
        if let Some(pager) = inner.get("pager") {
            if let Some(n) = pager.get("pages").and_then(positive_int) {
                return Some(n);
            }
            if let Some(n) = pager.get("total").and_then(positive_int) {
                return Some(pages_from_total(n, page_size));
            }
        }
    }
    None
}

/// Advertised total product count, when present.
#[must_use]
pub fn extract_expected_total(data: &Value) -> Option<i64> {
    for container in [Some(data), data.get("data")].into_iter().flatten() {
        for field in ["total", "totalCount"] {
            if let Some(n) = container.get(field).and_then(positive_int) {
                return Some(n);
            }
        }
    }
    None
}

/// One storefront product quote with the fields the snapshot tables need.
#[derive(Debug, Clone)]
pub struct ProductQuote {
    pub nm_id: i64,
    pub vendor_code: Option<String>,
    pub name: Option<String>,
    pub price_basic: Option<Decimal>,
    pub price_product: Option<Decimal>,
    pub sale_percent: Option<i32>,
    /// `round((1 - price_product / price_basic) * 100)`; the SPP proxy.
    pub discount_calc_percent: Option<i32>,
    pub raw: Value,
}

impl ProductQuote {
    /// Maps one raw product. Returns `None` without an nm_id — the row cannot
    /// be attributed. Prices arrive in kopecks under `sizes[0].price`.
    #[must_use]
    pub fn from_raw(product: &Value) -> Option<Self> {
        let nm_id = ["id", "nmId", "nm_id"]
            .iter()
            .find_map(|f| product.get(*f))
            .and_then(Value::as_i64)?;

        let price = product
            .get("sizes")
            .and_then(Value::as_array)
            .and_then(|sizes| sizes.first())
            .and_then(|size| size.get("price"));
        let kopecks = |field: &str| {
            price
                .and_then(|p| p.get(field))
                .and_then(Value::as_i64)
                .map(|k| Decimal::new(k, 2))
        };
        let price_basic = kopecks("basic");
        let price_product = kopecks("product");

        let discount_calc_percent = match (price_basic, price_product) {
            (Some(basic), Some(product_price)) if basic > Decimal::ZERO => {
                let ratio = (Decimal::ONE - product_price / basic) * Decimal::new(100, 0);
                ratio.round().to_i32()
            }
            _ => None,
        };

        #[allow(clippy::cast_possible_truncation)]
        let sale_percent = product
            .get("sale")
            .and_then(Value::as_i64)
            .map(|s| s as i32);

        Some(Self {
            nm_id,
            vendor_code: ["supplierVendorCode", "vendorCode"]
                .iter()
                .find_map(|f| product.get(*f))
                .and_then(Value::as_str)
                .map(str::to_owned),
            name: product.get("name").and_then(Value::as_str).map(str::to_owned),
            price_basic,
            price_product,
            sale_percent,
            discount_calc_percent,
            raw: product.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn products_found_under_each_documented_path() {
        let list = json!([{"id": 1}]);
        let shapes = [
            json!({"products": [{"id": 1}]}),
            json!({"data": {"products": [{"id": 1}]}}),
            json!({"data": {"products": {"products": [{"id": 1}]}}}),
            json!({"data": {"catalog": {"products": [{"id": 1}]}}}),
            json!({"data": {"list": [{"id": 1}]}}),
            json!({"data": {"listGoods": [{"id": 1}]}}),
            json!({"catalog": {"products": [{"id": 1}]}}),
            json!({"listGoods": [{"id": 1}]}),
            list.clone(),
        ];
        for shape in &shapes {
            assert_eq!(extract_products(shape).len(), 1, "shape: {shape}");
        }
        assert!(extract_products(&json!({"meta": {}})).is_empty());
    }

    #[test]
    fn root_products_take_priority_over_nested() {
        let data = json!({
            "products": [{"id": 1}, {"id": 2}],
            "data": {"products": [{"id": 3}]}
        });
        assert_eq!(extract_products(&data).len(), 2);
    }

    #[test]
    fn total_pages_prefers_direct_fields() {
        assert_eq!(extract_total_pages(&json!({"totalPages": 7}), 100), Some(7));
        assert_eq!(extract_total_pages(&json!({"pages": 3}), 100), Some(3));
    }

    #[test]
    fn total_pages_computed_from_total_count() {
        assert_eq!(extract_total_pages(&json!({"total": 1000}), 100), Some(10));
        // Ceiling division.
        assert_eq!(extract_total_pages(&json!({"totalCount": 101}), 100), Some(2));
        assert_eq!(
            extract_total_pages(&json!({"data": {"pager": {"total": 250}}}), 100),
            Some(3)
        );
        assert_eq!(extract_total_pages(&json!({}), 100), None);
    }

    #[test]
    fn expected_total_reads_root_then_data() {
        assert_eq!(extract_expected_total(&json!({"total": 42})), Some(42));
        assert_eq!(
            extract_expected_total(&json!({"data": {"totalCount": 9}})),
            Some(9)
        );
        assert_eq!(extract_expected_total(&json!({})), None);
    }

    #[test]
    fn quote_derives_spp_proxy_from_kopeck_prices() {
        let product = json!({
            "id": 555,
            "vendorCode": "V-1",
            "name": "Jacket",
            "sale": 30,
            "sizes": [{"price": {"basic": 100_000, "product": 85_000}}]
        });
        let quote = ProductQuote::from_raw(&product).expect("quote");
        assert_eq!(quote.nm_id, 555);
        assert_eq!(quote.price_basic, Some(Decimal::new(100_000, 2)));
        assert_eq!(quote.price_product, Some(Decimal::new(85_000, 2)));
        assert_eq!(quote.discount_calc_percent, Some(15));
        assert_eq!(quote.sale_percent, Some(30));
    }

    #[test]
    fn quote_without_prices_still_maps() {
        let quote = ProductQuote::from_raw(&json!({"id": 7})).expect("quote");
        assert_eq!(quote.price_basic, None);
        assert_eq!(quote.discount_calc_percent, None);
    }

    #[test]
    fn quote_without_nm_id_is_dropped() {
        assert!(ProductQuote::from_raw(&json!({"name": "no id"})).is_none());
    }
}
