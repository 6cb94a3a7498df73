//! Field mapping and row-level validation.
//!
//! `mapping_json` names the source column for each field and an ordered list
//! of transforms. `internal_sku` and `rrp` are required; `stock`, `barcode`,
//! and `name` are optional. Row failures are collected, never fatal: the
//! caller decides the aggregate snapshot status from the metrics.

use std::fmt::Write as _;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::error::InternalDataError;
use crate::parse::RawRow;

/// Hard cap on persisted row errors per snapshot.
pub const MAX_SAVED_ERRORS: usize = 10_000;
/// Errors additionally flagged for the settings-page preview.
pub const PREVIEW_ERRORS: usize = 10;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub key: String,
    pub transforms: Vec<String>,
}

impl FieldSpec {
    fn from_json(value: &Value, default_transforms: &[&str]) -> Option<Self> {
        let key = value.get("key")?.as_str()?.trim().to_owned();
        if key.is_empty() {
            return None;
        }
        let transforms = value
            .get("transforms")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_else(|| default_transforms.iter().map(|s| (*s).to_owned()).collect());
        Some(Self { key, transforms })
    }
}

#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub internal_sku: FieldSpec,
    pub rrp: FieldSpec,
    pub stock: Option<FieldSpec>,
    pub barcode: Option<FieldSpec>,
    pub name: Option<FieldSpec>,
}

impl MappingConfig {
    /// Parses `mapping_json`. The required fields are `internal_sku` and
    /// `rrp`.
    ///
    /// # Errors
    ///
    /// Returns [`InternalDataError::InvalidMapping`] when a required field is
    /// absent or has an empty key.
    pub fn from_json(mapping: &Value) -> Result<Self, InternalDataError> {
        let fields = mapping
            .get("fields")
            .ok_or_else(|| InternalDataError::InvalidMapping("missing \"fields\"".to_owned()))?;
        let required = |name: &str, defaults: &[&str]| {
            fields
                .get(name)
                .and_then(|v| FieldSpec::from_json(v, defaults))
                .ok_or_else(|| {
                    InternalDataError::InvalidMapping(format!(
                        "required field \"{name}\" is missing or has no key"
                    ))
                })
        };
        Ok(Self {
            internal_sku: required("internal_sku", &["strip"])?,
            rrp: required("rrp", &["to_decimal"])?,
            stock: fields
                .get("stock")
                .and_then(|v| FieldSpec::from_json(v, &["to_int"])),
            barcode: fields
                .get("barcode")
                .and_then(|v| FieldSpec::from_json(v, &["strip"])),
            name: fields
                .get("name")
                .and_then(|v| FieldSpec::from_json(v, &["strip"])),
        })
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// A value flowing through the transform chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Int(i64),
}

impl FieldValue {
    fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(d) => d.to_string(),
            FieldValue::Int(i) => i.to_string(),
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(d) => Some(*d),
            FieldValue::Int(i) => Some(Decimal::from(*i)),
            FieldValue::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Number(d) => d.trunc().to_i64(),
            FieldValue::Text(_) => None,
        }
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .replace(',', ".")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}

/// Applies transforms in order. Returns the final value, the first error,
/// and the trace of intermediate renderings (for error diagnostics).
///
/// Unknown transform names are ignored.
fn apply_transforms(
    raw: Option<&str>,
    transforms: &[String],
) -> (Option<FieldValue>, Option<String>, Vec<String>) {
    let mut value = raw.map(|s| FieldValue::Text(s.to_owned()));
    let mut trace = Vec::with_capacity(transforms.len());

    for name in transforms {
        match (name.as_str(), value.take()) {
            (_, None) => {
                trace.push(format!("{name} -> (none)"));
                value = None;
            }
            ("strip", Some(FieldValue::Text(s))) => {
                value = Some(FieldValue::Text(s.trim().to_owned()));
            }
            ("sku_last_segment", Some(FieldValue::Text(s))) => {
                let segments: Vec<&str> =
                    s.split('/').map(str::trim).filter(|p| !p.is_empty()).collect();
                let picked = segments
                    .last()
                    .map_or_else(|| s.trim().trim_matches('/').to_owned(), |p| (*p).to_owned());
                value = Some(FieldValue::Text(picked));
            }
            ("to_decimal", Some(current)) => match &current {
                FieldValue::Text(s) => match parse_decimal(s) {
                    Some(d) => value = Some(FieldValue::Number(d)),
                    None => {
                        trace.push(format!("{name} -> error"));
                        return (
                            None,
                            Some(format!("value \"{s}\" is not a valid number")),
                            trace,
                        );
                    }
                },
                _ => value = Some(current),
            },
            ("to_int", Some(current)) => match &current {
                FieldValue::Text(s) => match parse_decimal(s).and_then(|d| d.trunc().to_i64()) {
                    Some(i) => value = Some(FieldValue::Int(i)),
                    None => {
                        trace.push(format!("{name} -> error"));
                        return (
                            None,
                            Some(format!("value \"{s}\" is not a valid integer")),
                            trace,
                        );
                    }
                },
                FieldValue::Number(d) => value = d.trunc().to_i64().map(FieldValue::Int),
                FieldValue::Int(_) => value = Some(current),
            },
            (_, current) => {
                // Unknown transform: pass the value through untouched.
                value = current;
            }
        }
        if let Some(v) = &value {
            let mut step = String::new();
            let _ = write!(step, "{name} -> {}", v.render());
            trace.push(step);
        }
    }
    (value, None, trace)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// One successfully mapped row.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub internal_sku: String,
    pub name: Option<String>,
    pub rrp: Option<Decimal>,
    pub stock: Option<i64>,
    pub barcode: Option<String>,
}

/// One failed row, shaped for `internal_data_row_errors`.
#[derive(Debug, Clone)]
pub struct RowError {
    pub row_index: usize,
    pub source_key: String,
    pub error_code: &'static str,
    pub message: String,
    pub raw_row: Value,
    pub transforms: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MappingMetrics {
    pub rows_total: usize,
    pub rows_imported: usize,
    pub rows_failed: usize,
    /// Failures beyond [`MAX_SAVED_ERRORS`] are counted but not saved.
    pub errors_dropped: usize,
}

#[derive(Debug)]
pub struct MappingOutcome {
    pub rows: Vec<MappedRow>,
    pub errors: Vec<RowError>,
    pub metrics: MappingMetrics,
}

/// Applies the mapping to all raw rows.
///
/// A row fails when its SKU errors or is empty after transforms
/// (`transform_error` / `missing_required`) or its RRP errors or is missing
/// (`parse_error` / `missing_required`). Optional fields never fail a row.
#[must_use]
pub fn apply_mapping(config: &MappingConfig, raw_rows: &[RawRow]) -> MappingOutcome {
    let mut rows = Vec::new();
    let mut errors: Vec<RowError> = Vec::new();
    let mut metrics = MappingMetrics::default();

    for (index, raw) in raw_rows.iter().enumerate() {
        metrics.rows_total += 1;

        let mut messages: Vec<String> = Vec::new();
        let mut error_code: Option<&'static str> = None;
        let mut failed_key = &config.internal_sku.key;
        let mut failed_transforms = &config.internal_sku.transforms;

        let raw_sku = raw.get(&config.internal_sku.key).map(String::as_str);
        let (sku_value, sku_error, _sku_trace) =
            apply_transforms(raw_sku, &config.internal_sku.transforms);
        if let Some(err) = sku_error {
            messages.push(format!("internal_sku: {err}"));
            error_code = Some("transform_error");
        }
        let sku = match &sku_value {
            Some(FieldValue::Text(s)) if !s.is_empty() => Some(s.clone()),
            Some(other) => Some(other.render()),
            None => None,
        }
        .filter(|s| !s.is_empty());
        if sku.is_none() && error_code.is_none() {
            messages.push("internal_sku: missing or empty after transforms".to_owned());
            error_code = Some("missing_required");
        }

        let raw_rrp = raw.get(&config.rrp.key).map(String::as_str);
        let (rrp_value, rrp_error, _rrp_trace) = apply_transforms(raw_rrp, &config.rrp.transforms);
        let rrp = rrp_value.as_ref().and_then(FieldValue::as_decimal);
        if let Some(err) = rrp_error {
            messages.push(format!("rrp: {err}"));
            if error_code.is_none() {
                error_code = Some("parse_error");
                failed_key = &config.rrp.key;
                failed_transforms = &config.rrp.transforms;
            }
        } else if rrp.is_none() {
            messages.push("rrp: missing or not a valid number".to_owned());
            if error_code.is_none() {
                error_code = Some("missing_required");
                failed_key = &config.rrp.key;
                failed_transforms = &config.rrp.transforms;
            }
        }

        if let Some(code) = error_code {
            metrics.rows_failed += 1;
            if errors.len() < MAX_SAVED_ERRORS {
                errors.push(RowError {
                    row_index: index,
                    source_key: failed_key.clone(),
                    error_code: code,
                    message: messages.join("; "),
                    raw_row: json!(raw),
                    transforms: failed_transforms.clone(),
                });
            } else {
                metrics.errors_dropped += 1;
            }
            continue;
        }

        // Optional fields: extraction failures degrade to None.
        let stock = config.stock.as_ref().and_then(|spec| {
            let (value, _, _) =
                apply_transforms(raw.get(&spec.key).map(String::as_str), &spec.transforms);
            value.as_ref().and_then(FieldValue::as_int)
        });
        let barcode = config.barcode.as_ref().and_then(|spec| {
            let (value, _, _) =
                apply_transforms(raw.get(&spec.key).map(String::as_str), &spec.transforms);
            value.map(|v| v.render()).filter(|s| !s.is_empty())
        });
        let name = config.name.as_ref().and_then(|spec| {
            let (value, _, _) =
                apply_transforms(raw.get(&spec.key).map(String::as_str), &spec.transforms);
            value.map(|v| v.render()).filter(|s| !s.is_empty())
        });

        metrics.rows_imported += 1;
        rows.push(MappedRow {
            internal_sku: sku.unwrap_or_default(),
            name,
            rrp,
            stock,
            barcode,
        });
    }

    MappingOutcome {
        rows,
        errors,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config() -> MappingConfig {
        MappingConfig::from_json(&json!({
            "fields": {
                "internal_sku": {"key": "sku", "transforms": ["strip", "sku_last_segment"]},
                "rrp": {"key": "price"},
                "stock": {"key": "qty"},
                "barcode": {"key": "ean"}
            }
        }))
        .expect("config")
    }

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn maps_a_clean_row() {
        let outcome = apply_mapping(
            &config(),
            &[row(&[("sku", " catalog/shoes/A-1 "), ("price", "1 299,50"), ("qty", "4")])],
        );
        assert_eq!(outcome.metrics.rows_imported, 1);
        assert_eq!(outcome.metrics.rows_failed, 0);
        let mapped = &outcome.rows[0];
        assert_eq!(mapped.internal_sku, "A-1");
        assert_eq!(mapped.rrp, Some(Decimal::new(129_950, 2)));
        assert_eq!(mapped.stock, Some(4));
    }

    #[test]
    fn whitespace_only_sku_is_missing_required() {
        let outcome = apply_mapping(&config(), &[row(&[("sku", "   "), ("price", "100")])]);
        assert_eq!(outcome.metrics.rows_failed, 1);
        assert!(outcome.rows.is_empty(), "no empty-key row may be inserted");
        assert_eq!(outcome.errors[0].error_code, "missing_required");
        assert!(outcome.errors[0].message.contains("internal_sku"));
    }

    #[test]
    fn unparseable_rrp_is_parse_error() {
        let outcome = apply_mapping(&config(), &[row(&[("sku", "A-1"), ("price", "N/A")])]);
        assert_eq!(outcome.errors[0].error_code, "parse_error");
        assert_eq!(outcome.errors[0].source_key, "price");
    }

    #[test]
    fn missing_rrp_is_missing_required() {
        let outcome = apply_mapping(&config(), &[row(&[("sku", "A-1")])]);
        assert_eq!(outcome.errors[0].error_code, "missing_required");
    }

    #[test]
    fn optional_field_failures_do_not_fail_the_row() {
        let outcome = apply_mapping(
            &config(),
            &[row(&[("sku", "A-1"), ("price", "99"), ("qty", "many")])],
        );
        assert_eq!(outcome.metrics.rows_imported, 1);
        assert_eq!(outcome.rows[0].stock, None);
    }

    #[test]
    fn unknown_transforms_are_ignored() {
        let config = MappingConfig::from_json(&json!({
            "fields": {
                "internal_sku": {"key": "sku", "transforms": ["strip", "sparkle"]},
                "rrp": {"key": "price"}
            }
        }))
        .expect("config");
        let outcome = apply_mapping(&config, &[row(&[("sku", " A-1 "), ("price", "10")])]);
        assert_eq!(outcome.rows[0].internal_sku, "A-1");
    }

    #[test]
    fn mapping_requires_sku_and_rrp() {
        assert!(MappingConfig::from_json(&json!({"fields": {"rrp": {"key": "p"}}})).is_err());
        assert!(MappingConfig::from_json(&json!({"fields": {"internal_sku": {"key": "s"}}})).is_err());
        assert!(
            MappingConfig::from_json(&json!({"fields": {"internal_sku": {"key": "  "}, "rrp": {"key": "p"}}}))
                .is_err()
        );
    }

    #[test]
    fn sku_last_segment_picks_the_tail() {
        let (value, err, _) = apply_transforms(
            Some("root/mid/TAIL-9"),
            &["sku_last_segment".to_owned()],
        );
        assert!(err.is_none());
        assert_eq!(value, Some(FieldValue::Text("TAIL-9".to_owned())));

        let (value, _, _) = apply_transforms(Some("/solo/"), &["sku_last_segment".to_owned()]);
        assert_eq!(value, Some(FieldValue::Text("solo".to_owned())));
    }

    #[test]
    fn error_cap_is_enforced() {
        let bad_rows: Vec<RawRow> = (0..(MAX_SAVED_ERRORS + 5))
            .map(|_| row(&[("sku", ""), ("price", "")]))
            .collect();
        let outcome = apply_mapping(&config(), &bad_rows);
        assert_eq!(outcome.errors.len(), MAX_SAVED_ERRORS);
        assert_eq!(outcome.metrics.errors_dropped, 5);
        assert_eq!(outcome.metrics.rows_failed, MAX_SAVED_ERRORS + 5);
    }
}
