//! Format dispatch and row extraction for Internal Data sources.
//!
//! All formats normalize to header-keyed string rows. XML expects repeated
//! `<item>` elements carrying the row as attributes; CSV and XLSX use the
//! first row as the header.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use quick_xml::events::Event;

use crate::error::InternalDataError;

/// A parsed source row: header/attribute name → raw string value.
pub type RawRow = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Xml,
}

impl SourceFormat {
    /// Dispatches on a file extension (case-insensitive). `xlsm` parses as
    /// xlsx.
    ///
    /// # Errors
    ///
    /// Returns [`InternalDataError::UnsupportedFormat`] for anything else.
    pub fn from_extension(ext: &str) -> Result<Self, InternalDataError> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "xlsx" | "xlsm" => Ok(SourceFormat::Xlsx),
            "xml" => Ok(SourceFormat::Xml),
            other => Err(InternalDataError::UnsupportedFormat(other.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Xml => "xml",
        }
    }
}

/// Parses source bytes into rows according to the format.
///
/// # Errors
///
/// Returns [`InternalDataError::Parse`] when the payload does not parse.
pub fn parse_rows(format: SourceFormat, bytes: &[u8]) -> Result<Vec<RawRow>, InternalDataError> {
    match format {
        SourceFormat::Csv => parse_csv(bytes),
        SourceFormat::Xlsx => parse_xlsx(bytes),
        SourceFormat::Xml => parse_xml(bytes),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>, InternalDataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| InternalDataError::Parse {
            context: "csv header".to_owned(),
            reason: e.to_string(),
        })?
        .iter()
        .map(str::to_owned)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| InternalDataError::Parse {
            context: format!("csv row {}", index + 1),
            reason: e.to_string(),
        })?;
        let mut row = RawRow::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), value.to_owned());
        }
        rows.push(row);
    }
    Ok(rows)
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            // Integral floats print without the trailing ".0" Excel adds.
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<RawRow>, InternalDataError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: Xlsx<_> = Xlsx::new(cursor).map_err(|e| InternalDataError::Parse {
        context: "xlsx workbook".to_owned(),
        reason: e.to_string(),
    })?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| InternalDataError::Parse {
            context: "xlsx workbook".to_owned(),
            reason: "no sheets".to_owned(),
        })?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| InternalDataError::Parse {
            context: format!("xlsx sheet {sheet_name}"),
            reason: e.to_string(),
        })?;

    let mut iter = range.rows();
    let Some(header_row) = iter.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row.iter().map(cell_to_string).collect();

    let mut rows = Vec::new();
    for data_row in iter {
        let mut row = RawRow::new();
        for (header, cell) in headers.iter().zip(data_row.iter()) {
            if header.is_empty() {
                continue;
            }
            row.insert(header.clone(), cell_to_string(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_xml(bytes: &[u8]) -> Result<Vec<RawRow>, InternalDataError> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref element) | Event::Empty(ref element))
                if element.local_name().as_ref() == b"item" =>
            {
                let mut row = RawRow::new();
                for attr in element.attributes() {
                    let attr = attr.map_err(|e| InternalDataError::Parse {
                        context: "xml item attribute".to_owned(),
                        reason: e.to_string(),
                    })?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| InternalDataError::Parse {
                            context: format!("xml item attribute {key}"),
                            reason: e.to_string(),
                        })?
                        .into_owned();
                    row.insert(key, value);
                }
                rows.push(row);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(InternalDataError::Parse {
                    context: "xml document".to_owned(),
                    reason: e.to_string(),
                })
            }
        }
        buf.clear();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        assert_eq!(SourceFormat::from_extension("CSV").unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_extension("xlsm").unwrap(), SourceFormat::Xlsx);
        assert_eq!(SourceFormat::from_extension("Xml").unwrap(), SourceFormat::Xml);
        assert!(matches!(
            SourceFormat::from_extension("pdf"),
            Err(InternalDataError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn csv_rows_are_keyed_by_header() {
        let bytes = b"sku;rrp\n" as &[u8];
        // Comma-separated is the default; semicolons stay in the value.
        let rows = parse_rows(SourceFormat::Csv, bytes).expect("parse");
        assert!(rows.is_empty());

        let bytes = b"sku,rrp,stock\nA-1,999.90,4\nA-2,,\n" as &[u8];
        let rows = parse_rows(SourceFormat::Csv, bytes).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["sku"], "A-1");
        assert_eq!(rows[0]["rrp"], "999.90");
        assert_eq!(rows[1]["rrp"], "");
    }

    #[test]
    fn xml_item_attributes_become_rows() {
        let bytes = br#"<?xml version="1.0"?>
            <catalog>
                <item sku="A-1" rrp="1290" stock="3"/>
                <item sku="A-2" rrp="990"></item>
            </catalog>"# as &[u8];
        let rows = parse_rows(SourceFormat::Xml, bytes).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["sku"], "A-1");
        assert_eq!(rows[0]["stock"], "3");
        assert_eq!(rows[1]["rrp"], "990");
    }

    #[test]
    fn broken_xml_is_a_parse_error() {
        let bytes = b"<catalog><item sku=\"A-1\"" as &[u8];
        assert!(matches!(
            parse_rows(SourceFormat::Xml, bytes),
            Err(InternalDataError::Parse { .. })
        ));
    }
}
