//! Internal Data pipeline: source acquisition, format parsing, and field
//! mapping with row-level validation.

mod error;
mod fetch;
mod mapping;
mod parse;

pub use error::InternalDataError;
pub use fetch::{
    build_client, download_url, probe_url, read_upload, resolve_storage_path, upload_storage_key,
    ProbeResult,
};
pub use mapping::{
    apply_mapping, FieldSpec, FieldValue, MappedRow, MappingConfig, MappingMetrics,
    MappingOutcome, RowError, MAX_SAVED_ERRORS, PREVIEW_ERRORS,
};
pub use parse::{parse_rows, RawRow, SourceFormat};
