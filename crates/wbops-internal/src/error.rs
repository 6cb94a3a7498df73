use thiserror::Error;

#[derive(Debug, Error)]
pub enum InternalDataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source responded with HTTP status {status}")]
    SourceStatus { status: u16 },

    #[error("download exceeds the {limit_bytes} byte limit")]
    DownloadTooLarge { limit_bytes: u64 },

    #[error("unsupported source format \"{0}\" (expected csv, xlsx, xlsm, or xml)")]
    UnsupportedFormat(String),

    #[error("failed to parse {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("mapping configuration invalid: {0}")]
    InvalidMapping(String),

    #[error("source is not configured")]
    SourceNotConfigured,
}
