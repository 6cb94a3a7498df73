use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no ingestion job registered for source={source_code}, job_code={job_code}")]
    JobNotFound {
        source_code: String,
        job_code: String,
    },

    #[error("advisory lock not acquired")]
    LockNotAcquired,

    #[error("another run ({run_id}) is already queued or running for this job")]
    ActiveRunExists { run_id: i64 },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Db(#[from] wbops_db::DbError),

    #[error(transparent)]
    Wb(#[from] wbops_wb::WbApiError),

    #[error(transparent)]
    Storefront(#[from] wbops_storefront::StorefrontError),

    #[error(transparent)]
    InternalData(#[from] wbops_internal::InternalDataError),

    #[error(transparent)]
    Secret(#[from] wbops_core::SecretError),

    #[error(transparent)]
    Cron(#[from] wbops_core::CronError),
}

impl IngestError {
    /// Maps the db-layer exclusion errors onto their ingest-level variants so
    /// callers can match without reaching into [`wbops_db::DbError`].
    #[must_use]
    pub fn from_db(err: wbops_db::DbError) -> Self {
        match err {
            wbops_db::DbError::LockNotAcquired { .. } => IngestError::LockNotAcquired,
            wbops_db::DbError::ActiveRunExists { run_id, .. } => {
                IngestError::ActiveRunExists { run_id }
            }
            other => IngestError::Db(other),
        }
    }
}
