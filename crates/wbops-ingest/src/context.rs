//! Execution context handed to every runner. No module-level state: the
//! clock, the pool, the registry, and the tenant's secrets all arrive here.

use std::sync::Arc;

use serde_json::Value;
use sqlx::PgPool;
use wbops_core::{AppConfig, TokenCipher};
use wbops_db::IngestRunRow;

use crate::registry::JobRegistry;

#[derive(Clone)]
pub struct RunContext {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub cipher: Arc<dyn TokenCipher>,
    pub registry: Arc<JobRegistry>,
    pub project_id: i64,
    pub run_id: i64,
    pub schedule_id: Option<i64>,
    /// Structured job input (`Value::Null` when absent).
    pub params: Value,
}

impl RunContext {
    /// Builds a context for one claimed run.
    #[must_use]
    pub fn for_run(
        pool: PgPool,
        config: Arc<AppConfig>,
        cipher: Arc<dyn TokenCipher>,
        registry: Arc<JobRegistry>,
        run: &IngestRunRow,
    ) -> Self {
        Self {
            pool,
            config,
            cipher,
            registry,
            project_id: run.project_id,
            run_id: run.id,
            schedule_id: run.schedule_id,
            params: run.params.clone().unwrap_or(Value::Null),
        }
    }

    /// Derives a context for an in-process sub-run (the synchronous `prices`
    /// refresh inside `frontend_prices`).
    #[must_use]
    pub fn for_sub_run(&self, run: &IngestRunRow) -> Self {
        let mut ctx = self.clone();
        ctx.run_id = run.id;
        ctx.schedule_id = run.schedule_id;
        ctx.params = run.params.clone().unwrap_or(Value::Null);
        ctx
    }
}
