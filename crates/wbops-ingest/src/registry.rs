//! Static job registry: the table of (source, job_code) → metadata and the
//! runner dispatch. Lookups fail closed — an unknown pair never executes,
//! it surfaces [`IngestError::JobNotFound`] and the run goes straight from
//! queued to failed.

use serde_json::{json, Value};
use wbops_core::SourceCode;

use crate::context::RunContext;
use crate::error::IngestError;
use crate::runners;

/// How a runner left the run.
#[derive(Debug)]
pub enum JobOutcome {
    Success {
        stats: Value,
    },
    Failure {
        reason: String,
        message: String,
        stats: Value,
    },
    /// The runner already finalized the run row itself (e.g. marked it
    /// `skipped` after exhausting its rate-limit budget).
    AlreadyFinalized,
}

impl JobOutcome {
    #[must_use]
    pub fn success(stats: Value) -> Self {
        let mut stats = stats;
        if let Value::Object(map) = &mut stats {
            map.insert("ok".to_owned(), Value::Bool(true));
        }
        JobOutcome::Success { stats }
    }

    #[must_use]
    pub fn failure(reason: &str, message: impl Into<String>, stats: Value) -> Self {
        let mut stats = stats;
        if let Value::Object(map) = &mut stats {
            map.insert("ok".to_owned(), Value::Bool(false));
            map.insert("reason".to_owned(), Value::String(reason.to_owned()));
        }
        JobOutcome::Failure {
            reason: reason.to_owned(),
            message: message.into(),
            stats,
        }
    }
}

/// Registry metadata for one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub source: SourceCode,
    pub job_code: &'static str,
    pub title: &'static str,
    pub supports_schedule: bool,
    pub supports_manual: bool,
    /// Per-job override of the global stuck TTL.
    pub stuck_ttl_secs: Option<i64>,
}

/// The static job table.
#[derive(Debug, Default)]
pub struct JobRegistry {
    specs: Vec<JobSpec>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        use SourceCode::{Internal, Wildberries};
        let spec = |source,
                    job_code,
                    title,
                    supports_schedule,
                    supports_manual,
                    stuck_ttl_secs| JobSpec {
            source,
            job_code,
            title,
            supports_schedule,
            supports_manual,
            stuck_ttl_secs,
        };
        Self {
            specs: vec![
                spec(Wildberries, "products", "Product catalog import", true, true, None),
                spec(Wildberries, "warehouses", "Warehouses import", true, true, None),
                spec(Wildberries, "stocks", "FBS stocks import", true, true, None),
                // One page per minute is this job's legitimate pace.
                spec(Wildberries, "supplier_stocks", "FBO stocks import", true, true, Some(3600)),
                spec(Wildberries, "prices", "Admin prices import", true, true, None),
                spec(Wildberries, "frontend_prices", "Storefront prices import", true, true, None),
                spec(Wildberries, "wb_finances", "Finance reports import", false, true, None),
                spec(Internal, "rrp_xml", "Legacy RRP XML import", true, true, None),
                spec(Internal, "build_rrp_snapshots", "RRP snapshot build", true, true, None),
                spec(Internal, "build_tax_statement", "Tax statement build", false, true, None),
            ],
        }
    }

    #[must_use]
    pub fn get(&self, source_code: &str, job_code: &str) -> Option<&JobSpec> {
        self.specs
            .iter()
            .find(|s| s.source.as_str() == source_code && s.job_code == job_code)
    }

    /// Looks a job up by code alone (codes are unique across sources).
    #[must_use]
    pub fn get_by_job_code(&self, job_code: &str) -> Option<&JobSpec> {
        self.specs.iter().find(|s| s.job_code == job_code)
    }

    /// All jobs, sorted by (source, title) for a stable catalog listing.
    #[must_use]
    pub fn list(&self) -> Vec<&JobSpec> {
        let mut specs: Vec<&JobSpec> = self.specs.iter().collect();
        specs.sort_by_key(|s| (s.source.as_str(), s.title));
        specs
    }

    /// Effective stuck TTL for a job: its override or the global default.
    #[must_use]
    pub fn stuck_ttl_secs(&self, source_code: &str, job_code: &str, default_secs: i64) -> i64 {
        self.get(source_code, job_code)
            .and_then(|s| s.stuck_ttl_secs)
            .unwrap_or(default_secs)
    }

    /// Dispatches to the runner for (source, job).
    ///
    /// Runner-internal errors are classified into a [`JobOutcome::Failure`]
    /// here; nothing propagates as `Err` except the registry miss itself.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::JobNotFound`] when no runner is registered.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        source_code: &str,
        job_code: &str,
    ) -> Result<JobOutcome, IngestError> {
        if self.get(source_code, job_code).is_none() {
            return Err(IngestError::JobNotFound {
                source_code: source_code.to_owned(),
                job_code: job_code.to_owned(),
            });
        }

        let result = match (source_code, job_code) {
            ("wildberries", "products") => runners::products::run(ctx).await,
            ("wildberries", "warehouses") => runners::warehouses::run(ctx).await,
            ("wildberries", "stocks") => runners::stocks::run(ctx).await,
            ("wildberries", "supplier_stocks") => runners::supplier_stocks::run(ctx).await,
            ("wildberries", "prices") => runners::prices::run(ctx).await,
            ("wildberries", "frontend_prices") => runners::frontend_prices::run(ctx).await,
            ("wildberries", "wb_finances") => runners::wb_finances::run(ctx).await,
            ("internal", "rrp_xml") => runners::rrp::run_rrp_xml(ctx).await,
            ("internal", "build_rrp_snapshots") => runners::rrp::run_build_snapshots(ctx).await,
            ("internal", "build_tax_statement") => runners::tax::run(ctx).await,
            _ => {
                return Err(IngestError::JobNotFound {
                    source_code: source_code.to_owned(),
                    job_code: job_code.to_owned(),
                })
            }
        };

        Ok(result.unwrap_or_else(|err| classify_runner_error(&err)))
    }
}

/// Turns a runner-internal error into the failure outcome the lifecycle
/// stores. Runners return explicit outcomes for the well-known reasons; this
/// is the backstop for everything they did not classify themselves.
pub(crate) fn classify_runner_error(err: &IngestError) -> JobOutcome {
    let reason = match err {
        IngestError::Wb(wbops_wb::WbApiError::RateLimited { .. })
        | IngestError::Storefront(wbops_storefront::StorefrontError::RateLimited { .. }) => {
            wbops_core::reason::RATE_LIMITED
        }
        IngestError::InvalidParams(_) => wbops_core::reason::INVALID_PARAMS,
        _ => "unhandled_error",
    };
    tracing::error!(error = %err, reason, "runner failed");
    JobOutcome::failure(reason, err.to_string(), json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ten_jobs_are_registered() {
        let registry = JobRegistry::new();
        assert_eq!(registry.list().len(), 10);
        for (source, job) in [
            ("wildberries", "products"),
            ("wildberries", "warehouses"),
            ("wildberries", "stocks"),
            ("wildberries", "supplier_stocks"),
            ("wildberries", "prices"),
            ("wildberries", "frontend_prices"),
            ("wildberries", "wb_finances"),
            ("internal", "rrp_xml"),
            ("internal", "build_rrp_snapshots"),
            ("internal", "build_tax_statement"),
        ] {
            assert!(registry.get(source, job).is_some(), "{source}/{job}");
        }
    }

    #[test]
    fn lookup_misses_fail_closed() {
        let registry = JobRegistry::new();
        assert!(registry.get("wildberries", "unknown").is_none());
        assert!(registry.get("ozon", "products").is_none());
    }

    #[test]
    fn parameterized_jobs_do_not_support_schedules() {
        let registry = JobRegistry::new();
        let finances = registry.get("wildberries", "wb_finances").expect("spec");
        assert!(!finances.supports_schedule);
        assert!(finances.supports_manual);
        let tax = registry.get("internal", "build_tax_statement").expect("spec");
        assert!(!tax.supports_schedule);
    }

    #[test]
    fn stuck_ttl_override_applies_per_job() {
        let registry = JobRegistry::new();
        assert_eq!(registry.stuck_ttl_secs("wildberries", "supplier_stocks", 1800), 3600);
        assert_eq!(registry.stuck_ttl_secs("wildberries", "products", 1800), 1800);
        assert_eq!(registry.stuck_ttl_secs("nope", "nope", 1800), 1800);
    }

    #[test]
    fn outcome_builders_stamp_ok_and_reason() {
        let JobOutcome::Success { stats } = JobOutcome::success(json!({"pages": 2})) else {
            panic!("expected success");
        };
        assert_eq!(stats["ok"], true);
        assert_eq!(stats["pages"], 2);

        let JobOutcome::Failure { reason, stats, .. } =
            JobOutcome::failure("no_credentials", "token missing", json!({}))
        else {
            panic!("expected failure");
        };
        assert_eq!(reason, "no_credentials");
        assert_eq!(stats["ok"], false);
        assert_eq!(stats["reason"], "no_credentials");
    }
}
