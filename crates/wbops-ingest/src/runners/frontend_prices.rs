//! Storefront price ingestion.
//!
//! Runs a synchronous admin-prices refresh first (SPP derivation needs fresh
//! seller prices), then walks each enabled brand's catalog feed. Every page
//! appends catalog snapshot rows, upserts `wb_current_metrics` (emitting
//! `wb_spp_events` on distinct SPP transitions), and appends the hourly
//! showcase bucket. Rate-limit budgets are enforced: exhaustion marks the run
//! `skipped` and pushes the linked schedule forward.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use wbops_core::{reason, TriggeredBy};
use wbops_db::{NewCatalogSnapshot, NewCurrentMetric, NewShowcaseBucket};
use wbops_storefront::{
    compute_retry_sleep_seconds, extract_expected_total, extract_products, extract_total_pages,
    hour_bucket_utc, CatalogClient, ProductQuote, StorefrontError,
};

use crate::context::RunContext;
use crate::error::IngestError;
use crate::heartbeat::sleep_with_heartbeat;
use crate::registry::JobOutcome;
use crate::{runs, worker};

const PAGE_ATTEMPTS: u32 = 6;
const MAX_BRAND_PAGES_CAP: u32 = 50;
const MIN_COVERAGE: f64 = 0.95;

pub async fn run(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    if !refresh_admin_prices(ctx).await? {
        return Ok(JobOutcome::failure(
            "prices_refresh_failed",
            "failed to refresh WB admin prices before the storefront walk; retry later",
            json!({}),
        ));
    }

    let Some(settings) = load_settings(ctx).await? else {
        return Ok(JobOutcome::failure(
            reason::NO_CREDENTIALS,
            "wildberries connection is not configured",
            json!({}),
        ));
    };

    let Some(template) = settings.base_url_template.clone() else {
        return Ok(JobOutcome::failure(
            "base_url_template_not_configured",
            "frontend_prices.base_url_template is not set (needs a {brand_id} placeholder)",
            json!({}),
        ));
    };
    let mut brand_ids = settings.brand_ids.clone();
    // Optional single-brand override from run params.
    if let Some(brand_override) = ctx.params.get("brand_id").and_then(Value::as_i64) {
        brand_ids = vec![brand_override];
    }
    if brand_ids.is_empty() {
        return Ok(JobOutcome::failure(
            "no_brands_configured",
            "no enabled brands in the wildberries connection settings",
            json!({}),
        ));
    }

    let client = CatalogClient::new(ctx.config.http_timeout_secs, &ctx.config.http_user_agent)?;
    let run_started_at = wbops_db::get_run(&ctx.pool, ctx.run_id)
        .await?
        .started_at
        .unwrap_or_else(Utc::now);

    let mut budget = RetryBudget::new(&ctx.config);
    let mut succeeded: Vec<Value> = Vec::new();
    let mut failed: Vec<Value> = Vec::new();
    let mut items_total = 0usize;

    for (index, brand_id) in brand_ids.iter().enumerate() {
        if index > 0 {
            let pause_ms: u64 = rand::rng().random_range(400..=1200);
            let alive = sleep_with_heartbeat(
                &ctx.pool,
                ctx.run_id,
                Duration::from_millis(pause_ms),
                None,
            )
            .await;
            if !alive {
                return Ok(JobOutcome::AlreadyFinalized);
            }
        }
        let progress = json!({
            "phase": "frontend_prices",
            "current_brand_id": brand_id,
            "brands_done": succeeded.len() + failed.len(),
            "brands_total": brand_ids.len(),
        });
        wbops_db::set_progress(&ctx.pool, ctx.run_id, &progress).await?;

        match ingest_brand(ctx, &client, &template, *brand_id, run_started_at, &settings, &mut budget)
            .await?
        {
            BrandWalk::Completed(report) => {
                items_total += report.distinct_nm_id;
                succeeded.push(json!({
                    "brand_id": brand_id,
                    "products_count": report.distinct_nm_id,
                    "pages_count": report.pages,
                    "spp_events": report.spp_events,
                    "coverage": report.coverage,
                }));
            }
            BrandWalk::Failed { reason, detail } => {
                tracing::warn!(run_id = ctx.run_id, brand_id, reason = %reason, "frontend_prices: brand failed");
                failed.push(json!({"brand_id": brand_id, "reason": reason, "detail": detail}));
            }
            BrandWalk::BudgetExhausted => return finalize_rate_limited(ctx).await,
            BrandWalk::Cancelled => return Ok(JobOutcome::AlreadyFinalized),
        }
    }

    let status = match (succeeded.is_empty(), failed.is_empty()) {
        (_, true) => "success",
        (false, false) => "partial",
        (true, false) => "failed",
    };
    let stats = json!({
        "brands_total": brand_ids.len(),
        "succeeded_brands": succeeded,
        "failed_brands": failed,
        "items_total": items_total,
        "status": status,
    });
    if failed.is_empty() {
        Ok(JobOutcome::success(stats))
    } else {
        let first_reason = failed[0]["reason"].as_str().unwrap_or("brand_failed").to_owned();
        Ok(JobOutcome::failure(&first_reason, format!("{} brand(s) failed", failed.len()), stats))
    }
}

// ---------------------------------------------------------------------------
// Step A: synchronous admin prices refresh
// ---------------------------------------------------------------------------

/// Creates and executes a chained `prices` run in-process, under the same
/// exclusion as any other trigger. Returns whether it finished `success`.
async fn refresh_admin_prices(ctx: &RunContext) -> Result<bool, IngestError> {
    let created = runs::create_queued(
        &ctx.pool,
        &ctx.registry,
        &ctx.config,
        ctx.project_id,
        "wildberries",
        "prices",
        None,
        TriggeredBy::Chained,
        Some(json!({
            "chained_from_job": "frontend_prices",
            "chained_from_run_id": ctx.run_id,
        })),
        "frontend_prices",
    )
    .await;
    let prices_run = match created {
        Ok(outcome) => outcome.run,
        Err(IngestError::ActiveRunExists { .. } | IngestError::LockNotAcquired) => {
            tracing::warn!(
                run_id = ctx.run_id,
                "frontend_prices: prices job already active, refusing to run stale"
            );
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let started =
        match runs::start_with_stale_retry(&ctx.pool, &ctx.registry, &ctx.config, &prices_run)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(run_id = ctx.run_id, error = %e, "frontend_prices: prices sub-run start failed");
                wbops_db::mark_skipped(
                    &ctx.pool,
                    prices_run.id,
                    reason::ACTIVE_RUN_EXISTS,
                    Some("start conflict during chained refresh"),
                    "frontend_prices",
                )
                .await?;
                return Ok(false);
            }
        };

    // Direct runner call: the registry dispatch must not re-enter itself.
    let sub_ctx = ctx.for_sub_run(&started);
    let outcome = crate::runners::prices::run(&sub_ctx).await;
    let ok = worker::finalize_outcome(&sub_ctx, "wildberries", "prices", outcome).await;
    tracing::info!(
        run_id = ctx.run_id,
        prices_run_id = started.id,
        success = ok,
        "frontend_prices: admin prices refresh finished"
    );
    Ok(ok)
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

struct StorefrontSettings {
    base_url_template: Option<String>,
    brand_ids: Vec<i64>,
    page_size: u32,
    max_pages: u32,
    sleep_base_ms: u64,
    sleep_jitter_ms: u64,
}

async fn load_settings(ctx: &RunContext) -> Result<Option<StorefrontSettings>, IngestError> {
    let Some(connection) =
        wbops_db::get_connection(&ctx.pool, ctx.project_id, "wildberries").await?
    else {
        return Ok(None);
    };
    let settings = &connection.settings;
    let fp = settings.get("frontend_prices").cloned().unwrap_or(Value::Null);

    let mut brand_ids: Vec<i64> = fp
        .get("brands")
        .and_then(Value::as_array)
        .map(|brands| {
            brands
                .iter()
                .filter(|b| b.get("enabled").and_then(Value::as_bool).unwrap_or(true))
                .filter_map(|b| b.get("brand_id").and_then(lenient_i64))
                .collect()
        })
        .unwrap_or_default();
    if brand_ids.is_empty() {
        if let Some(brand_id) = settings.get("brand_id").and_then(lenient_i64) {
            brand_ids = vec![brand_id];
        }
    }

    let u32_field = |name: &str, default: u32| {
        fp.get(name)
            .and_then(lenient_i64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    };
    let u64_field = |name: &str, default: u64| {
        fp.get(name)
            .and_then(lenient_i64)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    };

    Ok(Some(StorefrontSettings {
        base_url_template: fp
            .get("base_url_template")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        brand_ids,
        page_size: u32_field("limit", ctx.config.storefront_page_size),
        max_pages: u32_field("max_pages", 0).min(MAX_BRAND_PAGES_CAP),
        sleep_base_ms: u64_field("sleep_base_ms", ctx.config.storefront_sleep_base_ms),
        sleep_jitter_ms: u64_field("sleep_jitter_ms", ctx.config.storefront_sleep_jitter_ms),
    }))
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Budgets
// ---------------------------------------------------------------------------

struct RetryBudget {
    started: Instant,
    total_retry_wait: Duration,
    max_total_retry_wait: Duration,
    max_runtime: Duration,
    max_sleep_secs: u64,
}

impl RetryBudget {
    fn new(config: &wbops_core::AppConfig) -> Self {
        Self {
            started: Instant::now(),
            total_retry_wait: Duration::ZERO,
            max_total_retry_wait: Duration::from_secs(config.storefront_max_total_retry_wait_secs),
            max_runtime: Duration::from_secs(config.storefront_max_runtime_secs),
            max_sleep_secs: 120,
        }
    }

    /// Whether sleeping `next` more seconds would exceed a budget.
    fn exhausted_by(&self, next: Duration) -> bool {
        self.total_retry_wait + next > self.max_total_retry_wait
            || self.started.elapsed() > self.max_runtime
    }

    fn record(&mut self, slept: Duration) {
        self.total_retry_wait += slept;
    }
}

async fn finalize_rate_limited(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    wbops_db::mark_skipped(
        &ctx.pool,
        ctx.run_id,
        reason::RATE_LIMITED,
        Some("exceeded retry wait/runtime limits"),
        "frontend_prices",
    )
    .await?;
    if let Some(schedule_id) = ctx.schedule_id {
        let next = Utc::now() + chrono::Duration::minutes(ctx.config.storefront_rate_limit_backoff_mins);
        wbops_db::push_next_run_at(&ctx.pool, schedule_id, next).await?;
        tracing::info!(
            run_id = ctx.run_id,
            schedule_id,
            next_run_at = %next,
            "frontend_prices: pushed schedule forward after rate limiting"
        );
    }
    Ok(JobOutcome::AlreadyFinalized)
}

// ---------------------------------------------------------------------------
// Brand walk
// ---------------------------------------------------------------------------

struct BrandReport {
    pages: u32,
    distinct_nm_id: usize,
    spp_events: u64,
    coverage: Option<f64>,
}

enum BrandWalk {
    Completed(BrandReport),
    Failed { reason: String, detail: String },
    BudgetExhausted,
    Cancelled,
}

#[allow(clippy::too_many_lines)]
async fn ingest_brand(
    ctx: &RunContext,
    client: &CatalogClient,
    template: &str,
    brand_id: i64,
    run_started_at: chrono::DateTime<chrono::Utc>,
    settings: &StorefrontSettings,
    budget: &mut RetryBudget,
) -> Result<BrandWalk, IngestError> {
    let mut page = 1u32;
    let mut pages_fetched = 0u32;
    let mut total_pages: Option<i64> = None;
    let mut expected_total: Option<i64> = None;
    let mut empty_streak = 0u32;
    let mut seen: HashSet<i64> = HashSet::new();
    let mut spp_events_total = 0u64;
    let mut retry_count_429 = 0u32;
    let bucket_at = hour_bucket_utc(run_started_at);

    loop {
        if settings.max_pages > 0 && pages_fetched >= settings.max_pages {
            break;
        }
        if let Some(tp) = total_pages {
            if i64::from(page) > tp {
                break;
            }
        }

        // Bounded page-level retries; 429 gets the jittered backoff, other
        // failures an escalating flat wait.
        let mut data: Option<Value> = None;
        let mut last_error: Option<String> = None;
        for attempt in 1..=PAGE_ATTEMPTS {
            match client.fetch_brand_page(template, brand_id, page).await {
                Ok(body) => {
                    data = Some(body);
                    break;
                }
                Err(StorefrontError::RateLimited { .. }) => {
                    retry_count_429 += 1;
                    let sleep_secs =
                        compute_retry_sleep_seconds(retry_count_429, budget.max_sleep_secs);
                    let sleep = Duration::from_secs(sleep_secs);
                    if budget.exhausted_by(sleep) {
                        return Ok(BrandWalk::BudgetExhausted);
                    }
                    budget.record(sleep);
                    let progress = json!({
                        "phase": "rate_limit_sleep",
                        "brand_id": brand_id,
                        "page": page,
                        "total_pages": total_pages,
                        "retry_count": retry_count_429,
                        "sleep_seconds": sleep_secs,
                        "distinct_nm_id": seen.len(),
                    });
                    if !sleep_with_heartbeat(&ctx.pool, ctx.run_id, sleep, Some(&progress)).await {
                        return Ok(BrandWalk::Cancelled);
                    }
                    last_error = Some("rate limited".to_owned());
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    let sleep = Duration::from_secs(u64::from(10 * attempt).min(60));
                    let progress = json!({
                        "phase": "retry_wait",
                        "brand_id": brand_id,
                        "page": page,
                        "page_attempt": attempt,
                        "distinct_nm_id": seen.len(),
                    });
                    if !sleep_with_heartbeat(&ctx.pool, ctx.run_id, sleep, Some(&progress)).await {
                        return Ok(BrandWalk::Cancelled);
                    }
                }
            }
        }
        let Some(data) = data else {
            // A page that never came back must not silently vanish from the
            // dataset.
            return Ok(BrandWalk::Failed {
                reason: reason::INCOMPLETE_FAILED_PAGE.to_owned(),
                detail: last_error.unwrap_or_else(|| "page fetch failed".to_owned()),
            });
        };
        pages_fetched += 1;

        if pages_fetched == 1 {
            total_pages = extract_total_pages(&data, settings.page_size);
            expected_total = extract_expected_total(&data);
        }

        let products = extract_products(&data);
        if products.is_empty() {
            if total_pages.is_some() {
                // A known page count keeps the walk going through holes.
                let pause = Duration::from_millis(settings.sleep_base_ms);
                if !sleep_with_heartbeat(&ctx.pool, ctx.run_id, pause, None).await {
                    return Ok(BrandWalk::Cancelled);
                }
                page += 1;
                continue;
            }
            empty_streak += 1;
            if empty_streak >= 2 {
                break;
            }
            // One backoff retry of the same page before the streak decides.
            let retry_sleep = Duration::from_millis(settings.sleep_base_ms * 2);
            if !sleep_with_heartbeat(&ctx.pool, ctx.run_id, retry_sleep, None).await {
                return Ok(BrandWalk::Cancelled);
            }
            continue;
        }
        empty_streak = 0;

        let mut catalog_rows: Vec<NewCatalogSnapshot> = Vec::new();
        let mut metric_rows: Vec<NewCurrentMetric> = Vec::new();
        let mut bucket_rows: Vec<NewShowcaseBucket> = Vec::new();
        for product in &products {
            let Some(quote) = ProductQuote::from_raw(product) else {
                continue;
            };
            if !seen.insert(quote.nm_id) {
                continue;
            }
            #[allow(clippy::cast_possible_wrap)]
            catalog_rows.push(NewCatalogSnapshot {
                query_value: brand_id.to_string(),
                page: page as i32,
                nm_id: quote.nm_id,
                vendor_code: quote.vendor_code.clone(),
                name: quote.name.clone(),
                price_basic: quote.price_basic,
                price_product: quote.price_product,
                sale_percent: quote.sale_percent,
                discount_calc_percent: quote.discount_calc_percent,
                raw: quote.raw.clone(),
            });
            metric_rows.push(NewCurrentMetric {
                nm_id: quote.nm_id,
                current_price_showcase: quote.price_product,
                // The storefront discount is the SPP proxy.
                current_spp_percent: quote.discount_calc_percent,
            });
            bucket_rows.push(NewShowcaseBucket {
                nm_id: quote.nm_id,
                price_showcase: quote.price_product,
                spp_percent: quote.discount_calc_percent,
                snapshot_at: bucket_at,
            });
        }

        if !catalog_rows.is_empty() {
            wbops_db::insert_catalog_snapshots(
                &ctx.pool,
                run_started_at,
                Some(ctx.run_id),
                &catalog_rows,
            )
            .await?;
            let (_, events) = wbops_db::upsert_current_metrics_with_events(
                &ctx.pool,
                ctx.project_id,
                ctx.run_id,
                run_started_at,
                &metric_rows,
            )
            .await?;
            spp_events_total += events;
            wbops_db::insert_showcase_buckets(&ctx.pool, ctx.project_id, ctx.run_id, &bucket_rows)
                .await?;
        }

        let progress = json!({
            "phase": "processed_page",
            "brand_id": brand_id,
            "page": page,
            "total_pages": total_pages,
            "expected_total": expected_total,
            "distinct_nm_id": seen.len(),
            "spp_events": spp_events_total,
        });
        wbops_db::set_progress(&ctx.pool, ctx.run_id, &progress).await?;

        // Between-page pause with jitter.
        let jitter = if settings.sleep_jitter_ms > 0 {
            rand::rng().random_range(0..=settings.sleep_jitter_ms)
        } else {
            0
        };
        let pause = Duration::from_millis(settings.sleep_base_ms + jitter);
        if !sleep_with_heartbeat(&ctx.pool, ctx.run_id, pause, None).await {
            return Ok(BrandWalk::Cancelled);
        }
        page += 1;
    }

    // Completeness gate against the advertised total.
    #[allow(clippy::cast_precision_loss)]
    let coverage = expected_total
        .filter(|t| *t > 0)
        .map(|t| seen.len() as f64 / t as f64);
    if let Some(c) = coverage {
        if c < MIN_COVERAGE {
            return Ok(BrandWalk::Failed {
                reason: reason::INCOMPLETE_LOW_COVERAGE.to_owned(),
                detail: format!(
                    "coverage {c:.3} below {MIN_COVERAGE} (distinct {}, expected {})",
                    seen.len(),
                    expected_total.unwrap_or(0)
                ),
            });
        }
    }

    Ok(BrandWalk::Completed(BrandReport {
        pages: pages_fetched,
        distinct_nm_id: seen.len(),
        spp_events: spp_events_total,
        coverage,
    }))
}
