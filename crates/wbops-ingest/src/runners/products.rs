//! WB Content v2 product catalog ingestion: cursor pagination, per-run
//! dedup, upsert on (project, nm_id), and the chained RRP snapshot build.

use std::collections::HashSet;

use serde_json::json;
use wbops_core::{reason, TriggeredBy};
use wbops_db::UpsertProduct;
use wbops_wb::{card_brand, card_nm_id, card_subject_name, card_title, card_vendor_code};

use crate::context::RunContext;
use crate::credentials::{resolve_wb_token, ResolvedCredentials};
use crate::error::IngestError;
use crate::registry::JobOutcome;
use crate::runners::wb_client_for;
use crate::runs;

const MAX_PAGES: u32 = 1000;
const MIN_COVERAGE: f64 = 0.95;

pub async fn run(ctx: &RunContext) -> Result<JobOutcome, IngestError> {
    let token = match resolve_wb_token(&ctx.pool, ctx.cipher.as_ref(), &ctx.config, ctx.project_id)
        .await?
    {
        ResolvedCredentials::Resolved(token) => token,
        ResolvedCredentials::NotConfigured | ResolvedCredentials::Disabled => {
            return Ok(JobOutcome::failure(
                reason::NO_CREDENTIALS,
                "wildberries connection is not configured or disabled",
                json!({}),
            ));
        }
    };
    let client = wb_client_for(&ctx.config, &token)?;
    let page_size = ctx.config.wb_page_size;

    let mut cursor = None;
    let mut pages = 0u32;
    let mut fetched_total = 0usize;
    let mut dup_in_run = 0usize;
    let mut seen: HashSet<i64> = HashSet::new();
    let mut advertised_total: Option<i64> = None;

    loop {
        if pages >= MAX_PAGES {
            tracing::warn!(run_id = ctx.run_id, pages, "products: page cap reached");
            break;
        }
        let page = match client.fetch_cards_page(cursor.as_ref(), page_size).await {
            Ok(page) => page,
            Err(e) => {
                // A page that never comes back leaves the catalog incomplete;
                // with a known total that must not read as success.
                if advertised_total.is_some() {
                    return Ok(JobOutcome::failure(
                        reason::INCOMPLETE_FAILED_PAGE,
                        e.to_string(),
                        json!({
                            "pages": pages,
                            "fetched_total": fetched_total,
                            "distinct_nm_id": seen.len(),
                            "expected_total": advertised_total,
                        }),
                    ));
                }
                return Err(e.into());
            }
        };
        if page.cards.is_empty() {
            break;
        }
        pages += 1;
        fetched_total += page.cards.len();
        if advertised_total.is_none() {
            advertised_total = page.total;
        }

        let mut rows: Vec<UpsertProduct> = Vec::with_capacity(page.cards.len());
        for card in &page.cards {
            let Some(nm_id) = card_nm_id(card) else {
                continue;
            };
            if !seen.insert(nm_id) {
                dup_in_run += 1;
                continue;
            }
            rows.push(UpsertProduct {
                nm_id,
                vendor_code: card_vendor_code(card),
                title: card_title(card),
                brand: card_brand(card),
                subject_name: card_subject_name(card),
                raw: card.clone(),
            });
        }
        if !rows.is_empty() {
            wbops_db::upsert_products(&ctx.pool, ctx.project_id, &rows).await?;
        }

        let alive = wbops_db::heartbeat(&ctx.pool, ctx.run_id).await?;
        if !alive {
            tracing::warn!(run_id = ctx.run_id, "products: run no longer running, aborting");
            return Ok(JobOutcome::AlreadyFinalized);
        }
        let progress = json!({
            "phase": "fetch_page",
            "page": pages,
            "fetched_total": fetched_total,
            "distinct_nm_id": seen.len(),
            "expected_total": advertised_total,
        });
        wbops_db::set_progress(&ctx.pool, ctx.run_id, &progress).await?;

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    if let Some(total) = advertised_total.filter(|t| *t > 0) {
        let coverage = seen.len() as f64 / total as f64;
        if coverage < MIN_COVERAGE {
            return Ok(JobOutcome::failure(
                reason::INCOMPLETE_LOW_COVERAGE,
                format!("coverage {coverage:.3} below {MIN_COVERAGE} of {total} cards"),
                json!({
                    "pages": pages,
                    "fetched_total": fetched_total,
                    "distinct_nm_id": seen.len(),
                    "expected_total": total,
                    "coverage": coverage,
                }),
            ));
        }
    }

    let mut stats = json!({
        "pages": pages,
        "fetched_total": fetched_total,
        "distinct_nm_id": seen.len(),
        "dup_in_run": dup_in_run,
        "expected_total": advertised_total,
    });
    chain_build_rrp_snapshots(ctx, &mut stats).await;
    Ok(JobOutcome::success(stats))
}

/// After a successful catalog import, queue a chained RRP snapshot build when
/// the tenant's Internal Data carries RRP rows. Best effort: a chaining
/// failure never fails the products run.
async fn chain_build_rrp_snapshots(ctx: &RunContext, stats: &mut serde_json::Value) {
    let has_rrp = match wbops_db::has_rrp_rows(&ctx.pool, ctx.project_id).await {
        Ok(has) => has,
        Err(e) => {
            tracing::warn!(run_id = ctx.run_id, error = %e, "products: rrp lookup failed, skipping chain");
            stats["chained_build_error"] = json!(e.to_string());
            return;
        }
    };
    if !has_rrp {
        stats["chained_build_skipped"] = json!("no_internal_rrp_rows");
        return;
    }

    let created = runs::create_queued(
        &ctx.pool,
        &ctx.registry,
        &ctx.config,
        ctx.project_id,
        "internal",
        "build_rrp_snapshots",
        None,
        TriggeredBy::Chained,
        Some(json!({
            "chained_from_job": "products",
            "chained_from_run_id": ctx.run_id,
        })),
        "products",
    )
    .await;

    match created {
        Ok(outcome) => {
            stats["chained_build_run_id"] = json!(outcome.run.id);
        }
        Err(IngestError::ActiveRunExists { .. } | IngestError::LockNotAcquired) => {
            stats["chained_build_skipped"] = json!("already_queued_or_running");
        }
        Err(e) => {
            tracing::warn!(run_id = ctx.run_id, error = %e, "products: chaining failed");
            stats["chained_build_error"] = json!(e.to_string());
        }
    }
}
