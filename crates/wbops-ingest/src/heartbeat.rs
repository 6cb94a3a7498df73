//! Heartbeat-aware sleeping.
//!
//! Any wait longer than a few seconds must be chunked so the stuck detector
//! keeps seeing a live `heartbeat_at`. One uninterrupted 120 s rate-limit
//! sleep would otherwise read as a dead runner and cause self-cancellation.

use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;

/// Largest single chunk slept between heartbeats.
pub const HEARTBEAT_TICK_SECS: u64 = 10;

/// Sleeps `total` in chunks of at most 10 s, touching `heartbeat_at` after
/// each chunk and, when `progress` is given, rewriting the run's stats with
/// `sleeping: true` and the remaining seconds.
///
/// Returns `false` as soon as a heartbeat reports the run is no longer
/// `running` — the sweeper or an operator flipped it, and the caller should
/// stop cleanly without its final write.
pub async fn sleep_with_heartbeat(
    pool: &PgPool,
    run_id: i64,
    total: Duration,
    progress: Option<&Value>,
) -> bool {
    let mut remaining = total;
    loop {
        if remaining.is_zero() {
            return true;
        }
        let chunk = remaining.min(Duration::from_secs(HEARTBEAT_TICK_SECS));
        tokio::time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);

        match wbops_db::heartbeat(pool, run_id).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                // A transient heartbeat failure must never abort ingestion.
                tracing::debug!(run_id, error = %e, "heartbeat update failed");
            }
        }

        if let Some(progress) = progress {
            let mut stats = progress.clone();
            if let Value::Object(map) = &mut stats {
                map.insert("sleeping".to_owned(), Value::Bool(true));
                map.insert(
                    "sleep_remaining_seconds".to_owned(),
                    Value::from(remaining.as_secs()),
                );
            }
            if let Err(e) = wbops_db::set_progress(pool, run_id, &stats).await {
                tracing::debug!(run_id, error = %e, "progress update failed");
            }
        }
    }
}
