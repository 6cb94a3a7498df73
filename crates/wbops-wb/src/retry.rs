//! Retry with exponential backoff for transient seller-API errors.
//!
//! Retriable: 429 and 5xx (surfaced as [`WbApiError::RateLimited`] /
//! [`WbApiError::UnexpectedStatus`] with a 5xx status) and network-level
//! failures. Auth rejections, 404s, and body-parse failures propagate
//! immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::WbApiError;

fn is_retriable(err: &WbApiError) -> bool {
    match err {
        WbApiError::RateLimited { .. } | WbApiError::Http(_) => true,
        WbApiError::UnexpectedStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Executes `operation` with exponential backoff on transient errors:
/// `min(base * 2^attempt, 30)` seconds plus up to one second of jitter.
/// `max_retries` counts additional attempts after the first.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_secs: u64,
    mut operation: F,
) -> Result<T, WbApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WbApiError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                let base = backoff_base_secs.saturating_mul(1u64 << attempt.min(62)).min(30);
                let jitter_ms: u64 = rand::rng().random_range(0..1000);
                let delay = Duration::from_secs(base) + Duration::from_millis(jitter_ms);
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_secs = base,
                    error = %err,
                    "transient WB API error — retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn rate_limited() -> WbApiError {
        WbApiError::RateLimited {
            endpoint: "cards/list".to_owned(),
            retry_after_secs: 0,
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, WbApiError>(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok::<u32, WbApiError>(9)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, WbApiError>(WbApiError::Unauthorized {
                    endpoint: "offices".to_owned(),
                    status: 401,
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(WbApiError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn retries_5xx_but_not_4xx() {
        let server_errors = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&server_errors);
        let _ = retry_with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, WbApiError>(WbApiError::UnexpectedStatus {
                    status: 503,
                    url: "u".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(server_errors.load(Ordering::SeqCst), 3);

        let client_errors = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&client_errors);
        let _ = retry_with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, WbApiError>(WbApiError::UnexpectedStatus {
                    status: 400,
                    url: "u".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(client_errors.load(Ordering::SeqCst), 1);
    }
}
