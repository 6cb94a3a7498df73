//! Minimum-interval pacing between requests to one endpoint family.
//!
//! Rate limits are per seller token, so a run must not fire requests faster
//! than the endpoint's documented interval. The pacer tracks the last request
//! instant and sleeps out the remainder before the next one.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct Pacer {
    min_interval: Duration,
    last_request_at: Mutex<Option<Instant>>,
}

impl Pacer {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request_at: Mutex::new(None),
        }
    }

    /// Sleeps until at least `min_interval` has passed since the previous
    /// call, then stamps the current instant.
    pub async fn pace(&self) {
        let mut last = self.last_request_at.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_call_does_not_sleep() {
        let pacer = Pacer::new(Duration::from_secs(60));
        let started = Instant::now();
        pacer.pace().await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn second_call_waits_out_the_interval() {
        let pacer = Pacer::new(Duration::from_millis(80));
        pacer.pace().await;
        let started = Instant::now();
        pacer.pace().await;
        assert!(
            started.elapsed() >= Duration::from_millis(70),
            "expected ~80ms pacing, got {:?}",
            started.elapsed()
        );
    }
}
