//! Request-id propagation, bearer auth, and a fixed-window rate limit for
//! the HTTP surface. Session/membership auth lives outside this process;
//! the bearer token is the process boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is:
/// - Inserted into request extensions as [`RequestId`]
/// - Set on the response as the `x-request-id` header
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Bearer-token auth configuration. `None` disables the check (development).
#[derive(Clone)]
pub struct AuthState {
    expected_token: Option<Arc<String>>,
}

impl AuthState {
    #[must_use]
    pub fn new(expected_token: Option<String>) -> Self {
        Self {
            expected_token: expected_token.map(Arc::new),
        }
    }
}

/// Rejects requests without the configured bearer token. Token comparison is
/// constant-time.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = &auth.expected_token else {
        return Ok(next.run(req).await);
    };

    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token.as_bytes().ct_eq(expected.as_bytes()).into() => {
            Ok(next.run(req).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// In-memory fixed-window rate limiter keyed by client identity (bearer
/// token when present, else the remote address header).
#[derive(Clone)]
pub struct RateLimitState {
    inner: Arc<Mutex<HashMap<String, (Instant, u32)>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    fn check(&self, key: &str) -> bool {
        let Ok(mut windows) = self.inner.lock() else {
            return true;
        };
        let now = Instant::now();
        let entry = windows.entry(key.to_owned()).or_insert((now, 0));
        if now.duration_since(entry.0) > self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_requests
    }
}

pub async fn enforce_rate_limit(
    State(limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .or_else(|| req.headers().get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_owned();

    if limit.check(&key) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_allows_up_to_the_cap() {
        let state = RateLimitState::new(3, Duration::from_secs(60));
        assert!(state.check("k"));
        assert!(state.check("k"));
        assert!(state.check("k"));
        assert!(!state.check("k"));
        // Other keys have their own window.
        assert!(state.check("other"));
    }
}
