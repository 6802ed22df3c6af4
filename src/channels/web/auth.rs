//! `X-API-KEY` guard and request rate limiting for the operator API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::channels::web::types::ApiResponse;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AuthState {
    pub api_key: Arc<SecretString>,
}

fn reject(status: StatusCode, code: &'static str, message: &str) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        message: Some(message.to_string()),
        data: None,
        code: Some(code),
    };
    (status, Json(body)).into_response()
}

/// Compare the presented key against the configured one in constant time.
pub fn api_key_matches(expected: &SecretString, presented: &str) -> bool {
    let expected = expected.expose_secret().as_bytes();
    let presented = presented.as_bytes();
    expected.len() == presented.len() && bool::from(expected.ct_eq(presented))
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match presented {
        None => reject(
            StatusCode::UNAUTHORIZED,
            "security.api_key_missing",
            "API key is required",
        ),
        Some(key) if !api_key_matches(&auth.api_key, key) => reject(
            StatusCode::FORBIDDEN,
            "security.api_key_invalid",
            "Invalid API key",
        ),
        Some(_) => next.run(request).await,
    }
}

/// Windowed request counter shared by every guarded route.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    max_requests: u64,
    window_secs: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RateLimiter {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(now_secs()),
            max_requests,
            window_secs: window.as_secs().max(1),
        }
    }

    /// Consume one request. `false` once the window is exhausted.
    pub fn check(&self) -> bool {
        let now = now_secs();
        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests.saturating_sub(1), Ordering::Relaxed);
            return self.max_requests > 0;
        }

        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.check() {
        return reject(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Too many requests, please try again later",
        );
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_comparison() {
        let key = SecretString::from("k3y-value".to_string());
        assert!(api_key_matches(&key, "k3y-value"));
        assert!(!api_key_matches(&key, "k3y-valuE"));
        assert!(!api_key_matches(&key, "k3y"));
        assert!(!api_key_matches(&key, ""));
    }

    #[test]
    fn limiter_stops_after_budget() {
        let limiter = RateLimiter::new(3, Duration::from_secs(900));
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }
}
