//! Request guards applied in front of every plugin route.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use keeper_config::server::RateSettings;
use tokio::time::Instant;
use tracing::debug;

/// Paths served without a token.
const PUBLIC_PATHS: &[&str] = &["/health", "/ready", "/version", "/metrics"];
const PUBLIC_PREFIXES: &[&str] = &["/swagger-ui", "/api-docs"];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

pub struct ApiToken(pub String);

/// Bearer token check: 401 without a token, 403 with a wrong one.
pub async fn require_token(
    State(expected): State<Arc<ApiToken>>,
    request: Request,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == expected.0 => next.run(request).await,
        Some(_) => keeper_core::forbidden().build().into_response(),
        None => keeper_core::unauthorized().build().into_response(),
    }
}

struct Bucket {
    tokens: f64,
    refilled: Instant,
}

/// Token bucket refilled at `tps` per second holding at most `size` tokens.
pub struct RateLimiter {
    tps: f64,
    size: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(settings: &RateSettings) -> Self {
        let size = settings.size.max(1) as f64;
        Self {
            tps: settings.tps as f64,
            size,
            bucket: Mutex::new(Bucket {
                tokens: size,
                refilled: Instant::now(),
            }),
        }
    }

    /// A `tps` of zero disables the limit.
    pub fn try_acquire(&self) -> bool {
        if self.tps <= 0.0 {
            return true;
        }
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.tps).min(self.size);
        bucket.refilled = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        return next.run(request).await;
    }
    debug!("Rate limit exceeded for {}", request.uri().path());
    keeper_core::too_many_requests().build().into_response()
}
