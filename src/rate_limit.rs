//! Per-client rate limiting for the exchange endpoints

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use serde_json::json;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::RateLimitConfig;

/// Keyed limiter shared by every request
#[derive(Clone)]
pub struct ClientRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    limit: u32,
}

impl ClientRateLimiter {
    /// `None` when limiting is disabled
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        let max_requests = NonZeroU32::new(config.max_requests)?;
        let window = if config.window.is_zero() {
            Duration::from_secs(60)
        } else {
            config.window
        };

        // Replenish one cell every window / max_requests, bursting up to max_requests
        let period = window / max_requests.get();
        let quota = Quota::with_period(period)?.allow_burst(max_requests);

        Some(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            limit: max_requests.get(),
        })
    }

    /// Seconds until the client may retry, or `None` when the request is allowed
    pub fn check(&self, key: &str) -> Option<u64> {
        // Clients are keyed by a header the caller controls, so drop idle entries now and then
        if rand::random::<f32>() < 0.01 {
            self.prune();
        }

        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => None,
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Some(wait.as_secs().max(1))
            }
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Forget clients whose budget has fully replenished
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Extract client identifier from request
    fn client_key(request: &Request) -> String {
        if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
            if let Ok(value) = forwarded_for.to_str() {
                if let Some(ip) = value.split(',').next() {
                    return ip.trim().to_string();
                }
            }
        }

        if let Some(real_ip) = request.headers().get("x-real-ip") {
            if let Ok(value) = real_ip.to_str() {
                return value.to_string();
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|conn_info| conn_info.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<ClientRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    // The connectivity probe is never limited
    if request.uri().path() == "/test" {
        return next.run(request).await;
    }

    let client_key = ClientRateLimiter::client_key(&request);
    let Some(retry_after) = limiter.check(&client_key) else {
        return next.run(request).await;
    };

    warn!(client = %client_key, "Rate limit exceeded");
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "retry_after": retry_after,
            "limit": limiter.limit,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limiter.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
    headers.insert("Retry-After", HeaderValue::from(retry_after));

    response
}
