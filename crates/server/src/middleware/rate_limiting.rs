use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use anky_core::limiter::{RateLimitDecision, RateLimiter};

use crate::middleware::auth::AgentContext;

/// Derives the rate-limit key for unauthenticated requests: first entry of
/// `x-forwarded-for`, then `x-real-ip`, then a literal `"unknown"`.
/// Never fails.
#[must_use]
pub fn client_key(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    "unknown".to_string()
}

/// Rate limiting middleware for IP-keyed classes (registration, public
/// reads).
///
/// Rejection is a normal outcome: a 429 with a `retryAfter` hint, reported
/// at warn level, never an error.
pub async fn ip_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(request.headers());
    enforce(&limiter, &key, request, next).await
}

/// Rate limiting middleware for the caller-keyed submission class. Runs
/// after authentication and keys by agent id, falling back to the IP
/// derivation if no agent context is present.
pub async fn agent_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<AgentContext>()
        .map_or_else(|| client_key(request.headers()), |agent| agent.id.clone());
    enforce(&limiter, &key, request, next).await
}

async fn enforce(
    limiter: &RateLimiter,
    key: &str,
    request: Request<Body>,
    next: Next,
) -> Response {
    let decision = limiter.check_and_increment(key);

    if !decision.allowed {
        tracing::warn!(limiter = limiter.name(), client = key, "rate limit exceeded");

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many requests",
                "retryAfter": decision.reset_in_seconds,
            })),
        )
            .into_response();
        apply_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();

    let numeric = |value: String| {
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("0"))
    };

    headers.insert("x-ratelimit-limit", numeric(decision.limit.to_string()));
    headers.insert("x-ratelimit-remaining", numeric(decision.remaining.to_string()));
    headers.insert("x-ratelimit-reset", numeric(decision.reset_in_seconds.to_string()));
}
