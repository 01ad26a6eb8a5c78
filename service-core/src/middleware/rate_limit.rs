//! Sliding-window rate limiting over a [`SortedSetStore`].
//!
//! Each identifier owns a sorted set `ratelimit:<identifier>` whose members
//! are request tokens scored by their unix timestamp. A check prunes tokens
//! that fell out of the trailing window, counts the rest and records a new
//! token when the request is admitted.

use crate::error::AppError;
use crate::store::SortedSetStore;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

pub fn rate_limit_key(identifier: &str) -> String {
    format!("ratelimit:{}", identifier)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    pub limit: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix seconds at which the oldest counted request leaves the window.
    pub reset_time: i64,
}

impl SlidingWindow {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    /// Evaluate one request for `identifier` at unix time `now`.
    pub async fn check<S>(
        &self,
        store: &S,
        identifier: &str,
        now: i64,
    ) -> Result<RateLimitDecision, AppError>
    where
        S: SortedSetStore + ?Sized,
    {
        let key = rate_limit_key(identifier);
        let window = self.window_seconds as i64;
        let window_start = now - window;

        store.remove_range_by_score(&key, 0, window_start).await?;

        let request_count = store.cardinality(&key).await?;
        let allowed = request_count < u64::from(self.limit);

        if allowed {
            let member = format!("{}-{}", now, token_suffix());
            store.add(&key, now, &member).await?;
            store.expire(&key, self.window_seconds).await?;
        }

        // Looked up after the insert: an empty window resets at now + window.
        let reset_time = match store.first_with_score(&key).await? {
            Some((_, oldest)) => oldest + window,
            None => now + window,
        };

        let remaining = u64::from(self.limit).saturating_sub(request_count) as u32;

        Ok(RateLimitDecision {
            allowed,
            remaining,
            reset_time,
        })
    }
}

fn token_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Request extension that names who a request is attributed to.
pub trait RateLimitSubject: Clone + Send + Sync + 'static {
    fn rate_limit_identifier(&self) -> String;
}

/// Middleware state: the window plus the store that holds it.
pub struct RateLimiter<S: ?Sized> {
    pub store: Arc<S>,
    pub window: SlidingWindow,
}

impl<S: ?Sized> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            window: self.window,
        }
    }
}

impl<S: ?Sized> RateLimiter<S> {
    pub fn new(store: Arc<S>, window: SlidingWindow) -> Self {
        Self { store, window }
    }
}

/// Rate limit by the request's [`RateLimitSubject`] extension, falling back
/// to the client IP. A store outage lets the request through.
pub async fn sliding_window_middleware<T, S>(
    State(limiter): State<RateLimiter<S>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError>
where
    T: RateLimitSubject,
    S: SortedSetStore + ?Sized + 'static,
{
    let identifier = match request.extensions().get::<T>() {
        Some(subject) => subject.rate_limit_identifier(),
        None => match client_ip(&request) {
            Some(ip) => format!("ip:{}", ip),
            None => {
                tracing::warn!("Could not determine identity or IP for rate limiting");
                return Ok(next.run(request).await);
            }
        },
    };

    let now = chrono::Utc::now().timestamp();
    let decision = match limiter
        .window
        .check(limiter.store.as_ref(), &identifier, now)
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(error = %e, identifier = %identifier, "Rate limit store unavailable, allowing request");
            return Ok(next.run(request).await);
        }
    };

    metrics::counter!(
        "rate_limit_decisions_total",
        "outcome" => if decision.allowed { "allowed" } else { "denied" }
    )
    .increment(1);

    if !decision.allowed {
        tracing::info!(identifier = %identifier, reset_time = decision.reset_time, "Rate limit exceeded");
        let retry_after = (decision.reset_time - now).max(0) as u64;
        return Err(AppError::TooManyRequests(
            "Too many requests. Please try again later.".to_string(),
            Some(retry_after),
        ));
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        RATE_LIMIT_LIMIT_HEADER,
        HeaderValue::from(limiter.window.limit),
    );
    // The admitted request consumed one slot.
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(decision.remaining.saturating_sub(1)),
    );
    headers.insert(
        RATE_LIMIT_RESET_HEADER,
        HeaderValue::from(decision.reset_time),
    );

    Ok(response)
}

fn client_ip(request: &Request) -> Option<std::net::IpAddr> {
    let forwarded_ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok());

    forwarded_ip.or_else(|| {
        request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|axum::extract::ConnectInfo(addr)| addr.ip())
    })
}
