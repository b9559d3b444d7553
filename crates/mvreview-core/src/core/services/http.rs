//! Shared HTTP plumbing for the remote adapters

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::core::{CoreError, CoreResult};

/// Unkeyed in-memory rate limiter, one per adapter
pub type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const MAX_ERROR_BODY_CHARS: usize = 300;

/// Builds a limiter allowing `requests_per_second` (at least one)
pub fn rate_limiter(requests_per_second: u32) -> DirectLimiter {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rps))
}

/// Builds an HTTP client with a user agent and a total request timeout
pub fn build_client(user_agent: &str, timeout: Duration) -> CoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Parses a `Retry-After` header: delta seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs.saturating_mul(1000));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let ms = (at.with_timezone(&Utc) - now).num_milliseconds();
    Some(ms.max(0) as u64)
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Maps a non-success HTTP status to a typed error
pub fn status_error(service: &str, status: u16, retry_after_ms: Option<u64>, body: &str) -> CoreError {
    match status {
        429 => CoreError::RateLimited {
            service: service.to_string(),
            retry_after_ms,
        },
        503 if retry_after_ms.is_some() => CoreError::RateLimited {
            service: service.to_string(),
            retry_after_ms,
        },
        _ => CoreError::request_failed(service, Some(status), truncate(body)),
    }
}

fn transport_error(service: &str, err: reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Timeout(format!("{} request: {}", service, err))
    } else {
        CoreError::request_failed(service, None, err.to_string())
    }
}

/// Sends a request and returns the body of a successful response
pub async fn send(service: &str, request: reqwest::RequestBuilder) -> CoreResult<String> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(service, e))?;

    let status = response.status();
    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(service, e))?;

    if !status.is_success() {
        debug!("{} returned {}: {}", service, status, truncate(&body));
        return Err(status_error(service, status.as_u16(), retry_after_ms, &body));
    }
    Ok(body)
}
