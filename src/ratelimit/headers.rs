//! Handle rate limiting headers.
//!
//! Buckets are announced through a family of `X-RateLimit-*` headers.
//! Throttled responses additionally carry `Retry-After`, and
//! `X-RateLimit-Global` marks a response that was limited account-wide.

use http::{HeaderMap, HeaderValue};
use std::time::{Duration, SystemTime};
use thiserror::Error;

const BUCKET: &str = "x-ratelimit-bucket";
const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const SCOPE: &str = "x-ratelimit-scope";
const RETRY_AFTER: &str = "retry-after";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// The scope a 429 applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitScope {
    /// The limit is tracked for this client only
    #[default]
    User,
    /// The limit is account-wide
    Global,
    /// The limit is shared with other clients of the same resource
    Shared,
}

/// The rate limit state reported by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RateLimitHeaders {
    pub(crate) bucket: Option<String>,
    pub(crate) limit: Option<u32>,
    pub(crate) remaining: Option<u32>,
    /// Time until the bucket resets, preferring `reset-after` over `reset`
    pub(crate) reset_after: Option<Duration>,
    pub(crate) retry_after: Option<Duration>,
    pub(crate) global: bool,
    pub(crate) scope: RateLimitScope,
}

impl RateLimitHeaders {
    pub(crate) fn parse(headers: &HeaderMap) -> Self {
        let reset_after = parse_seconds(headers, RESET_AFTER).or_else(|| {
            let reset = parse_float(headers, RESET)?;
            let reset =
                SystemTime::UNIX_EPOCH.checked_add(Duration::try_from_secs_f64(reset).ok()?)?;
            Some(reset.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
        });

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|value| parse_retry_after(value).ok());

        let global = headers
            .get(GLOBAL)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        let scope = match headers.get(SCOPE).and_then(|v| v.to_str().ok()) {
            Some("global") => RateLimitScope::Global,
            Some("shared") => RateLimitScope::Shared,
            _ if global => RateLimitScope::Global,
            _ => RateLimitScope::User,
        };

        Self {
            bucket: headers
                .get(BUCKET)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(String::from),
            limit: parse_header_value(headers, LIMIT),
            remaining: parse_header_value(headers, REMAINING),
            reset_after,
            retry_after,
            global,
            scope,
        }
    }
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Fractional seconds are accepted as well, since rate limited APIs
/// commonly report sub-second delays.
pub(crate) fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?;

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map_or_else(
            || {
                httpdate::parse_http_date(value)
                    .map(|s| {
                        s.duration_since(SystemTime::now())
                            // if date is in the past, we can use ZERO
                            .unwrap_or(Duration::ZERO)
                    })
                    .map_err(|_| RetryAfterParseError::ValueError(value.into()))
            },
            Ok,
        )
}

fn parse_seconds(headers: &HeaderMap, name: &str) -> Option<Duration> {
    parse_float(headers, name).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_float(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers.get(name)?.to_str().ok()?.parse::<f64>().ok()
}

/// Helper method to parse numeric header values
fn parse_header_value(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse::<u32>().ok()
}
