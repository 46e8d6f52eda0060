//! Bucket-aware rate limiting.
//!
//! The API announces its quotas through response headers, so the client
//! learns them as it goes. This module keeps track of what it learned.
//!
//! # Architecture
//!
//! - [`GlobalLimiter`]: the account-wide ceiling shared by every bucket
//! - [`BucketRegistry`]: which server-side bucket each route belongs to
//! - [`HandlerRegistry`]: one [`SequentialHandler`] per bucket and partition
//! - [`SequentialHandler`]: sends the requests of one bucket in order,
//!   reads the rate limit headers and retries throttled requests
//! - [`RestConfig`]: configuration of all of the above

mod bucket;
mod config;
mod global;
mod handler;
mod headers;
mod pool;

pub use bucket::{BucketEntry, BucketRegistry, Expiry};
pub use config::{AuthPrefix, DEFAULT_API, MAX_SWEEP_INTERVAL, PoolConfig, RestConfig};
pub use global::GlobalLimiter;
pub(crate) use handler::HandlerContext;
pub use handler::{HandlerKey, Reservation, SequentialHandler};
pub use headers::RateLimitScope;
pub use pool::HandlerRegistry;

use http::Method;
use std::time::Duration;

/// Details about a rate limit hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitData {
    /// How long until the request can be sent
    pub time_to_reset: Duration,
    /// Request limit of the bucket, if known
    pub limit: Option<u32>,
    /// Method of the throttled request
    pub method: Method,
    /// Bucket ID of the throttled request
    pub bucket: String,
    /// Full URL of the throttled request
    pub url: String,
    /// Bucket route of the throttled request
    pub route: String,
    /// Partition key of the throttled request
    pub major_parameter: String,
    /// Whether the account-wide limit was hit
    pub global: bool,
    /// Scope of the limit
    pub scope: RateLimitScope,
}
