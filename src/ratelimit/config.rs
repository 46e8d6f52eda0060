use http::{HeaderMap, HeaderName, HeaderValue};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::{ErrorKind, Result};

/// Default API base URL
pub const DEFAULT_API: &str = "https://discord.com/api";

/// Default API version
const DEFAULT_VERSION: u32 = 10;

/// Default number of requests allowed per second across all buckets
const DEFAULT_GLOBAL_REQUESTS_PER_SECOND: u32 = 50;

/// Default extra wait added to every server-provided reset
const DEFAULT_OFFSET: Duration = Duration::from_millis(50);

/// Default time a bucket mapping may stay unused before it is swept
const DEFAULT_HASH_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between bucket sweeps
const DEFAULT_HASH_SWEEP_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Default interval between handler sweeps
const DEFAULT_HANDLER_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default number of retries for server errors and failed connections
const DEFAULT_RETRIES: u32 = 3;

/// Default wait before retrying a server error, scaled by the attempt number
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Default number of times a single request may be throttled before giving up
const DEFAULT_RATE_LIMIT_RETRIES: u32 = 10;

/// Default timeout for a single transport call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Sweep intervals above this are rejected
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Authorization scheme put in front of the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthPrefix {
    /// `Authorization: Bot <token>`
    #[default]
    Bot,
    /// `Authorization: Bearer <token>`
    Bearer,
}

impl fmt::Display for AuthPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bot => write!(f, "Bot"),
            Self::Bearer => write!(f, "Bearer"),
        }
    }
}

/// Options for the underlying HTTP connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// How long idle connections are kept open
    #[serde(default = "default_pool_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Maximum idle connections kept per host
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_pool_idle_timeout(),
            max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

const fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

const fn default_pool_max_idle_per_host() -> usize {
    32
}

/// Configuration of a [`Dispatcher`](crate::Dispatcher)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestConfig {
    /// Base URL of the API, without a trailing slash
    #[serde(default = "default_api")]
    pub api: String,

    /// API version inserted as `/v{version}` into versioned requests
    #[serde(default = "default_version")]
    pub version: u32,

    /// Requests allowed per second across all buckets
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,

    /// Extra wait added to every reset reported by the server
    #[serde(default = "default_offset", with = "humantime_serde")]
    pub offset: Duration,

    /// How long a bucket mapping may stay unused before it is swept
    #[serde(default = "default_hash_lifetime", with = "humantime_serde")]
    pub hash_lifetime: Duration,

    /// Interval between bucket sweeps; zero disables sweeping
    #[serde(default = "default_hash_sweep_interval", with = "humantime_serde")]
    pub hash_sweep_interval: Duration,

    /// Interval between handler sweeps; zero disables sweeping
    #[serde(default = "default_handler_sweep_interval", with = "humantime_serde")]
    pub handler_sweep_interval: Duration,

    /// Emit an invalid request warning every this many invalid requests;
    /// zero disables the warning
    #[serde(default)]
    pub invalid_request_warning_interval: u32,

    /// Retries for server errors and failed connections
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Wait before retrying a server error, scaled by the attempt number
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// How often a single request may be throttled before it fails
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    /// Route prefixes which fail with [`ErrorKind::RateLimited`] instead
    /// of waiting when throttled
    #[serde(default)]
    pub reject_on_rate_limit: Vec<String>,

    /// Timeout of a single transport call
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Authorization scheme
    #[serde(default)]
    pub auth_prefix: AuthPrefix,

    /// Credential used for authorized requests
    #[serde(default, skip_serializing)]
    pub token: Option<SecretString>,

    /// Appended to the default user agent
    #[serde(default)]
    pub user_agent_suffix: Vec<String>,

    /// Headers sent with every request
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,

    /// Connection pool options
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api: default_api(),
            version: DEFAULT_VERSION,
            global_requests_per_second: DEFAULT_GLOBAL_REQUESTS_PER_SECOND,
            offset: DEFAULT_OFFSET,
            hash_lifetime: DEFAULT_HASH_LIFETIME,
            hash_sweep_interval: DEFAULT_HASH_SWEEP_INTERVAL,
            handler_sweep_interval: DEFAULT_HANDLER_SWEEP_INTERVAL,
            invalid_request_warning_interval: 0,
            retries: DEFAULT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
            reject_on_rate_limit: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            auth_prefix: AuthPrefix::Bot,
            token: None,
            user_agent_suffix: Vec::new(),
            headers: HeaderMap::new(),
            pool: PoolConfig::default(),
        }
    }
}

fn default_api() -> String {
    DEFAULT_API.to_string()
}

const fn default_version() -> u32 {
    DEFAULT_VERSION
}

const fn default_global_requests_per_second() -> u32 {
    DEFAULT_GLOBAL_REQUESTS_PER_SECOND
}

const fn default_offset() -> Duration {
    DEFAULT_OFFSET
}

const fn default_hash_lifetime() -> Duration {
    DEFAULT_HASH_LIFETIME
}

const fn default_hash_sweep_interval() -> Duration {
    DEFAULT_HASH_SWEEP_INTERVAL
}

const fn default_handler_sweep_interval() -> Duration {
    DEFAULT_HANDLER_SWEEP_INTERVAL
}

const fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

const fn default_retry_backoff() -> Duration {
    DEFAULT_RETRY_BACKOFF
}

const fn default_rate_limit_retries() -> u32 {
    DEFAULT_RATE_LIMIT_RETRIES
}

const fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl RestConfig {
    /// Check a sweep interval.
    ///
    /// Returns `None` if sweeping is disabled, i.e. the interval is zero or
    /// unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidSweepInterval`] if the interval exceeds
    /// [`MAX_SWEEP_INTERVAL`].
    pub(crate) fn sweep_interval(
        name: &'static str,
        interval: Duration,
    ) -> Result<Option<Duration>> {
        if interval.is_zero() || interval == Duration::MAX {
            return Ok(None);
        }
        if interval > MAX_SWEEP_INTERVAL {
            return Err(ErrorKind::InvalidSweepInterval { name, interval });
        }
        Ok(Some(interval))
    }
}

/// Custom deserializer for headers from TOML config format
fn deserialize_headers<'de, D>(deserializer: D) -> std::result::Result<HeaderMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    let mut header_map = HeaderMap::new();

    for (name, value) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("Invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            serde::de::Error::custom(format!("Invalid header value '{value}': {e}"))
        })?;
        header_map.insert(header_name, header_value);
    }

    Ok(header_map)
}

/// Custom serializer for headers to TOML config format
fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    map.serialize(serializer)
}
