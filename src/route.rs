//! Map concrete API routes onto the quota buckets that govern them.
//!
//! The server accounts requests per bucket, but it never tells us up front
//! which routes share a bucket. We therefore derive a *bucket route* from
//! every path: snowflake IDs are replaced with `:id` and high-cardinality
//! suffixes are collapsed, so that requests with the same quota shape end
//! up in the same place. The *partition key* keeps different top-level
//! resources apart even when they share a quota shape.

use http::Method;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Partition key used when a route has no major parameter
pub const GLOBAL_PARTITION: &str = "global";

/// Milliseconds between the Unix epoch and the snowflake epoch (2015-01-01)
const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// Messages older than this are deleted under a separate quota
const OLD_MESSAGE_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 14);

/// Suffix added to the bucket route of aged message deletions
const OLD_MESSAGE_DELETE: &str = "/Delete Old Message";

static MAJOR_PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(?:channels|guilds|webhooks)/(\d{16,19})\b").unwrap());

static SNOWFLAKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{16,19}\b").unwrap());

static REACTIONS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/reactions/(.*)").unwrap());

static TRAILING_SNOWFLAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{16,19})$").unwrap());

/// The result of classifying a route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassifiedRoute {
    /// Isolates resources which must never share a queue
    pub partition_key: String,
    /// Quota-shape fingerprint of the route
    pub bucket_route: String,
    /// The route as it was requested
    pub original_route: String,
}

/// Classify `route` for `method` as of now.
///
/// ```
/// use http::Method;
/// use rest_ratelimit::route::classify;
///
/// let route = classify("/channels/123456789012345678/messages/234567890123456789/reactions/%F0%9F%91%8D/@me", &Method::PUT);
/// assert_eq!(route.partition_key, "123456789012345678");
/// assert_eq!(route.bucket_route, "/channels/:id/messages/:id/reactions/:reaction");
/// ```
#[must_use]
pub fn classify(route: &str, method: &Method) -> ClassifiedRoute {
    classify_at(route, method, SystemTime::now())
}

/// Classify `route` for `method` as if the current time was `now`.
///
/// The clock only matters for deletions of aged messages.
#[must_use]
pub fn classify_at(route: &str, method: &Method, now: SystemTime) -> ClassifiedRoute {
    let path = route.split('?').next().unwrap_or(route);

    let partition_key = MAJOR_PARAMETER
        .captures(path)
        .and_then(|captures| captures.get(1))
        .map_or(GLOBAL_PARTITION, |m| m.as_str())
        .to_string();

    let normalized = SNOWFLAKE.replace_all(path, ":id");
    let mut bucket_route = REACTIONS
        .replace(&normalized, "/reactions/:reaction")
        .into_owned();

    if *method == Method::DELETE
        && bucket_route == "/channels/:id/messages/:id"
        && let Some(id) = TRAILING_SNOWFLAKE.captures(path).and_then(|c| c.get(1))
        && let Some(created) = snowflake_timestamp(id.as_str())
        && now
            .duration_since(created)
            .is_ok_and(|age| age > OLD_MESSAGE_AGE)
    {
        bucket_route.push_str(OLD_MESSAGE_DELETE);
    }

    ClassifiedRoute {
        partition_key,
        bucket_route,
        original_route: route.to_string(),
    }
}

/// Decode the creation time embedded in a snowflake ID
#[must_use]
pub fn snowflake_timestamp(id: &str) -> Option<SystemTime> {
    let id = id.parse::<u64>().ok()?;
    let millis = (id >> 22) + SNOWFLAKE_EPOCH_MS;
    UNIX_EPOCH.checked_add(Duration::from_millis(millis))
}

#[cfg(test)]
pub(crate) fn snowflake_at(time: SystemTime) -> String {
    let millis = time.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;
    ((millis - SNOWFLAKE_EPOCH_MS) << 22).to_string()
}
