//! Observability hooks.
//!
//! The dispatcher reports what happens behind the scenes (throttling,
//! sweeps, retries) through a [`Notifier`]. Notifications are
//! fire-and-forget: a notifier cannot influence request handling.

use std::fmt::Debug;
use std::time::Duration;

use crate::ratelimit::{BucketEntry, HandlerKey, RateLimitData};

/// Something worth reporting
#[derive(Debug, Clone)]
pub enum Event {
    /// Debug trace
    Debug(String),
    /// A request had to wait for a rate limit
    RateLimited(RateLimitData),
    /// Bucket mappings removed by a sweep, as `(method:bucket route, entry)`
    BucketSweep(Vec<(String, BucketEntry)>),
    /// Handlers removed by a sweep
    HandlerSweep(Vec<HandlerKey>),
    /// Many requests were rejected as invalid within the current window
    InvalidRequestWarning {
        /// Number of invalid requests in the current window
        count: u32,
        /// Time left until the window resets
        remaining_time: Duration,
    },
}

/// A sink for [`Event`]s
pub trait Notifier: Send + Sync + Debug {
    /// Report an event; must not block
    fn notify(&self, event: Event);
}

/// Forwards events to the [`log`] facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        match event {
            Event::Debug(message) => log::debug!("{message}"),
            Event::RateLimited(data) => log::info!(
                "Rate limited on {} {} (bucket {}, global: {}), waiting {}ms",
                data.method,
                data.route,
                data.bucket,
                data.global,
                data.time_to_reset.as_millis()
            ),
            Event::BucketSweep(entries) => {
                log::debug!("Swept {} bucket mapping(s)", entries.len());
            }
            Event::HandlerSweep(keys) => log::debug!("Swept {} idle handler(s)", keys.len()),
            Event::InvalidRequestWarning {
                count,
                remaining_time,
            } => log::warn!(
                "{count} invalid requests in the current window, which resets in {}s",
                remaining_time.as_secs()
            ),
        }
    }
}
