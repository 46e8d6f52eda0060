use std::sync::Arc;
use std::time::Duration;

use super::invalid::InvalidRequestTracker;
use super::state::BucketStates;
use crate::notify::{Event, Notifier};
use crate::ratelimit::{BucketRegistry, GlobalLimiter, RestConfig};
use crate::transport::Transport;

/// Retry behaviour of the handlers
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub(crate) retries: u32,
    pub(crate) retry_backoff: Duration,
    pub(crate) rate_limit_retries: u32,
    pub(crate) offset: Duration,
    pub(crate) reject_on_rate_limit: Vec<String>,
}

impl RetryPolicy {
    pub(crate) fn rejects(&self, route: &str) -> bool {
        self.reject_on_rate_limit
            .iter()
            .any(|prefix| route.starts_with(prefix.as_str()))
    }
}

impl From<&RestConfig> for RetryPolicy {
    fn from(config: &RestConfig) -> Self {
        Self {
            retries: config.retries,
            retry_backoff: config.retry_backoff,
            rate_limit_retries: config.rate_limit_retries,
            offset: config.offset,
            reject_on_rate_limit: config.reject_on_rate_limit.clone(),
        }
    }
}

/// Everything a handler shares with the rest of the dispatcher
#[derive(Debug)]
pub(crate) struct HandlerContext {
    pub(crate) global: GlobalLimiter,
    pub(crate) buckets: BucketRegistry,
    pub(crate) states: BucketStates,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) invalid_requests: InvalidRequestTracker,
    pub(crate) policy: RetryPolicy,
}

impl HandlerContext {
    pub(crate) fn new(
        config: &RestConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            global: GlobalLimiter::new(config.global_requests_per_second, config.offset),
            buckets: BucketRegistry::new(),
            states: BucketStates::default(),
            transport,
            notifier,
            invalid_requests: InvalidRequestTracker::new(
                config.invalid_request_warning_interval,
            ),
            policy: RetryPolicy::from(config),
        }
    }

    pub(crate) fn debug(&self, message: String) {
        self.notifier.notify(Event::Debug(message));
    }
}
