use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::HandlerKey;
use crate::ratelimit::headers::RateLimitHeaders;

/// What we know about the quota of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketState {
    pub(crate) limit: Option<u32>,
    pub(crate) remaining: u32,
    pub(crate) reset_at: Option<Instant>,
}

impl Default for BucketState {
    fn default() -> Self {
        // Until the server tells us otherwise, assume one request is fine
        Self {
            limit: None,
            remaining: 1,
            reset_at: None,
        }
    }
}

impl BucketState {
    /// How long requests have to wait before the bucket has quota again
    pub(crate) fn time_to_reset(&self, now: Instant) -> Option<Duration> {
        match self.reset_at {
            Some(reset_at) if self.remaining == 0 && reset_at > now => Some(reset_at - now),
            _ => None,
        }
    }

    /// Apply the state reported by a response
    pub(crate) fn update(&mut self, headers: &RateLimitHeaders, offset: Duration, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = remaining;
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = Some(now + reset_after + offset);
        }
    }

    /// Block the bucket until `reset_at`
    pub(crate) fn throttle(&mut self, reset_at: Instant) {
        self.remaining = 0;
        self.reset_at = Some(reset_at);
    }
}

/// The quota state of every `(bucket, partition)` pair.
///
/// The state lives outside of the handlers so that it survives the move
/// from a local placeholder bucket to the bucket reported by the server.
#[derive(Debug, Default)]
pub(crate) struct BucketStates {
    states: DashMap<HandlerKey, BucketState>,
}

impl BucketStates {
    pub(crate) fn get(&self, key: &HandlerKey) -> BucketState {
        self.states.get(key).map(|state| *state).unwrap_or_default()
    }

    /// Apply `change` to the state of `key`, and mirror the result to
    /// `discovered` if the server reported a different bucket
    pub(crate) fn modify(
        &self,
        key: &HandlerKey,
        discovered: Option<&HandlerKey>,
        change: impl FnOnce(&mut BucketState),
    ) {
        let state = {
            let mut state = self.states.entry(key.clone()).or_default();
            change(&mut state);
            *state
        };
        if let Some(discovered) = discovered {
            self.states.insert(discovered.clone(), state);
        }
    }

    /// Forget the state of every key for which `keep` returns `false`
    pub(crate) fn retain(&self, keep: impl Fn(&HandlerKey, &BucketState) -> bool) {
        self.states.retain(|key, state| keep(key, state));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}
