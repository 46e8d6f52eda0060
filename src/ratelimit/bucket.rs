use dashmap::DashMap;
use http::Method;
use std::time::Duration;
use tokio::time::Instant;

/// When a [`BucketEntry`] was last used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The entry is never swept
    Never,
    /// The entry is swept once it has been idle for too long
    LastAccess(Instant),
}

/// The bucket a `(method, bucket route)` pair belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Server-assigned bucket ID, or a local placeholder before discovery
    pub id: String,
    /// Activity tracking for sweeps
    pub expiry: Expiry,
}

impl BucketEntry {
    /// A placeholder used until the server tells us the real bucket
    #[must_use]
    pub fn local(method: &Method, bucket_route: &str) -> Self {
        Self {
            id: format!("Local({method}:{bucket_route})"),
            expiry: Expiry::LastAccess(Instant::now()),
        }
    }

    /// Whether this entry is a placeholder
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.id.starts_with("Local(")
    }

    fn touch(&mut self) {
        if let Expiry::LastAccess(last) = &mut self.expiry {
            *last = Instant::now();
        }
    }

    fn is_expired(&self, now: Instant, max_idle: Duration) -> bool {
        match self.expiry {
            Expiry::Never => false,
            Expiry::LastAccess(last) => now.saturating_duration_since(last) > max_idle,
        }
    }
}

/// Maps classified routes onto the buckets the server assigned to them.
///
/// Only routes whose bucket was actually reported by the server are stored.
/// One-off routes therefore never pollute the table.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    entries: DashMap<String, BucketEntry>,
}

impl BucketRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry key of a `(method, bucket route)` pair
    #[must_use]
    pub fn key(method: &Method, bucket_route: &str) -> String {
        format!("{method}:{bucket_route}")
    }

    /// Look up the bucket of a route.
    ///
    /// Known entries are marked as used. Unknown routes get a local
    /// placeholder which is *not* stored.
    #[must_use]
    pub fn resolve(&self, method: &Method, bucket_route: &str) -> BucketEntry {
        if let Some(mut entry) = self.entries.get_mut(&Self::key(method, bucket_route)) {
            entry.touch();
            return entry.clone();
        }
        BucketEntry::local(method, bucket_route)
    }

    /// Get the stored entry of a route, if any
    #[must_use]
    pub fn get(&self, method: &Method, bucket_route: &str) -> Option<BucketEntry> {
        self.entries
            .get(&Self::key(method, bucket_route))
            .map(|entry| entry.clone())
    }

    /// Store the bucket the server reported for a route.
    ///
    /// Returns the previous bucket ID if it changed.
    pub fn record_discovery(
        &self,
        method: &Method,
        bucket_route: &str,
        id: &str,
    ) -> Option<String> {
        let mut entry = self
            .entries
            .entry(Self::key(method, bucket_route))
            .or_insert_with(|| BucketEntry::local(method, bucket_route));
        entry.touch();
        if entry.id == id {
            return None;
        }
        Some(std::mem::replace(&mut entry.id, id.to_string()))
    }

    /// Store a bucket that is never swept
    pub fn insert_permanent(&self, method: &Method, bucket_route: &str, id: &str) {
        self.entries.insert(
            Self::key(method, bucket_route),
            BucketEntry {
                id: id.to_string(),
                expiry: Expiry::Never,
            },
        );
    }

    /// Remove every entry idle for longer than `max_idle`.
    ///
    /// Returns the removed entries with their keys.
    pub fn sweep(&self, max_idle: Duration) -> Vec<(String, BucketEntry)> {
        let now = Instant::now();
        let mut removed = Vec::new();
        self.entries.retain(|key, entry| {
            if entry.is_expired(now, max_idle) {
                removed.push((key.clone(), entry.clone()));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
