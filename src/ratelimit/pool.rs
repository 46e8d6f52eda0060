use dashmap::DashMap;
use std::sync::Arc;

use crate::ratelimit::{HandlerKey, Reservation, SequentialHandler};

/// Owns the live [`SequentialHandler`]s, one per `(bucket, partition)`.
///
/// Handlers are created lazily on first use and retired by [`sweep`]
/// once they have nothing left to do.
///
/// [`sweep`]: HandlerRegistry::sweep
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<HandlerKey, Arc<SequentialHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handler for `key`, creating it with `create` if needed, and
    /// claim a place in its queue.
    ///
    /// The claim is taken while the registry entry is locked, so a
    /// concurrent [`sweep`](HandlerRegistry::sweep) can never retire a
    /// handler that is about to receive a request. This keeps the
    /// guarantee of a single handler per key.
    pub fn get_or_create(
        &self,
        key: HandlerKey,
        create: impl FnOnce(&HandlerKey) -> SequentialHandler,
    ) -> (Arc<SequentialHandler>, Reservation) {
        let handler = self
            .handlers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(create(&key)));
        let reservation = handler.reserve();
        (Arc::clone(&handler), reservation)
    }

    /// Get the handler for `key`, if it exists
    #[must_use]
    pub fn get(&self, key: &HandlerKey) -> Option<Arc<SequentialHandler>> {
        self.handlers.get(key).map(|handler| handler.clone())
    }

    /// Remove every handler without queued or executing requests.
    ///
    /// Returns the keys of the removed handlers.
    pub fn sweep(&self) -> Vec<HandlerKey> {
        let mut removed = Vec::new();
        self.handlers.retain(|key, handler| {
            if handler.is_inactive() {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of live handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether there are no live handlers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::recording::RecordingNotifier;
    use crate::ratelimit::{HandlerContext, RestConfig};
    use crate::test_utils::{ScriptedTransport, transport_request};
    use http::Method;
    use std::time::Duration;

    fn context(transport: ScriptedTransport) -> Arc<HandlerContext> {
        Arc::new(HandlerContext::new(
            &RestConfig::default(),
            Arc::new(transport),
            Arc::new(RecordingNotifier::default()),
        ))
    }

    #[tokio::test]
    async fn test_handler_reuse() {
        let context = context(ScriptedTransport::default());
        let registry = HandlerRegistry::new();
        let key = HandlerKey::new("abcd", "123456789012345678");

        let (first, reservation) = registry.get_or_create(key.clone(), |key| {
            SequentialHandler::new(key.clone(), context.clone())
        });
        drop(reservation);
        let (second, reservation) = registry.get_or_create(key, |_| unreachable!());
        drop(reservation);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_partitions_get_separate_handlers() {
        let context = context(ScriptedTransport::default());
        let registry = HandlerRegistry::new();
        for partition in ["123456789012345678", "223456789012345678"] {
            let _ = registry.get_or_create(HandlerKey::new("abcd", partition), |key| {
                SequentialHandler::new(key.clone(), context.clone())
            });
        }
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_keeps_busy_handlers() {
        let context = context(ScriptedTransport::default().with_delay(Duration::from_millis(50)));
        let registry = HandlerRegistry::new();
        let busy = HandlerKey::new("busy", "global");
        let idle = HandlerKey::new("idle", "global");

        let (handler, reservation) = registry.get_or_create(busy.clone(), |key| {
            SequentialHandler::new(key.clone(), context.clone())
        });
        let (_, idle_reservation) = registry.get_or_create(idle.clone(), |key| {
            SequentialHandler::new(key.clone(), context.clone())
        });

        // A pending reservation counts as work
        assert!(registry.sweep().is_empty());
        drop(idle_reservation);
        assert_eq!(registry.sweep(), vec![idle]);

        let (request, route) = transport_request(Method::GET, "/gateway");
        let pending =
            tokio::spawn(async move { handler.enqueue(reservation, request, route).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.sweep().is_empty());

        pending.await.unwrap().unwrap();
        assert_eq!(registry.sweep(), vec![busy]);
        assert!(registry.is_empty());
    }
}
