use async_trait::async_trait;
use concord_core::CoordinationResult;
use concord_domain::WatchEvent;

/// Prefix subscriptions on the coordination store.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Subscribes to every change under a prefix, starting after the current revision.
    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<Box<dyn WatchStream>>;
}

/// Ordered stream of changes for one subscription.
#[async_trait]
pub trait WatchStream: Send {
    /// Waits for the next event in revision order.
    ///
    /// Returns `Ok(None)` when the subscription ended.
    async fn next_event(&mut self) -> CoordinationResult<Option<WatchEvent>>;
}
