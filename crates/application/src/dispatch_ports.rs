use async_trait::async_trait;
use concord_core::CoordinationResult;
use concord_domain::WatchEvent;

/// Single-key mutual exclusion used to serialize event handling.
#[async_trait]
pub trait ExclusiveLock: Send {
    /// Makes one non-blocking attempt to take the lock for `owner_token`.
    ///
    /// Contention is reported as `CoordinationError::LockGrabFailed`.
    async fn lock(&mut self, owner_token: &str) -> CoordinationResult<()>;

    /// Releases the lock. Succeeds when nothing is held.
    async fn unlock(&mut self) -> CoordinationResult<()>;

    /// Returns the coordination key guarded by this lock.
    fn key(&self) -> &str;
}

/// Reactions invoked by the watch dispatcher while it holds the lock.
#[async_trait]
pub trait WatchEventHandler: Send + Sync {
    /// Handles a put event.
    async fn on_put(&self, event: &WatchEvent) -> CoordinationResult<()>;

    /// Handles a delete event.
    async fn on_delete(&self, event: &WatchEvent) -> CoordinationResult<()>;
}

/// Adapts a pair of synchronous closures into a watch event handler.
pub struct FnWatchEventHandler<P, D> {
    on_put: P,
    on_delete: D,
}

impl<P, D> FnWatchEventHandler<P, D>
where
    P: Fn(&WatchEvent) -> CoordinationResult<()> + Send + Sync,
    D: Fn(&WatchEvent) -> CoordinationResult<()> + Send + Sync,
{
    /// Creates a handler from put and delete closures.
    #[must_use]
    pub fn new(on_put: P, on_delete: D) -> Self {
        Self { on_put, on_delete }
    }
}

#[async_trait]
impl<P, D> WatchEventHandler for FnWatchEventHandler<P, D>
where
    P: Fn(&WatchEvent) -> CoordinationResult<()> + Send + Sync,
    D: Fn(&WatchEvent) -> CoordinationResult<()> + Send + Sync,
{
    async fn on_put(&self, event: &WatchEvent) -> CoordinationResult<()> {
        (self.on_put)(event)
    }

    async fn on_delete(&self, event: &WatchEvent) -> CoordinationResult<()> {
        (self.on_delete)(event)
    }
}
