use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use concord_core::{CoordinationError, CoordinationResult};
use concord_domain::{WatchEvent, WatchEventKind};
use tracing::{debug, error, info, warn};

use crate::dispatch_ports::{ExclusiveLock, WatchEventHandler};
use crate::store_ports::{WatchStore, WatchStream};

/// How one observed event was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Lock taken, handler succeeded.
    Handled,
    /// Lock taken, handler returned an error.
    HandlerFailed,
    /// Another process holds the coordination key.
    Contended,
    /// The lock attempt itself failed.
    LockFaulted,
}

impl DispatchOutcome {
    /// Returns stable label value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::HandlerFailed => "handler_failed",
            Self::Contended => "contended",
            Self::LockFaulted => "lock_faulted",
        }
    }
}

/// Point-in-time copy of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events handled successfully.
    pub handled: u64,
    /// Events whose handler failed.
    pub handler_failures: u64,
    /// Events skipped because the lock was held elsewhere.
    pub contended: u64,
    /// Events skipped because the lock attempt failed.
    pub lock_faults: u64,
}

impl DispatchStats {
    /// Returns the number of events resolved in any way.
    #[must_use]
    pub fn observed(&self) -> u64 {
        self.handled + self.handler_failures + self.contended + self.lock_faults
    }
}

/// Live dispatcher counters, shareable across tasks.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    handled: AtomicU64,
    handler_failures: AtomicU64,
    contended: AtomicU64,
    lock_faults: AtomicU64,
}

impl DispatchCounters {
    /// Returns a snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            lock_faults: self.lock_faults.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Handled => &self.handled,
            DispatchOutcome::HandlerFailed => &self.handler_failures,
            DispatchOutcome::Contended => &self.contended,
            DispatchOutcome::LockFaulted => &self.lock_faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializes reactions to prefix changes across processes through one shared lock.
///
/// Every instance sees every event; only the instance whose lock attempt
/// commits first runs the handler for the window it holds the lock.
pub struct WatchDispatcher<L> {
    watch_store: Arc<dyn WatchStore>,
    lock: L,
    holder_id: String,
    counters: Arc<DispatchCounters>,
}

impl<L: ExclusiveLock> WatchDispatcher<L> {
    /// Creates a dispatcher that coordinates through `lock`.
    #[must_use]
    pub fn new(watch_store: Arc<dyn WatchStore>, lock: L, holder_id: impl Into<String>) -> Self {
        Self {
            watch_store,
            lock,
            holder_id: holder_id.into(),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Returns the shared counters of this dispatcher.
    #[must_use]
    pub fn counters(&self) -> Arc<DispatchCounters> {
        self.counters.clone()
    }

    /// Returns the coordination lock.
    #[must_use]
    pub fn exclusive_lock(&self) -> &L {
        &self.lock
    }

    /// Watches `prefix` and dispatches events until the subscription ends.
    ///
    /// Always returns an error: the stream ending is `WatchStreamClosed`.
    pub async fn dispatch(
        &mut self,
        prefix: &str,
        handler: &dyn WatchEventHandler,
    ) -> CoordinationResult<()> {
        self.dispatch_until(prefix, handler, std::future::pending())
            .await
    }

    /// Watches `prefix` and dispatches events until the subscription ends or `shutdown` resolves.
    ///
    /// Shutdown is observed between events; an event in progress is always
    /// handled and unlocked first.
    pub async fn dispatch_until<F>(
        &mut self,
        prefix: &str,
        handler: &dyn WatchEventHandler,
        shutdown: F,
    ) -> CoordinationResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut stream = self.watch_store.watch_prefix(prefix).await?;
        info!(
            prefix = %prefix,
            lock_key = %self.lock.key(),
            holder_id = %self.holder_id,
            "watch dispatcher subscribed"
        );

        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(prefix = %prefix, "watch dispatcher stopped");
                    return Ok(());
                }
                next = stream.next_event() => next,
            };

            match next {
                Ok(Some(event)) => {
                    self.handle_event(handler, &event).await;
                }
                Ok(None) => {
                    return Err(CoordinationError::WatchStreamClosed(format!(
                        "watch on '{prefix}' ended"
                    )));
                }
                Err(error) => {
                    return Err(CoordinationError::WatchStreamClosed(format!(
                        "watch on '{prefix}' failed: {error}"
                    )));
                }
            }
        }
    }

    /// Resolves one event: lock, handle, unlock.
    pub async fn handle_event(
        &mut self,
        handler: &dyn WatchEventHandler,
        event: &WatchEvent,
    ) -> DispatchOutcome {
        let owner_token = self.owner_token();
        info!(
            kind = %event.kind.as_str(),
            key = %event.key,
            revision = event.revision,
            "watch event received"
        );

        match self.lock.lock(owner_token.as_str()).await {
            Ok(()) => {}
            Err(error) if error.is_lock_grab_failed() => {
                info!(
                    key = %event.key,
                    revision = event.revision,
                    reason = %error,
                    "coordination lock held elsewhere; skipping event"
                );
                self.counters.record(DispatchOutcome::Contended);
                return DispatchOutcome::Contended;
            }
            Err(error) => {
                error!(
                    key = %event.key,
                    revision = event.revision,
                    store_unreachable = error.is_connection(),
                    error = %error,
                    "coordination lock attempt failed; skipping event"
                );
                self.counters.record(DispatchOutcome::LockFaulted);
                return DispatchOutcome::LockFaulted;
            }
        }

        debug!(key = %event.key, owner_token = %owner_token, "coordination lock acquired");

        let result = match event.kind {
            WatchEventKind::Put => handler.on_put(event).await,
            WatchEventKind::Delete => handler.on_delete(event).await,
        };

        if let Err(error) = self.lock.unlock().await {
            warn!(
                lock_key = %self.lock.key(),
                error = %error,
                "failed to release coordination lock"
            );
        }

        let outcome = match result {
            Ok(()) => DispatchOutcome::Handled,
            Err(error) => {
                warn!(
                    kind = %event.kind.as_str(),
                    key = %event.key,
                    error = %error,
                    "watch event handler failed"
                );
                DispatchOutcome::HandlerFailed
            }
        };

        self.counters.record(outcome);
        debug!(key = %event.key, outcome = %outcome.as_str(), "watch event resolved");
        outcome
    }

    fn owner_token(&self) -> String {
        format!(
            "{}@{}",
            self.holder_id,
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }
}

#[cfg(test)]
mod tests;
