use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use concord_core::{CoordinationError, CoordinationResult};
use concord_domain::{LeaseGrant, LeaseId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::store_ports::{KeepAliveStream, LeaseStore};

/// Grants, renews and revokes store leases.
#[derive(Clone)]
pub struct LeaseKeeper {
    store: Arc<dyn LeaseStore>,
}

impl LeaseKeeper {
    /// Creates a lease keeper over one store handle.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Requests a new lease.
    pub async fn grant(&self, ttl_seconds: i64) -> CoordinationResult<LeaseGrant> {
        if ttl_seconds <= 0 {
            return Err(CoordinationError::Validation(
                "lease ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        let grant = self.store.grant(ttl_seconds).await.map_err(|error| {
            CoordinationError::Lease(format!("failed to grant lease: {error}"))
        })?;

        debug!(
            lease_id = %grant.id,
            ttl_seconds = grant.ttl_seconds,
            "lease granted"
        );

        Ok(grant)
    }

    /// Starts the background renewal task for one lease.
    pub async fn keep_alive(&self, lease_id: LeaseId) -> CoordinationResult<KeepAliveHandle> {
        let stream = self.store.keep_alive(lease_id).await.map_err(|error| {
            CoordinationError::Lease(format!(
                "failed to start keepalive for lease {lease_id}: {error}"
            ))
        })?;

        Ok(KeepAliveHandle::spawn(lease_id, stream))
    }

    /// Revokes one lease. Keys bound to it are deleted by the store.
    pub async fn revoke(&self, lease_id: LeaseId) -> CoordinationResult<()> {
        self.store.revoke(lease_id).await.map_err(|error| {
            CoordinationError::Lease(format!("failed to revoke lease {lease_id}: {error}"))
        })?;

        debug!(lease_id = %lease_id, "lease revoked");
        Ok(())
    }
}

/// Owned renewal task of one lease.
///
/// Dropping the handle stops renewal without revoking the lease.
#[derive(Debug)]
pub struct KeepAliveHandle {
    lease_id: LeaseId,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
}

impl KeepAliveHandle {
    fn spawn(lease_id: LeaseId, mut stream: Box<dyn KeepAliveStream>) -> Self {
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let lost = Arc::new(AtomicBool::new(false));
        let task_lost = lost.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => {
                        trace!(lease_id = %lease_id, "lease keepalive cancelled");
                        break;
                    }
                    ack = stream.next_ack() => match ack {
                        Ok(Some(ack)) if !ack.is_expired() => {
                            trace!(
                                lease_id = %lease_id,
                                ttl_seconds = ack.ttl_seconds,
                                "lease renewed"
                            );
                        }
                        Ok(Some(_)) => {
                            task_lost.store(true, Ordering::SeqCst);
                            warn!(lease_id = %lease_id, "lease expired before it could be renewed");
                            break;
                        }
                        Ok(None) => {
                            task_lost.store(true, Ordering::SeqCst);
                            warn!(
                                lease_id = %lease_id,
                                "lease keepalive stream ended; lease will expire"
                            );
                            break;
                        }
                        Err(error) => {
                            task_lost.store(true, Ordering::SeqCst);
                            warn!(
                                lease_id = %lease_id,
                                error = %error,
                                "lease keepalive stream failed; lease will expire"
                            );
                            break;
                        }
                    }
                }
            }
        });

        Self {
            lease_id,
            cancel: Some(cancel),
            task: Some(task),
            lost,
        }
    }

    /// Returns the renewed lease.
    #[must_use]
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    /// Returns true once renewal stopped on its own (stream end, error or expiry).
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Signals the renewal task to stop. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Stops the renewal task and waits until it exited.
    pub async fn shutdown(&mut self) {
        self.cancel();

        if let Some(task) = self.task.take()
            && let Err(error) = task.await
            && error.is_panic()
        {
            warn!(lease_id = %self.lease_id, "lease keepalive task panicked");
        }
    }
}

impl Drop for KeepAliveHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests;
