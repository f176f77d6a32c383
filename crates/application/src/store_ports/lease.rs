use async_trait::async_trait;
use concord_core::CoordinationResult;
use concord_domain::{KeepAliveAck, LeaseGrant, LeaseId};

/// Lease primitives of the coordination store.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Grants a new lease with the requested TTL.
    async fn grant(&self, ttl_seconds: i64) -> CoordinationResult<LeaseGrant>;

    /// Opens the renewal stream for one lease.
    ///
    /// The lease stays alive only while the returned stream is drained.
    async fn keep_alive(&self, lease_id: LeaseId) -> CoordinationResult<Box<dyn KeepAliveStream>>;

    /// Revokes one lease, deleting every key bound to it.
    async fn revoke(&self, lease_id: LeaseId) -> CoordinationResult<()>;
}

/// Stream of keepalive acknowledgements for one lease.
#[async_trait]
pub trait KeepAliveStream: Send {
    /// Waits for the next renewal acknowledgement.
    ///
    /// Returns `Ok(None)` once the store stops renewing the lease.
    async fn next_ack(&mut self) -> CoordinationResult<Option<KeepAliveAck>>;
}
