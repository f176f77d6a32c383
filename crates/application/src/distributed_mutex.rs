use std::sync::Arc;

use async_trait::async_trait;
use concord_core::{CoordinationError, CoordinationResult, NonEmptyString};
use concord_domain::{LeaseId, MutexState};
use tracing::{debug, warn};

use crate::dispatch_ports::ExclusiveLock;
use crate::lease_keeper::{KeepAliveHandle, LeaseKeeper};
use crate::store_ports::{
    CompareOp, LockStore, TransactionalStore, TxnCompare, TxnOp, TxnRequest,
};

/// Lease-backed mutual exclusion on one store key.
///
/// The lock key is written inside a single conditional transaction and bound
/// to a lease, so a crashed holder's key vanishes once its lease expires.
pub struct DistributedMutex {
    store: Arc<dyn LockStore>,
    lease_keeper: LeaseKeeper,
    key: NonEmptyString,
    ttl_seconds: i64,
    state: MutexState,
    held: Option<HeldLease>,
}

struct HeldLease {
    lease_id: LeaseId,
    keep_alive: KeepAliveHandle,
}

impl DistributedMutex {
    /// Creates an unlocked mutex for `key`.
    pub fn new(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        ttl_seconds: i64,
    ) -> CoordinationResult<Self> {
        let key = NonEmptyString::new(key).map_err(|_| {
            CoordinationError::Validation("mutex key must not be empty".to_owned())
        })?;

        if ttl_seconds <= 0 {
            return Err(CoordinationError::Validation(
                "mutex ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            lease_keeper: LeaseKeeper::new(store.clone()),
            store,
            key,
            ttl_seconds,
            state: MutexState::Unlocked,
            held: None,
        })
    }

    /// Returns the guarded key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> MutexState {
        self.state
    }

    /// Returns the lease backing the held lock.
    #[must_use]
    pub fn lease_id(&self) -> Option<LeaseId> {
        self.held.as_ref().map(|held| held.lease_id)
    }

    /// Returns true when the held lease stopped being renewed.
    #[must_use]
    pub fn is_lease_lost(&self) -> bool {
        self.held
            .as_ref()
            .is_some_and(|held| held.keep_alive.is_lost())
    }

    /// Makes one attempt to take the lock, storing `owner_token` as its value.
    pub async fn try_lock(&mut self, owner_token: &str) -> CoordinationResult<()> {
        if self.state.is_locked() {
            return Err(CoordinationError::AlreadyLocked(format!(
                "mutex '{}' is already held by this instance",
                self.key.as_str()
            )));
        }

        let grant = match self.lease_keeper.grant(self.ttl_seconds).await {
            Ok(grant) => grant,
            Err(error) => {
                self.state = MutexState::Failed;
                return Err(error);
            }
        };

        let keep_alive = match self.lease_keeper.keep_alive(grant.id).await {
            Ok(keep_alive) => keep_alive,
            Err(error) => {
                self.revoke_quietly(grant.id).await;
                self.state = MutexState::Failed;
                return Err(error);
            }
        };

        // From here every early return must release `attempt`.
        let mut attempt = HeldLease {
            lease_id: grant.id,
            keep_alive,
        };

        let key = self.key.as_str();
        let txn = TxnRequest::new()
            .when([TxnCompare::create_revision(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key, owner_token, Some(attempt.lease_id))])
            .or_else([TxnOp::get(key)]);

        match self.store.commit(txn).await {
            Ok(response) if response.succeeded => {
                debug!(
                    key = %key,
                    lease_id = %attempt.lease_id,
                    owner_token = %owner_token,
                    "mutex acquired"
                );
                self.held = Some(attempt);
                self.state = MutexState::Locked;
                Ok(())
            }
            Ok(response) => {
                let holder = response
                    .first_read()
                    .and_then(|entry| entry.value_str().ok());
                let message = match holder {
                    Some(holder) => format!("'{key}' is held by '{holder}'"),
                    None => format!("'{key}' is held by another owner"),
                };

                self.abandon(&mut attempt).await;
                self.state = MutexState::Unlocked;
                Err(CoordinationError::LockGrabFailed(message))
            }
            Err(error) => {
                self.abandon(&mut attempt).await;
                self.state = MutexState::Failed;
                Err(CoordinationError::Store(format!(
                    "failed to commit lock transaction for '{key}': {error}"
                )))
            }
        }
    }

    /// Releases the lock. A revoke failure is logged, never returned.
    pub async fn release(&mut self) -> CoordinationResult<()> {
        if !self.state.is_locked() {
            return Ok(());
        }

        if let Some(mut held) = self.held.take() {
            held.keep_alive.shutdown().await;
            self.revoke_quietly(held.lease_id).await;
        }

        self.state = MutexState::Unlocked;
        debug!(key = %self.key.as_str(), "mutex released");
        Ok(())
    }

    async fn abandon(&self, attempt: &mut HeldLease) {
        attempt.keep_alive.shutdown().await;
        self.revoke_quietly(attempt.lease_id).await;
    }

    async fn revoke_quietly(&self, lease_id: LeaseId) {
        if let Err(error) = self.lease_keeper.revoke(lease_id).await {
            warn!(
                key = %self.key.as_str(),
                lease_id = %lease_id,
                error = %error,
                "failed to revoke mutex lease; it will expire after its ttl"
            );
        }
    }
}

#[async_trait]
impl ExclusiveLock for DistributedMutex {
    async fn lock(&mut self, owner_token: &str) -> CoordinationResult<()> {
        self.try_lock(owner_token).await
    }

    async fn unlock(&mut self) -> CoordinationResult<()> {
        self.release().await
    }

    fn key(&self) -> &str {
        self.key.as_str()
    }
}
