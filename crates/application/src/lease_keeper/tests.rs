use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use concord_core::{CoordinationError, CoordinationResult};
use concord_domain::{KeepAliveAck, LeaseGrant, LeaseId};
use tokio::sync::{Mutex, mpsc};

use crate::store_ports::{KeepAliveStream, LeaseStore};

use super::LeaseKeeper;

#[derive(Default)]
struct FakeLeaseStore {
    fail_grant: AtomicBool,
    revoked: Mutex<Vec<LeaseId>>,
    ack_senders: Mutex<Vec<mpsc::UnboundedSender<KeepAliveAck>>>,
    consumed: Arc<AtomicUsize>,
    dropped_streams: Arc<AtomicUsize>,
}

struct ChannelKeepAliveStream {
    receiver: mpsc::UnboundedReceiver<KeepAliveAck>,
    consumed: Arc<AtomicUsize>,
    dropped_streams: Arc<AtomicUsize>,
}

#[async_trait]
impl KeepAliveStream for ChannelKeepAliveStream {
    async fn next_ack(&mut self) -> CoordinationResult<Option<KeepAliveAck>> {
        let ack = self.receiver.recv().await;
        if ack.is_some() {
            self.consumed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ack)
    }
}

impl Drop for ChannelKeepAliveStream {
    fn drop(&mut self) {
        self.dropped_streams.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaseStore for FakeLeaseStore {
    async fn grant(&self, ttl_seconds: i64) -> CoordinationResult<LeaseGrant> {
        if self.fail_grant.load(Ordering::SeqCst) {
            return Err(CoordinationError::Connection("store unavailable".to_owned()));
        }

        Ok(LeaseGrant {
            id: LeaseId::new(7),
            ttl_seconds,
        })
    }

    async fn keep_alive(&self, _lease_id: LeaseId) -> CoordinationResult<Box<dyn KeepAliveStream>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.ack_senders.lock().await.push(sender);
        Ok(Box::new(ChannelKeepAliveStream {
            receiver,
            consumed: self.consumed.clone(),
            dropped_streams: self.dropped_streams.clone(),
        }))
    }

    async fn revoke(&self, lease_id: LeaseId) -> CoordinationResult<()> {
        self.revoked.lock().await.push(lease_id);
        Ok(())
    }
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn ack(ttl_seconds: i64) -> KeepAliveAck {
    KeepAliveAck {
        lease_id: LeaseId::new(7),
        ttl_seconds,
    }
}

#[tokio::test]
async fn grant_rejects_non_positive_ttl() {
    let keeper = LeaseKeeper::new(Arc::new(FakeLeaseStore::default()));

    let result = keeper.grant(0).await;
    assert!(matches!(result, Err(CoordinationError::Validation(_))));
}

#[tokio::test]
async fn grant_failure_surfaces_as_lease_error() {
    let store = FakeLeaseStore::default();
    store.fail_grant.store(true, Ordering::SeqCst);
    let keeper = LeaseKeeper::new(Arc::new(store));

    let result = keeper.grant(10).await;
    assert!(matches!(result, Err(CoordinationError::Lease(_))));
}

#[tokio::test]
async fn keepalive_drains_every_acknowledgement() {
    let store = Arc::new(FakeLeaseStore::default());
    let keeper = LeaseKeeper::new(store.clone());

    let handle = keeper.keep_alive(LeaseId::new(7)).await;
    assert!(handle.is_ok());
    let handle = handle.unwrap_or_else(|_| unreachable!());

    {
        let senders = store.ack_senders.lock().await;
        for _ in 0..5 {
            assert!(senders[0].send(ack(10)).is_ok());
        }
    }

    let consumed = store.consumed.clone();
    assert!(eventually(|| consumed.load(Ordering::SeqCst) == 5).await);
    assert!(!handle.is_lost());
}

#[tokio::test]
async fn ended_stream_marks_lease_as_lost() {
    let store = Arc::new(FakeLeaseStore::default());
    let keeper = LeaseKeeper::new(store.clone());

    let handle = keeper
        .keep_alive(LeaseId::new(7))
        .await
        .unwrap_or_else(|_| unreachable!());

    store.ack_senders.lock().await.clear();

    assert!(eventually(|| handle.is_lost()).await);
}

#[tokio::test]
async fn expired_ack_marks_lease_as_lost() {
    let store = Arc::new(FakeLeaseStore::default());
    let keeper = LeaseKeeper::new(store.clone());

    let handle = keeper
        .keep_alive(LeaseId::new(7))
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(store.ack_senders.lock().await[0].send(ack(0)).is_ok());

    assert!(eventually(|| handle.is_lost()).await);
}

#[tokio::test]
async fn shutdown_is_idempotent_and_releases_the_stream() {
    let store = Arc::new(FakeLeaseStore::default());
    let keeper = LeaseKeeper::new(store.clone());

    let mut handle = keeper
        .keep_alive(LeaseId::new(7))
        .await
        .unwrap_or_else(|_| unreachable!());

    handle.shutdown().await;
    handle.cancel();
    handle.shutdown().await;

    assert_eq!(store.dropped_streams.load(Ordering::SeqCst), 1);
    assert!(!handle.is_lost());
    assert!(store.revoked.lock().await.is_empty());
}

#[tokio::test]
async fn dropping_the_handle_stops_renewal() {
    let store = Arc::new(FakeLeaseStore::default());
    let keeper = LeaseKeeper::new(store.clone());

    let handle = keeper
        .keep_alive(LeaseId::new(7))
        .await
        .unwrap_or_else(|_| unreachable!());
    drop(handle);

    let dropped_streams = store.dropped_streams.clone();
    assert!(eventually(|| dropped_streams.load(Ordering::SeqCst) == 1).await);
}
