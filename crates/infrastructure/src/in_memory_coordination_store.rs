//! In-memory coordination store with lease expiry and prefix watches.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use concord_application::{
    KeepAliveStream, KeyValueStore, LeaseStore, TransactionalStore, TxnOp, TxnOpResult,
    TxnRequest, TxnResponse, WatchStore, WatchStream,
};
use concord_core::{CoordinationError, CoordinationResult};
use concord_domain::{KeepAliveAck, KeyValueEntry, LeaseGrant, LeaseId, Revision, WatchEvent};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Linearizable in-process store implementing every coordination port.
///
/// All state lives behind one lock, so every operation observes a single
/// global revision order and watchers receive events in that order.
#[derive(Clone)]
pub struct InMemoryCoordinationStore {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<StoreState>,
    available: AtomicBool,
}

#[derive(Default)]
struct StoreState {
    revision: Revision,
    next_lease_id: i64,
    entries: BTreeMap<String, KeyValueEntry>,
    leases: HashMap<LeaseId, LeaseRecord>,
    watchers: Vec<PrefixWatcher>,
}

struct LeaseRecord {
    ttl_seconds: i64,
    expires_at: Instant,
    keys: BTreeSet<String>,
}

struct PrefixWatcher {
    prefix: String,
    sender: mpsc::UnboundedSender<WatchEvent>,
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinationStore {
    /// Creates an empty store at revision zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates losing or regaining the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Ends every open watch subscription.
    pub async fn close_watchers(&self) {
        self.shared.state.lock().await.watchers.clear();
    }

    /// Returns the number of open watch subscriptions.
    pub async fn watcher_count(&self) -> usize {
        let mut state = self.shared.state.lock().await;
        state.watchers.retain(|watcher| !watcher.sender.is_closed());
        state.watchers.len()
    }

    /// Returns the revision of the latest write.
    pub async fn current_revision(&self) -> Revision {
        self.shared.state.lock().await.revision
    }

    async fn state(&self) -> CoordinationResult<tokio::sync::MutexGuard<'_, StoreState>> {
        self.shared.ensure_available()?;
        let mut state = self.shared.state.lock().await;
        state.expire_due(Instant::now());
        Ok(state)
    }
}

impl Shared {
    fn ensure_available(&self) -> CoordinationResult<()> {
        if self.available.load(Ordering::SeqCst) {
            return Ok(());
        }

        Err(CoordinationError::Connection(
            "in-memory store is unavailable".to_owned(),
        ))
    }
}

impl StoreState {
    fn prefix_entries<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a KeyValueEntry> + 'a {
        self.entries
            .range(prefix.to_owned()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| entry)
    }

    fn expire_due(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(lease_id, _)| *lease_id)
            .collect();

        for lease_id in expired {
            debug!(lease_id = %lease_id, "lease expired");
            self.remove_lease(lease_id);
        }
    }

    fn remove_lease(&mut self, lease_id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&lease_id) else {
            return false;
        };

        if !lease.keys.is_empty() {
            self.revision += 1;
            let revision = self.revision;
            for key in lease.keys {
                if self.entries.remove(key.as_str()).is_some() {
                    self.notify(WatchEvent::delete(key, revision));
                }
            }
        }

        true
    }

    fn ensure_lease(&self, lease: Option<LeaseId>) -> CoordinationResult<()> {
        match lease {
            Some(lease_id) if !self.leases.contains_key(&lease_id) => Err(
                CoordinationError::Lease(format!("requested lease {lease_id} not found")),
            ),
            _ => Ok(()),
        }
    }

    fn apply_put(
        &mut self,
        key: String,
        value: Vec<u8>,
        lease: Option<LeaseId>,
        revision: Revision,
    ) {
        let previous = self.entries.get(key.as_str());
        let create_revision = previous.map_or(revision, |entry| entry.create_revision);
        let version = previous.map_or(1, |entry| entry.version + 1);
        let previous_lease = previous.and_then(|entry| entry.lease);

        if previous_lease != lease
            && let Some(previous_lease) = previous_lease
            && let Some(record) = self.leases.get_mut(&previous_lease)
        {
            record.keys.remove(key.as_str());
        }

        if let Some(lease_id) = lease
            && let Some(record) = self.leases.get_mut(&lease_id)
        {
            record.keys.insert(key.clone());
        }

        self.entries.insert(
            key.clone(),
            KeyValueEntry {
                key: key.clone(),
                value: value.clone(),
                create_revision,
                mod_revision: revision,
                version,
                lease,
            },
        );
        self.notify(WatchEvent::put(key, value, revision));
    }

    fn apply_delete(&mut self, key: &str, revision: Revision) -> u64 {
        let Some(entry) = self.entries.remove(key) else {
            return 0;
        };

        if let Some(lease_id) = entry.lease
            && let Some(record) = self.leases.get_mut(&lease_id)
        {
            record.keys.remove(key);
        }

        self.notify(WatchEvent::delete(key, revision));
        1
    }

    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|watcher| {
            if event.key.starts_with(watcher.prefix.as_str()) {
                watcher.sender.send(event.clone()).is_ok()
            } else {
                !watcher.sender.is_closed()
            }
        });
    }

    fn is_write(&self, operation: &TxnOp) -> bool {
        match operation {
            TxnOp::Put { .. } => true,
            TxnOp::Delete { key } => self.entries.contains_key(key.as_str()),
            TxnOp::Get { .. } => false,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryCoordinationStore {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> CoordinationResult<Revision> {
        let mut state = self.state().await?;
        state.ensure_lease(lease)?;

        state.revision += 1;
        let revision = state.revision;
        state.apply_put(key.to_owned(), value.to_vec(), lease, revision);
        Ok(revision)
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValueEntry>> {
        Ok(self.state().await?.entries.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValueEntry>> {
        let state = self.state().await?;
        Ok(state.prefix_entries(prefix).cloned().collect())
    }

    async fn first_with_prefix(&self, prefix: &str) -> CoordinationResult<Option<KeyValueEntry>> {
        let state = self.state().await?;
        Ok(state.prefix_entries(prefix).next().cloned())
    }

    async fn last_with_prefix(&self, prefix: &str) -> CoordinationResult<Option<KeyValueEntry>> {
        let state = self.state().await?;
        Ok(state.prefix_entries(prefix).last().cloned())
    }

    async fn delete(&self, key: &str) -> CoordinationResult<u64> {
        let mut state = self.state().await?;
        if !state.entries.contains_key(key) {
            return Ok(0);
        }

        state.revision += 1;
        let revision = state.revision;
        Ok(state.apply_delete(key, revision))
    }

    async fn delete_prefix(&self, prefix: &str) -> CoordinationResult<u64> {
        let mut state = self.state().await?;
        let keys: Vec<String> = state
            .prefix_entries(prefix)
            .map(|entry| entry.key.clone())
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        state.revision += 1;
        let revision = state.revision;
        let mut deleted = 0;
        for key in keys {
            deleted += state.apply_delete(key.as_str(), revision);
        }
        Ok(deleted)
    }

    async fn count_prefix(&self, prefix: &str) -> CoordinationResult<i64> {
        let state = self.state().await?;
        Ok(i64::try_from(state.prefix_entries(prefix).count()).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl LeaseStore for InMemoryCoordinationStore {
    async fn grant(&self, ttl_seconds: i64) -> CoordinationResult<LeaseGrant> {
        if ttl_seconds <= 0 {
            return Err(CoordinationError::Lease(
                "lease ttl must be greater than zero".to_owned(),
            ));
        }

        let lease_id = {
            let mut state = self.state().await?;
            state.next_lease_id += 1;
            let lease_id = LeaseId::new(state.next_lease_id);
            state.leases.insert(
                lease_id,
                LeaseRecord {
                    ttl_seconds,
                    expires_at: Instant::now() + ttl(ttl_seconds),
                    keys: BTreeSet::new(),
                },
            );
            lease_id
        };

        spawn_expiry_timer(Arc::downgrade(&self.shared), lease_id);

        Ok(LeaseGrant {
            id: lease_id,
            ttl_seconds,
        })
    }

    async fn keep_alive(&self, lease_id: LeaseId) -> CoordinationResult<Box<dyn KeepAliveStream>> {
        let ttl_seconds = {
            let state = self.state().await?;
            state
                .leases
                .get(&lease_id)
                .map(|lease| lease.ttl_seconds)
                .ok_or_else(|| {
                    CoordinationError::Lease(format!("requested lease {lease_id} not found"))
                })?
        };

        let period = (ttl(ttl_seconds) / 3).max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(InMemoryKeepAliveStream {
            shared: self.shared.clone(),
            lease_id,
            interval,
        }))
    }

    async fn revoke(&self, lease_id: LeaseId) -> CoordinationResult<()> {
        let mut state = self.state().await?;
        if state.remove_lease(lease_id) {
            return Ok(());
        }

        Err(CoordinationError::Lease(format!(
            "requested lease {lease_id} not found"
        )))
    }
}

#[async_trait]
impl TransactionalStore for InMemoryCoordinationStore {
    async fn commit(&self, txn: TxnRequest) -> CoordinationResult<TxnResponse> {
        let mut state = self.state().await?;

        let succeeded = txn
            .compares
            .iter()
            .all(|compare| compare.matches(state.entries.get(compare.key.as_str())));
        let operations = if succeeded { txn.success } else { txn.failure };

        for operation in &operations {
            if let TxnOp::Put { lease, .. } = operation {
                state.ensure_lease(*lease)?;
            }
        }

        let writes = operations
            .iter()
            .any(|operation| state.is_write(operation));
        let revision = state.revision + 1;

        let mut results = Vec::with_capacity(operations.len());
        for operation in operations {
            match operation {
                TxnOp::Put { key, value, lease } => {
                    state.apply_put(key, value, lease, revision);
                    results.push(TxnOpResult::Put { revision });
                }
                TxnOp::Get { key } => results.push(TxnOpResult::Get {
                    entry: state.entries.get(key.as_str()).cloned(),
                }),
                TxnOp::Delete { key } => {
                    let deleted = state.apply_delete(key.as_str(), revision);
                    results.push(TxnOpResult::Delete { deleted });
                }
            }
        }

        if writes {
            state.revision = revision;
        }

        Ok(TxnResponse { succeeded, results })
    }
}

#[async_trait]
impl WatchStore for InMemoryCoordinationStore {
    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<Box<dyn WatchStream>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().await?.watchers.push(PrefixWatcher {
            prefix: prefix.to_owned(),
            sender,
        });

        Ok(Box::new(InMemoryWatchStream { receiver }))
    }
}

struct InMemoryKeepAliveStream {
    shared: Arc<Shared>,
    lease_id: LeaseId,
    interval: Interval,
}

#[async_trait]
impl KeepAliveStream for InMemoryKeepAliveStream {
    async fn next_ack(&mut self) -> CoordinationResult<Option<KeepAliveAck>> {
        self.interval.tick().await;
        self.shared.ensure_available()?;

        let now = Instant::now();
        let mut state = self.shared.state.lock().await;
        state.expire_due(now);

        Ok(state.leases.get_mut(&self.lease_id).map(|lease| {
            lease.expires_at = now + ttl(lease.ttl_seconds);
            KeepAliveAck {
                lease_id: self.lease_id,
                ttl_seconds: lease.ttl_seconds,
            }
        }))
    }
}

struct InMemoryWatchStream {
    receiver: mpsc::UnboundedReceiver<WatchEvent>,
}

#[async_trait]
impl WatchStream for InMemoryWatchStream {
    async fn next_event(&mut self) -> CoordinationResult<Option<WatchEvent>> {
        Ok(self.receiver.recv().await)
    }
}

fn ttl(ttl_seconds: i64) -> Duration {
    Duration::from_secs(u64::try_from(ttl_seconds).unwrap_or_default())
}

fn spawn_expiry_timer(shared: Weak<Shared>, lease_id: LeaseId) {
    tokio::spawn(async move {
        loop {
            let deadline = {
                let Some(strong) = shared.upgrade() else {
                    return;
                };
                let state = strong.state.lock().await;
                match state.leases.get(&lease_id) {
                    Some(lease) => lease.expires_at,
                    None => return,
                }
            };

            tokio::time::sleep_until(deadline).await;

            let Some(strong) = shared.upgrade() else {
                return;
            };
            strong.state.lock().await.expire_due(Instant::now());
        }
    });
}
