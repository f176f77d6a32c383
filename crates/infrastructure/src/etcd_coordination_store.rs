//! etcd v3 adapter for every coordination store port.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use concord_application::{
    CompareOp, CompareTarget, KeepAliveStream, KeyValueStore, LeaseStore, TransactionalStore,
    TxnCompare, TxnOp, TxnOpResult, TxnRequest, TxnResponse, WatchStore, WatchStream,
};
use concord_core::{CoordinationError, CoordinationResult};
use concord_domain::{KeepAliveAck, KeyValueEntry, LeaseGrant, LeaseId, Revision, WatchEvent};
use etcd_client::{
    Client, Compare, ConnectOptions, DeleteOptions, EventType, GetOptions, KeyValue,
    LeaseKeepAliveStream, LeaseKeeper, PutOptions, SortOrder, SortTarget, Txn, TxnOpResponse,
    WatchOptions, Watcher,
};
use tokio::time::{Interval, MissedTickBehavior};
use tonic::Code;
use tracing::{debug, info, warn};

const STATUS_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const STATUS_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Connection settings of the etcd cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdStoreConfig {
    /// Cluster endpoints, `host:port` or full URLs.
    pub endpoints: Vec<String>,
    /// Dial timeout per endpoint.
    pub dial_timeout: Duration,
    /// Status checks attempted before giving up at startup.
    pub status_attempts: u32,
}

impl EtcdStoreConfig {
    /// Creates settings with the default dial timeout and status attempts.
    #[must_use]
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            dial_timeout: Duration::from_secs(3),
            status_attempts: 3,
        }
    }

    /// Checks that the settings can produce a connection.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.endpoints.is_empty() {
            return Err(CoordinationError::Validation(
                "etcd endpoints must not be empty".to_owned(),
            ));
        }

        if self
            .endpoints
            .iter()
            .any(|endpoint| endpoint.trim().is_empty())
        {
            return Err(CoordinationError::Validation(
                "etcd endpoints must not contain blank entries".to_owned(),
            ));
        }

        if self.dial_timeout.is_zero() {
            return Err(CoordinationError::Validation(
                "etcd dial timeout must be greater than zero".to_owned(),
            ));
        }

        if self.status_attempts == 0 {
            return Err(CoordinationError::Validation(
                "etcd status attempts must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Coordination store backed by an etcd v3 cluster.
///
/// One handle is shared by every component; the underlying gRPC channel
/// multiplexes concurrent calls.
#[derive(Clone)]
pub struct EtcdCoordinationStore {
    client: Client,
}

impl EtcdCoordinationStore {
    /// Connects and waits until the cluster answers a status request.
    pub async fn connect(config: &EtcdStoreConfig) -> CoordinationResult<Self> {
        config.validate()?;

        let options = ConnectOptions::new().with_connect_timeout(config.dial_timeout);
        let client = Client::connect(config.endpoints.as_slice(), Some(options))
            .await
            .map_err(|error| map_etcd_error("failed to connect to etcd", error))?;

        let store = Self { client };
        store.await_ready(config).await?;
        Ok(store)
    }

    /// Wraps an already connected client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn await_ready(&self, config: &EtcdStoreConfig) -> CoordinationResult<()> {
        let mut last_error = String::new();

        for attempt in 1..=config.status_attempts {
            let mut client = self.client.clone();
            match tokio::time::timeout(STATUS_CHECK_TIMEOUT, client.status()).await {
                Ok(Ok(status)) => {
                    info!(
                        endpoints = ?config.endpoints,
                        version = %status.version(),
                        "connected to etcd"
                    );
                    return Ok(());
                }
                Ok(Err(error)) => last_error = error.to_string(),
                Err(_) => last_error = "status check timed out".to_owned(),
            }

            warn!(
                attempt,
                max_attempts = config.status_attempts,
                error = %last_error,
                "etcd status check failed"
            );

            if attempt < config.status_attempts {
                tokio::time::sleep(STATUS_RETRY_DELAY).await;
            }
        }

        Err(CoordinationError::Connection(format!(
            "etcd did not answer after {} status checks: {last_error}",
            config.status_attempts
        )))
    }

    fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait]
impl KeyValueStore for EtcdCoordinationStore {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> CoordinationResult<Revision> {
        let response = self
            .client()
            .put(key, value, put_options(lease))
            .await
            .map_err(|error| map_etcd_error("put failed", error))?;

        Ok(response
            .header()
            .map(|header| header.revision())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValueEntry>> {
        let response = self
            .client()
            .get(key, None)
            .await
            .map_err(|error| map_etcd_error("get failed", error))?;

        Ok(response.kvs().first().map(to_entry))
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValueEntry>> {
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, SortOrder::Ascend);
        let response = self
            .client()
            .get(prefix, Some(options))
            .await
            .map_err(|error| map_etcd_error("prefix get failed", error))?;

        Ok(response.kvs().iter().map(to_entry).collect())
    }

    async fn first_with_prefix(&self, prefix: &str) -> CoordinationResult<Option<KeyValueEntry>> {
        self.edge_with_prefix(prefix, SortOrder::Ascend).await
    }

    async fn last_with_prefix(&self, prefix: &str) -> CoordinationResult<Option<KeyValueEntry>> {
        self.edge_with_prefix(prefix, SortOrder::Descend).await
    }

    async fn delete(&self, key: &str) -> CoordinationResult<u64> {
        let response = self
            .client()
            .delete(key, None)
            .await
            .map_err(|error| map_etcd_error("delete failed", error))?;

        Ok(u64::try_from(response.deleted()).unwrap_or_default())
    }

    async fn delete_prefix(&self, prefix: &str) -> CoordinationResult<u64> {
        let response = self
            .client()
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(|error| map_etcd_error("prefix delete failed", error))?;

        Ok(u64::try_from(response.deleted()).unwrap_or_default())
    }

    async fn count_prefix(&self, prefix: &str) -> CoordinationResult<i64> {
        let options = GetOptions::new().with_prefix().with_count_only();
        let response = self
            .client()
            .get(prefix, Some(options))
            .await
            .map_err(|error| map_etcd_error("prefix count failed", error))?;

        Ok(response.count())
    }
}

impl EtcdCoordinationStore {
    async fn edge_with_prefix(
        &self,
        prefix: &str,
        order: SortOrder,
    ) -> CoordinationResult<Option<KeyValueEntry>> {
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, order)
            .with_limit(1);
        let response = self
            .client()
            .get(prefix, Some(options))
            .await
            .map_err(|error| map_etcd_error("prefix get failed", error))?;

        Ok(response.kvs().first().map(to_entry))
    }
}

#[async_trait]
impl LeaseStore for EtcdCoordinationStore {
    async fn grant(&self, ttl_seconds: i64) -> CoordinationResult<LeaseGrant> {
        let response = self
            .client()
            .lease_grant(ttl_seconds, None)
            .await
            .map_err(|error| map_etcd_error("lease grant failed", error))?;

        Ok(LeaseGrant {
            id: LeaseId::new(response.id()),
            ttl_seconds: response.ttl(),
        })
    }

    async fn keep_alive(&self, lease_id: LeaseId) -> CoordinationResult<Box<dyn KeepAliveStream>> {
        let mut client = self.client();
        let ttl_seconds = client
            .lease_time_to_live(lease_id.as_i64(), None)
            .await
            .map_err(|error| map_etcd_error("lease lookup failed", error))?
            .granted_ttl();
        if ttl_seconds <= 0 {
            return Err(CoordinationError::Lease(format!(
                "requested lease {lease_id} not found"
            )));
        }

        let (keeper, stream) = client
            .lease_keep_alive(lease_id.as_i64())
            .await
            .map_err(|error| map_etcd_error("lease keepalive setup failed", error))?;

        let period = (Duration::from_secs(u64::try_from(ttl_seconds).unwrap_or(1)) / 3)
            .max(Duration::from_millis(500));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(EtcdKeepAliveStream {
            lease_id,
            keeper,
            stream,
            interval,
        }))
    }

    async fn revoke(&self, lease_id: LeaseId) -> CoordinationResult<()> {
        self.client()
            .lease_revoke(lease_id.as_i64())
            .await
            .map_err(|error| map_etcd_error("lease revoke failed", error))?;

        Ok(())
    }
}

#[async_trait]
impl TransactionalStore for EtcdCoordinationStore {
    async fn commit(&self, txn: TxnRequest) -> CoordinationResult<TxnResponse> {
        let request = Txn::new()
            .when(txn.compares.iter().map(to_compare).collect::<Vec<_>>())
            .and_then(txn.success.into_iter().map(to_txn_op).collect::<Vec<_>>())
            .or_else(txn.failure.into_iter().map(to_txn_op).collect::<Vec<_>>());

        let response = self
            .client()
            .txn(request)
            .await
            .map_err(|error| map_etcd_error("transaction failed", error))?;

        let revision = response
            .header()
            .map(|header| header.revision())
            .unwrap_or_default();
        let results = response
            .op_responses()
            .into_iter()
            .map(|result| match result {
                TxnOpResponse::Put(_) | TxnOpResponse::Txn(_) => TxnOpResult::Put { revision },
                TxnOpResponse::Get(range) => TxnOpResult::Get {
                    entry: range.kvs().first().map(to_entry),
                },
                TxnOpResponse::Delete(deleted) => TxnOpResult::Delete {
                    deleted: u64::try_from(deleted.deleted()).unwrap_or_default(),
                },
            })
            .collect();

        Ok(TxnResponse {
            succeeded: response.succeeded(),
            results,
        })
    }
}

#[async_trait]
impl WatchStore for EtcdCoordinationStore {
    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<Box<dyn WatchStream>> {
        let (watcher, stream) = self
            .client()
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|error| map_etcd_error("watch setup failed", error))?;

        debug!(prefix = %prefix, watch_id = watcher.watch_id(), "etcd watch created");

        Ok(Box::new(EtcdWatchStream {
            _watcher: watcher,
            stream,
            pending: VecDeque::new(),
        }))
    }
}

struct EtcdKeepAliveStream {
    lease_id: LeaseId,
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
    interval: Interval,
}

#[async_trait]
impl KeepAliveStream for EtcdKeepAliveStream {
    async fn next_ack(&mut self) -> CoordinationResult<Option<KeepAliveAck>> {
        self.interval.tick().await;

        self.keeper
            .keep_alive()
            .await
            .map_err(|error| map_etcd_error("lease keepalive request failed", error))?;

        let response = self
            .stream
            .message()
            .await
            .map_err(|error| map_etcd_error("lease keepalive stream failed", error))?;

        Ok(response.map(|response| KeepAliveAck {
            lease_id: self.lease_id,
            ttl_seconds: response.ttl(),
        }))
    }
}

struct EtcdWatchStream {
    // Dropping the watcher cancels the subscription.
    _watcher: Watcher,
    stream: etcd_client::WatchStream,
    pending: VecDeque<WatchEvent>,
}

#[async_trait]
impl WatchStream for EtcdWatchStream {
    async fn next_event(&mut self) -> CoordinationResult<Option<WatchEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let Some(response) = self
                .stream
                .message()
                .await
                .map_err(|error| map_etcd_error("watch stream failed", error))?
            else {
                return Ok(None);
            };

            if response.canceled() {
                warn!(
                    watch_id = response.watch_id(),
                    reason = %response.cancel_reason(),
                    "etcd watch canceled"
                );
                return Ok(None);
            }

            for event in response.events() {
                let Some(kv) = event.kv() else {
                    continue;
                };
                let key = String::from_utf8_lossy(kv.key()).into_owned();
                self.pending.push_back(match event.event_type() {
                    EventType::Put => WatchEvent::put(key, kv.value(), kv.mod_revision()),
                    EventType::Delete => WatchEvent::delete(key, kv.mod_revision()),
                });
            }
        }
    }
}

fn put_options(lease: Option<LeaseId>) -> Option<PutOptions> {
    lease.map(|lease_id| PutOptions::new().with_lease(lease_id.as_i64()))
}

fn to_entry(kv: &KeyValue) -> KeyValueEntry {
    KeyValueEntry {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: (kv.lease() != 0).then(|| LeaseId::new(kv.lease())),
    }
}

fn to_compare_op(op: CompareOp) -> etcd_client::CompareOp {
    match op {
        CompareOp::Equal => etcd_client::CompareOp::Equal,
        CompareOp::NotEqual => etcd_client::CompareOp::NotEqual,
        CompareOp::Greater => etcd_client::CompareOp::Greater,
        CompareOp::Less => etcd_client::CompareOp::Less,
    }
}

fn to_compare(compare: &TxnCompare) -> Compare {
    let key = compare.key.as_str();
    let op = to_compare_op(compare.op);
    match &compare.target {
        CompareTarget::CreateRevision(revision) => Compare::create_revision(key, op, *revision),
        CompareTarget::ModRevision(revision) => Compare::mod_revision(key, op, *revision),
        CompareTarget::Version(version) => Compare::version(key, op, *version),
        CompareTarget::Value(value) => Compare::value(key, op, value.as_slice()),
    }
}

fn to_txn_op(operation: TxnOp) -> etcd_client::TxnOp {
    match operation {
        TxnOp::Put { key, value, lease } => etcd_client::TxnOp::put(key, value, put_options(lease)),
        TxnOp::Get { key } => etcd_client::TxnOp::get(key, None),
        TxnOp::Delete { key } => etcd_client::TxnOp::delete(key, None),
    }
}

fn map_etcd_error(context: &str, error: etcd_client::Error) -> CoordinationError {
    match &error {
        etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_) => {
            CoordinationError::Connection(format!("{context}: {error}"))
        }
        // The channel dials lazily, so an unreachable cluster surfaces as a status.
        etcd_client::Error::GRpcStatus(status) if is_unreachable(status.code()) => {
            CoordinationError::Connection(format!("{context}: {error}"))
        }
        _ => CoordinationError::Store(format!("{context}: {error}")),
    }
}

fn is_unreachable(code: Code) -> bool {
    matches!(code, Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled)
}
