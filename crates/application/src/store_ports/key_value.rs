use async_trait::async_trait;
use concord_core::CoordinationResult;
use concord_domain::{KeyValueEntry, LeaseId, Revision};

/// Plain key-value operations of the coordination store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Writes one key, optionally bound to a lease, and returns the write revision.
    async fn put(&self, key: &str, value: &[u8], lease: Option<LeaseId>)
    -> CoordinationResult<Revision>;

    /// Reads one key.
    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValueEntry>>;

    /// Reads every key sharing a prefix, in key order.
    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValueEntry>>;

    /// Reads the lowest key sharing a prefix.
    async fn first_with_prefix(&self, prefix: &str) -> CoordinationResult<Option<KeyValueEntry>>;

    /// Reads the highest key sharing a prefix.
    async fn last_with_prefix(&self, prefix: &str) -> CoordinationResult<Option<KeyValueEntry>>;

    /// Deletes one key and returns the number of removed keys.
    async fn delete(&self, key: &str) -> CoordinationResult<u64>;

    /// Deletes every key sharing a prefix and returns the number of removed keys.
    async fn delete_prefix(&self, prefix: &str) -> CoordinationResult<u64>;

    /// Counts keys sharing a prefix without reading values.
    async fn count_prefix(&self, prefix: &str) -> CoordinationResult<i64>;
}
