use std::sync::Arc;

use concord_core::{CoordinationError, CoordinationResult, NonEmptyString};
use concord_domain::QueuePriority;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::payload_codec::{decode_json, encode_json};
use crate::store_ports::{KeyValueStore, QueueStore, WatchStore, WatchStream};

use super::{
    WorkQueue, claim_first, insert_sequential, move_first, queue_prefix, sequence_key,
    wait_and_claim,
};

/// Queue whose items are ordered by priority, then by arrival.
///
/// Items live under `<name>/<priority>/`; a lower priority value is served first.
#[derive(Clone)]
pub struct PriorityWorkQueue {
    store: Arc<dyn QueueStore>,
    name: NonEmptyString,
    prefix: String,
    sequence_key: String,
    top_priority: QueuePriority,
    waiting_priority: QueuePriority,
}

impl PriorityWorkQueue {
    /// Creates a queue handle with the priorities used for pinned and regular items.
    pub fn new(
        store: Arc<dyn QueueStore>,
        name: impl Into<String>,
        top_priority: QueuePriority,
        waiting_priority: QueuePriority,
    ) -> CoordinationResult<Self> {
        let name = NonEmptyString::new(name).map_err(|_| {
            CoordinationError::Validation("queue name must not be empty".to_owned())
        })?;

        if top_priority > waiting_priority {
            return Err(CoordinationError::Validation(
                "top_priority must not be served after waiting_priority".to_owned(),
            ));
        }

        let prefix = queue_prefix(name.as_str());
        let sequence_key = sequence_key(name.as_str());
        Ok(Self {
            store,
            name,
            prefix,
            sequence_key,
            top_priority,
            waiting_priority,
        })
    }

    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Priority used for items pinned to the front.
    #[must_use]
    pub fn top_priority(&self) -> QueuePriority {
        self.top_priority
    }

    /// Priority used for regular items.
    #[must_use]
    pub fn waiting_priority(&self) -> QueuePriority {
        self.waiting_priority
    }

    /// Inserts one raw item with an explicit priority and returns its key.
    pub async fn enqueue(
        &self,
        value: &[u8],
        priority: QueuePriority,
    ) -> CoordinationResult<String> {
        let prefix = format!("{}{}/", self.prefix, priority.key_segment());
        trace!(
            queue = %self.name.as_str(),
            priority = priority.value(),
            "enqueueing prioritized item"
        );
        insert_sequential(
            self.store.as_ref(),
            self.sequence_key.as_str(),
            prefix.as_str(),
            value,
        )
        .await
    }

    /// Inserts one raw item ahead of regular items.
    pub async fn enqueue_top(&self, value: &[u8]) -> CoordinationResult<String> {
        self.enqueue(value, self.top_priority).await
    }

    /// Inserts one raw item with the regular priority.
    pub async fn enqueue_waiting(&self, value: &[u8]) -> CoordinationResult<String> {
        self.enqueue(value, self.waiting_priority).await
    }

    /// Inserts one typed item encoded as JSON.
    pub async fn enqueue_json<T: Serialize>(
        &self,
        value: &T,
        priority: QueuePriority,
    ) -> CoordinationResult<String> {
        let bytes = encode_json(value)?;
        self.enqueue(bytes.as_slice(), priority).await
    }

    /// Removes and returns the most urgent item, or `None` when empty.
    pub async fn try_dequeue(&self) -> CoordinationResult<Option<Vec<u8>>> {
        Ok(claim_first(self.store.as_ref(), self.prefix.as_str())
            .await?
            .map(|entry| entry.value))
    }

    /// Removes and returns the most urgent typed item.
    pub async fn try_dequeue_json<T: DeserializeOwned>(&self) -> CoordinationResult<Option<T>> {
        match self.try_dequeue().await? {
            Some(bytes) => decode_json(bytes.as_slice()).map(Some),
            None => Ok(None),
        }
    }

    /// Removes and returns the most urgent item, waiting for one when empty.
    pub async fn dequeue(&self) -> CoordinationResult<Vec<u8>> {
        Ok(wait_and_claim(self.store.as_ref(), self.prefix.as_str())
            .await?
            .value)
    }

    /// Moves the most urgent item to the tail of `target` in a single commit.
    ///
    /// Returns the item's new key, or `None` when this queue is empty. Both
    /// queues must live in the same store; a failed commit leaves the item here.
    pub async fn promote_first(&self, target: &WorkQueue) -> CoordinationResult<Option<String>> {
        move_first(self.store.as_ref(), self.prefix.as_str(), target).await
    }

    /// Returns the least urgent item as `(key, value)` without removing it.
    pub async fn last(&self) -> CoordinationResult<Option<(String, Vec<u8>)>> {
        Ok(self
            .store
            .last_with_prefix(self.prefix.as_str())
            .await?
            .map(|entry| (entry.key, entry.value)))
    }

    /// Returns the number of queued items.
    pub async fn len(&self) -> CoordinationResult<i64> {
        self.store.count_prefix(self.prefix.as_str()).await
    }

    /// Returns true when no item is queued.
    pub async fn is_empty(&self) -> CoordinationResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Subscribes to every change of the queue's items.
    pub async fn watch_items(&self) -> CoordinationResult<Box<dyn WatchStream>> {
        self.store.watch_prefix(self.prefix.as_str()).await
    }
}
