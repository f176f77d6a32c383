use std::sync::Arc;

use concord_core::{CoordinationError, CoordinationResult, NonEmptyString};
use concord_domain::{KeyValueEntry, WatchEventKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::payload_codec::{decode_json, encode_json};
use crate::store_ports::{
    CompareOp, KeyValueStore, QueueStore, TransactionalStore, TxnCompare, TxnOp, TxnRequest,
    WatchStore, WatchStream,
};

mod priority;

pub use priority::PriorityWorkQueue;

/// FIFO queue stored as ordered keys under `<name>/`.
///
/// Item keys carry a sequence number drawn from a counter key kept next to
/// the prefix, so their order is the store's commit order.
#[derive(Clone)]
pub struct WorkQueue {
    store: Arc<dyn QueueStore>,
    name: NonEmptyString,
    prefix: String,
    sequence_key: String,
}

impl WorkQueue {
    /// Creates a queue handle. No key is written until the first enqueue.
    pub fn new(store: Arc<dyn QueueStore>, name: impl Into<String>) -> CoordinationResult<Self> {
        let name = NonEmptyString::new(name).map_err(|_| {
            CoordinationError::Validation("queue name must not be empty".to_owned())
        })?;
        let prefix = queue_prefix(name.as_str());
        let sequence_key = sequence_key(name.as_str());

        Ok(Self {
            store,
            name,
            prefix,
            sequence_key,
        })
    }

    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Appends one raw item and returns its key.
    pub async fn enqueue(&self, value: &[u8]) -> CoordinationResult<String> {
        insert_sequential(
            self.store.as_ref(),
            self.sequence_key.as_str(),
            self.prefix.as_str(),
            value,
        )
        .await
    }

    /// Appends one typed item encoded as JSON.
    pub async fn enqueue_json<T: Serialize>(&self, value: &T) -> CoordinationResult<String> {
        let bytes = encode_json(value)?;
        self.enqueue(bytes.as_slice()).await
    }

    /// Removes and returns the oldest item, or `None` when empty.
    pub async fn try_dequeue(&self) -> CoordinationResult<Option<Vec<u8>>> {
        Ok(claim_first(self.store.as_ref(), self.prefix.as_str())
            .await?
            .map(|entry| entry.value))
    }

    /// Removes and returns the oldest typed item.
    pub async fn try_dequeue_json<T: DeserializeOwned>(&self) -> CoordinationResult<Option<T>> {
        match self.try_dequeue().await? {
            Some(bytes) => decode_json(bytes.as_slice()).map(Some),
            None => Ok(None),
        }
    }

    /// Removes and returns the oldest item, waiting for one when empty.
    pub async fn dequeue(&self) -> CoordinationResult<Vec<u8>> {
        Ok(wait_and_claim(self.store.as_ref(), self.prefix.as_str())
            .await?
            .value)
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

fn queue_prefix(name: &str) -> String {
    format!("{}/", name.trim_end_matches('/'))
}

fn sequence_key(name: &str) -> String {
    format!("{}#sequence", name.trim_end_matches('/'))
}

/// Next free sequence number of a queue, valid while its counter is unchanged.
struct SequenceSlot {
    number: u64,
    guard: TxnCompare,
    advance: TxnOp,
}

impl SequenceSlot {
    fn item_key(&self, prefix: &str) -> String {
        format!("{prefix}{:020}", self.number)
    }
}

async fn next_slot(store: &dyn QueueStore, sequence_key: &str) -> CoordinationResult<SequenceSlot> {
    let (number, guard) = match store.get(sequence_key).await? {
        Some(entry) => {
            let last = entry
                .value_str()?
                .parse::<u64>()
                .map_err(|error| {
                    CoordinationError::Store(format!(
                        "queue sequence '{sequence_key}' is not a number: {error}"
                    ))
                })?;
            let guard =
                TxnCompare::mod_revision(sequence_key, CompareOp::Equal, entry.mod_revision);
            (last.saturating_add(1), guard)
        }
        None => (1, TxnCompare::create_revision(sequence_key, CompareOp::Equal, 0)),
    };

    Ok(SequenceSlot {
        number,
        guard,
        advance: TxnOp::put(sequence_key, number.to_string(), None),
    })
}

async fn insert_sequential(
    store: &dyn QueueStore,
    sequence_key: &str,
    prefix: &str,
    value: &[u8],
) -> CoordinationResult<String> {
    loop {
        let slot = next_slot(store, sequence_key).await?;
        let key = slot.item_key(prefix);
        let txn = TxnRequest::new()
            .when([slot.guard])
            .and_then([slot.advance, TxnOp::put(key.as_str(), value, None)]);

        if store.commit(txn).await?.succeeded {
            debug!(key = %key, "queue item enqueued");
            return Ok(key);
        }

        debug!(sequence = %sequence_key, "queue sequence advanced by another producer; retrying");
    }
}

/// Deletes the first item under `source_prefix` and appends it to `target` in one commit.
async fn move_first(
    store: &dyn QueueStore,
    source_prefix: &str,
    target: &WorkQueue,
) -> CoordinationResult<Option<String>> {
    loop {
        let Some(head) = store.first_with_prefix(source_prefix).await? else {
            return Ok(None);
        };
        let slot = next_slot(store, target.sequence_key.as_str()).await?;
        let key = slot.item_key(target.prefix.as_str());
        let txn = TxnRequest::new()
            .when([
                TxnCompare::mod_revision(head.key.as_str(), CompareOp::Equal, head.mod_revision),
                slot.guard,
            ])
            .and_then([
                TxnOp::delete(head.key.as_str()),
                slot.advance,
                TxnOp::put(key.as_str(), head.value, None),
            ]);

        if store.commit(txn).await?.succeeded {
            debug!(from = %head.key, to = %key, "queue item moved");
            return Ok(Some(key));
        }

        debug!(key = %head.key, "queue head or target sequence changed; retrying move");
    }
}

async fn claim_first(
    store: &dyn QueueStore,
    prefix: &str,
) -> CoordinationResult<Option<KeyValueEntry>> {
    loop {
        let Some(head) = store.first_with_prefix(prefix).await? else {
            return Ok(None);
        };

        let txn = TxnRequest::new()
            .when([TxnCompare::mod_revision(
                head.key.as_str(),
                CompareOp::Equal,
                head.mod_revision,
            )])
            .and_then([TxnOp::delete(head.key.as_str())]);

        if store.commit(txn).await?.succeeded {
            debug!(key = %head.key, "queue item dequeued");
            return Ok(Some(head));
        }

        debug!(key = %head.key, "queue head taken by another consumer; retrying");
    }
}

async fn wait_and_claim(store: &dyn QueueStore, prefix: &str) -> CoordinationResult<KeyValueEntry> {
    // Subscribe before the first read so an item written in between still wakes us.
    let mut stream = store.watch_prefix(prefix).await?;

    loop {
        if let Some(entry) = claim_first(store, prefix).await? {
            return Ok(entry);
        }

        loop {
            match stream.next_event().await? {
                Some(event) if event.kind == WatchEventKind::Put => break,
                Some(_) => continue,
                None => {
                    return Err(CoordinationError::WatchStreamClosed(format!(
                        "watch on queue '{prefix}' ended while waiting for an item"
                    )));
                }
            }
        }
    }
}
