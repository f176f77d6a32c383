use std::sync::Arc;

use async_trait::async_trait;
use concord_application::{PriorityWorkQueue, QueueStore, WatchEventHandler, WorkQueue};
use concord_core::CoordinationResult;
use concord_domain::{QueuePriority, WatchEvent};
use tracing::{debug, info};

const TOP_PRIORITY: u16 = 10;
const WAITING_PRIORITY: u16 = 50;

/// Keeps the execution prefix fed from the waiting queue.
///
/// A delete under the execution prefix frees one slot, which is filled with
/// the most urgent waiting item.
pub(crate) struct ExecutionSlotHandler {
    waiting: PriorityWorkQueue,
    executing: WorkQueue,
}

impl ExecutionSlotHandler {
    pub(crate) fn new(
        store: Arc<dyn QueueStore>,
        waiting_queue_name: &str,
        execution_prefix: &str,
    ) -> CoordinationResult<Self> {
        Ok(Self {
            waiting: PriorityWorkQueue::new(
                store.clone(),
                waiting_queue_name,
                QueuePriority::new(TOP_PRIORITY),
                QueuePriority::new(WAITING_PRIORITY),
            )?,
            executing: WorkQueue::new(store, execution_prefix)?,
        })
    }
}

#[async_trait]
impl WatchEventHandler for ExecutionSlotHandler {
    async fn on_put(&self, event: &WatchEvent) -> CoordinationResult<()> {
        info!(
            key = %event.key,
            revision = event.revision,
            value = %event.value_lossy(),
            "execution item started"
        );
        Ok(())
    }

    async fn on_delete(&self, event: &WatchEvent) -> CoordinationResult<()> {
        let Some(promoted_key) = self.waiting.promote_first(&self.executing).await? else {
            debug!(key = %event.key, queue = %self.waiting.name(), "no waiting item to promote");
            return Ok(());
        };

        info!(
            freed_key = %event.key,
            promoted_key = %promoted_key,
            queue = %self.waiting.name(),
            "waiting item promoted"
        );
        Ok(())
    }
}
