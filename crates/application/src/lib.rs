//! Coordination services and the store ports they consume.

#![forbid(unsafe_code)]

mod dispatch_ports;
mod distributed_mutex;
mod lease_keeper;
mod payload_codec;
mod store_ports;
mod watch_dispatcher;
mod work_queue;

pub use dispatch_ports::{ExclusiveLock, FnWatchEventHandler, WatchEventHandler};
pub use distributed_mutex::DistributedMutex;
pub use lease_keeper::{KeepAliveHandle, LeaseKeeper};
pub use payload_codec::{decode_json, encode_json};
pub use store_ports::{
    CompareOp, CompareTarget, CoordinationStore, KeepAliveStream, KeyValueStore, LeaseStore,
    LockStore, QueueStore, TransactionalStore, TxnCompare, TxnOp, TxnOpResult, TxnRequest,
    TxnResponse, WatchStore, WatchStream,
};
pub use watch_dispatcher::{DispatchCounters, DispatchOutcome, DispatchStats, WatchDispatcher};
pub use work_queue::{PriorityWorkQueue, WorkQueue};
