mod key_value;
mod lease;
mod transaction;
mod watch;

pub use key_value::KeyValueStore;
pub use lease::{KeepAliveStream, LeaseStore};
pub use transaction::{
    CompareOp, CompareTarget, TransactionalStore, TxnCompare, TxnOp, TxnOpResult, TxnRequest,
    TxnResponse,
};
pub use watch::{WatchStore, WatchStream};

/// Store capabilities needed to hold a lease-backed lock.
pub trait LockStore: LeaseStore + TransactionalStore {}

impl<T> LockStore for T where T: LeaseStore + TransactionalStore + ?Sized {}

/// Store capabilities needed by the queue recipes.
pub trait QueueStore: KeyValueStore + TransactionalStore + WatchStore {}

impl<T> QueueStore for T where T: KeyValueStore + TransactionalStore + WatchStore + ?Sized {}

/// Full store contract consumed by the coordination services.
pub trait CoordinationStore: KeyValueStore + LeaseStore + TransactionalStore + WatchStore {}

impl<T> CoordinationStore for T where
    T: KeyValueStore + LeaseStore + TransactionalStore + WatchStore + ?Sized
{
}
