//! Infrastructure adapters for the coordination store ports.

#![forbid(unsafe_code)]

mod etcd_coordination_store;
mod in_memory_coordination_store;
mod relational_pool;

pub use etcd_coordination_store::{EtcdCoordinationStore, EtcdStoreConfig};
pub use in_memory_coordination_store::InMemoryCoordinationStore;
pub use relational_pool::{RelationalPoolConfig, connect_relational_pool};
