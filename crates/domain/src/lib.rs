//! Domain values shared by coordination ports and services.

#![forbid(unsafe_code)]

mod key_value;
mod lease;
mod mutex;
mod queue;
mod watch;

pub use key_value::{KeyValueEntry, Revision};
pub use lease::{KeepAliveAck, LeaseGrant, LeaseId};
pub use mutex::MutexState;
pub use queue::QueuePriority;
pub use watch::{WatchEvent, WatchEventKind};
