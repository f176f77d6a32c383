use serde::{Deserialize, Serialize};

/// Priority index of a queued item. Lower values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueuePriority(u16);

impl QueuePriority {
    /// Wraps a priority index.
    #[must_use]
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw index.
    #[must_use]
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Returns the fixed-width key segment that keeps lexical and numeric order equal.
    #[must_use]
    pub fn key_segment(&self) -> String {
        format!("{:05}", self.0)
    }
}
