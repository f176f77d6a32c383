use serde::{Deserialize, Serialize};

use crate::Revision;

/// Kind of change observed on a watched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// Key was created or overwritten.
    Put,
    /// Key was deleted, revoked or expired.
    Delete,
}

impl WatchEventKind {
    /// Returns stable label value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Delete => "delete",
        }
    }
}

/// One change delivered by a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Change kind.
    pub kind: WatchEventKind,
    /// Changed key.
    pub key: String,
    /// New value for puts, empty for deletes.
    pub value: Vec<u8>,
    /// Revision of the change.
    pub revision: Revision,
}

impl WatchEvent {
    /// Creates a put event.
    #[must_use]
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>, revision: Revision) -> Self {
        Self {
            kind: WatchEventKind::Put,
            key: key.into(),
            value: value.into(),
            revision,
        }
    }

    /// Creates a delete event.
    #[must_use]
    pub fn delete(key: impl Into<String>, revision: Revision) -> Self {
        Self {
            kind: WatchEventKind::Delete,
            key: key.into(),
            value: Vec::new(),
            revision,
        }
    }

    /// Returns the value rendered lossily as text, for logging.
    #[must_use]
    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(self.value.as_slice()).into_owned()
    }
}
