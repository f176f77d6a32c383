use concord_core::{CoordinationError, CoordinationResult};
use serde::{Deserialize, Serialize};

use crate::LeaseId;

/// Position in the store's global write order.
pub type Revision = i64;

/// One stored key with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    /// Stored key.
    pub key: String,
    /// Raw stored value.
    pub value: Vec<u8>,
    /// Revision at which the key was created. Zero means absent.
    pub create_revision: Revision,
    /// Revision of the last write to the key.
    pub mod_revision: Revision,
    /// Number of writes since creation.
    pub version: i64,
    /// Lease the key is bound to, if any.
    pub lease: Option<LeaseId>,
}

impl KeyValueEntry {
    /// Returns the value as UTF-8 text.
    pub fn value_str(&self) -> CoordinationResult<&str> {
        std::str::from_utf8(self.value.as_slice()).map_err(|error| {
            CoordinationError::Serialization(format!(
                "value of key '{}' is not valid UTF-8: {error}",
                self.key
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::KeyValueEntry;

    #[test]
    fn value_str_rejects_invalid_utf8() {
        let entry = KeyValueEntry {
            key: "/jobs/1".to_owned(),
            value: vec![0xff, 0xfe],
            create_revision: 3,
            mod_revision: 3,
            version: 1,
            lease: None,
        };

        assert!(entry.value_str().is_err());
    }
}
