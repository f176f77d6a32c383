use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Store-issued lease identifier.
///
/// The value is opaque: it is passed back to the store exactly as received
/// and never transformed arithmetically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(i64);

impl LeaseId {
    /// Wraps a raw identifier returned by the store.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for LeaseId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{:x}", self.0)
    }
}

/// Result of a lease grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Granted lease.
    pub id: LeaseId,
    /// TTL the store actually granted, in seconds.
    pub ttl_seconds: i64,
}

/// One keepalive acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveAck {
    /// Renewed lease.
    pub lease_id: LeaseId,
    /// Remaining TTL after renewal. Zero or less means the lease is gone.
    pub ttl_seconds: i64,
}

impl KeepAliveAck {
    /// Returns true when the store reports the lease as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.ttl_seconds <= 0
    }
}
