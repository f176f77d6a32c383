//! Shared primitives for all Rust crates in Concord.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Concord crates.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> CoordinationResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CoordinationError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Error categories surfaced by coordination primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store was reached but rejected or failed the operation.
    #[error("store error: {0}")]
    Store(String),

    /// Another owner already holds the lock. Expected under contention.
    #[error("lock grab failed: {0}")]
    LockGrabFailed(String),

    /// Lease grant, keepalive setup or revoke failed.
    #[error("lease error: {0}")]
    Lease(String),

    /// A watch subscription ended.
    #[error("watch stream closed: {0}")]
    WatchStreamClosed(String),

    /// The mutex instance already holds its lock.
    #[error("already locked: {0}")]
    AlreadyLocked(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoordinationError {
    /// Returns true for the contention outcome of a lock attempt.
    #[must_use]
    pub fn is_lock_grab_failed(&self) -> bool {
        matches!(self, Self::LockGrabFailed(_))
    }

    /// Returns true when the store itself was unreachable.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{CoordinationError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());

        let key = NonEmptyString::new("/locks/a").unwrap_or_else(|_| unreachable!());
        assert_eq!(String::from(key), "/locks/a");
    }

    #[test]
    fn lock_grab_failed_is_distinguishable_from_faults() {
        let contention = CoordinationError::LockGrabFailed("/locks/a".to_owned());
        let fault = CoordinationError::Store("commit timed out".to_owned());

        assert!(contention.is_lock_grab_failed());
        assert!(!fault.is_lock_grab_failed());
        assert!(!fault.is_connection());
    }

    #[test]
    fn errors_render_their_category() {
        let error = CoordinationError::Lease("lease 7 not found".to_owned());
        assert_eq!(error.to_string(), "lease error: lease 7 not found");
    }
}
