use serde::{Deserialize, Serialize};

/// Observable state of one distributed mutex instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutexState {
    /// Nothing is held.
    Unlocked,
    /// The lock key is owned through a live lease.
    Locked,
    /// The last attempt failed with a lease or store fault.
    Failed,
}

impl MutexState {
    /// Returns stable label value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::Failed => "failed",
        }
    }

    /// Returns true when the lock is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }
}
