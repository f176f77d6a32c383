use std::cmp::Ordering;

use async_trait::async_trait;
use concord_core::CoordinationResult;
use concord_domain::{KeyValueEntry, LeaseId, Revision};

/// Atomic compare-and-branch writes.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Evaluates every compare and applies the matching branch as one atomic unit.
    async fn commit(&self, txn: TxnRequest) -> CoordinationResult<TxnResponse>;
}

/// Comparison operator of one transaction guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Stored value equals the operand.
    Equal,
    /// Stored value differs from the operand.
    NotEqual,
    /// Stored value is greater than the operand.
    Greater,
    /// Stored value is less than the operand.
    Less,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::Greater => ordering == Ordering::Greater,
            Self::Less => ordering == Ordering::Less,
        }
    }
}

/// Key attribute a guard compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    /// Creation revision; zero for absent keys.
    CreateRevision(Revision),
    /// Last modification revision; zero for absent keys.
    ModRevision(Revision),
    /// Write count; zero for absent keys.
    Version(i64),
    /// Raw value. Never matches an absent key.
    Value(Vec<u8>),
}

/// One guard of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnCompare {
    /// Guarded key.
    pub key: String,
    /// Operator applied as `stored <op> operand`.
    pub op: CompareOp,
    /// Attribute and operand.
    pub target: CompareTarget,
}

impl TxnCompare {
    /// Guards on the creation revision of a key.
    #[must_use]
    pub fn create_revision(key: impl Into<String>, op: CompareOp, revision: Revision) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::CreateRevision(revision),
        }
    }

    /// Guards on the modification revision of a key.
    #[must_use]
    pub fn mod_revision(key: impl Into<String>, op: CompareOp, revision: Revision) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::ModRevision(revision),
        }
    }

    /// Guards on the stored value of a key.
    #[must_use]
    pub fn value(key: impl Into<String>, op: CompareOp, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::Value(value.into()),
        }
    }

    /// Evaluates the guard against the current entry of its key.
    #[must_use]
    pub fn matches(&self, entry: Option<&KeyValueEntry>) -> bool {
        let ordering = match (&self.target, entry) {
            (CompareTarget::CreateRevision(operand), entry) => entry
                .map_or(0, |entry| entry.create_revision)
                .cmp(operand),
            (CompareTarget::ModRevision(operand), entry) => {
                entry.map_or(0, |entry| entry.mod_revision).cmp(operand)
            }
            (CompareTarget::Version(operand), entry) => {
                entry.map_or(0, |entry| entry.version).cmp(operand)
            }
            (CompareTarget::Value(_), None) => return false,
            (CompareTarget::Value(operand), Some(entry)) => entry.value.cmp(operand),
        };

        self.op.accepts(ordering)
    }
}

/// One operation inside a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    /// Writes a key, optionally bound to a lease.
    Put {
        /// Written key.
        key: String,
        /// Written value.
        value: Vec<u8>,
        /// Lease binding.
        lease: Option<LeaseId>,
    },
    /// Reads a key.
    Get {
        /// Read key.
        key: String,
    },
    /// Deletes a key.
    Delete {
        /// Deleted key.
        key: String,
    },
}

impl TxnOp {
    /// Builds a put operation.
    #[must_use]
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>, lease: Option<LeaseId>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
            lease,
        }
    }

    /// Builds a get operation.
    #[must_use]
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    /// Builds a delete operation.
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Atomic transaction request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnRequest {
    /// Guards that must all hold for the success branch.
    pub compares: Vec<TxnCompare>,
    /// Operations applied when every guard holds.
    pub success: Vec<TxnOp>,
    /// Operations applied otherwise.
    pub failure: Vec<TxnOp>,
}

impl TxnRequest {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the guards.
    #[must_use]
    pub fn when(mut self, compares: impl Into<Vec<TxnCompare>>) -> Self {
        self.compares = compares.into();
        self
    }

    /// Sets the success branch.
    #[must_use]
    pub fn and_then(mut self, operations: impl Into<Vec<TxnOp>>) -> Self {
        self.success = operations.into();
        self
    }

    /// Sets the failure branch.
    #[must_use]
    pub fn or_else(mut self, operations: impl Into<Vec<TxnOp>>) -> Self {
        self.failure = operations.into();
        self
    }
}

/// Result of one applied transaction operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOpResult {
    /// Put applied at a revision.
    Put {
        /// Revision of the write.
        revision: Revision,
    },
    /// Get result.
    Get {
        /// Entry, when the key exists.
        entry: Option<KeyValueEntry>,
    },
    /// Delete result.
    Delete {
        /// Number of removed keys.
        deleted: u64,
    },
}

/// Committed transaction outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnResponse {
    /// True when the success branch ran.
    pub succeeded: bool,
    /// Results of the executed branch, in request order.
    pub results: Vec<TxnOpResult>,
}

impl TxnResponse {
    /// Returns the first entry read by the executed branch.
    #[must_use]
    pub fn first_read(&self) -> Option<&KeyValueEntry> {
        self.results.iter().find_map(|result| match result {
            TxnOpResult::Get { entry } => entry.as_ref(),
            _ => None,
        })
    }
}
