use std::fmt;

use quay_kv::KvError;
use quay_types::{MessageId, QueueName, TransactionId};
use thiserror::Error;

use crate::intent::ReconcileError;

/// Lifecycle state of a [`crate::Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Marker written; puts are accepted.
    Open,
    /// A put failed; only rollback is allowed.
    Poisoned,
    /// Marker removed; every write is durable.
    Committed,
    /// Every written key and the marker were removed.
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Poisoned => "poisoned",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// Errors from message store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A message targeted a queue that was never created.
    #[error("queue with name '{queue}' doesn't exist")]
    QueueDoesNotExist { queue: QueueName },

    /// The substrate rejected a write.
    #[error("storage write failed for key {key}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: KvError,
    },

    /// The substrate failed a read or scan.
    #[error("storage read failed: {0}")]
    StorageRead(#[source] KvError),

    /// No stored message matches the requested id.
    #[error("message {id} not found in queue '{queue}'")]
    MessageNotFound { queue: QueueName, id: MessageId },

    /// Startup recovery could not remove an incomplete transaction.
    #[error("recovery failed: {0}")]
    RecoveryFailure(#[from] ReconcileError),

    /// The transaction no longer accepts the requested operation.
    #[error("transaction {id} is {state}")]
    TransactionClosed {
        id: TransactionId,
        state: TransactionState,
    },

    /// Rollback could not delete everything; the marker was kept so that
    /// recovery finishes the job.
    #[error("rollback of transaction {id} left {failed} key(s) behind: {source}")]
    RollbackIncomplete {
        id: TransactionId,
        failed: usize,
        #[source]
        source: KvError,
    },

    /// A stored entry could not be decoded.
    #[error("corrupt entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A value could not be encoded for storage. Nothing was written.
    #[error("failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
