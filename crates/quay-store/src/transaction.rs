use std::fmt;
use std::sync::Arc;

use quay_kv::{KvError, KvStore};
use quay_types::{Timestamp, TransactionId};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult, TransactionState};
use crate::keys::{display_key, marker_key};

/// The atomicity boundary for a batch of writes.
///
/// [`Transaction::begin`] makes the marker durable before any data is
/// written. Every key passed to [`Transaction::put`] is recorded so that
/// [`Transaction::rollback`] can remove it. [`Transaction::commit`] deletes
/// the marker and is the only way a transaction's writes become complete.
///
/// Dropping an open transaction does nothing: its marker stays in place and
/// the next startup recovery discards its writes.
pub struct Transaction {
    id: TransactionId,
    kv: Arc<dyn KvStore>,
    written: Vec<Vec<u8>>,
    state: TransactionState,
    started_at: Timestamp,
}

impl Transaction {
    /// Allocate a fresh id and write its marker.
    ///
    /// The marker value is the begin time, kept for diagnostics only.
    pub fn begin(kv: Arc<dyn KvStore>) -> StoreResult<Self> {
        let id = TransactionId::new();
        let started_at = Timestamp::now();
        let marker = marker_key(&id);
        kv.put(&marker, &started_at.to_bytes())
            .map_err(|source| StoreError::StorageWrite {
                key: display_key(&marker),
                source,
            })?;

        debug!(tx = %id, "transaction begun");
        Ok(Self {
            id,
            kv,
            written: Vec::new(),
            state: TransactionState::Open,
            started_at,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Keys written so far, in write order.
    pub fn written_keys(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Write `value` at `key` through to the substrate.
    ///
    /// The key is recorded before the write is attempted, so a write whose
    /// outcome is unknown is still covered by rollback. A failed write
    /// poisons the transaction.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.ensure(TransactionState::Open)?;
        self.written.push(key.to_vec());
        if let Err(source) = self.kv.put(key, value) {
            self.state = TransactionState::Poisoned;
            return Err(StoreError::StorageWrite {
                key: display_key(key),
                source,
            });
        }
        Ok(())
    }

    /// Delete the marker, making every write complete.
    ///
    /// If the marker delete fails the transaction stays open and may still
    /// be rolled back.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.ensure(TransactionState::Open)?;
        let marker = marker_key(&self.id);
        self.kv
            .delete(&marker)
            .map_err(|source| StoreError::StorageWrite {
                key: display_key(&marker),
                source,
            })?;
        self.state = TransactionState::Committed;
        debug!(tx = %self.id, keys = self.written.len(), "transaction committed");
        Ok(())
    }

    /// Delete every written key, then the marker.
    ///
    /// All data deletes are attempted. The marker is only removed once every
    /// one of them succeeded, so data is never left live without its marker;
    /// on partial failure the transaction is left poisoned and a later
    /// rollback or startup recovery finishes the cleanup. Rolling back an
    /// already rolled-back transaction is a no-op.
    pub fn rollback(&mut self) -> StoreResult<()> {
        match self.state {
            TransactionState::Open | TransactionState::Poisoned => {}
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Committed => {
                return Err(StoreError::TransactionClosed {
                    id: self.id,
                    state: self.state,
                })
            }
        }

        let mut remaining = Vec::new();
        let mut first_error: Option<KvError> = None;
        for key in self.written.drain(..).rev() {
            if let Err(e) = self.kv.delete(&key) {
                warn!(tx = %self.id, key = %display_key(&key), error = %e, "rollback delete failed");
                first_error.get_or_insert(e);
                remaining.push(key);
            }
        }
        if let Some(source) = first_error {
            remaining.reverse();
            let failed = remaining.len();
            self.written = remaining;
            self.state = TransactionState::Poisoned;
            return Err(StoreError::RollbackIncomplete {
                id: self.id,
                failed,
                source,
            });
        }

        if let Err(source) = self.kv.delete(&marker_key(&self.id)) {
            self.state = TransactionState::Poisoned;
            return Err(StoreError::RollbackIncomplete {
                id: self.id,
                failed: 1,
                source,
            });
        }

        self.state = TransactionState::RolledBack;
        debug!(tx = %self.id, "transaction rolled back");
        Ok(())
    }

    fn ensure(&self, expected: TransactionState) -> StoreResult<()> {
        if self.state != expected {
            return Err(StoreError::TransactionClosed {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("written", &self.written.len())
            .field("started_at", &self.started_at)
            .finish()
    }
}
