//! Transactional message persistence for Quay.
//!
//! Messages are written to an ordered key-value substrate ([`quay_kv::KvStore`])
//! in batches. Each batch runs inside a [`Transaction`] whose marker is made
//! durable before any message data; committing deletes the marker. On open,
//! [`MessageStore`] runs [`recover`], which discards every message written by
//! a transaction whose marker is still present.
//!
//! # Key Namespace
//!
//! ```text
//! /q                                        queue root
//! /q/<queue>/msgs                           queue marker (value: creation time)
//! /q/<queue>/msgs/<id>/batch/<tx>           payload
//! /q/<queue>/msgs/<id>/batch/<tx>/headers   headers (JSON object)
//! /q/<queue>/msgs/<id>/batch/<tx>/sent      send time
//! /batch                                    transaction marker root
//! /batch/<tx>                               transaction marker (value: begin time)
//! ```
//!
//! Queue names and message ids are percent-escaped so that `/` inside them
//! never forms a segment boundary. See [`keys`].
//!
//! # Guarantees
//!
//! 1. A committed batch is fully readable after restart.
//! 2. After recovery, no key from an uncommitted batch remains.
//! 3. Recovery is idempotent and may itself be interrupted.
//! 4. Reads do not filter by commit status.

pub mod codec;
pub mod error;
pub mod intent;
pub mod keys;
pub mod recovery;
pub mod store;
pub mod transaction;

pub use error::{StoreError, StoreResult, TransactionState};
pub use intent::{reconcile, IntentLayout, ReconcileError, ReconcileReport};
pub use keys::{MessageField, MessageKey, StoreKey};
pub use recovery::{recover, MessageLayout, RecoveryReport};
pub use store::{MessageStore, QueueInfo, StoredMessage};
pub use transaction::Transaction;
