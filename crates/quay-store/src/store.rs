use std::sync::Arc;

use quay_kv::KvStore;
use quay_types::{Message, MessageId, QueueName, Timestamp, TransactionId};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::keys::{self, display_key, MessageField, MessageKey, StoreKey};
use crate::recovery::{self, RecoveryReport};
use crate::transaction::Transaction;

/// A queue and the time it was (last) created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub name: QueueName,
    pub created_at: Timestamp,
}

/// A message as found in storage, with the transaction that wrote it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub message: Message,
    pub transaction: TransactionId,
    /// `false` while the writing transaction's marker is still present.
    pub committed: bool,
}

/// Durable, transactional message storage over a [`KvStore`].
///
/// Opening a store runs recovery before the instance is handed out, so
/// every other operation observes a substrate with no incomplete
/// transactions left over from a previous process. Reads do not filter by
/// commit status: a message written by a transaction that has not yet
/// committed is visible to [`MessageStore::get_message_by_id`].
pub struct MessageStore {
    kv: Arc<dyn KvStore>,
    last_recovery: RecoveryReport,
}

impl MessageStore {
    /// Open a store over `kv`: lay out the namespace roots, then discard
    /// every incomplete transaction.
    ///
    /// Fails with [`StoreError::RecoveryFailure`] if recovery cannot finish;
    /// no store is returned in that case.
    pub fn open(kv: Arc<dyn KvStore>) -> StoreResult<Self> {
        for root in [keys::queue_root_key(), keys::marker_root_key()] {
            let present = kv.contains(&root).map_err(StoreError::StorageRead)?;
            if !present {
                put(kv.as_ref(), &root, &[])?;
            }
        }

        let last_recovery = recovery::recover(kv.as_ref())?;
        info!(
            discarded_transactions = last_recovery.intents.len(),
            "message store ready"
        );
        Ok(Self { kv, last_recovery })
    }

    /// The substrate this store writes to.
    pub fn substrate(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// What recovery removed when this store was opened.
    pub fn last_recovery(&self) -> &RecoveryReport {
        &self.last_recovery
    }

    /// Create `queue`, or refresh its creation time if it already exists.
    pub fn create_queue(&self, queue: &QueueName) -> StoreResult<()> {
        put(
            self.kv.as_ref(),
            &keys::queue_key(queue),
            &Timestamp::now().to_bytes(),
        )?;
        debug!(%queue, "queue created");
        Ok(())
    }

    pub fn queue_exists(&self, queue: &QueueName) -> StoreResult<bool> {
        self.kv
            .contains(&keys::queue_key(queue))
            .map_err(StoreError::StorageRead)
    }

    /// Every queue, in name order.
    pub fn list_queues(&self) -> StoreResult<Vec<QueueInfo>> {
        let entries = self
            .kv
            .scan(&keys::queue_prefix())
            .map_err(StoreError::StorageRead)?;
        entries
            .into_iter()
            .filter_map(|(key, value)| match keys::parse_key(&key) {
                Some(StoreKey::Queue(name)) => Some((key, name, value)),
                _ => None,
            })
            .map(|(key, name, value)| -> StoreResult<QueueInfo> {
                Ok(QueueInfo {
                    name,
                    created_at: codec::decode_timestamp(&key, &value)?,
                })
            })
            .collect()
    }

    /// Look up message `id` in `queue`, whatever transaction wrote it.
    ///
    /// Matching compares the decoded id segment exactly. If several
    /// transactions wrote the same id, the first in key order is returned.
    pub fn get_message_by_id(&self, queue: &QueueName, id: &MessageId) -> StoreResult<Message> {
        let entries = self
            .kv
            .scan(&keys::message_id_prefix(queue, id))
            .map_err(StoreError::StorageRead)?;

        let mut matches = entries.into_iter().filter_map(|(key, value)| {
            match keys::parse_key(&key) {
                Some(StoreKey::Message(k))
                    if k.field == MessageField::Payload && k.id == *id && k.queue == *queue =>
                {
                    Some((k, value))
                }
                _ => None,
            }
        });

        let (location, payload) = matches.next().ok_or_else(|| StoreError::MessageNotFound {
            queue: queue.clone(),
            id: id.clone(),
        })?;
        let others = matches.count();
        if others > 0 {
            warn!(%queue, %id, copies = others + 1, "message id stored by several transactions");
        }

        self.read_message(&location, payload)
    }

    /// Every message stored in `queue`, in key order.
    pub fn messages(&self, queue: &QueueName) -> StoreResult<Vec<StoredMessage>> {
        let entries = self
            .kv
            .scan(&keys::message_prefix(queue))
            .map_err(StoreError::StorageRead)?;

        let mut out = Vec::new();
        for (key, value) in entries {
            let Some(StoreKey::Message(location)) = keys::parse_key(&key) else {
                continue;
            };
            if location.field != MessageField::Payload {
                continue;
            }
            let committed = !self
                .kv
                .contains(&keys::marker_key(&location.tx))
                .map_err(StoreError::StorageRead)?;
            let transaction = location.tx;
            out.push(StoredMessage {
                message: self.read_message(&location, value)?,
                transaction,
                committed,
            });
        }
        Ok(out)
    }

    /// Open an empty transaction on this store's substrate.
    pub fn begin(&self) -> StoreResult<Transaction> {
        Transaction::begin(Arc::clone(&self.kv))
    }

    /// Write every message under one new transaction.
    ///
    /// Each message's queue must exist. On any failure the transaction is
    /// rolled back before the error is returned. On success the transaction
    /// is returned still open; committing it is up to the caller.
    pub fn store_messages(&self, messages: &[Message]) -> StoreResult<Transaction> {
        let mut tx = self.begin()?;
        for message in messages {
            if let Err(e) = self.store_message(&mut tx, message) {
                if let Err(rollback) = tx.rollback() {
                    error!(
                        tx = %tx.id(),
                        error = %rollback,
                        "rollback failed; recovery will discard the transaction"
                    );
                }
                return Err(e);
            }
        }
        debug!(tx = %tx.id(), count = messages.len(), "messages stored");
        Ok(tx)
    }

    fn store_message(&self, tx: &mut Transaction, message: &Message) -> StoreResult<()> {
        if !self.queue_exists(&message.queue)? {
            return Err(StoreError::QueueDoesNotExist {
                queue: message.queue.clone(),
            });
        }

        let key = MessageKey::payload(message.queue.clone(), message.id.clone(), tx.id());
        tx.put(&key.encode(), &message.payload)?;
        let headers_key = key.with_field(MessageField::Headers).encode();
        tx.put(
            &headers_key,
            &codec::encode_headers(&headers_key, &message.headers)?,
        )?;
        tx.put(
            &key.with_field(MessageField::Sent).encode(),
            &message.sent_at.to_bytes(),
        )?;
        Ok(())
    }

    fn read_message(&self, location: &MessageKey, payload: Vec<u8>) -> StoreResult<Message> {
        let headers_key = location.with_field(MessageField::Headers).encode();
        let headers = codec::decode_headers(&headers_key, &self.read_field(&headers_key)?)?;
        let sent_key = location.with_field(MessageField::Sent).encode();
        let sent_at = codec::decode_timestamp(&sent_key, &self.read_field(&sent_key)?)?;

        Ok(Message {
            id: location.id.clone(),
            queue: location.queue.clone(),
            payload,
            headers,
            sent_at,
        })
    }

    fn read_field(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.kv
            .get(key)
            .map_err(StoreError::StorageRead)?
            .ok_or_else(|| StoreError::Corrupt {
                key: display_key(key),
                reason: "message field missing".into(),
            })
    }
}

fn put(kv: &dyn KvStore, key: &[u8], value: &[u8]) -> StoreResult<()> {
    kv.put(key, value).map_err(|source| StoreError::StorageWrite {
        key: display_key(key),
        source,
    })
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("last_recovery", &self.last_recovery)
            .finish()
    }
}
