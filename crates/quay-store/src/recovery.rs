//! Startup recovery for the message store.
//!
//! Commit is the only code path that removes a transaction marker, so any
//! marker found under `/batch/` belongs to a transaction that died between
//! begin and commit. Every message key carrying that transaction id in its
//! `batch` segment is discarded, then the marker itself.

use quay_kv::KvStore;
use quay_types::TransactionId;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::intent::{reconcile, IntentLayout, ReconcileReport};
use crate::keys::{self, StoreKey};

/// Summary of one recovery pass.
pub type RecoveryReport = ReconcileReport<TransactionId>;

/// Intent layout of the message namespace: markers are transaction markers,
/// tagged data is every field of every message.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageLayout;

impl IntentLayout for MessageLayout {
    type Intent = TransactionId;

    fn marker_prefix(&self) -> Vec<u8> {
        keys::marker_prefix()
    }

    fn data_prefix(&self) -> Vec<u8> {
        keys::queue_prefix()
    }

    fn intent_of_marker(&self, key: &[u8]) -> Option<TransactionId> {
        match keys::parse_key(key)? {
            StoreKey::Marker(tx) => Some(tx),
            _ => None,
        }
    }

    fn intent_of_data(&self, key: &[u8]) -> Option<TransactionId> {
        match keys::parse_key(key)? {
            StoreKey::Message(message) => Some(message.tx),
            _ => None,
        }
    }
}

/// Discard every incomplete transaction in `kv`.
///
/// Safe to run on an already clean store, in which case nothing is deleted.
pub fn recover(kv: &dyn KvStore) -> StoreResult<RecoveryReport> {
    let report = reconcile(kv, &MessageLayout)?;
    if report.is_noop() {
        info!("recovery found no incomplete transactions");
    } else {
        info!(
            transactions = report.intents.len(),
            message_keys = report.data_keys_deleted,
            markers = report.markers_deleted,
            "recovery discarded incomplete transactions"
        );
    }
    if report.unrecognized_markers > 0 {
        warn!(
            count = report.unrecognized_markers,
            "ignored malformed keys under the transaction marker root"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{MessageField, MessageKey};
    use quay_kv::InMemoryKvStore;
    use quay_types::{MessageId, QueueName};

    fn message_keys(tx: TransactionId, id: &str) -> Vec<Vec<u8>> {
        let key = MessageKey::payload(
            QueueName::new("orders").unwrap(),
            MessageId::new(id).unwrap(),
            tx,
        );
        [MessageField::Payload, MessageField::Headers, MessageField::Sent]
            .into_iter()
            .map(|f| key.with_field(f).encode())
            .collect()
    }

    #[test]
    fn discards_only_marked_transactions() {
        let kv = InMemoryKvStore::new();
        let (live, dead) = (TransactionId::new(), TransactionId::new());
        kv.put(&keys::queue_key(&QueueName::new("orders").unwrap()), b"")
            .unwrap();
        for key in message_keys(live, "m1") {
            kv.put(&key, b"x").unwrap();
        }
        for key in message_keys(dead, "m2") {
            kv.put(&key, b"x").unwrap();
        }
        kv.put(&keys::marker_key(&dead), b"").unwrap();

        let report = recover(&kv).unwrap();
        assert_eq!(report.intents, vec![dead]);
        assert_eq!(report.data_keys_deleted, 3);
        assert_eq!(report.markers_deleted, 1);

        for key in message_keys(live, "m1") {
            assert!(kv.contains(&key).unwrap());
        }
        for key in message_keys(dead, "m2") {
            assert!(!kv.contains(&key).unwrap());
        }
    }

    #[test]
    fn marker_roots_are_not_markers() {
        let kv = InMemoryKvStore::new();
        kv.put(&keys::queue_root_key(), b"").unwrap();
        kv.put(&keys::marker_root_key(), b"").unwrap();
        let report = recover(&kv).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.unrecognized_markers, 0);
        assert_eq!(kv.len(), 2);
    }

    #[test]
    fn message_id_equal_to_a_token_is_not_mistaken_for_one() {
        let kv = InMemoryKvStore::new();
        let dead = TransactionId::new();
        let live = TransactionId::new();
        // A message whose id happens to be the dead transaction's token.
        let written = message_keys(live, &dead.to_token());
        for key in &written {
            kv.put(key, b"x").unwrap();
        }
        kv.put(&keys::marker_key(&dead), b"").unwrap();

        let report = recover(&kv).unwrap();
        assert_eq!(report.data_keys_deleted, 0);
        for key in &written {
            assert!(kv.contains(key).unwrap());
        }
    }
}
