//! Intent records with idempotent cleanup.
//!
//! A writer announces an operation by putting a short-lived marker into a
//! dedicated namespace before touching any data, and tags every data key it
//! writes with the marker's id. Removing the marker completes the operation.
//! Any marker still present when [`reconcile`] runs belongs to an operation
//! that never completed, so every data key tagged with its id is deleted,
//! followed by the marker itself.
//!
//! Affected keys are re-derived from scratch on every run and markers are
//! deleted last, so an interrupted reconciliation is finished by the next one.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use quay_kv::{KvError, KvStore};
use thiserror::Error;
use tracing::debug;

use crate::keys::display_key;

/// Describes where intent markers and tagged data live, and how to read the
/// intent id back out of either kind of key.
pub trait IntentLayout {
    type Intent: Clone + Debug + Eq + Hash;

    /// Prefix under which every marker key lives.
    fn marker_prefix(&self) -> Vec<u8>;

    /// Prefix under which every tagged data key lives.
    fn data_prefix(&self) -> Vec<u8>;

    /// The intent a marker key announces, or `None` if the key is not a
    /// well-formed marker.
    fn intent_of_marker(&self, key: &[u8]) -> Option<Self::Intent>;

    /// The intent a data key was written under, or `None` if it carries no tag.
    fn intent_of_data(&self, key: &[u8]) -> Option<Self::Intent>;
}

/// What a reconciliation pass found and removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport<I> {
    /// Incomplete intents found, in marker scan order.
    pub intents: Vec<I>,
    pub data_keys_deleted: usize,
    pub markers_deleted: usize,
    /// Keys under the marker prefix that did not decode as markers. They are
    /// left untouched.
    pub unrecognized_markers: usize,
}

impl<I> Default for ReconcileReport<I> {
    fn default() -> Self {
        Self {
            intents: Vec::new(),
            data_keys_deleted: 0,
            markers_deleted: 0,
            unrecognized_markers: 0,
        }
    }
}

impl<I> ReconcileReport<I> {
    /// `true` if the pass deleted nothing.
    pub fn is_noop(&self) -> bool {
        self.data_keys_deleted == 0 && self.markers_deleted == 0
    }
}

/// Reconciliation failures. Any of them leaves the remaining work for the
/// next pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to scan {prefix}: {source}")]
    Scan {
        prefix: String,
        #[source]
        source: KvError,
    },

    #[error("failed to delete {key}: {source}")]
    Delete {
        key: String,
        #[source]
        source: KvError,
    },
}

/// Remove every trace of incomplete intents.
///
/// Deletions run one at a time, data keys first and markers last, and the
/// first failure aborts the pass.
pub fn reconcile<L: IntentLayout>(
    kv: &dyn KvStore,
    layout: &L,
) -> Result<ReconcileReport<L::Intent>, ReconcileError> {
    let mut report = ReconcileReport::default();

    let marker_prefix = layout.marker_prefix();
    let mut markers = Vec::new();
    for (key, _) in scan(kv, &marker_prefix)? {
        match layout.intent_of_marker(&key) {
            Some(intent) => {
                report.intents.push(intent);
                markers.push(key);
            }
            None => report.unrecognized_markers += 1,
        }
    }
    if markers.is_empty() {
        return Ok(report);
    }

    let incomplete: HashSet<&L::Intent> = report.intents.iter().collect();
    let affected: Vec<Vec<u8>> = scan(kv, &layout.data_prefix())?
        .into_iter()
        .filter(|(key, _)| {
            layout
                .intent_of_data(key)
                .is_some_and(|intent| incomplete.contains(&intent))
        })
        .map(|(key, _)| key)
        .collect();

    for key in &affected {
        delete(kv, key)?;
        report.data_keys_deleted += 1;
    }
    for key in &markers {
        delete(kv, key)?;
        report.markers_deleted += 1;
    }

    debug!(
        intents = report.intents.len(),
        data_keys = report.data_keys_deleted,
        "reconciled incomplete intents"
    );
    Ok(report)
}

fn scan(kv: &dyn KvStore, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ReconcileError> {
    kv.scan(prefix).map_err(|source| ReconcileError::Scan {
        prefix: display_key(prefix),
        source,
    })
}

fn delete(kv: &dyn KvStore, key: &[u8]) -> Result<(), ReconcileError> {
    kv.delete(key)
        .map(|_| ())
        .map_err(|source| ReconcileError::Delete {
            key: display_key(key),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_kv::{FaultyKvStore, InMemoryKvStore};
    use std::sync::Arc;

    /// Markers at `m/<id>`, data at `d/<anything>/<id>`.
    struct ToyLayout;

    impl IntentLayout for ToyLayout {
        type Intent = String;

        fn marker_prefix(&self) -> Vec<u8> {
            b"m/".to_vec()
        }

        fn data_prefix(&self) -> Vec<u8> {
            b"d/".to_vec()
        }

        fn intent_of_marker(&self, key: &[u8]) -> Option<String> {
            let id = std::str::from_utf8(key).ok()?.strip_prefix("m/")?;
            (!id.is_empty() && !id.contains('/')).then(|| id.to_string())
        }

        fn intent_of_data(&self, key: &[u8]) -> Option<String> {
            let path = std::str::from_utf8(key).ok()?;
            path.rsplit('/').next().map(str::to_string)
        }
    }

    fn seed(kv: &dyn KvStore) {
        kv.put(b"m/t1", b"").unwrap();
        kv.put(b"d/a/t1", b"1").unwrap();
        kv.put(b"d/b/t1", b"2").unwrap();
        kv.put(b"d/a/t2", b"3").unwrap();
        kv.put(b"d/b/t10", b"4").unwrap();
    }

    #[test]
    fn no_markers_is_a_noop() {
        let kv = InMemoryKvStore::new();
        kv.put(b"d/a/t1", b"").unwrap();
        let report = reconcile(&kv, &ToyLayout).unwrap();
        assert!(report.is_noop());
        assert!(report.intents.is_empty());
        assert_eq!(kv.len(), 1);
    }

    #[test]
    fn deletes_only_keys_tagged_with_incomplete_intents() {
        let kv = InMemoryKvStore::new();
        seed(&kv);

        let report = reconcile(&kv, &ToyLayout).unwrap();
        assert_eq!(report.intents, vec!["t1".to_string()]);
        assert_eq!(report.data_keys_deleted, 2);
        assert_eq!(report.markers_deleted, 1);

        assert_eq!(
            kv.keys(),
            vec![b"d/a/t2".to_vec(), b"d/b/t10".to_vec()]
        );
    }

    #[test]
    fn second_pass_deletes_nothing() {
        let kv = InMemoryKvStore::new();
        seed(&kv);
        reconcile(&kv, &ToyLayout).unwrap();
        let again = reconcile(&kv, &ToyLayout).unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn unrecognized_markers_are_counted_and_kept() {
        let kv = InMemoryKvStore::new();
        kv.put(b"m/", b"").unwrap();
        kv.put(b"m/a/b", b"").unwrap();
        let report = reconcile(&kv, &ToyLayout).unwrap();
        assert_eq!(report.unrecognized_markers, 2);
        assert!(report.is_noop());
        assert_eq!(kv.len(), 2);
    }

    #[test]
    fn failed_delete_aborts_and_keeps_marker() {
        let inner = Arc::new(InMemoryKvStore::new());
        seed(inner.as_ref());
        let faulty = FaultyKvStore::new(inner.clone());
        faulty.fail_deletes(true);

        let err = reconcile(&faulty, &ToyLayout).unwrap_err();
        assert!(matches!(err, ReconcileError::Delete { .. }));
        assert!(inner.contains(b"m/t1").unwrap());

        faulty.heal();
        let report = reconcile(&faulty, &ToyLayout).unwrap();
        assert_eq!(report.markers_deleted, 1);
        assert!(!inner.contains(b"d/a/t1").unwrap());
    }

    #[test]
    fn resumes_after_partial_progress() {
        let kv = InMemoryKvStore::new();
        seed(&kv);
        // An earlier pass got as far as one data key before dying.
        kv.delete(b"d/a/t1").unwrap();

        let report = reconcile(&kv, &ToyLayout).unwrap();
        assert_eq!(report.data_keys_deleted, 1);
        assert_eq!(report.markers_deleted, 1);
        assert!(!kv.contains(b"d/b/t1").unwrap());
    }
}
