//! Failure injection for exercising error paths above the substrate.
//!
//! [`FaultyKvStore`] forwards every call to an inner store until one of its
//! configured faults trips. Reads are never failed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{KvError, KvResult};
use crate::traits::KvStore;

const UNLIMITED: usize = usize::MAX;

/// A [`KvStore`] wrapper that fails writes on demand.
pub struct FaultyKvStore {
    inner: Arc<dyn KvStore>,
    /// Puts still allowed before every further put fails.
    puts_remaining: AtomicUsize,
    put_prefix: RwLock<Option<Vec<u8>>>,
    fail_deletes: AtomicBool,
}

impl FaultyKvStore {
    /// Wrap `inner` with no faults armed.
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            puts_remaining: AtomicUsize::new(UNLIMITED),
            put_prefix: RwLock::new(None),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Allow `n` more successful puts, then fail every put after that.
    pub fn fail_puts_after(&self, n: usize) {
        self.puts_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every put whose key starts with `prefix`.
    pub fn fail_puts_with_prefix(&self, prefix: impl Into<Vec<u8>>) {
        *self.put_prefix.write().expect("lock poisoned") = Some(prefix.into());
    }

    /// Fail (or stop failing) every delete.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Disarm all faults.
    pub fn heal(&self) {
        self.puts_remaining.store(UNLIMITED, Ordering::SeqCst);
        *self.put_prefix.write().expect("lock poisoned") = None;
        self.fail_deletes.store(false, Ordering::SeqCst);
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    fn check_put(&self, key: &[u8]) -> KvResult<()> {
        let prefix = self
            .put_prefix
            .read()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?;
        if let Some(prefix) = prefix.as_ref() {
            if key.starts_with(prefix) {
                return Err(KvError::Injected(format!(
                    "put rejected for key {}",
                    String::from_utf8_lossy(key)
                )));
            }
        }

        let allowed = self
            .puts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(KvError::Injected("put budget exhausted".into()));
        }
        Ok(())
    }
}

impl KvStore for FaultyKvStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.check_put(key)?;
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> KvResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(KvError::Injected(format!(
                "delete rejected for key {}",
                String::from_utf8_lossy(key)
            )));
        }
        self.inner.delete(key)
    }

    fn scan(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;

    fn faulty() -> (Arc<InMemoryKvStore>, FaultyKvStore) {
        let inner = Arc::new(InMemoryKvStore::new());
        let faulty = FaultyKvStore::new(inner.clone());
        (inner, faulty)
    }

    #[test]
    fn passes_through_when_unarmed() {
        let (inner, store) = faulty();
        store.put(b"a", b"1").unwrap();
        assert_eq!(inner.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(store.delete(b"a").unwrap());
    }

    #[test]
    fn put_budget_is_exact() {
        let (inner, store) = faulty();
        store.fail_puts_after(2);
        store.put(b"a", b"").unwrap();
        store.put(b"b", b"").unwrap();
        assert!(matches!(store.put(b"c", b""), Err(KvError::Injected(_))));
        assert!(matches!(store.put(b"d", b""), Err(KvError::Injected(_))));
        assert_eq!(inner.len(), 2);
    }

    #[test]
    fn prefix_fault_only_hits_matching_keys() {
        let (_, store) = faulty();
        store.fail_puts_with_prefix(b"/q/bad".to_vec());
        store.put(b"/q/good", b"").unwrap();
        assert!(store.put(b"/q/bad/x", b"").is_err());
    }

    #[test]
    fn delete_fault_and_heal() {
        let (_, store) = faulty();
        store.put(b"k", b"").unwrap();
        store.fail_deletes(true);
        assert!(store.delete(b"k").is_err());
        assert!(store.get(b"k").unwrap().is_some());

        store.heal();
        assert!(store.delete(b"k").unwrap());
    }
}
