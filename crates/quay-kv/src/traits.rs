use crate::error::KvResult;

/// Ordered key-value store.
///
/// All implementations must satisfy these invariants:
/// - `put` is an upsert, durable once the call returns successfully.
/// - `delete` is idempotent: deleting an absent key returns `Ok(false)`.
/// - `scan` enumerates every key starting with `prefix`, in lexicographic
///   byte order, as a consistent snapshot.
/// - Operations on independent keys need no coordination by callers.
pub trait KvStore: Send + Sync {
    /// Read the value stored at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Write `value` at `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Delete `key`. Returns `true` if the key existed.
    fn delete(&self, key: &[u8]) -> KvResult<bool>;

    /// List all `(key, value)` pairs whose key starts with `prefix`.
    ///
    /// Pass an empty prefix to list everything.
    fn scan(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Check whether `key` exists.
    fn contains(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
