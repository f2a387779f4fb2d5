use std::io;

/// Errors from key-value substrate operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// I/O error from the underlying storage medium.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A failed append could not be undone, so the log accepts no more
    /// writes until it is compacted or reopened.
    #[error("log {0} is disabled after an unrecoverable write failure")]
    WriterDisabled(String),

    /// A failure injected by [`crate::FaultyKvStore`].
    #[error("injected failure: {0}")]
    Injected(String),

    /// A lock guarding backend state was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result alias for substrate operations.
pub type KvResult<T> = Result<T, KvError>;
