use thiserror::Error;

/// Errors produced by type construction and decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("invalid transaction id: {0}")]
    InvalidTransactionId(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}
