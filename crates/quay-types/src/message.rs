use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{MessageId, QueueName};
use crate::temporal::Timestamp;

/// Message headers. Insertion order is not significant.
pub type Headers = BTreeMap<String, String>;

/// A unit stored in a queue.
///
/// Messages are created by the caller, persisted once, and never mutated in
/// place afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub queue: QueueName,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub sent_at: Timestamp,
}

impl Message {
    /// A message with no headers, sent now.
    pub fn new(queue: QueueName, id: MessageId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            queue,
            payload: payload.into(),
            headers: Headers::new(),
            sent_at: Timestamp::now(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_sent_at(mut self, sent_at: Timestamp) -> Self {
        self.sent_at = sent_at;
        self
    }
}
