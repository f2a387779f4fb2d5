//! Key namespace for the message store.
//!
//! Layout (all keys are UTF-8 paths):
//!
//! ```text
//! /q                                              queue root
//! /q/<queue>/msgs                                 queue existence marker (value: creation timestamp)
//! /q/<queue>/msgs/<id>/batch/<tx>                 message payload
//! /q/<queue>/msgs/<id>/batch/<tx>/headers         message headers
//! /q/<queue>/msgs/<id>/batch/<tx>/sent            message sent timestamp
//! /batch                                          transaction marker root
//! /batch/<tx>                                     open transaction marker
//! ```
//!
//! Queue names and message ids are escaped so each occupies exactly one
//! segment: `%` becomes `%25` and `/` becomes `%2F`. Only these two escapes
//! are accepted when decoding, which keeps the encoding one-to-one.

use quay_types::{MessageId, QueueName, TransactionId};

const SEPARATOR: char = '/';
const QUEUES: &str = "q";
const MESSAGES: &str = "msgs";
const BATCH: &str = "batch";
const HEADERS: &str = "headers";
const SENT: &str = "sent";

/// Which part of a stored message a key addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageField {
    Payload,
    Headers,
    Sent,
}

/// Full address of one field of one message written by one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub queue: QueueName,
    pub id: MessageId,
    pub tx: TransactionId,
    pub field: MessageField,
}

impl MessageKey {
    pub fn payload(queue: QueueName, id: MessageId, tx: TransactionId) -> Self {
        Self {
            queue,
            id,
            tx,
            field: MessageField::Payload,
        }
    }

    /// The same message location, addressing a different field.
    pub fn with_field(&self, field: MessageField) -> Self {
        Self {
            field,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut key = message_id_prefix_str(&self.queue, &self.id);
        key.push_str(&self.tx.to_token());
        match self.field {
            MessageField::Payload => {}
            MessageField::Headers => {
                key.push(SEPARATOR);
                key.push_str(HEADERS);
            }
            MessageField::Sent => {
                key.push(SEPARATOR);
                key.push_str(SENT);
            }
        }
        key.into_bytes()
    }
}

/// A decoded substrate key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreKey {
    QueueRoot,
    MarkerRoot,
    Queue(QueueName),
    Message(MessageKey),
    Marker(TransactionId),
}

/// Escape a name so it fits in a single key segment.
pub fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ch => out.push(ch),
        }
    }
    out
}

/// Reverse [`escape_segment`]. Returns `None` for anything it could not
/// have produced.
pub fn unescape_segment(segment: &str) -> Option<String> {
    if segment.contains(SEPARATOR) {
        return None;
    }
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3)?;
        match escape {
            "%25" => out.push('%'),
            "%2F" => out.push('/'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// `/q`
pub fn queue_root_key() -> Vec<u8> {
    format!("{SEPARATOR}{QUEUES}").into_bytes()
}

/// `/batch`
pub fn marker_root_key() -> Vec<u8> {
    format!("{SEPARATOR}{BATCH}").into_bytes()
}

/// `/q/` -- every queue marker and message lives under this prefix.
pub fn queue_prefix() -> Vec<u8> {
    format!("{SEPARATOR}{QUEUES}{SEPARATOR}").into_bytes()
}

/// `/batch/` -- every transaction marker lives under this prefix.
pub fn marker_prefix() -> Vec<u8> {
    format!("{SEPARATOR}{BATCH}{SEPARATOR}").into_bytes()
}

/// `/q/<queue>/msgs`
pub fn queue_key(queue: &QueueName) -> Vec<u8> {
    queue_key_str(queue).into_bytes()
}

/// `/q/<queue>/msgs/` -- every message of `queue` lives under this prefix.
pub fn message_prefix(queue: &QueueName) -> Vec<u8> {
    let mut key = queue_key_str(queue);
    key.push(SEPARATOR);
    key.into_bytes()
}

/// `/q/<queue>/msgs/<id>/batch/` -- every copy of message `id`, whatever
/// transaction wrote it.
pub fn message_id_prefix(queue: &QueueName, id: &MessageId) -> Vec<u8> {
    message_id_prefix_str(queue, id).into_bytes()
}

/// `/batch/<tx>`
pub fn marker_key(tx: &TransactionId) -> Vec<u8> {
    format!("{SEPARATOR}{BATCH}{SEPARATOR}{}", tx.to_token()).into_bytes()
}

fn queue_key_str(queue: &QueueName) -> String {
    format!(
        "{SEPARATOR}{QUEUES}{SEPARATOR}{}{SEPARATOR}{MESSAGES}",
        escape_segment(queue.as_str())
    )
}

fn message_id_prefix_str(queue: &QueueName, id: &MessageId) -> String {
    format!(
        "{}{SEPARATOR}{}{SEPARATOR}{BATCH}{SEPARATOR}",
        queue_key_str(queue),
        escape_segment(id.as_str())
    )
}

/// Decode any key of the layout. Returns `None` for keys outside it.
pub fn parse_key(key: &[u8]) -> Option<StoreKey> {
    let path = std::str::from_utf8(key).ok()?;
    let path = path.strip_prefix(SEPARATOR)?;
    let segments: Vec<&str> = path.split(SEPARATOR).collect();

    match segments.as_slice() {
        [QUEUES] => Some(StoreKey::QueueRoot),
        [BATCH] => Some(StoreKey::MarkerRoot),
        [BATCH, tx] => TransactionId::from_token(tx).ok().map(StoreKey::Marker),
        [QUEUES, queue, MESSAGES] => Some(StoreKey::Queue(decode_queue(queue)?)),
        [QUEUES, queue, MESSAGES, id, BATCH, tx, field @ ..] => {
            let field = match field {
                [] => MessageField::Payload,
                [HEADERS] => MessageField::Headers,
                [SENT] => MessageField::Sent,
                _ => return None,
            };
            Some(StoreKey::Message(MessageKey {
                queue: decode_queue(queue)?,
                id: MessageId::new(unescape_segment(id)?).ok()?,
                tx: TransactionId::from_token(tx).ok()?,
                field,
            }))
        }
        _ => None,
    }
}

fn decode_queue(segment: &str) -> Option<QueueName> {
    QueueName::new(unescape_segment(segment)?).ok()
}

/// Render a raw key for logs and error messages.
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
