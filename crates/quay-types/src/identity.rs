use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque identifier of a message, stable for the message's lifetime.
///
/// The id is embedded into storage keys. Any character is allowed; the key
/// codec escapes the ones it reserves.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing id string. Fails if the string is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::Empty { kind: "message id" });
        }
        Ok(Self(id))
    }

    /// Generate a fresh, time-ordered id (UUID v7 in hyphenated form).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl FromStr for MessageId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique name of a queue.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Wrap a queue name. Fails if the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::Empty { kind: "queue name" });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QueueName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

impl FromStr for QueueName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueName({})", self.0)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a storage transaction.
///
/// A UUID v7, rendered as a fixed 32-character lowercase hex token so that it
/// can be embedded as a single key segment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    /// Length of the rendered token.
    pub const TOKEN_LEN: usize = 32;

    /// Generate a new time-ordered transaction id.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// The fixed-length token used in storage keys.
    pub fn to_token(&self) -> String {
        self.0.simple().to_string()
    }

    /// Parse a token produced by [`TransactionId::to_token`].
    pub fn from_token(token: &str) -> Result<Self, TypeError> {
        let well_formed = token.len() == Self::TOKEN_LEN
            && token
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(TypeError::InvalidTransactionId(token.to_string()));
        }
        uuid::Uuid::try_parse(token)
            .map(Self)
            .map_err(|e| TypeError::InvalidTransactionId(format!("{token}: {e}")))
    }

    /// Short representation (first 8 characters of the token).
    pub fn short_id(&self) -> String {
        self.to_token()[..8].to_string()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.short_id())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ids_are_rejected() {
        assert_eq!(
            MessageId::new(""),
            Err(TypeError::Empty { kind: "message id" })
        );
        assert!(QueueName::new("").is_err());
    }

    #[test]
    fn generated_message_ids_are_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn message_id_allows_reserved_characters() {
        let id = MessageId::new("tenant/a%b").unwrap();
        assert_eq!(id.as_str(), "tenant/a%b");
    }

    #[test]
    fn transaction_token_is_fixed_length_hex() {
        for _ in 0..16 {
            let token = TransactionId::new().to_token();
            assert_eq!(token.len(), TransactionId::TOKEN_LEN);
            assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
            assert!(!token.bytes().any(|b| b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn transaction_token_parses_back() {
        let id = TransactionId::new();
        let parsed = TransactionId::from_token(&id.to_token()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn transaction_token_rejects_other_forms() {
        let id = TransactionId::new();
        // Hyphenated form is a valid UUID but not a token.
        assert!(TransactionId::from_token(&id.as_uuid().to_string()).is_err());
        assert!(TransactionId::from_token("").is_err());
        assert!(TransactionId::from_token(&id.to_token().to_uppercase()).is_err());
        assert!(TransactionId::from_token("zz").is_err());
    }

    #[test]
    fn serde_rejects_empty_queue_name() {
        let err = serde_json::from_str::<QueueName>("\"\"");
        assert!(err.is_err());
        let ok: QueueName = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok.as_str(), "orders");
    }

    #[test]
    fn display_and_debug() {
        let q = QueueName::new("orders").unwrap();
        assert_eq!(format!("{q}"), "orders");
        assert_eq!(format!("{q:?}"), "QueueName(orders)");
        let tx = TransactionId::new();
        assert!(format!("{tx:?}").starts_with("TransactionId("));
    }
}
