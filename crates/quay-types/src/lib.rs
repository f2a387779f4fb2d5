//! Foundation types for Quay.
//!
//! This crate provides the identifiers, timestamps, and message shape used
//! throughout the Quay persistence layer. Every other Quay crate depends on
//! `quay-types`.
//!
//! # Key Types
//!
//! - [`MessageId`] -- Opaque, caller-assigned message identifier
//! - [`QueueName`] -- Name of an independently existing queue
//! - [`TransactionId`] -- UUID v7 transaction identifier, rendered as a fixed-length token
//! - [`Timestamp`] -- UTC microseconds since the UNIX epoch, fixed-width encoded
//! - [`Message`] -- A unit stored in a queue

pub mod error;
pub mod identity;
pub mod message;
pub mod temporal;

pub use error::TypeError;
pub use identity::{MessageId, QueueName, TransactionId};
pub use message::{Headers, Message};
pub use temporal::Timestamp;
