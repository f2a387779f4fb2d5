//! Ordered key-value substrate for Quay.
//!
//! The persistence core only needs an ordered map of byte keys to byte
//! values with point reads, upserts, idempotent deletes, and prefix scans.
//! This crate defines that contract and ships the backends used by the rest
//! of the workspace.
//!
//! # Storage Backends
//!
//! All backends implement the [`KvStore`] trait:
//!
//! - [`InMemoryKvStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`LogKvStore`] -- append-only, CRC-framed record log on disk
//! - [`FaultyKvStore`] -- wrapper that injects write and delete failures
//!
//! # Contract
//!
//! 1. `put` is an upsert and is durable once it returns `Ok`.
//! 2. `delete` is idempotent; deleting an absent key is not an error.
//! 3. `scan` returns every key sharing the prefix in lexicographic order.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fault;
pub mod log;
pub mod memory;
pub mod traits;

pub use error::{KvError, KvResult};
pub use fault::FaultyKvStore;
pub use log::{CompactionStats, LogConfig, LogKvStore, SyncMode};
pub use memory::InMemoryKvStore;
pub use traits::KvStore;
