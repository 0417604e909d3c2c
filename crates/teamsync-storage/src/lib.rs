//! teamsync Storage - Pluggable storage backend for synced team records
//!
//! This crate persists prepared records for one namespace (one server or
//! account context) and supports multiple backends:
//! - In-memory (for testing and ephemeral sessions)
//! - redb (embedded database, one file per namespace)
//!
//! ## Architecture
//!
//! The storage layer follows a three-layer design:
//! - Layer 1: Core KV operations (get, put, delete, list)
//! - Layer 2: Indexed queries (by record type, by team reference)
//! - Layer 3: Transactions applied atomically

mod error;
mod memory;
mod provider;
mod record;
mod redb_storage;

pub use error::{Result, StorageError};
pub use memory::InMemoryStorage;
pub use provider::{InvariantViolation, StorageProvider, StorageStats, Transaction};
pub use record::Record;
pub use redb_storage::RedbStorage;
