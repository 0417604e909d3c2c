//! Storage errors
//!
//! The redb variants mirror redb's own error split so `?` works on every
//! call into the database.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("namespace file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("record encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("redb: {0}")]
    Database(#[from] redb::Error),

    #[error("cannot open namespace database: {0}")]
    Open(#[from] redb::DatabaseError),

    #[error("cannot begin transaction: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("cannot commit transaction: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("compaction failed: {0}")]
    Compaction(#[from] redb::CompactionError),

    #[error("cannot open table: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("store is at schema version {found}, registry is at {expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::Poisoned(err.to_string())
    }
}
