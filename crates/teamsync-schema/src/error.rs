//! Error types for schema lookups

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The record type name is not registered
    #[error("schema not found: {0}")]
    NotFound(String),
}
