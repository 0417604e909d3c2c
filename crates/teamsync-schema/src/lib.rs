//! teamsync Schema - Record shapes for the local team store
//!
//! This crate defines the record types persisted by the sync core, the
//! field kinds and values they hold, identity keys, and the registry that
//! maps a record type name to its field list, identity and defaults.

mod error;
mod field;
mod key;
mod record_type;
mod registry;

pub use error::SchemaError;
pub use field::{FieldKind, FieldSpec, FieldValue};
pub use key::RecordKey;
pub use record_type::RecordType;
pub use registry::{Schema, SchemaRegistry, SearchHistoryPolicy, SCHEMA_VERSION};
