//! teamsync Operator - Turns server payloads into committed local records
//!
//! Control flow:
//! - open a namespace through the [`ConnectionManager`]
//! - [`prepare`] raw payloads into [`PreparedDescriptor`]s (pure, no I/O)
//! - [`commit`] descriptors as one atomic batch
//!
//! The [`DataOperator`] wraps those steps into upsert handlers that decide
//! between CREATE and UPDATE from what is already stored.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use teamsync_operator::{commit, prepare, ConnectionManager, OperationKind};
//! use teamsync_schema::SchemaRegistry;
//!
//! let registry = SchemaRegistry::new();
//! let manager = ConnectionManager::in_memory();
//! let handle = manager.open("server-1", &registry)?;
//!
//! let raw = json!({"team_id": "a", "channel_ids": ["ca", "cb"]});
//! let descriptor = prepare(&registry, "TeamChannelHistory", OperationKind::Create, &raw, None)?;
//! let committed = commit(&handle, vec![descriptor])?;
//! assert_eq!(committed[0].type_name(), "TeamChannelHistory");
//! ```

mod committer;
mod config;
mod connection;
mod descriptor;
mod error;
mod operator;
mod preparer;

pub use committer::{commit, BatchCommitter};
pub use config::{Backend, OperatorConfig, DATA_DIR_ENV};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use descriptor::{CommittedRecord, OperationKind, PreparedDescriptor};
pub use error::{OperatorError, Result};
pub use operator::DataOperator;
pub use preparer::{prepare, Preparer};
