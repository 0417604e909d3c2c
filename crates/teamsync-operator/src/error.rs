//! Operator error types

use teamsync_schema::{RecordKey, RecordType, SchemaError};
use teamsync_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors surfaced by preparing, committing, or opening a namespace
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("invalid {record_type} payload: field `{field}` {reason}")]
    Validation {
        record_type: RecordType,
        field: String,
        reason: String,
    },

    #[error("connection to namespace `{namespace}` failed: {reason}")]
    Connection { namespace: String, reason: String },

    #[error("duplicate {record_type} record: {key}")]
    DuplicateRecord {
        record_type: RecordType,
        key: RecordKey,
    },

    #[error("{record_type} record not found: {key}")]
    NotFound {
        record_type: RecordType,
        key: RecordKey,
    },

    #[error("version conflict on {record_type} {key}: expected {expected}, found {actual}")]
    VersionConflict {
        record_type: RecordType,
        key: RecordKey,
        expected: u64,
        actual: u64,
    },

    #[error("{record_type} {key} references missing team {team_id}")]
    MissingReference {
        record_type: RecordType,
        key: RecordKey,
        team_id: String,
    },

    /// The batch was rolled back because descriptor `index` failed
    #[error("commit rolled back at descriptor {index}: {source}")]
    Commit {
        index: usize,
        source: Box<OperatorError>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<SchemaError> for OperatorError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::NotFound(name) => OperatorError::SchemaNotFound(name),
        }
    }
}

impl OperatorError {
    pub(crate) fn validation(
        record_type: RecordType,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        OperatorError::Validation {
            record_type,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn connection(namespace: &str, reason: impl ToString) -> Self {
        OperatorError::Connection {
            namespace: namespace.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The underlying failure, looking through `Commit` wrappers
    pub fn cause(&self) -> &OperatorError {
        match self {
            OperatorError::Commit { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            OperatorError::SchemaNotFound(_) => "E-SYNC-001",
            OperatorError::Validation { .. } => "E-SYNC-002",
            OperatorError::Connection { .. } => "E-SYNC-003",
            OperatorError::DuplicateRecord { .. } => "E-SYNC-004",
            OperatorError::Commit { .. } => "E-SYNC-005",
            OperatorError::NotFound { .. } => "E-SYNC-006",
            OperatorError::VersionConflict { .. } => "E-SYNC-007",
            OperatorError::MissingReference { .. } => "E-SYNC-008",
            OperatorError::Config(_) => "E-SYNC-009",
            OperatorError::Storage(_) => "E-SYNC-999",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_unwraps_nested_commit() {
        let err = OperatorError::Commit {
            index: 2,
            source: Box::new(OperatorError::DuplicateRecord {
                record_type: RecordType::Team,
                key: RecordKey::single("a"),
            }),
        };
        assert_eq!(err.code(), "E-SYNC-005");
        assert!(matches!(err.cause(), OperatorError::DuplicateRecord { .. }));
        assert_eq!(err.cause().code(), "E-SYNC-004");
    }

    #[test]
    fn test_schema_error_maps_to_schema_not_found() {
        let err: OperatorError = SchemaError::NotFound("Channel".into()).into();
        assert!(matches!(err, OperatorError::SchemaNotFound(name) if name == "Channel"));
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = OperatorError::validation(RecordType::Team, "display_name", "is required");
        assert_eq!(
            err.to_string(),
            "invalid Team payload: field `display_name` is required"
        );
    }
}
