//! Prepared (pending) and committed record handles

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use teamsync_schema::{FieldValue, RecordKey, RecordType};
use teamsync_storage::Record;

/// Whether a descriptor creates a new record or mutates an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Create,
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => f.write_str("CREATE"),
            OperationKind::Update => f.write_str("UPDATE"),
        }
    }
}

/// An in-memory, unpersisted record creation or update
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDescriptor {
    pub record_type: RecordType,
    pub operation: OperationKind,
    pub key: RecordKey,
    /// Complete field set of the record after this descriptor is applied
    pub fields: BTreeMap<String, FieldValue>,
    /// For UPDATE, the version of the record the merge was computed from
    pub base_version: Option<u64>,
}

impl PreparedDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub(crate) fn into_record(self, version: u64) -> Record {
        Record {
            record_type: self.record_type,
            key: self.key,
            version,
            fields: self.fields,
        }
    }
}

/// A record that has been durably persisted by a commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedRecord {
    record: Record,
    operation: OperationKind,
}

impl CommittedRecord {
    pub(crate) fn new(record: Record, operation: OperationKind) -> Self {
        Self { record, operation }
    }

    pub fn record_type(&self) -> RecordType {
        self.record.record_type
    }

    /// The resolved type tag, e.g. `"Team"`
    pub fn type_name(&self) -> &'static str {
        self.record.record_type.name()
    }

    pub fn key(&self) -> &RecordKey {
        &self.record.key
    }

    pub fn version(&self) -> u64 {
        self.record.version
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }
}
