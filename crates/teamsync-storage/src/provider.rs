//! Storage provider trait and transaction interface

use std::collections::{BTreeMap, HashMap};

use teamsync_schema::{FieldValue, RecordKey, RecordType};

use crate::record::storage_id;
use crate::{Record, Result};

/// Pluggable storage provider interface
///
/// Implementations must support three layers:
/// - Layer 1: Core KV operations (get, put, delete, list)
/// - Layer 2: Indexed queries (by record type, by reference)
/// - Layer 3: Transactions whose commit is all-or-nothing
pub trait StorageProvider: Send + Sync {
    // ========== Layer 1: Core KV Operations ==========

    /// Get a record by type and identity
    fn get(&self, record_type: RecordType, key: &RecordKey) -> Result<Option<Record>>;

    /// Store a record (insert or replace)
    fn put(&mut self, record: &Record) -> Result<()>;

    /// Physically remove a record
    fn delete(&mut self, record_type: RecordType, key: &RecordKey) -> Result<()>;

    /// List all storage ids with a given prefix, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    // ========== Layer 2: Indexed Queries ==========

    /// Query all records of one type, ordered by key
    fn query_by_type(&self, record_type: RecordType) -> Result<Vec<Record>>;

    /// Query records whose reference `field` holds `value`
    ///
    /// e.g. `("team_id", "teamA")` returns every child record of team A.
    fn query_by_reference(&self, field: &str, value: &str) -> Result<Vec<Record>>;

    // ========== Layer 3: Transactions ==========

    /// Begin a transaction for atomic multi-record updates
    fn begin_transaction(&mut self) -> Result<Box<dyn Transaction + '_>>;

    // ========== Maintenance Operations ==========

    /// Rebuild all secondary indexes from primary storage
    fn rebuild_indexes(&mut self) -> Result<()>;

    /// Verify relational invariants across all stored records
    fn verify_invariants(&self) -> Result<Vec<InvariantViolation>>;

    /// Compact storage (reclaim space, optimize layout)
    fn compact(&mut self) -> Result<()>;

    /// Schema version stamped on this store, if any
    fn schema_version(&self) -> Result<Option<u32>>;

    /// Stamp a schema version on this store
    fn set_schema_version(&mut self, version: u32) -> Result<()>;

    /// Get storage statistics
    fn stats(&self) -> Result<StorageStats> {
        let mut per_type = BTreeMap::new();
        let mut total_records = 0;
        let mut soft_deleted = 0;
        for record_type in RecordType::ALL {
            let records = self.query_by_type(record_type)?;
            total_records += records.len();
            soft_deleted += records.iter().filter(|r| r.is_deleted()).count();
            per_type.insert(record_type, records.len());
        }
        Ok(StorageStats {
            total_records,
            soft_deleted,
            per_type,
        })
    }
}

/// Transaction interface for atomic multi-record updates
pub trait Transaction {
    /// Read a record, seeing writes staged earlier in this transaction
    fn get(&self, record_type: RecordType, key: &RecordKey) -> Result<Option<Record>>;

    /// Store a record within the transaction
    fn put(&mut self, record: &Record) -> Result<()>;

    /// Delete a record within the transaction
    fn delete(&mut self, record_type: RecordType, key: &RecordKey) -> Result<()>;

    /// Commit the transaction atomically
    fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction (discard all changes)
    fn rollback(self: Box<Self>) -> Result<()>;
}

pub(crate) enum TransactionOp {
    Put(Record),
    Delete(String),
}

/// Writes buffered by a transaction until commit
///
/// `latest` maps a storage id to the index of the last operation on it, so
/// reads inside a large batch stay constant time.
#[derive(Default)]
pub(crate) struct StagedWrites {
    pub(crate) operations: Vec<TransactionOp>,
    latest: HashMap<String, usize>,
}

impl StagedWrites {
    /// `Some(state)` if this transaction touched the record, `None` otherwise
    pub(crate) fn lookup(&self, record_type: RecordType, key: &RecordKey) -> Option<Option<Record>> {
        let index = *self.latest.get(&storage_id(record_type, key))?;
        match &self.operations[index] {
            TransactionOp::Put(record) => Some(Some(record.clone())),
            TransactionOp::Delete(_) => Some(None),
        }
    }

    pub(crate) fn put(&mut self, record: &Record) {
        self.latest.insert(record.storage_id(), self.operations.len());
        self.operations.push(TransactionOp::Put(record.clone()));
    }

    pub(crate) fn delete(&mut self, record_type: RecordType, key: &RecordKey) {
        let id = storage_id(record_type, key);
        self.latest.insert(id.clone(), self.operations.len());
        self.operations.push(TransactionOp::Delete(id));
    }
}

/// Represents a violation of a relational invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub invariant: String,
    pub record_id: String,
    pub description: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.invariant, self.record_id, self.description
        )
    }
}

/// Check relational invariants over a full set of records keyed by storage id
pub(crate) fn check_invariants(records: &HashMap<String, Record>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let mut ids: Vec<&String> = records.keys().collect();
    ids.sort();

    for id in ids {
        let record = &records[id];

        // Child records must point at a stored team
        for (field, target) in record.references() {
            let target_id = storage_id(RecordType::Team, &RecordKey::single(target.clone()));
            if !records.contains_key(&target_id) {
                violations.push(InvariantViolation {
                    invariant: "reference".to_string(),
                    record_id: id.clone(),
                    description: format!("{} points at missing team {}", field, target),
                });
            }
        }

        // The identity key must agree with every identity field
        if let Some(description) = identity_mismatch(record) {
            violations.push(InvariantViolation {
                invariant: "identity".to_string(),
                record_id: id.clone(),
                description,
            });
        }

        if record.int("delete_at").is_some_and(|at| at < 0) {
            violations.push(InvariantViolation {
                invariant: "soft-delete".to_string(),
                record_id: id.clone(),
                description: "delete_at is negative".to_string(),
            });
        }
    }

    violations
}

fn identity_mismatch(record: &Record) -> Option<String> {
    let fields = record.identity_fields();
    let parts = record.key.parts();
    if parts.len() != fields.len() {
        return Some(format!(
            "key {} has {} parts, {} expects {}",
            record.key,
            parts.len(),
            record.record_type,
            fields.len()
        ));
    }

    fields.iter().zip(parts).find_map(|(field, part)| {
        let value = record.field(field).map(FieldValue::key_part);
        (value.as_deref() != Some(part.as_str())).then(|| {
            format!("key {} does not match {} = {:?}", record.key, field, value)
        })
    })
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_records: usize,
    pub soft_deleted: usize,
    pub per_type: BTreeMap<RecordType, usize>,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Storage Statistics:")?;
        writeln!(f, "  Total records: {}", self.total_records)?;
        writeln!(f, "  Soft deleted: {}", self.soft_deleted)?;
        for (record_type, count) in &self.per_type {
            writeln!(f, "  {}: {}", record_type, count)?;
        }
        Ok(())
    }
}
