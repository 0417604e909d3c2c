//! redb-based persistent storage implementation

use crate::provider::{check_invariants, StagedWrites, TransactionOp};
use crate::record::{reference_key, storage_id};
use crate::{InvariantViolation, Record, Result, StorageProvider, Transaction};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use teamsync_schema::{RecordKey, RecordType};
use tracing::debug;

type SetTable = TableDefinition<'static, &'static str, &'static [u8]>;

// Table definitions
const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const TYPE_INDEX: SetTable = TableDefinition::new("type_index");
const REFERENCE_INDEX: SetTable = TableDefinition::new("reference_index");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// redb-based persistent storage
///
/// Stores one namespace in a single `.redb` file with automatic crash
/// recovery. Records are bincode-encoded; the type and reference indexes
/// hold bincode-encoded sets of storage ids.
pub struct RedbStorage {
    db: Database,
    path: PathBuf,
}

impl RedbStorage {
    /// Create or open a redb storage at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(RECORDS_TABLE)?;
            write_txn.open_table(TYPE_INDEX)?;
            write_txn.open_table(REFERENCE_INDEX)?;
            write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "opened redb storage");
        Ok(Self { db, path })
    }

    /// Get the file path of this storage
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record listed under `key` in an index table
    fn query_index(&self, index: SetTable, key: &str) -> Result<Vec<Record>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let records_table = read_txn.open_table(RECORDS_TABLE)?;

        let ids: BTreeSet<String> = match index_table.get(key)? {
            Some(bytes) => bincode::deserialize(bytes.value())?,
            None => return Ok(vec![]),
        };

        let mut results = Vec::new();
        for id in ids {
            if let Some(bytes) = records_table.get(id.as_str())? {
                let record: Record = bincode::deserialize(bytes.value())?;
                results.push(record);
            }
        }

        Ok(results)
    }

    fn apply(&self, operations: Vec<TransactionOp>) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        for op in operations {
            match op {
                TransactionOp::Put(record) => put_in_txn(&write_txn, &record)?,
                TransactionOp::Delete(id) => delete_in_txn(&write_txn, &id)?,
            }
        }
        // Dropping `write_txn` on an early return aborts it
        write_txn.commit()?;
        Ok(())
    }
}

fn load_in_txn(write_txn: &WriteTransaction, id: &str) -> Result<Option<Record>> {
    let table = write_txn.open_table(RECORDS_TABLE)?;
    let data = table.get(id)?.map(|bytes| bytes.value().to_vec());
    match data {
        Some(data) => Ok(Some(bincode::deserialize(&data)?)),
        None => Ok(None),
    }
}

fn put_in_txn(write_txn: &WriteTransaction, record: &Record) -> Result<()> {
    let id = record.storage_id();

    // Drop the old version from the indexes first
    if let Some(old) = load_in_txn(write_txn, &id)? {
        remove_from_indexes_in_txn(write_txn, &id, &old)?;
    }

    let bytes = bincode::serialize(record)?;
    {
        let mut table = write_txn.open_table(RECORDS_TABLE)?;
        table.insert(id.as_str(), bytes.as_slice())?;
    }

    update_indexes_in_txn(write_txn, &id, record)
}

fn delete_in_txn(write_txn: &WriteTransaction, id: &str) -> Result<()> {
    if let Some(old) = load_in_txn(write_txn, id)? {
        remove_from_indexes_in_txn(write_txn, id, &old)?;
        let mut table = write_txn.open_table(RECORDS_TABLE)?;
        table.remove(id)?;
    }
    Ok(())
}

/// Update secondary indexes for a record
fn update_indexes_in_txn(write_txn: &WriteTransaction, id: &str, record: &Record) -> Result<()> {
    index_add(write_txn, TYPE_INDEX, record.record_type.name(), id)?;
    for (field, value) in record.references() {
        index_add(write_txn, REFERENCE_INDEX, &reference_key(field, &value), id)?;
    }
    Ok(())
}

/// Remove a record from secondary indexes
fn remove_from_indexes_in_txn(
    write_txn: &WriteTransaction,
    id: &str,
    record: &Record,
) -> Result<()> {
    index_remove(write_txn, TYPE_INDEX, record.record_type.name(), id)?;
    for (field, value) in record.references() {
        index_remove(write_txn, REFERENCE_INDEX, &reference_key(field, &value), id)?;
    }
    Ok(())
}

fn index_add(write_txn: &WriteTransaction, index: SetTable, key: &str, id: &str) -> Result<()> {
    let mut table = write_txn.open_table(index)?;
    let existing = table.get(key)?.map(|bytes| bytes.value().to_vec());
    let mut ids: BTreeSet<String> = match existing {
        Some(data) => bincode::deserialize(&data)?,
        None => BTreeSet::new(),
    };
    ids.insert(id.to_string());
    let bytes = bincode::serialize(&ids)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

fn index_remove(write_txn: &WriteTransaction, index: SetTable, key: &str, id: &str) -> Result<()> {
    let mut table = write_txn.open_table(index)?;
    let Some(data) = table.get(key)?.map(|bytes| bytes.value().to_vec()) else {
        return Ok(());
    };

    let mut ids: BTreeSet<String> = bincode::deserialize(&data)?;
    ids.remove(id);
    if ids.is_empty() {
        table.remove(key)?;
    } else {
        let bytes = bincode::serialize(&ids)?;
        table.insert(key, bytes.as_slice())?;
    }
    Ok(())
}

fn clear_table(write_txn: &WriteTransaction, index: SetTable) -> Result<()> {
    let mut table = write_txn.open_table(index)?;
    let keys: Vec<String> = table
        .iter()?
        .map(|r| r.map(|(k, _)| k.value().to_string()))
        .collect::<std::result::Result<_, _>>()?;
    for key in keys {
        table.remove(key.as_str())?;
    }
    Ok(())
}

impl StorageProvider for RedbStorage {
    fn get(&self, record_type: RecordType, key: &RecordKey) -> Result<Option<Record>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        match table.get(storage_id(record_type, key).as_str())? {
            Some(bytes) => {
                let record: Record = bincode::deserialize(bytes.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put(&mut self, record: &Record) -> Result<()> {
        self.apply(vec![TransactionOp::Put(record.clone())])
    }

    fn delete(&mut self, record_type: RecordType, key: &RecordKey) -> Result<()> {
        self.apply(vec![TransactionOp::Delete(storage_id(record_type, key))])
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            let key_str = key.value();
            if key_str.starts_with(prefix) {
                ids.push(key_str.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn query_by_type(&self, record_type: RecordType) -> Result<Vec<Record>> {
        self.query_index(TYPE_INDEX, record_type.name())
    }

    fn query_by_reference(&self, field: &str, value: &str) -> Result<Vec<Record>> {
        self.query_index(REFERENCE_INDEX, &reference_key(field, value))
    }

    fn begin_transaction(&mut self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(RedbTransaction {
            storage: self,
            staged: StagedWrites::default(),
        }))
    }

    fn rebuild_indexes(&mut self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            clear_table(&write_txn, TYPE_INDEX)?;
            clear_table(&write_txn, REFERENCE_INDEX)?;

            // Rebuild from records
            let records_table = write_txn.open_table(RECORDS_TABLE)?;
            let entries: Vec<(String, Vec<u8>)> = records_table
                .iter()?
                .map(|r| r.map(|(k, v)| (k.value().to_string(), v.value().to_vec())))
                .collect::<std::result::Result<_, _>>()?;
            drop(records_table);

            for (id, bytes) in entries {
                let record: Record = bincode::deserialize(&bytes)?;
                update_indexes_in_txn(&write_txn, &id, &record)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn verify_invariants(&self) -> Result<Vec<InvariantViolation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        let mut records = HashMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let record: Record = bincode::deserialize(value.value())?;
            records.insert(key.value().to_string(), record);
        }

        Ok(check_invariants(&records))
    }

    fn compact(&mut self) -> Result<()> {
        self.db.compact()?;
        Ok(())
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        let version = table.get(SCHEMA_VERSION_KEY)?.map(|v| v.value());
        Ok(version.map(|v| u32::try_from(v).unwrap_or(u32::MAX)))
    }

    fn set_schema_version(&mut self, version: u32) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            table.insert(SCHEMA_VERSION_KEY, u64::from(version))?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// redb transaction
///
/// Writes are buffered and applied in a single redb write transaction on
/// commit, so a failure part-way leaves the file untouched.
struct RedbTransaction<'a> {
    storage: &'a mut RedbStorage,
    staged: StagedWrites,
}

impl<'a> Transaction for RedbTransaction<'a> {
    fn get(&self, record_type: RecordType, key: &RecordKey) -> Result<Option<Record>> {
        match self.staged.lookup(record_type, key) {
            Some(staged) => Ok(staged),
            None => self.storage.get(record_type, key),
        }
    }

    fn put(&mut self, record: &Record) -> Result<()> {
        self.staged.put(record);
        Ok(())
    }

    fn delete(&mut self, record_type: RecordType, key: &RecordKey) -> Result<()> {
        self.staged.delete(record_type, key);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let RedbTransaction { storage, staged } = *self;
        storage.apply(staged.operations)
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        // Simply drop self, discarding all operations
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamsync_schema::FieldValue;
    use tempfile::tempdir;

    fn team(id: &str) -> Record {
        let mut record = Record::new(RecordType::Team, RecordKey::single(id));
        record
            .fields
            .insert("id".into(), FieldValue::Text(id.into()));
        record.version = 1;
        record
    }

    fn command(id: &str, team_id: &str) -> Record {
        let mut record = Record::new(RecordType::SlashCommand, RecordKey::single(id));
        record
            .fields
            .insert("id".into(), FieldValue::Text(id.into()));
        record
            .fields
            .insert("team_id".into(), FieldValue::Text(team_id.into()));
        record
    }

    #[test]
    fn test_basic_crud() {
        let dir = tempdir().unwrap();
        let mut storage = RedbStorage::new(dir.path().join("test.redb")).unwrap();
        let key = RecordKey::single("teamA");

        storage.put(&team("teamA")).unwrap();

        let retrieved = storage.get(RecordType::Team, &key).unwrap();
        assert_eq!(retrieved.unwrap(), team("teamA"));

        storage.delete(RecordType::Team, &key).unwrap();
        assert!(storage.get(RecordType::Team, &key).unwrap().is_none());
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        // Write data
        {
            let mut storage = RedbStorage::new(&db_path).unwrap();
            storage.put(&team("teamA")).unwrap();
            storage.set_schema_version(1).unwrap();
        }

        // Read data (new storage instance)
        {
            let storage = RedbStorage::new(&db_path).unwrap();
            let record = storage
                .get(RecordType::Team, &RecordKey::single("teamA"))
                .unwrap();
            assert!(record.is_some());
            assert_eq!(storage.schema_version().unwrap(), Some(1));
        }
    }

    #[test]
    fn test_fresh_store_has_no_schema_version() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::new(dir.path().join("fresh.redb")).unwrap();
        assert_eq!(storage.schema_version().unwrap(), None);
    }

    #[test]
    fn test_reference_index_tracks_updates() {
        let dir = tempdir().unwrap();
        let mut storage = RedbStorage::new(dir.path().join("test.redb")).unwrap();

        storage.put(&command("cmd1", "teamA")).unwrap();
        storage.put(&command("cmd2", "teamA")).unwrap();
        assert_eq!(storage.query_by_reference("team_id", "teamA").unwrap().len(), 2);

        // Moving a command to another team re-indexes it
        storage.put(&command("cmd2", "teamB")).unwrap();
        assert_eq!(storage.query_by_reference("team_id", "teamA").unwrap().len(), 1);
        assert_eq!(storage.query_by_reference("team_id", "teamB").unwrap().len(), 1);

        storage.rebuild_indexes().unwrap();
        assert_eq!(storage.query_by_type(RecordType::SlashCommand).unwrap().len(), 2);
    }

    #[test]
    fn test_rolled_back_transaction_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let mut storage = RedbStorage::new(dir.path().join("test.redb")).unwrap();
        {
            let mut txn = storage.begin_transaction().unwrap();
            txn.put(&team("a")).unwrap();
            txn.put(&team("b")).unwrap();
            txn.rollback().unwrap();
        }
        assert!(storage.list("").unwrap().is_empty());

        {
            let mut txn = storage.begin_transaction().unwrap();
            txn.put(&team("a")).unwrap();
            txn.put(&team("b")).unwrap();
            txn.commit().unwrap();
        }
        assert_eq!(storage.list("Team/").unwrap(), vec!["Team/a", "Team/b"]);
    }

    #[test]
    fn test_verify_reports_orphans() {
        let dir = tempdir().unwrap();
        let mut storage = RedbStorage::new(dir.path().join("test.redb")).unwrap();
        storage.put(&command("cmd1", "missing")).unwrap();

        let violations = storage.verify_invariants().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].record_id, "SlashCommand/cmd1");
    }
}
