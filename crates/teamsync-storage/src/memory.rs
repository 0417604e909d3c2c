//! In-memory storage implementation

use crate::provider::{check_invariants, StagedWrites, TransactionOp};
use crate::record::{reference_key, storage_id};
use crate::{InvariantViolation, Record, Result, StorageProvider, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use teamsync_schema::{RecordKey, RecordType};

/// In-memory storage implementation
///
/// Fast, non-persistent storage for tests and ephemeral sessions.
/// Clones share the same underlying data; it is lost when the last clone
/// is dropped.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, Record>,
    type_index: HashMap<RecordType, BTreeSet<String>>,
    reference_index: HashMap<String, BTreeSet<String>>,
    schema_version: Option<u32>,
}

impl MemoryState {
    fn put(&mut self, record: &Record) {
        let id = record.storage_id();
        if let Some(old) = self.records.remove(&id) {
            self.remove_from_indexes(&id, &old);
        }
        self.update_indexes(&id, record);
        self.records.insert(id, record.clone());
    }

    fn delete(&mut self, id: &str) {
        if let Some(old) = self.records.remove(id) {
            self.remove_from_indexes(id, &old);
        }
    }

    /// Update secondary indexes after a record is inserted/updated
    fn update_indexes(&mut self, id: &str, record: &Record) {
        self.type_index
            .entry(record.record_type)
            .or_default()
            .insert(id.to_string());

        for (field, value) in record.references() {
            self.reference_index
                .entry(reference_key(field, &value))
                .or_default()
                .insert(id.to_string());
        }
    }

    /// Remove a record from all secondary indexes
    fn remove_from_indexes(&mut self, id: &str, record: &Record) {
        if let Some(ids) = self.type_index.get_mut(&record.record_type) {
            ids.remove(id);
        }

        for (field, value) in record.references() {
            let key = reference_key(field, &value);
            if let Some(ids) = self.reference_index.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.reference_index.remove(&key);
                }
            }
        }
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<Record> {
        ids.filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageProvider for InMemoryStorage {
    fn get(&self, record_type: RecordType, key: &RecordKey) -> Result<Option<Record>> {
        let state = self.state.read()?;
        Ok(state.records.get(&storage_id(record_type, key)).cloned())
    }

    fn put(&mut self, record: &Record) -> Result<()> {
        self.state.write()?.put(record);
        Ok(())
    }

    fn delete(&mut self, record_type: RecordType, key: &RecordKey) -> Result<()> {
        self.state.write()?.delete(&storage_id(record_type, key));
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read()?;
        let mut ids: Vec<String> = state
            .records
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn query_by_type(&self, record_type: RecordType) -> Result<Vec<Record>> {
        let state = self.state.read()?;
        let Some(ids) = state.type_index.get(&record_type) else {
            return Ok(Vec::new());
        };
        Ok(state.collect(ids.iter()))
    }

    fn query_by_reference(&self, field: &str, value: &str) -> Result<Vec<Record>> {
        let state = self.state.read()?;
        let Some(ids) = state.reference_index.get(&reference_key(field, value)) else {
            return Ok(Vec::new());
        };
        Ok(state.collect(ids.iter()))
    }

    fn begin_transaction(&mut self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(InMemoryTransaction {
            storage: self,
            staged: StagedWrites::default(),
        }))
    }

    fn rebuild_indexes(&mut self) -> Result<()> {
        let mut state = self.state.write()?;
        state.type_index.clear();
        state.reference_index.clear();

        let records: Vec<(String, Record)> = state
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (id, record) in &records {
            state.update_indexes(id, record);
        }
        Ok(())
    }

    fn verify_invariants(&self) -> Result<Vec<InvariantViolation>> {
        let state = self.state.read()?;
        Ok(check_invariants(&state.records))
    }

    fn compact(&mut self) -> Result<()> {
        // No-op for in-memory storage (no fragmentation)
        Ok(())
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        Ok(self.state.read()?.schema_version)
    }

    fn set_schema_version(&mut self, version: u32) -> Result<()> {
        self.state.write()?.schema_version = Some(version);
        Ok(())
    }
}

/// In-memory transaction
struct InMemoryTransaction<'a> {
    storage: &'a mut InMemoryStorage,
    staged: StagedWrites,
}

impl<'a> Transaction for InMemoryTransaction<'a> {
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
        let InMemoryTransaction { storage, staged } = *self;

        // One lock acquisition: readers see all of the batch or none of it
        let mut state = storage.state.write()?;
        for op in staged.operations {
            match op {
                TransactionOp::Put(record) => state.put(&record),
                TransactionOp::Delete(id) => state.delete(&id),
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        // Simply drop self, discarding all operations
        Ok(())
    }
}
