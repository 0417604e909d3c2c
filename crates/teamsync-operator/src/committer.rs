//! Batch committer: applies prepared descriptors as one atomic unit

use teamsync_schema::{RecordKey, RecordType};
use teamsync_storage::{StorageProvider, Transaction};
use tracing::{debug, warn};

use crate::{
    CommittedRecord, ConnectionHandle, OperationKind, OperatorError, PreparedDescriptor, Result,
};

/// Commit `descriptors` against `handle` with the default committer
pub fn commit(
    handle: &ConnectionHandle,
    descriptors: Vec<PreparedDescriptor>,
) -> Result<Vec<CommittedRecord>> {
    BatchCommitter::new().commit(handle, descriptors)
}

/// Applies descriptors in order inside one storage transaction
///
/// Either every descriptor is persisted or, on the first failure, none
/// are and the error is wrapped in [`OperatorError::Commit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCommitter {
    strict_references: bool,
}

impl BatchCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every child record's `team_id` to name a stored team
    pub fn with_strict_references(mut self, strict: bool) -> Self {
        self.strict_references = strict;
        self
    }

    pub fn commit(
        &self,
        handle: &ConnectionHandle,
        descriptors: Vec<PreparedDescriptor>,
    ) -> Result<Vec<CommittedRecord>> {
        handle.with_storage(|storage| self.commit_to(storage, descriptors))
    }

    /// Commit against storage the caller already holds exclusively
    pub fn commit_to(
        &self,
        storage: &mut dyn StorageProvider,
        descriptors: Vec<PreparedDescriptor>,
    ) -> Result<Vec<CommittedRecord>> {
        let count = descriptors.len();
        let mut txn = storage.begin_transaction()?;
        let mut committed = Vec::with_capacity(count);

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            match self.apply(txn.as_mut(), descriptor) {
                Ok(record) => committed.push(record),
                Err(cause) => {
                    warn!(index, error = %cause, "rolling back batch");
                    txn.rollback()?;
                    return Err(OperatorError::Commit {
                        index,
                        source: Box::new(cause),
                    });
                }
            }
        }

        txn.commit()?;
        debug!(count, "committed batch");
        Ok(committed)
    }

    fn apply(
        &self,
        txn: &mut dyn Transaction,
        descriptor: PreparedDescriptor,
    ) -> Result<CommittedRecord> {
        let record_type = descriptor.record_type;
        let key = descriptor.key.clone();
        let current = txn.get(record_type, &key)?;

        let version = match (descriptor.operation, current) {
            (OperationKind::Create, Some(_)) => {
                return Err(OperatorError::DuplicateRecord { record_type, key })
            }
            (OperationKind::Create, None) => 1,
            (OperationKind::Update, None) => {
                return Err(OperatorError::NotFound { record_type, key })
            }
            (OperationKind::Update, Some(current)) => {
                if let Some(expected) = descriptor.base_version {
                    if expected != current.version {
                        return Err(OperatorError::VersionConflict {
                            record_type,
                            key,
                            expected,
                            actual: current.version,
                        });
                    }
                }
                current.version + 1
            }
        };

        let operation = descriptor.operation;
        let record = descriptor.into_record(version);

        if self.strict_references {
            for (_, team_id) in record.references() {
                let team_key = RecordKey::single(team_id.clone());
                if txn.get(RecordType::Team, &team_key)?.is_none() {
                    return Err(OperatorError::MissingReference {
                        record_type,
                        key,
                        team_id,
                    });
                }
            }
        }

        txn.put(&record)?;
        Ok(CommittedRecord::new(record, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{prepare, ConnectionManager};
    use serde_json::{json, Value};
    use teamsync_schema::SchemaRegistry;

    fn setup() -> (SchemaRegistry, ConnectionHandle) {
        let registry = SchemaRegistry::new();
        let handle = ConnectionManager::in_memory()
            .open("commit-tests", &registry)
            .unwrap();
        (registry, handle)
    }

    fn create(registry: &SchemaRegistry, record_type: &str, raw: Value) -> PreparedDescriptor {
        prepare(registry, record_type, OperationKind::Create, &raw, None).unwrap()
    }

    fn team(registry: &SchemaRegistry, id: &str) -> PreparedDescriptor {
        create(
            registry,
            "Team",
            json!({"id": id, "name": id, "display_name": id, "type": "O"}),
        )
    }

    fn count(handle: &ConnectionHandle) -> usize {
        handle.with_storage(|s| Ok(s.list("")?.len())).unwrap()
    }

    #[test]
    fn test_create_then_duplicate() {
        let (registry, handle) = setup();
        let descriptor = team(&registry, "a");

        let committed = commit(&handle, vec![descriptor.clone()]).unwrap();
        assert_eq!(committed[0].type_name(), "Team");
        assert_eq!(committed[0].version(), 1);
        assert_eq!(committed[0].operation(), OperationKind::Create);

        let err = commit(&handle, vec![descriptor]).unwrap_err();
        assert!(matches!(err, OperatorError::Commit { index: 0, .. }));
        assert!(matches!(err.cause(), OperatorError::DuplicateRecord { .. }));
        assert_eq!(count(&handle), 1);
    }

    #[test]
    fn test_later_descriptor_sees_earlier_ones() {
        let (registry, handle) = setup();
        let committer = BatchCommitter::new().with_strict_references(true);

        let membership = create(
            &registry,
            "TeamMembership",
            json!({"team_id": "a", "user_id": "u1"}),
        );
        let committed = committer
            .commit(&handle, vec![team(&registry, "a"), membership])
            .unwrap();
        assert_eq!(committed.len(), 2);

        // The same key created twice in one batch collides on the second
        let err = commit(&handle, vec![team(&registry, "b"), team(&registry, "b")]).unwrap_err();
        assert!(matches!(err, OperatorError::Commit { index: 1, .. }));
        assert_eq!(count(&handle), 2);
    }

    #[test]
    fn test_failed_batch_commits_nothing() {
        let (registry, handle) = setup();
        commit(&handle, vec![team(&registry, "a")]).unwrap();

        let batch = vec![
            team(&registry, "b"),
            team(&registry, "c"),
            team(&registry, "a"),
            team(&registry, "d"),
        ];
        let err = commit(&handle, batch).unwrap_err();
        assert!(matches!(err, OperatorError::Commit { index: 2, .. }));
        assert_eq!(count(&handle), 1);
    }

    #[test]
    fn test_strict_references() {
        let (registry, handle) = setup();
        let committer = BatchCommitter::new().with_strict_references(true);
        let history = create(
            &registry,
            "TeamChannelHistory",
            json!({"team_id": "ghost", "channel_ids": ["c1"]}),
        );

        let err = committer.commit(&handle, vec![history.clone()]).unwrap_err();
        assert!(matches!(
            err.cause(),
            OperatorError::MissingReference { team_id, .. } if team_id == "ghost"
        ));

        // Lenient by default
        assert!(commit(&handle, vec![history]).is_ok());
    }

    #[test]
    fn test_update_bumps_version_and_checks_base() {
        let (registry, handle) = setup();
        let created = commit(&handle, vec![team(&registry, "a")]).unwrap();
        let stored = created[0].record().clone();

        let update = prepare(
            &registry,
            "Team",
            OperationKind::Update,
            &json!({"display_name": "Alpha"}),
            Some(&stored),
        )
        .unwrap();

        let updated = commit(&handle, vec![update.clone()]).unwrap();
        assert_eq!(updated[0].version(), 2);
        assert_eq!(updated[0].record().text("display_name"), Some("Alpha"));

        // Re-applying a descriptor computed from version 1 is stale now
        let err = commit(&handle, vec![update]).unwrap_err();
        assert!(matches!(
            err.cause(),
            OperatorError::VersionConflict { expected: 1, actual: 2, .. }
        ));
    }

    #[test]
    fn test_update_of_missing_record() {
        let (registry, handle) = setup();
        let other = ConnectionManager::in_memory()
            .open("elsewhere", &registry)
            .unwrap();
        let stored = commit(&other, vec![team(&registry, "a")]).unwrap()[0]
            .record()
            .clone();

        let update = prepare(
            &registry,
            "Team",
            OperationKind::Update,
            &json!({"name": "x"}),
            Some(&stored),
        )
        .unwrap();
        let err = commit(&handle, vec![update]).unwrap_err();
        assert!(matches!(err.cause(), OperatorError::NotFound { .. }));
    }

    #[test]
    fn test_empty_batch() {
        let (_, handle) = setup();
        assert!(commit(&handle, Vec::new()).unwrap().is_empty());
    }
}
