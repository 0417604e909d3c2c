//! Data operator: upsert handlers over a connection
//!
//! Each handler takes the raw payloads one sync round delivered for a
//! record type, collapses repeats of the same identity, decides CREATE or
//! UPDATE per payload from what is already stored, and commits the lot as
//! one batch. The lookup and the commit happen under the same storage lock,
//! so a concurrent writer cannot slip in between.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde_json::Value;
use teamsync_schema::{RecordKey, RecordType, SchemaRegistry};
use teamsync_storage::Record;
use tracing::debug;

use crate::{
    BatchCommitter, CommittedRecord, ConnectionHandle, OperationKind, OperatorConfig, Preparer,
    Result,
};

pub struct DataOperator {
    handle: ConnectionHandle,
    registry: SchemaRegistry,
    committer: BatchCommitter,
}

impl DataOperator {
    pub fn new(handle: ConnectionHandle, config: &OperatorConfig) -> Self {
        Self {
            registry: config.registry().with_version(handle.schema_version()),
            committer: BatchCommitter::new().with_strict_references(config.strict_references),
            handle,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Upsert a batch of raw payloads of one record type
    pub fn handle_records(&self, record_type: &str, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        let record_type = self.registry.lookup(record_type)?.record_type;
        let committed = self.upsert(&[(record_type, raws)])?;

        debug!(
            namespace = self.handle.namespace(),
            %record_type,
            received = raws.len(),
            committed = committed.len(),
            "handled records"
        );
        Ok(committed)
    }

    /// Upsert every section of a sync snapshot as one batch
    ///
    /// Sections are applied parents first, so teams land before the records
    /// that reference them. A failure in any section commits nothing.
    pub fn handle_snapshot(&self, sections: &[(RecordType, Vec<Value>)]) -> Result<Vec<CommittedRecord>> {
        let mut ordered: Vec<(RecordType, &[Value])> = sections
            .iter()
            .map(|(record_type, raws)| (*record_type, raws.as_slice()))
            .collect();
        ordered.sort_by_key(|(record_type, _)| *record_type);

        let committed = self.upsert(&ordered)?;
        debug!(
            namespace = self.handle.namespace(),
            sections = sections.len(),
            committed = committed.len(),
            "handled snapshot"
        );
        Ok(committed)
    }

    fn upsert(&self, sections: &[(RecordType, &[Value])]) -> Result<Vec<CommittedRecord>> {
        let preparer = Preparer::new(&self.registry);

        // Last payload for an identity wins; first appearance fixes the order
        let mut unique: Vec<(RecordType, RecordKey, &Value)> = Vec::new();
        let mut positions: HashMap<(RecordType, RecordKey), usize> = HashMap::new();
        for (record_type, raws) in sections {
            for raw in raws.iter() {
                let key = preparer.natural_key(record_type.name(), raw)?;
                match positions.entry((*record_type, key)) {
                    Entry::Occupied(slot) => unique[*slot.get()].2 = raw,
                    Entry::Vacant(slot) => {
                        unique.push((*record_type, slot.key().1.clone(), raw));
                        slot.insert(unique.len() - 1);
                    }
                }
            }
        }

        self.handle.with_storage(|storage| {
            let mut descriptors = Vec::with_capacity(unique.len());
            for (record_type, key, raw) in &unique {
                let existing = storage.get(*record_type, key)?;
                let operation = match existing {
                    Some(_) => OperationKind::Update,
                    None => OperationKind::Create,
                };
                descriptors.push(preparer.prepare(
                    record_type.name(),
                    operation,
                    raw,
                    existing.as_ref(),
                )?);
            }
            self.committer.commit_to(storage, descriptors)
        })
    }

    pub fn handle_teams(&self, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        self.handle_records(RecordType::Team.name(), raws)
    }

    pub fn handle_my_teams(&self, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        self.handle_records(RecordType::MyTeam.name(), raws)
    }

    pub fn handle_team_memberships(&self, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        self.handle_records(RecordType::TeamMembership.name(), raws)
    }

    pub fn handle_team_channel_history(&self, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        self.handle_records(RecordType::TeamChannelHistory.name(), raws)
    }

    pub fn handle_team_search_history(&self, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        self.handle_records(RecordType::TeamSearchHistory.name(), raws)
    }

    pub fn handle_slash_commands(&self, raws: &[Value]) -> Result<Vec<CommittedRecord>> {
        self.handle_records(RecordType::SlashCommand.name(), raws)
    }

    pub fn get(&self, record_type: RecordType, key: &RecordKey) -> Result<Option<Record>> {
        self.handle
            .with_storage(|storage| Ok(storage.get(record_type, key)?))
    }

    /// All records of a type, ordered by key
    pub fn records(&self, record_type: RecordType) -> Result<Vec<Record>> {
        let mut records = self
            .handle
            .with_storage(|storage| Ok(storage.query_by_type(record_type)?))?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Records of `record_type` belonging to `team_id`, ordered by key
    pub fn children_of_team(&self, record_type: RecordType, team_id: &str) -> Result<Vec<Record>> {
        let mut records = self
            .handle
            .with_storage(|storage| Ok(storage.query_by_reference("team_id", team_id)?))?;
        records.retain(|r| r.record_type == record_type);
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Memberships of `team_id` that are not soft deleted
    pub fn active_memberships(&self, team_id: &str) -> Result<Vec<Record>> {
        let mut members = self.children_of_team(RecordType::TeamMembership, team_id)?;
        members.retain(|m| !m.is_deleted());
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionManager, OperatorError};
    use serde_json::json;
    use teamsync_schema::SearchHistoryPolicy;

    fn operator_with(config: OperatorConfig) -> DataOperator {
        let manager = ConnectionManager::in_memory();
        let handle = manager.open("operator-tests", &config.registry()).unwrap();
        DataOperator::new(handle, &config)
    }

    fn operator() -> DataOperator {
        operator_with(OperatorConfig::default())
    }

    fn team(id: &str, display_name: &str) -> Value {
        json!({"id": id, "name": id, "display_name": display_name, "type": "O"})
    }

    #[test]
    fn test_second_sync_updates_in_place() {
        let op = operator();
        let first = op.handle_teams(&[team("a", "Alpha")]).unwrap();
        assert_eq!(first[0].operation(), OperationKind::Create);

        let second = op
            .handle_teams(&[json!({"id": "a", "display_name": "Alpha Team"})])
            .unwrap();
        assert_eq!(second[0].operation(), OperationKind::Update);
        assert_eq!(second[0].version(), 2);

        let stored = op.get(RecordType::Team, &RecordKey::single("a")).unwrap().unwrap();
        assert_eq!(stored.text("display_name"), Some("Alpha Team"));
        assert_eq!(stored.text("name"), Some("a"));
        assert_eq!(op.records(RecordType::Team).unwrap().len(), 1);
    }

    #[test]
    fn test_repeats_in_one_batch_collapse() {
        let op = operator();
        let committed = op
            .handle_teams(&[team("a", "first"), team("b", "Beta"), team("a", "last")])
            .unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].key().to_string(), "a");
        assert_eq!(committed[0].record().text("display_name"), Some("last"));
    }

    #[test]
    fn test_keys_with_separator_characters_stay_distinct() {
        let op = operator();
        op.handle_team_memberships(&[json!({"team_id": "a\u{1f}b", "user_id": "c"})])
            .unwrap();
        let committed = op
            .handle_team_memberships(&[json!({"team_id": "a", "user_id": "b\u{1f}c"})])
            .unwrap();

        assert_eq!(committed[0].operation(), OperationKind::Create);
        assert_eq!(op.records(RecordType::TeamMembership).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_upserts_serialize() {
        const WRITERS: u64 = 8;
        let config = OperatorConfig::default();
        let op = operator_with(config.clone());
        op.handle_teams(&[team("a", "Alpha")]).unwrap();

        std::thread::scope(|scope| {
            for i in 0..WRITERS {
                let writer = DataOperator::new(op.handle().clone(), &config);
                scope.spawn(move || {
                    let display_name = format!("Alpha {}", i);
                    let committed = writer
                        .handle_teams(&[json!({"id": "a", "display_name": display_name})])
                        .unwrap();
                    assert_eq!(committed[0].operation(), OperationKind::Update);
                });
            }
        });

        let stored = op.get(RecordType::Team, &RecordKey::single("a")).unwrap().unwrap();
        assert_eq!(stored.version, WRITERS + 1);
        assert_eq!(op.records(RecordType::Team).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_applies_parents_first() {
        let op = operator_with(OperatorConfig {
            strict_references: true,
            ..OperatorConfig::default()
        });
        let sections = vec![
            (
                RecordType::TeamMembership,
                vec![json!({"team_id": "a", "user_id": "u1"})],
            ),
            (RecordType::Team, vec![team("a", "Alpha")]),
        ];

        let committed = op.handle_snapshot(&sections).unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].type_name(), "Team");
        assert_eq!(op.active_memberships("a").unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_failure_commits_no_section() {
        let op = operator();
        let sections = vec![
            (RecordType::Team, vec![team("a", "Alpha")]),
            (
                RecordType::TeamMembership,
                vec![json!({"team_id": "a", "roles": "team_user"})],
            ),
        ];

        let err = op.handle_snapshot(&sections).unwrap_err();
        assert!(matches!(err, OperatorError::Validation { ref field, .. } if field == "user_id"));
        assert!(op.records(RecordType::Team).unwrap().is_empty());
        assert!(op.records(RecordType::TeamMembership).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_payload_commits_nothing() {
        let op = operator();
        let err = op
            .handle_teams(&[team("a", "Alpha"), json!({"id": "b", "name": "b", "type": "O"})])
            .unwrap_err();
        assert!(matches!(err, OperatorError::Validation { field, .. } if field == "display_name"));
        assert!(op.records(RecordType::Team).unwrap().is_empty());
    }

    #[test]
    fn test_memberships_and_soft_delete() {
        let op = operator();
        op.handle_teams(&[team("a", "Alpha")]).unwrap();
        op.handle_team_memberships(&[
            json!({"team_id": "a", "user_id": "u1", "roles": "team_user", "delete_at": 0}),
            json!({"team_id": "a", "user_id": "u2", "roles": "team_user", "delete_at": 0}),
        ])
        .unwrap();
        op.handle_slash_commands(&[json!({"id": "cmd1", "team_id": "a", "trigger": "hello"})])
            .unwrap();

        assert_eq!(op.children_of_team(RecordType::TeamMembership, "a").unwrap().len(), 2);
        assert_eq!(op.children_of_team(RecordType::SlashCommand, "a").unwrap().len(), 1);

        op.handle_team_memberships(&[json!({"team_id": "a", "user_id": "u2", "delete_at": 1600000000000i64})])
            .unwrap();

        let active = op.active_memberships("a").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text("user_id"), Some("u1"));
        // Soft deleted, not removed
        assert_eq!(op.children_of_team(RecordType::TeamMembership, "a").unwrap().len(), 2);
    }

    #[test]
    fn test_channel_history_replaces_sequence() {
        let op = operator();
        op.handle_team_channel_history(&[json!({"team_id": "a", "channel_ids": ["ca", "cb"]})])
            .unwrap();
        op.handle_team_channel_history(&[json!({"team_id": "a", "channel_ids": ["cc", "ca"]})])
            .unwrap();

        let history = op
            .get(RecordType::TeamChannelHistory, &RecordKey::single("a"))
            .unwrap()
            .unwrap();
        assert_eq!(history.list("channel_ids"), Some(&["cc".to_string(), "ca".to_string()][..]));
    }

    #[test]
    fn test_search_history_policies() {
        let searches = [
            json!({"team_id": "a", "term": "foo", "display_term": "foo", "created_at": 1}),
            json!({"team_id": "a", "term": "foo", "display_term": "Foo", "created_at": 2}),
        ];

        let dedup = operator();
        dedup.handle_team_search_history(&searches[..1]).unwrap();
        dedup.handle_team_search_history(&searches[1..]).unwrap();
        let stored = dedup.records(RecordType::TeamSearchHistory).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].int("created_at"), Some(2));
        assert_eq!(stored[0].text("display_term"), Some("Foo"));

        let append = operator_with(OperatorConfig {
            search_history: SearchHistoryPolicy::AppendOnly,
            ..OperatorConfig::default()
        });
        append.handle_team_search_history(&searches).unwrap();
        assert_eq!(append.records(RecordType::TeamSearchHistory).unwrap().len(), 2);
    }

    #[test]
    fn test_strict_references_from_config() {
        let op = operator_with(OperatorConfig {
            strict_references: true,
            ..OperatorConfig::default()
        });
        let err = op
            .handle_my_teams(&[json!({"team_id": "a", "roles": "team_user"})])
            .unwrap_err();
        assert!(matches!(err.cause(), OperatorError::MissingReference { .. }));

        op.handle_teams(&[team("a", "Alpha")]).unwrap();
        assert!(op.handle_my_teams(&[json!({"team_id": "a", "roles": "team_user"})]).is_ok());
    }

    #[test]
    fn test_unknown_record_type() {
        let op = operator();
        let err = op.handle_records("Channel", &[json!({})]).unwrap_err();
        assert!(matches!(err, OperatorError::SchemaNotFound(_)));
    }
}
