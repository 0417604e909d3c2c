//! Record layout for storage

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use teamsync_schema::{FieldValue, RecordKey, RecordType, SearchHistoryPolicy};

/// A stored record: one team, membership, command, or history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Which schema this record follows
    pub record_type: RecordType,

    /// Identity derived from the payload's natural key
    pub key: RecordKey,

    /// Version for optimistic locking (1 after creation)
    pub version: u64,

    /// Normalized field values keyed by schema field name
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create a new, empty record with the given type and key
    pub fn new(record_type: RecordType, key: RecordKey) -> Self {
        Self {
            record_type,
            key,
            version: 0,
            fields: BTreeMap::new(),
        }
    }

    /// Physical storage id: `<Type>/<encoded key>`
    pub fn storage_id(&self) -> String {
        storage_id(self.record_type, &self.key)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(FieldValue::as_int)
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(FieldValue::as_bool)
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        self.field(name).and_then(FieldValue::as_list)
    }

    /// Soft-deleted records carry a positive `delete_at`
    pub fn is_deleted(&self) -> bool {
        self.int("delete_at").is_some_and(|at| at > 0)
    }

    /// Foreign keys held by this record, as `(field, target id)` pairs
    pub fn references(&self) -> Vec<(&'static str, String)> {
        self.record_type
            .reference_fields()
            .iter()
            .filter_map(|(field, _)| {
                self.text(field)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*field, v.to_string()))
            })
            .collect()
    }

    /// Fields the identity key is built from, in key order
    ///
    /// A three-part search history key was written under the append-only
    /// policy, which adds `created_at`.
    pub fn identity_fields(&self) -> &'static [&'static str] {
        let search_history = match (self.record_type, self.key.parts().len()) {
            (RecordType::TeamSearchHistory, 3) => SearchHistoryPolicy::AppendOnly,
            _ => SearchHistoryPolicy::Dedup,
        };
        self.record_type.identity_fields(search_history)
    }

    /// Render the fields as a server-shaped JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

pub(crate) fn storage_id(record_type: RecordType, key: &RecordKey) -> String {
    format!("{}/{}", record_type.name(), key.storage_key())
}

pub(crate) fn reference_key(field: &str, value: &str) -> String {
    format!("{}:{}", field, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(delete_at: i64) -> Record {
        let mut record = Record::new(
            RecordType::TeamMembership,
            RecordKey::new(vec!["a".into(), "ab".into()]),
        );
        record
            .fields
            .insert("team_id".into(), FieldValue::Text("a".into()));
        record
            .fields
            .insert("delete_at".into(), FieldValue::Int(delete_at));
        record
    }

    #[test]
    fn test_soft_delete_flag() {
        assert!(!membership(0).is_deleted());
        assert!(membership(1445538153952).is_deleted());
    }

    #[test]
    fn test_references_follow_team_id() {
        assert_eq!(membership(0).references(), vec![("team_id", "a".to_string())]);

        let team = Record::new(RecordType::Team, RecordKey::single("a"));
        assert!(team.references().is_empty());
    }

    #[test]
    fn test_storage_id_is_type_scoped() {
        let team = Record::new(RecordType::Team, RecordKey::single("a"));
        let my_team = Record::new(RecordType::MyTeam, RecordKey::single("a"));
        assert_ne!(team.storage_id(), my_team.storage_id());
        assert!(team.storage_id().starts_with("Team/"));
    }
}
