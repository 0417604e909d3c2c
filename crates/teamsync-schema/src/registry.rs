//! Schema registry: field lists, identity keys and defaults per record type

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{FieldKind, FieldSpec, RecordType, SchemaError};

/// Version stamped into every namespace created by this build
pub const SCHEMA_VERSION: u32 = 1;

/// How repeated search terms within a team are stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchHistoryPolicy {
    /// One record per (team_id, term); repeating a term refreshes it
    #[default]
    Dedup,
    /// Every search is kept; identity also includes `created_at`
    AppendOnly,
}

/// The shape of one record type
#[derive(Debug, Clone)]
pub struct Schema {
    pub record_type: RecordType,
    pub fields: Vec<FieldSpec>,
    /// Names of the fields forming the identity key, in key order
    pub identity: Vec<&'static str>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_identity(&self, name: &str) -> bool {
        self.identity.contains(&name)
    }
}

/// Lookup table from record type name to [`Schema`]
///
/// Pure data: building and querying the registry has no side effects.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    version: u32,
    schemas: BTreeMap<RecordType, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_policy(SearchHistoryPolicy::default())
    }

    pub fn with_policy(search_history: SearchHistoryPolicy) -> Self {
        let schemas = RecordType::ALL
            .iter()
            .map(|&t| (t, build_schema(t, search_history)))
            .collect();
        Self {
            version: SCHEMA_VERSION,
            schemas,
        }
    }

    /// Override the schema version (used when opening older or newer stores)
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Look up a schema by its type tag
    pub fn lookup(&self, name: &str) -> Result<&Schema, SchemaError> {
        let record_type: RecordType = name.parse()?;
        Ok(self.get(record_type))
    }

    pub fn get(&self, record_type: RecordType) -> &Schema {
        // Every RecordType is inserted by `with_policy`.
        &self.schemas[&record_type]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_schema(record_type: RecordType, search_history: SearchHistoryPolicy) -> Schema {
    use FieldKind::*;

    let fields = match record_type {
        RecordType::Team => vec![
            FieldSpec::required("id", Text),
            FieldSpec::required("display_name", Text),
            FieldSpec::required("name", Text),
            FieldSpec::optional("description", Text),
            FieldSpec::optional("email", Text),
            FieldSpec::required("type", Text),
            FieldSpec::optional("company_name", Text),
            FieldSpec::optional("allowed_domains", Text),
            FieldSpec::optional("invite_id", Text),
            FieldSpec::optional("allow_open_invite", Bool),
            FieldSpec::optional("last_team_icon_update", Int),
            FieldSpec::optional("scheme_id", Text),
            FieldSpec::optional("group_constrained", Bool),
            FieldSpec::optional("create_at", Int),
            FieldSpec::optional("update_at", Int),
            FieldSpec::optional("delete_at", Int),
        ],
        RecordType::MyTeam => vec![
            FieldSpec::required("team_id", Text),
            FieldSpec::optional("roles", RoleSet),
            FieldSpec::optional("is_unread", Bool),
            FieldSpec::optional("mentions_count", Int),
        ],
        RecordType::TeamMembership => vec![
            FieldSpec::required("team_id", Text),
            FieldSpec::required("user_id", Text),
            FieldSpec::optional("roles", RoleSet),
            FieldSpec::optional("delete_at", Int),
            FieldSpec::optional("scheme_guest", Bool),
            FieldSpec::optional("scheme_user", Bool),
            FieldSpec::optional("scheme_admin", Bool),
            FieldSpec::optional("explicit_roles", RoleSet),
        ],
        RecordType::TeamChannelHistory => vec![
            FieldSpec::required("team_id", Text),
            FieldSpec::required("channel_ids", TextList),
        ],
        RecordType::TeamSearchHistory => vec![
            FieldSpec::required("team_id", Text),
            FieldSpec::required("term", Text),
            FieldSpec::optional("display_term", Text),
            FieldSpec::required("created_at", Int),
        ],
        RecordType::SlashCommand => vec![
            FieldSpec::required("id", Text),
            FieldSpec::required("team_id", Text),
            FieldSpec::required("trigger", Text),
            FieldSpec::optional("url", Text),
            FieldSpec::optional("method", Text),
            FieldSpec::optional("icon_url", Text),
            FieldSpec::optional("auto_complete", Bool),
            FieldSpec::optional("auto_complete_desc", Text),
            FieldSpec::optional("auto_complete_hint", Text),
            FieldSpec::optional("description", Text),
            FieldSpec::optional("display_name", Text),
            FieldSpec::optional("username", Text),
            FieldSpec::optional("creator_id", Text),
            FieldSpec::optional("token", Text),
            FieldSpec::optional("create_at", Int),
            FieldSpec::optional("update_at", Int),
            FieldSpec::optional("delete_at", Int),
        ],
    };

    Schema {
        record_type,
        fields,
        identity: record_type.identity_fields(search_history).to_vec(),
    }
}
