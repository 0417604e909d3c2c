//! Field kinds, specs and stored values

use serde::{Deserialize, Serialize};

/// The storage kind of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Free text
    Text,
    /// Boolean flag; `null` on the wire reads as `false`
    Bool,
    /// Signed integer (millisecond timestamps, counters)
    Int,
    /// Ordered sequence of identifiers
    TextList,
    /// Set of role names, stored as space-delimited text
    RoleSet,
}

impl FieldKind {
    /// Value used when an optional field is absent from the payload
    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldKind::Text | FieldKind::RoleSet => FieldValue::Text(String::new()),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Int => FieldValue::Int(0),
            FieldKind::TextList => FieldValue::List(Vec::new()),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Bool => "boolean",
            FieldKind::Int => "integer",
            FieldKind::TextList => "list of text",
            FieldKind::RoleSet => "role set",
        }
    }
}

/// A normalized field value as persisted in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Int(i64),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Render the value in the server's JSON shape
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(n) => serde_json::Value::from(*n),
            FieldValue::List(items) => serde_json::Value::from(items.clone()),
        }
    }

    /// Identity key part for this value
    pub fn key_part(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::List(items) => items.join(","),
        }
    }
}

/// Declaration of one field in a record schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Must be present (and non-null) on CREATE
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub fn default_value(&self) -> FieldValue {
        self.kind.default_value()
    }
}
