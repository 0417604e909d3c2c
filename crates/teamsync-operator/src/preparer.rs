//! Record preparation: raw server payload + operation kind -> descriptor
//!
//! Preparation is pure. It reads the schema registry, the payload and the
//! existing record, and returns a fresh [`PreparedDescriptor`] without
//! touching storage or mutating its inputs.

use serde_json::{Map, Value};
use teamsync_schema::{FieldKind, FieldSpec, FieldValue, RecordKey, Schema, SchemaRegistry};
use teamsync_storage::Record;
use tracing::{debug, trace};

use crate::{OperationKind, OperatorError, PreparedDescriptor, Result};

/// Prepare a single payload against `registry`
pub fn prepare(
    registry: &SchemaRegistry,
    record_type: &str,
    operation: OperationKind,
    raw: &Value,
    existing: Option<&Record>,
) -> Result<PreparedDescriptor> {
    Preparer::new(registry).prepare(record_type, operation, raw, existing)
}

/// Stateless preparer bound to a schema registry
///
/// Safe to share across threads; every call is independent.
#[derive(Debug, Clone, Copy)]
pub struct Preparer<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> Preparer<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn prepare(
        &self,
        record_type: &str,
        operation: OperationKind,
        raw: &Value,
        existing: Option<&Record>,
    ) -> Result<PreparedDescriptor> {
        let schema = self.registry.lookup(record_type)?;
        let payload = as_object(schema, raw)?;

        let descriptor = match (operation, existing) {
            (OperationKind::Create, None) => prepare_create(schema, payload)?,
            (OperationKind::Create, Some(_)) => {
                return Err(OperatorError::validation(
                    schema.record_type,
                    "existing_record",
                    "must not be supplied for CREATE",
                ))
            }
            (OperationKind::Update, Some(existing)) => prepare_update(schema, payload, existing)?,
            (OperationKind::Update, None) => {
                return Err(OperatorError::validation(
                    schema.record_type,
                    "existing_record",
                    "is required for UPDATE",
                ))
            }
        };

        for name in payload.keys() {
            if schema.field(name).is_none() {
                trace!(record_type = %schema.record_type, field = %name, "ignoring unknown field");
            }
        }

        debug!(
            record_type = %descriptor.record_type,
            operation = %descriptor.operation,
            key = %descriptor.key,
            "prepared descriptor"
        );
        Ok(descriptor)
    }

    /// Identity key a payload would be stored under
    ///
    /// Only the identity fields are validated.
    pub fn natural_key(&self, record_type: &str, raw: &Value) -> Result<RecordKey> {
        let schema = self.registry.lookup(record_type)?;
        let payload = as_object(schema, raw)?;

        let mut parts = Vec::with_capacity(schema.identity.len());
        for name in &schema.identity {
            let spec = identity_spec(schema, name)?;
            let value = required_value(schema, spec, payload.get(spec.name))?;
            parts.push(value.key_part());
        }
        Ok(RecordKey::new(parts))
    }
}

fn as_object<'a>(schema: &Schema, raw: &'a Value) -> Result<&'a Map<String, Value>> {
    raw.as_object()
        .ok_or_else(|| OperatorError::validation(schema.record_type, "<payload>", "must be a JSON object"))
}

fn identity_spec<'s>(schema: &'s Schema, name: &str) -> Result<&'s FieldSpec> {
    schema
        .field(name)
        .ok_or_else(|| OperatorError::validation(schema.record_type, name, "is not declared"))
}

fn prepare_create(schema: &Schema, payload: &Map<String, Value>) -> Result<PreparedDescriptor> {
    let mut fields = std::collections::BTreeMap::new();
    for spec in &schema.fields {
        let value = match payload.get(spec.name) {
            None | Some(Value::Null) if !spec.required => spec.default_value(),
            raw => required_value(schema, spec, raw)?,
        };
        fields.insert(spec.name.to_string(), value);
    }

    let key = identity_of(schema, &fields)?;
    Ok(PreparedDescriptor {
        record_type: schema.record_type,
        operation: OperationKind::Create,
        key,
        fields,
        base_version: None,
    })
}

fn prepare_update(
    schema: &Schema,
    payload: &Map<String, Value>,
    existing: &Record,
) -> Result<PreparedDescriptor> {
    if existing.record_type != schema.record_type {
        return Err(OperatorError::validation(
            schema.record_type,
            "existing_record",
            format!("is a {} record", existing.record_type),
        ));
    }

    let mut fields = existing.fields.clone();
    for spec in &schema.fields {
        // Records written under an older schema may lack newer fields
        fields
            .entry(spec.name.to_string())
            .or_insert_with(|| spec.default_value());

        let value = match payload.get(spec.name) {
            None => continue,
            Some(Value::Null) if !spec.required => spec.default_value(),
            raw => required_value(schema, spec, raw)?,
        };

        if schema.is_identity(spec.name) && fields.get(spec.name) != Some(&value) {
            return Err(OperatorError::validation(
                schema.record_type,
                spec.name,
                "is part of the identity and cannot change",
            ));
        }
        fields.insert(spec.name.to_string(), value);
    }

    Ok(PreparedDescriptor {
        record_type: schema.record_type,
        operation: OperationKind::Update,
        key: existing.key.clone(),
        fields,
        base_version: Some(existing.version),
    })
}

fn identity_of(
    schema: &Schema,
    fields: &std::collections::BTreeMap<String, FieldValue>,
) -> Result<RecordKey> {
    let mut parts = Vec::with_capacity(schema.identity.len());
    for name in &schema.identity {
        let value = fields
            .get(*name)
            .ok_or_else(|| OperatorError::validation(schema.record_type, *name, "is required"))?;
        parts.push(value.key_part());
    }
    Ok(RecordKey::new(parts))
}

/// Normalize a value that must be present and non-null
fn required_value(schema: &Schema, spec: &FieldSpec, raw: Option<&Value>) -> Result<FieldValue> {
    let raw = match raw {
        None | Some(Value::Null) => {
            return Err(OperatorError::validation(schema.record_type, spec.name, "is required"))
        }
        Some(raw) => raw,
    };

    let value = normalize(spec.kind, raw).map_err(|reason| {
        OperatorError::validation(schema.record_type, spec.name, reason)
    })?;

    if schema.is_identity(spec.name) && matches!(&value, FieldValue::Text(s) if s.is_empty()) {
        return Err(OperatorError::validation(
            schema.record_type,
            spec.name,
            "must not be empty",
        ));
    }
    Ok(value)
}

/// Coerce a non-null wire value into the field's storage kind
fn normalize(kind: FieldKind, raw: &Value) -> std::result::Result<FieldValue, String> {
    let mismatch = || format!("must be {}, got {}", kind.describe(), json_type(raw));

    match kind {
        FieldKind::Text => raw.as_str().map(|s| FieldValue::Text(s.to_string())).ok_or_else(mismatch),
        FieldKind::Bool => raw.as_bool().map(FieldValue::Bool).ok_or_else(mismatch),
        FieldKind::Int => match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(whole_i64))
                .map(FieldValue::Int)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        FieldKind::TextList => {
            let items = raw.as_array().ok_or_else(mismatch)?;
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string).ok_or_else(mismatch))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(FieldValue::List)
        }
        FieldKind::RoleSet => {
            let names: Vec<&str> = match raw {
                Value::String(s) => s.split(|c: char| c == ',' || c.is_whitespace()).collect(),
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.as_str().ok_or_else(mismatch))
                    .collect::<std::result::Result<_, _>>()?,
                _ => return Err(mismatch()),
            };
            Ok(FieldValue::Text(join_roles(&names)))
        }
    }
}

/// A float that is a whole number inside i64's range
///
/// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
fn whole_i64(f: f64) -> Option<i64> {
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (in_range && f.fract() == 0.0).then_some(f as i64)
}

/// Trim, drop empties and duplicates (first occurrence wins), space-join
fn join_roles(names: &[&str]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen.join(" ")
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
