//! Declarative schema registry.
//!
//! Each node type the engine manages is described by a [`NodeSchema`]: its
//! label, the key that identifies an instance within a scope, the typed
//! property allowlist, the relationship that anchors it to its scope, and
//! any relationships to other registered types. Records coming out of a
//! source module are validated and coerced against this contract before
//! anything is written.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchemaError, ValidationError};
use crate::types::{PropertyValue, Record};

/// Property holding the owning anchor's `Label/id` on every managed node.
pub const SCOPE_ID: &str = "scope_id";
/// Run tag at creation. Never rewritten.
pub const FIRST_SEEN_TAG: &str = "first_seen_tag";
/// Run tag of the most recent upsert.
pub const LAST_SEEN_TAG: &str = "last_seen_tag";

const RESERVED: [&str; 3] = [SCOPE_ID, FIRST_SEEN_TAG, LAST_SEEN_TAG];

// ── Declarations ──────────────────────────────────────────────────

/// Declared type of a property and the coercion applied to it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    #[default]
    String,
    Int,
    Float,
    Bool,
    /// Epoch seconds.
    Timestamp,
    StringList,
    IntList,
    FloatList,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::StringList => "string list",
            Self::IntList => "int list",
            Self::FloatList => "float list",
        };
        f.write_str(name)
    }
}

/// Relationship direction, relative to the side that declares it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `(declaring)-[:REL]->(other)`
    #[default]
    Outward,
    /// `(declaring)<-[:REL]-(other)`
    Inward,
}

/// One property of the field contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertySpec {
    /// Property name in the graph.
    pub name: String,
    /// Record field to read; dotted paths reach into nested objects.
    /// Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub indexed: bool,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            field: None,
            kind,
            required: false,
            indexed: false,
        }
    }

    pub fn from_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn field_path(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }
}

/// The relationship tying every instance to its scope anchor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeLink {
    pub rel_type: String,
    /// Direction as seen from the anchor.
    #[serde(default)]
    pub direction: Direction,
}

impl ScopeLink {
    pub fn new(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
        }
    }
}

/// A relationship to another registered node type, matched by key values
/// found in the record. Targets are looked up within the same scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelSpec {
    pub rel_type: String,
    #[serde(default)]
    pub direction: Direction,
    pub target_label: String,
    #[serde(default = "default_target_key")]
    pub target_key: String,
    #[serde(default)]
    pub target_key_kind: PropertyKind,
    /// Record field with one target key or a list of them.
    pub field: String,
}

fn default_target_key() -> String {
    "id".to_string()
}

impl RelSpec {
    pub fn new(
        rel_type: impl Into<String>,
        direction: Direction,
        target_label: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            target_label: target_label.into(),
            target_key: default_target_key(),
            target_key_kind: PropertyKind::String,
            field: field.into(),
        }
    }

    pub fn with_target_key(mut self, key: impl Into<String>, kind: PropertyKind) -> Self {
        self.target_key = key.into();
        self.target_key_kind = kind;
        self
    }
}

/// Full description of one managed node type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSchema {
    pub label: String,
    #[serde(default)]
    pub extra_labels: Vec<String>,
    pub key: Vec<PropertySpec>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    pub scope_link: ScopeLink,
    #[serde(default)]
    pub relationships: Vec<RelSpec>,
}

/// A record that satisfied its schema, with every value coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    /// Key properties in declaration order.
    pub key: Vec<(String, PropertyValue)>,
    /// Every declared non-key property; absent values are `Null`.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Target key values per declared relationship, aligned with
    /// `NodeSchema::relationships`.
    pub links: Vec<Vec<PropertyValue>>,
}

impl ValidatedRecord {
    /// Human-readable key used for dedup and failure reports.
    pub fn key_text(&self) -> String {
        key_text(&self.key)
    }
}

fn key_text(key: &[(String, PropertyValue)]) -> String {
    match key {
        [(_, v)] => v.to_string(),
        parts => parts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

impl NodeSchema {
    /// A schema with a single key property.
    pub fn new(label: impl Into<String>, key: PropertySpec, scope_link: ScopeLink) -> Self {
        Self {
            label: label.into(),
            extra_labels: Vec::new(),
            key: vec![key],
            properties: Vec::new(),
            scope_link,
            relationships: Vec::new(),
        }
    }

    /// Add another key property, making the key composite.
    pub fn with_key(mut self, key: PropertySpec) -> Self {
        self.key.push(key);
        self
    }

    pub fn with_property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_extra_label(mut self, label: impl Into<String>) -> Self {
        self.extra_labels.push(label.into());
        self
    }

    pub fn with_relationship(mut self, rel: RelSpec) -> Self {
        self.relationships.push(rel);
        self
    }

    /// Check identifiers and key declarations before anything is rendered
    /// into a query.
    pub fn validate(&self) -> Result<(), SchemaError> {
        ensure_identifier("label", &self.label)?;
        for extra in &self.extra_labels {
            ensure_identifier("label", extra)?;
        }
        ensure_identifier("relationship type", &self.scope_link.rel_type)?;

        if self.key.is_empty() {
            return Err(SchemaError::EmptyKey {
                label: self.label.clone(),
            });
        }

        let mut seen = HashSet::new();
        for spec in self.key.iter().chain(&self.properties) {
            ensure_identifier("property", &spec.name)?;
            if RESERVED.contains(&spec.name.as_str()) {
                return Err(SchemaError::ReservedProperty {
                    label: self.label.clone(),
                    property: spec.name.clone(),
                });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateProperty {
                    label: self.label.clone(),
                    property: spec.name.clone(),
                });
            }
        }

        for spec in &self.key {
            if !matches!(spec.kind, PropertyKind::String | PropertyKind::Int) {
                return Err(SchemaError::UnsupportedKeyKind {
                    label: self.label.clone(),
                    property: spec.name.clone(),
                    kind: spec.kind,
                });
            }
        }

        for rel in &self.relationships {
            ensure_identifier("relationship type", &rel.rel_type)?;
            ensure_identifier("label", &rel.target_label)?;
            ensure_identifier("property", &rel.target_key)?;
            if !matches!(rel.target_key_kind, PropertyKind::String | PropertyKind::Int) {
                return Err(SchemaError::UnsupportedKeyKind {
                    label: rel.target_label.clone(),
                    property: rel.target_key.clone(),
                    kind: rel.target_key_kind,
                });
            }
        }

        Ok(())
    }

    /// Names of the key properties, in declaration order.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.key.iter().map(|k| k.name.as_str())
    }

    /// Validate and coerce one record against this schema.
    pub fn validate_record(&self, record: &Record) -> Result<ValidatedRecord, ValidationError> {
        let mut key = Vec::with_capacity(self.key.len());
        for spec in &self.key {
            let value = coerce_field(record, spec)?;
            if value.is_null() {
                return Err(ValidationError::MissingKey {
                    property: spec.name.clone(),
                });
            }
            key.push((spec.name.clone(), value));
        }

        let mut properties = BTreeMap::new();
        for spec in &self.properties {
            let value = coerce_field(record, spec)?;
            if value.is_null() && spec.required {
                return Err(ValidationError::MissingRequired {
                    property: spec.name.clone(),
                });
            }
            properties.insert(spec.name.clone(), value);
        }

        let mut links = Vec::with_capacity(self.relationships.len());
        for rel in &self.relationships {
            let targets = match lookup(record, &rel.field) {
                None | Some(Value::Null) => Vec::new(),
                Some(raw) => {
                    let mut out = Vec::new();
                    flatten_into(raw, rel.target_key_kind, &rel.field, &mut out)?;
                    out
                }
            };
            links.push(targets);
        }

        Ok(ValidatedRecord {
            key,
            properties,
            links,
        })
    }

    /// Best-effort key text for a record that failed validation.
    pub fn key_hint(&self, record: &Record) -> Option<String> {
        let mut parts = Vec::with_capacity(self.key.len());
        for spec in &self.key {
            let value = coerce_field(record, spec).ok()?;
            if value.is_null() {
                return None;
            }
            parts.push((spec.name.clone(), value));
        }
        Some(key_text(&parts))
    }
}

// ── Registry ──────────────────────────────────────────────────────

/// Ordered collection of node schemas.
///
/// Registration order is load order: a schema may only point its declared
/// relationships at labels registered before it (or at itself), so the
/// order is topological. Cleanup runs in the reverse order, children
/// before the parents they reference.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Vec<NodeSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions in load order.
    pub fn from_definitions(defs: Vec<NodeSchema>) -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        for schema in defs {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Parse a JSON array of schema definitions.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let defs: Vec<NodeSchema> =
            serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_definitions(defs)
    }

    pub fn register(&mut self, schema: NodeSchema) -> Result<(), SchemaError> {
        schema.validate()?;
        if self.get(&schema.label).is_some() {
            return Err(SchemaError::DuplicateLabel(schema.label));
        }
        for rel in &schema.relationships {
            if rel.target_label != schema.label && self.get(&rel.target_label).is_none() {
                return Err(SchemaError::UnknownTarget {
                    label: schema.label.clone(),
                    target: rel.target_label.clone(),
                });
            }
        }
        tracing::debug!(label = %schema.label, "Registered schema");
        self.schemas.push(schema);
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&NodeSchema> {
        self.schemas.iter().find(|s| s.label == label)
    }

    pub fn require(&self, label: &str) -> Result<&NodeSchema, SchemaError> {
        self.get(label)
            .ok_or_else(|| SchemaError::UnknownLabel(label.to_string()))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Schemas in registration (load) order.
    pub fn load_order(&self) -> impl Iterator<Item = &NodeSchema> {
        self.schemas.iter()
    }

    /// Schemas in cleanup order: the reverse of load order.
    pub fn cleanup_order(&self) -> Vec<&NodeSchema> {
        self.schemas.iter().rev().collect()
    }

    /// Cleanup order restricted to the given labels.
    pub fn cleanup_order_for<S: AsRef<str>>(&self, labels: &[S]) -> Vec<&NodeSchema> {
        self.cleanup_order()
            .into_iter()
            .filter(|s| labels.iter().any(|l| l.as_ref() == s.label))
            .collect()
    }

    /// (label, property) pairs worth indexing: keys, scope id, last seen
    /// tag, and properties declared `indexed`.
    pub fn index_plan(&self) -> Vec<(String, String)> {
        let mut plan = Vec::new();
        for schema in &self.schemas {
            let mut push = |prop: &str| {
                let entry = (schema.label.clone(), prop.to_string());
                if !plan.contains(&entry) {
                    plan.push(entry);
                }
            };
            push(SCOPE_ID);
            for k in &schema.key {
                push(&k.name);
            }
            push(LAST_SEEN_TAG);
            for p in schema.properties.iter().filter(|p| p.indexed) {
                push(&p.name);
            }
        }
        plan
    }
}

// ── Identifier and coercion helpers ───────────────────────────────

/// Labels, relationship types and property names end up interpolated into
/// query text, so only plain identifiers are accepted.
pub fn ensure_identifier(kind: &'static str, value: &str) -> Result<(), SchemaError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = record.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn coerce_field(record: &Record, spec: &PropertySpec) -> Result<PropertyValue, ValidationError> {
    match lookup(record, spec.field_path()) {
        None => Ok(PropertyValue::Null),
        Some(raw) => coerce(raw, spec.kind, &spec.name),
    }
}

fn mismatch(property: &str, expected: PropertyKind, found: &Value) -> ValidationError {
    let found = match found {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    };
    ValidationError::Coercion {
        property: property.to_string(),
        expected,
        found,
    }
}

/// Coerce a raw JSON value into the declared kind.
pub fn coerce(
    raw: &Value,
    kind: PropertyKind,
    property: &str,
) -> Result<PropertyValue, ValidationError> {
    if raw.is_null() {
        return Ok(PropertyValue::Null);
    }
    let err = || mismatch(property, kind, raw);
    let value = match kind {
        PropertyKind::String => match raw {
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Number(n) => PropertyValue::String(n.to_string()),
            Value::Bool(b) => PropertyValue::String(b.to_string()),
            _ => return Err(err()),
        },
        PropertyKind::Int => match raw {
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Int(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        PropertyValue::Int(f as i64)
                    }
                    _ => return Err(err()),
                },
            },
            Value::String(s) => PropertyValue::Int(s.trim().parse().map_err(|_| err())?),
            _ => return Err(err()),
        },
        PropertyKind::Float => match raw {
            Value::Number(n) => PropertyValue::Float(n.as_f64().ok_or_else(err)?),
            Value::String(s) => PropertyValue::Float(s.trim().parse().map_err(|_| err())?),
            _ => return Err(err()),
        },
        PropertyKind::Bool => match raw {
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => PropertyValue::Bool(true),
                "false" => PropertyValue::Bool(false),
                _ => return Err(err()),
            },
            _ => return Err(err()),
        },
        PropertyKind::Timestamp => match raw {
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Int(i),
                None => PropertyValue::Int(n.as_f64().ok_or_else(err)?.trunc() as i64),
            },
            Value::String(s) => PropertyValue::Int(parse_timestamp(s).ok_or_else(err)?),
            _ => return Err(err()),
        },
        PropertyKind::StringList => list(raw, PropertyKind::String, property)?,
        PropertyKind::IntList => list(raw, PropertyKind::Int, property)?,
        PropertyKind::FloatList => list(raw, PropertyKind::Float, property)?,
    };
    Ok(value)
}

fn list(
    raw: &Value,
    element: PropertyKind,
    property: &str,
) -> Result<PropertyValue, ValidationError> {
    let mut items = Vec::new();
    flatten_into(raw, element, property, &mut items)?;
    Ok(PropertyValue::List(items))
}

/// Flatten nested arrays into scalars of one kind, dropping nulls.
fn flatten_into(
    raw: &Value,
    element: PropertyKind,
    property: &str,
    out: &mut Vec<PropertyValue>,
) -> Result<(), ValidationError> {
    match raw {
        Value::Null => Ok(()),
        Value::Array(items) => {
            for item in items {
                flatten_into(item, element, property, out)?;
            }
            Ok(())
        }
        Value::Object(_) => Err(mismatch(property, element, raw)),
        scalar => {
            out.push(coerce(scalar, element, property)?);
            Ok(())
        }
    }
}

fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(i);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc().timestamp())
}
