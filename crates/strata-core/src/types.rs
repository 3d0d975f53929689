//! Core domain types for the Strata reconciliation engine.
//!
//! These types describe what a run writes into the shared graph (run tags,
//! scope anchors, property values) and what it reports back (load and
//! cleanup results).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::schema::ensure_identifier;

/// A plain attribute mapping produced by a source module's transform step.
pub type Record = serde_json::Map<String, serde_json::Value>;

// ── Run Tags ──────────────────────────────────────────────────────

/// Identifies one ingestion pass. Stamped on every node and relationship
/// the pass touches; cleanup retires whatever carries an older tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RunTag(pub i64);

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints strictly increasing, timestamp-derived run tags.
///
/// Held and passed explicitly by whoever starts runs; there is no global
/// counter. Tags are epoch seconds unless that would not exceed the last
/// minted tag (or a floor read from the store), in which case the next
/// integer is used.
#[derive(Debug, Default)]
pub struct RunTagMinter {
    last: AtomicI64,
}

impl RunTagMinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next tag for this process.
    pub fn mint(&self) -> RunTag {
        self.mint_after(RunTag(0))
    }

    /// Mint a tag that is also strictly greater than `floor`.
    pub fn mint_after(&self, floor: RunTag) -> RunTag {
        let now = Utc::now().timestamp();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev.saturating_add(1)).max(floor.0.saturating_add(1));
            match self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return RunTag(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

// ── Scope Anchors ─────────────────────────────────────────────────

/// The root entity (account, tenant, directory) that bounds where a load
/// writes and where a cleanup may delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeAnchor {
    pub label: String,
    #[serde(default = "default_anchor_key")]
    pub key_property: String,
    pub id: String,
}

fn default_anchor_key() -> String {
    "id".to_string()
}

impl ScopeAnchor {
    /// An anchor identified by its `id` property.
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key_property: default_anchor_key(),
            id: id.into(),
        }
    }

    pub fn with_key_property(mut self, key_property: impl Into<String>) -> Self {
        self.key_property = key_property.into();
        self
    }

    /// The value stamped as `scope_id` on every entity loaded under this anchor.
    ///
    /// `Label/id` for anchors keyed on `id`, `Label/key=id` otherwise, so
    /// anchors that differ only in their key property stay separate scopes.
    pub fn scope_id(&self) -> String {
        if self.key_property == default_anchor_key() {
            format!("{}/{}", self.label, self.id)
        } else {
            format!("{}/{}={}", self.label, self.key_property, self.id)
        }
    }

    /// Check that label and key property are safe to interpolate into queries.
    pub fn validate(&self) -> Result<(), SchemaError> {
        ensure_identifier("anchor label", &self.label)?;
        ensure_identifier("anchor key", &self.key_property)
    }

    /// Parse the `Label/id` or `Label/key=id` form used on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        let (label, rest) = s.split_once('/')?;
        let (key, id) = rest.split_once('=').unwrap_or(("id", rest));
        if label.is_empty() || key.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(label, id).with_key_property(key))
    }
}

impl fmt::Display for ScopeAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope_id())
    }
}

// ── Property Values ───────────────────────────────────────────────

/// A value stored on a node or relationship: a scalar or a homogeneous list
/// of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum PropertyValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Flatten a single value or list into its scalar members.
    pub fn scalars(&self) -> Vec<&PropertyValue> {
        match self {
            Self::Null => Vec::new(),
            Self::List(items) => items.iter().flat_map(|v| v.scalars()).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<RunTag> for PropertyValue {
    fn from(v: RunTag) -> Self {
        Self::Int(v.0)
    }
}

// ── Results ───────────────────────────────────────────────────────

/// A record skipped because it failed validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordFailure {
    pub label: String,
    /// `None` when the key itself could not be read.
    pub key: Option<String>,
    pub reason: String,
}

/// A chunk that could not be written after exhausting its retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchFailure {
    pub label: String,
    pub batch_index: usize,
    pub keys: Vec<String>,
    pub attempts: u32,
    pub reason: String,
}

/// Outcome of loading one batch of records for one schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadResult {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
    pub duplicates_coalesced: u64,
    pub record_failures: Vec<RecordFailure>,
    pub batch_failures: Vec<BatchFailure>,
}

impl LoadResult {
    /// Fold another result into this one.
    pub fn absorb(&mut self, other: LoadResult) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.relationships_created += other.relationships_created;
        self.relationships_updated += other.relationships_updated;
        self.duplicates_coalesced += other.duplicates_coalesced;
        self.record_failures.extend(other.record_failures);
        self.batch_failures.extend(other.batch_failures);
    }

    pub fn has_failures(&self) -> bool {
        !self.record_failures.is_empty() || !self.batch_failures.is_empty()
    }
}

/// Which part of a schema's cleanup failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stage", content = "rel_type", rename_all = "snake_case")]
pub enum CleanupStage {
    Relationships(String),
    Nodes,
}

impl fmt::Display for CleanupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relationships(t) => write!(f, "relationships {t}"),
            Self::Nodes => write!(f, "nodes"),
        }
    }
}

/// A schema whose cleanup stopped early.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupFailure {
    pub label: String,
    pub stage: CleanupStage,
    pub attempts: u32,
    pub reason: String,
}

/// Outcome of one cleanup invocation over an ordered list of schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CleanupResult {
    /// Deleted node count per label.
    pub deleted_nodes: BTreeMap<String, u64>,
    /// Deleted relationship count per relationship type.
    pub deleted_relationships: BTreeMap<String, u64>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupResult {
    pub fn total_nodes(&self) -> u64 {
        self.deleted_nodes.values().sum()
    }

    pub fn total_relationships(&self) -> u64 {
        self.deleted_relationships.values().sum()
    }

    pub fn absorb(&mut self, other: CleanupResult) {
        for (label, n) in other.deleted_nodes {
            *self.deleted_nodes.entry(label).or_default() += n;
        }
        for (rel, n) in other.deleted_relationships {
            *self.deleted_relationships.entry(rel).or_default() += n;
        }
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_tags_strictly_increase() {
        let minter = RunTagMinter::new();
        let a = minter.mint();
        let b = minter.mint();
        let c = minter.mint();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_mint_after_exceeds_floor() {
        let minter = RunTagMinter::new();
        let far_future = RunTag(Utc::now().timestamp() + 10_000);
        let tag = minter.mint_after(far_future);
        assert_eq!(tag, RunTag(far_future.0 + 1));
        assert!(minter.mint() > tag);
    }

    #[test]
    fn test_scope_id_and_parse() {
        let anchor = ScopeAnchor::new("Tenant", "SimpsonCorp");
        assert_eq!(anchor.scope_id(), "Tenant/SimpsonCorp");
        assert_eq!(ScopeAnchor::parse("Tenant/SimpsonCorp"), Some(anchor.clone()));
        assert_eq!(ScopeAnchor::parse("Tenant"), None);
        assert_eq!(ScopeAnchor::parse("/x"), None);

        let by_name = ScopeAnchor::new("Tenant", "SimpsonCorp").with_key_property("name");
        assert_eq!(by_name.scope_id(), "Tenant/name=SimpsonCorp");
        assert_ne!(by_name.scope_id(), anchor.scope_id());
        assert_eq!(by_name.to_string(), by_name.scope_id());
        assert_eq!(ScopeAnchor::parse("Tenant/name=SimpsonCorp"), Some(by_name));
    }

    #[test]
    fn test_anchor_validation_rejects_injection() {
        let bad = ScopeAnchor::new("Tenant) DETACH DELETE (n", "x");
        assert!(bad.validate().is_err());
        assert!(ScopeAnchor::new("AWSAccount", "1234").validate().is_ok());
    }

    #[test]
    fn test_property_value_json_shape() {
        let v: PropertyValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(
            v,
            PropertyValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(serde_json::to_string(&PropertyValue::Int(3)).unwrap(), "3");
        assert_eq!(PropertyValue::List(vec![1i64.into(), 2i64.into()]).to_string(), "[1, 2]");
    }

    #[test]
    fn test_cleanup_result_absorb() {
        let mut a = CleanupResult::default();
        a.deleted_nodes.insert("User".into(), 2);
        let mut b = CleanupResult::default();
        b.deleted_nodes.insert("User".into(), 1);
        b.deleted_relationships.insert("HAS_USER".into(), 1);
        a.absorb(b);
        assert_eq!(a.total_nodes(), 3);
        assert_eq!(a.total_relationships(), 1);
    }
}
