//! The transactional boundary between the engine and a graph store.
//!
//! Everything the loader, the cleanup engine and the read queries need from
//! the store is expressed as a [`Statement`]: a declarative, parameterized
//! operation. Adapters decide how to execute it. The Neo4j adapter renders
//! Cypher (see [`crate::cypher`]); [`crate::memory::MemoryGraph`] interprets
//! it directly.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use strata_core::schema::{Direction, NodeSchema, ValidatedRecord};
use strata_core::{PropertyValue, RunTag, ScopeAnchor, StoreError};

/// One result row: column name → value.
pub type Row = BTreeMap<String, PropertyValue>;

/// A transactional graph session.
///
/// `execute` runs one statement in its own transaction. `execute_in_txn`
/// runs several statements in one transaction: all of them commit, or none
/// do. No atomicity is promised across calls.
#[async_trait]
pub trait GraphSession: Send + Sync {
    async fn execute_in_txn(
        &self,
        statements: &[Statement<'_>],
    ) -> Result<Vec<Vec<Row>>, StoreError>;

    async fn execute(&self, statement: &Statement<'_>) -> Result<Vec<Row>, StoreError> {
        let mut results = self.execute_in_txn(std::slice::from_ref(statement)).await?;
        Ok(results.pop().unwrap_or_default())
    }
}

/// Bounded-depth reachability from every node of a schema under an anchor.
///
/// Returns the distinct set of start nodes plus every node reachable from
/// them over `rel_type` within `max_depth` hops, projected to `project`.
#[derive(Debug, Clone, Copy)]
pub struct Reach<'a> {
    pub anchor: &'a ScopeAnchor,
    pub start: &'a NodeSchema,
    pub rel_type: &'a str,
    pub direction: Direction,
    pub max_depth: u32,
    pub project: &'a [String],
}

/// A declarative store operation with named parameters.
///
/// Result columns per variant:
/// - `UpsertNodes`: one row per record: `key`, `created`, `rel_created`
/// - `UpsertRelationships`: one row: `created`, `updated`
/// - `DeleteStale*`: one row: `deleted`
/// - `Reachable`, `ListNodes`: one row per node with the projected properties
/// - `ListRelationships`: one row per edge: `source`, `target`
/// - `AnchorTag`: at most one row: `tag`
#[derive(Debug, Clone, Copy)]
pub enum Statement<'a> {
    /// Create the anchor if needed and stamp it with the run tag.
    MergeAnchor {
        anchor: &'a ScopeAnchor,
        tag: RunTag,
    },
    /// Match-or-create a batch of entities and their scope relationships.
    UpsertNodes {
        schema: &'a NodeSchema,
        anchor: &'a ScopeAnchor,
        tag: RunTag,
        batch: &'a [ValidatedRecord],
    },
    /// Match-or-create one declared relationship type for a batch.
    UpsertRelationships {
        schema: &'a NodeSchema,
        rel_index: usize,
        anchor: &'a ScopeAnchor,
        tag: RunTag,
        batch: &'a [ValidatedRecord],
    },
    /// Delete up to `limit` stale relationships of one declared type under the anchor.
    DeleteStaleRelationships {
        schema: &'a NodeSchema,
        rel_index: usize,
        anchor: &'a ScopeAnchor,
        tag: RunTag,
        limit: usize,
    },
    /// Detach-delete up to `limit` stale entities reachable from the anchor.
    DeleteStaleNodes {
        schema: &'a NodeSchema,
        anchor: &'a ScopeAnchor,
        tag: RunTag,
        limit: usize,
    },
    Reachable(Reach<'a>),
    ListNodes {
        label: &'a str,
        scope: Option<&'a ScopeAnchor>,
        properties: &'a [String],
    },
    ListRelationships {
        source_label: &'a str,
        source_property: &'a str,
        rel_type: &'a str,
        direction: Direction,
        target_label: &'a str,
        target_property: &'a str,
    },
    /// The run tag last stamped on the anchor.
    AnchorTag { anchor: &'a ScopeAnchor },
    CreateIndex {
        label: &'a str,
        property: &'a str,
    },
}

impl Statement<'_> {
    /// Whether this statement only reads.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Reachable(_)
                | Self::ListNodes { .. }
                | Self::ListRelationships { .. }
                | Self::AnchorTag { .. }
        )
    }
}

impl fmt::Display for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MergeAnchor { anchor, .. } => write!(f, "merge_anchor {anchor}"),
            Self::UpsertNodes { schema, batch, .. } => {
                write!(f, "upsert_nodes {} x{}", schema.label, batch.len())
            }
            Self::UpsertRelationships {
                schema, rel_index, ..
            } => write!(
                f,
                "upsert_relationships {} {}",
                schema.label,
                rel_name(schema, *rel_index)
            ),
            Self::DeleteStaleRelationships {
                schema, rel_index, ..
            } => write!(
                f,
                "delete_stale_relationships {} {}",
                schema.label,
                rel_name(schema, *rel_index)
            ),
            Self::DeleteStaleNodes { schema, .. } => {
                write!(f, "delete_stale_nodes {}", schema.label)
            }
            Self::Reachable(reach) => write!(
                f,
                "reachable {} {}*..{}",
                reach.start.label, reach.rel_type, reach.max_depth
            ),
            Self::ListNodes { label, .. } => write!(f, "list_nodes {label}"),
            Self::ListRelationships { rel_type, .. } => write!(f, "list_relationships {rel_type}"),
            Self::AnchorTag { anchor } => write!(f, "anchor_tag {anchor}"),
            Self::CreateIndex { label, property } => write!(f, "create_index {label}.{property}"),
        }
    }
}

fn rel_name(schema: &NodeSchema, index: usize) -> &str {
    schema
        .relationships
        .get(index)
        .map(|r| r.rel_type.as_str())
        .unwrap_or("?")
}

/// Read an integer column, treating missing or null as zero.
pub fn int_column(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(PropertyValue::as_i64).unwrap_or(0)
}

/// Read a boolean column, treating missing or null as false.
pub fn bool_column(row: &Row, column: &str) -> bool {
    row.get(column)
        .and_then(PropertyValue::as_bool)
        .unwrap_or(false)
}
