//! Read operations over the reconciled graph.

use std::collections::BTreeSet;

use strata_core::schema::Direction;
use strata_core::{PropertyValue, RunTag, ScopeAnchor, SchemaRegistry, StoreError};

use crate::session::{GraphSession, Reach, Row, Statement};

// ── Reachability ─────────────────────────────────────────────────

/// Every node of `reach.start` under the anchor plus the nodes reachable
/// from them within `reach.max_depth` hops, each projected to
/// `reach.project`. Start nodes come back even when they reach nothing.
///
/// Image lineage is one use: start at the account's images and follow
/// `PARENT` outward to collect every ancestor.
pub async fn reachable<S: GraphSession + ?Sized>(
    session: &S,
    reach: Reach<'_>,
) -> Result<Vec<Row>, StoreError> {
    session.execute(&Statement::Reachable(reach)).await
}

// ── Inspection ───────────────────────────────────────────────────

/// Distinct property tuples of every `label` node, rendered as text.
/// Missing properties render as `null`.
pub async fn check_nodes<S: GraphSession + ?Sized>(
    session: &S,
    label: &str,
    properties: &[&str],
) -> Result<BTreeSet<Vec<String>>, StoreError> {
    let properties: Vec<String> = properties.iter().map(|p| p.to_string()).collect();
    let rows = session
        .execute(&Statement::ListNodes {
            label,
            scope: None,
            properties: &properties,
        })
        .await?;
    Ok(rows
        .iter()
        .map(|row| {
            properties
                .iter()
                .map(|p| row.get(p).map(PropertyValue::to_string).unwrap_or_default())
                .collect()
        })
        .collect())
}

/// Distinct `(source.property, target.property)` pairs joined by `rel_type`.
/// `direction` is read from the source side.
pub async fn check_rels<S: GraphSession + ?Sized>(
    session: &S,
    source: (&str, &str),
    rel_type: &str,
    direction: Direction,
    target: (&str, &str),
) -> Result<BTreeSet<(String, String)>, StoreError> {
    let rows = session
        .execute(&Statement::ListRelationships {
            source_label: source.0,
            source_property: source.1,
            rel_type,
            direction,
            target_label: target.0,
            target_property: target.1,
        })
        .await?;
    let text = |row: &Row, column: &str| {
        row.get(column)
            .map(PropertyValue::to_string)
            .unwrap_or_default()
    };
    Ok(rows
        .iter()
        .map(|row| (text(row, "source"), text(row, "target")))
        .collect())
}

/// The run tag last stamped on the anchor, if the anchor exists.
pub async fn anchor_tag<S: GraphSession + ?Sized>(
    session: &S,
    anchor: &ScopeAnchor,
) -> Result<Option<RunTag>, StoreError> {
    let rows = session.execute(&Statement::AnchorTag { anchor }).await?;
    Ok(rows
        .first()
        .and_then(|row| row.get("tag"))
        .and_then(PropertyValue::as_i64)
        .map(RunTag))
}

// ── Indexes ──────────────────────────────────────────────────────

/// Create every index in the registry's plan. Each index is its own
/// transaction (schema and data writes cannot share one in Neo4j).
/// Returns the number of index statements executed.
pub async fn ensure_indexes<S: GraphSession + ?Sized>(
    session: &S,
    registry: &SchemaRegistry,
) -> Result<usize, StoreError> {
    let plan = registry.index_plan();
    for (label, property) in &plan {
        session
            .execute(&Statement::CreateIndex {
                label: label.as_str(),
                property: property.as_str(),
            })
            .await?;
        tracing::debug!(label = %label, property = %property, "Index ensured");
    }
    tracing::info!(count = plan.len(), "Indexes ensured");
    Ok(plan.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;
    use strata_core::{NodeSchema, PropertyKind, PropertySpec, ScopeLink};

    #[tokio::test]
    async fn test_anchor_tag_absent_then_present() {
        let graph = MemoryGraph::new();
        let anchor = ScopeAnchor::new("Tenant", "t1");
        assert_eq!(anchor_tag(&graph, &anchor).await.unwrap(), None);

        graph
            .execute(&Statement::MergeAnchor {
                anchor: &anchor,
                tag: RunTag(42),
            })
            .await
            .unwrap();
        assert_eq!(anchor_tag(&graph, &anchor).await.unwrap(), Some(RunTag(42)));
    }

    #[tokio::test]
    async fn test_ensure_indexes_follows_plan() {
        let graph = MemoryGraph::new();
        let registry = SchemaRegistry::from_definitions(vec![NodeSchema::new(
            "User",
            PropertySpec::new("id", PropertyKind::Int),
            ScopeLink::new("HAS_USER", Direction::Outward),
        )])
        .unwrap();

        let count = ensure_indexes(&graph, &registry).await.unwrap();
        assert_eq!(count, 3);
        assert!(graph
            .indexes()
            .contains(&("User".to_string(), "scope_id".to_string())));
    }

    #[tokio::test]
    async fn test_check_nodes_renders_missing_as_null() {
        let graph = MemoryGraph::new();
        graph.insert_node(&["User"], vec![("id", PropertyValue::Int(7))]);
        let nodes = check_nodes(&graph, "User", &["id", "email"]).await.unwrap();
        assert_eq!(
            nodes,
            BTreeSet::from([vec!["7".to_string(), "null".to_string()]])
        );
    }
}
