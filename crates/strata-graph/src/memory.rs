//! In-process graph store.
//!
//! `MemoryGraph` interprets [`Statement`]s directly against a small property
//! graph with the same semantics as the rendered Cypher: tenant-scoped
//! MERGE, monotonic tag stamps, anchored cleanup, DETACH on node delete.
//! Transactions are copy-on-write, so a failing statement leaves no trace.
//! Faults can be injected to exercise retry and failure isolation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use strata_core::schema::{Direction, NodeSchema, FIRST_SEEN_TAG, LAST_SEEN_TAG, SCOPE_ID};
use strata_core::{PropertyValue, RunTag, ScopeAnchor, StoreError};

use crate::session::{GraphSession, Reach, Row, Statement};

type Props = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, Default)]
struct StoredNode {
    labels: BTreeSet<String>,
    props: Props,
}

/// Relationships are keyed by (type, source, target).
type RelKey = (String, u64, u64);

#[derive(Debug, Clone, Default)]
struct State {
    next_id: u64,
    nodes: BTreeMap<u64, StoredNode>,
    rels: BTreeMap<RelKey, Props>,
    indexes: BTreeSet<(String, String)>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    transient: VecDeque<String>,
    poisoned: BTreeSet<(String, String)>,
    failing_cleanup: BTreeSet<String>,
}

/// A [`GraphSession`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    log: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Unavailable("memory graph lock poisoned".to_string()))
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Fail every call with `StoreError::Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut f) = self.faults.lock() {
            f.unavailable = unavailable;
        }
    }

    /// Fail the next `count` write transactions with a transient error.
    pub fn inject_transient(&self, count: usize, message: &str) {
        if let Ok(mut f) = self.faults.lock() {
            f.transient
                .extend(std::iter::repeat(message.to_string()).take(count));
        }
    }

    /// Reject any transaction that upserts this key with a constraint violation.
    pub fn poison_key(&self, label: &str, key_text: &str) {
        if let Ok(mut f) = self.faults.lock() {
            f.poisoned.insert((label.to_string(), key_text.to_string()));
        }
    }

    /// Fail every cleanup statement for this label with a transient error.
    pub fn fail_cleanup_for(&self, label: &str) {
        if let Ok(mut f) = self.faults.lock() {
            f.failing_cleanup.insert(label.to_string());
        }
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn node_count(&self, label: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.nodes.values().filter(|n| n.labels.contains(label)).count())
            .unwrap_or(0)
    }

    /// Properties of every node carrying `label`, in creation order.
    pub fn nodes(&self, label: &str) -> Vec<BTreeMap<String, PropertyValue>> {
        self.state
            .lock()
            .map(|s| {
                s.nodes
                    .values()
                    .filter(|n| n.labels.contains(label))
                    .map(|n| n.props.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Properties of the first `label` node whose `property` equals `value`.
    pub fn find_node(
        &self,
        label: &str,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Option<BTreeMap<String, PropertyValue>> {
        let value = value.into();
        let state = self.state.lock().ok()?;
        state
            .nodes
            .values()
            .find(|n| n.labels.contains(label) && n.props.get(property) == Some(&value))
            .map(|n| n.props.clone())
    }

    /// Internal id of the first `label` node whose `property` equals `value`.
    pub fn find_node_id(
        &self,
        label: &str,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Option<u64> {
        let value = value.into();
        let state = self.state.lock().ok()?;
        state
            .nodes
            .iter()
            .find(|(_, n)| n.labels.contains(label) && n.props.get(property) == Some(&value))
            .map(|(id, _)| *id)
    }

    pub fn relationship_count(&self, rel_type: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.rels.keys().filter(|(t, _, _)| t == rel_type).count())
            .unwrap_or(0)
    }

    pub fn indexes(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .map(|s| s.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every statement executed so far, in order, rendered with `Display`.
    pub fn statement_log(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear_log(&self) {
        if let Ok(mut l) = self.log.lock() {
            l.clear();
        }
    }

    /// Insert a node the engine does not manage. Returns its internal id.
    pub fn insert_node(&self, labels: &[&str], props: Vec<(&str, PropertyValue)>) -> u64 {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state.create_node(
            labels.iter().map(|l| l.to_string()).collect(),
            props
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// Insert a relationship the engine does not manage.
    pub fn insert_relationship(&self, rel_type: &str, from: u64, to: u64) {
        if let Ok(mut state) = self.state.lock() {
            state
                .rels
                .insert((rel_type.to_string(), from, to), Props::new());
        }
    }

    fn check_faults(&self, statements: &[Statement<'_>]) -> Result<(), StoreError> {
        let mut faults = lock(&self.faults)?;
        if faults.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        if statements.iter().all(Statement::is_read_only) {
            return Ok(());
        }
        if let Some(message) = faults.transient.pop_front() {
            return Err(StoreError::Transient(message));
        }
        for statement in statements {
            match statement {
                Statement::UpsertNodes { schema, batch, .. } => {
                    for record in batch.iter() {
                        let key = (schema.label.clone(), record.key_text());
                        if faults.poisoned.contains(&key) {
                            return Err(StoreError::ConstraintViolation(format!(
                                "Node({}) already exists with {} = {}",
                                schema.label, SCOPE_ID, key.1
                            )));
                        }
                    }
                }
                Statement::DeleteStaleRelationships { schema, .. }
                | Statement::DeleteStaleNodes { schema, .. }
                    if faults.failing_cleanup.contains(&schema.label) =>
                {
                    return Err(StoreError::Transient(format!(
                        "lock acquisition timed out on {}",
                        schema.label
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GraphSession for MemoryGraph {
    async fn execute_in_txn(
        &self,
        statements: &[Statement<'_>],
    ) -> Result<Vec<Vec<Row>>, StoreError> {
        {
            let mut log = lock(&self.log)?;
            log.extend(statements.iter().map(|s| s.to_string()));
        }
        self.check_faults(statements)?;

        let mut guard = lock(&self.state)?;
        let mut working = guard.clone();
        let results = statements
            .iter()
            .map(|s| working.apply(s))
            .collect::<Vec<_>>();
        *guard = working;
        Ok(results)
    }
}

// ── Interpretation ───────────────────────────────────────────────

fn stamp(props: &mut Props, tag: RunTag) {
    let current = props.get(LAST_SEEN_TAG).and_then(PropertyValue::as_i64);
    if current.map_or(true, |c| c < tag.0) {
        props.insert(LAST_SEEN_TAG.to_string(), PropertyValue::Int(tag.0));
    }
}

fn stale(props: &Props, tag: RunTag) -> bool {
    props
        .get(LAST_SEEN_TAG)
        .and_then(PropertyValue::as_i64)
        .is_some_and(|t| t < tag.0)
}

fn oriented(direction: Direction, from: u64, to: u64) -> (u64, u64) {
    match direction {
        Direction::Outward => (from, to),
        Direction::Inward => (to, from),
    }
}

impl State {
    fn create_node(&mut self, labels: BTreeSet<String>, props: Props) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.nodes.insert(id, StoredNode { labels, props });
        id
    }

    fn find_anchor(&self, anchor: &ScopeAnchor) -> Option<u64> {
        let id = PropertyValue::String(anchor.id.clone());
        self.nodes
            .iter()
            .find(|(_, n)| {
                n.labels.contains(&anchor.label) && n.props.get(&anchor.key_property) == Some(&id)
            })
            .map(|(id, _)| *id)
    }

    fn find_entity(&self, label: &str, scope_id: &str, key: &[(&str, &PropertyValue)]) -> Option<u64> {
        let scope = PropertyValue::String(scope_id.to_string());
        self.nodes
            .iter()
            .find(|(_, n)| {
                n.labels.contains(label)
                    && n.props.get(SCOPE_ID) == Some(&scope)
                    && key.iter().all(|(k, v)| n.props.get(*k) == Some(*v))
            })
            .map(|(id, _)| *id)
    }

    /// Entities of `schema` attached to the anchor through the scope link.
    fn scoped(&self, anchor: &ScopeAnchor, schema: &NodeSchema) -> Vec<u64> {
        let Some(anchor_id) = self.find_anchor(anchor) else {
            return Vec::new();
        };
        let scope = PropertyValue::String(anchor.scope_id());
        let link = &schema.scope_link;
        self.nodes
            .iter()
            .filter(|(id, n)| {
                let (from, to) = oriented(link.direction, anchor_id, **id);
                n.labels.contains(&schema.label)
                    && n.props.get(SCOPE_ID) == Some(&scope)
                    && self.rels.contains_key(&(link.rel_type.clone(), from, to))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Merge a relationship and stamp it. Returns whether it was created.
    fn merge_rel(&mut self, key: RelKey, tag: RunTag) -> bool {
        let mut created = false;
        let props = self.rels.entry(key).or_insert_with(|| {
            created = true;
            let mut p = Props::new();
            p.insert(FIRST_SEEN_TAG.to_string(), PropertyValue::Int(tag.0));
            p
        });
        stamp(props, tag);
        created
    }

    fn project(&self, id: u64, properties: &[String]) -> Row {
        let node = self.nodes.get(&id);
        properties
            .iter()
            .map(|p| {
                let value = node
                    .and_then(|n| n.props.get(p))
                    .cloned()
                    .unwrap_or_default();
                (p.clone(), value)
            })
            .collect()
    }

    fn apply(&mut self, statement: &Statement<'_>) -> Vec<Row> {
        match *statement {
            Statement::MergeAnchor { anchor, tag } => {
                let id = match self.find_anchor(anchor) {
                    Some(id) => id,
                    None => {
                        let mut props = Props::new();
                        props.insert(
                            anchor.key_property.clone(),
                            PropertyValue::String(anchor.id.clone()),
                        );
                        props.insert(FIRST_SEEN_TAG.to_string(), PropertyValue::Int(tag.0));
                        self.create_node(BTreeSet::from([anchor.label.clone()]), props)
                    }
                };
                if let Some(node) = self.nodes.get_mut(&id) {
                    stamp(&mut node.props, tag);
                }
                Vec::new()
            }

            Statement::UpsertNodes {
                schema,
                anchor,
                tag,
                batch,
            } => {
                let Some(anchor_id) = self.find_anchor(anchor) else {
                    return Vec::new();
                };
                let scope_id = anchor.scope_id();
                let mut rows = Vec::with_capacity(batch.len());
                for record in batch {
                    let key: Vec<(&str, &PropertyValue)> =
                        record.key.iter().map(|(k, v)| (k.as_str(), v)).collect();
                    let existing = self.find_entity(&schema.label, &scope_id, &key);
                    let created = existing.is_none();
                    let id = match existing {
                        Some(id) => id,
                        None => {
                            let mut props: Props = record
                                .key
                                .iter()
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect();
                            props.insert(SCOPE_ID.to_string(), PropertyValue::String(scope_id.clone()));
                            props.insert(FIRST_SEEN_TAG.to_string(), PropertyValue::Int(tag.0));
                            self.create_node(BTreeSet::from([schema.label.clone()]), props)
                        }
                    };
                    if let Some(node) = self.nodes.get_mut(&id) {
                        stamp(&mut node.props, tag);
                        for (name, value) in &record.properties {
                            if value.is_null() {
                                node.props.remove(name);
                            } else {
                                node.props.insert(name.clone(), value.clone());
                            }
                        }
                        node.labels.extend(schema.extra_labels.iter().cloned());
                    }
                    let (from, to) = oriented(schema.scope_link.direction, anchor_id, id);
                    let rel_created =
                        self.merge_rel((schema.scope_link.rel_type.clone(), from, to), tag);

                    let mut row = Row::new();
                    row.insert("key".to_string(), PropertyValue::String(record.key_text()));
                    row.insert("created".to_string(), PropertyValue::Bool(created));
                    row.insert("rel_created".to_string(), PropertyValue::Bool(rel_created));
                    rows.push(row);
                }
                rows
            }

            Statement::UpsertRelationships {
                schema,
                rel_index,
                anchor,
                tag,
                batch,
            } => {
                let (mut created, mut updated) = (0i64, 0i64);
                if let Some(rel) = schema.relationships.get(rel_index) {
                    let scope_id = anchor.scope_id();
                    for record in batch {
                        let Some(targets) = record.links.get(rel_index) else {
                            continue;
                        };
                        let key: Vec<(&str, &PropertyValue)> =
                            record.key.iter().map(|(k, v)| (k.as_str(), v)).collect();
                        let Some(source) = self.find_entity(&schema.label, &scope_id, &key) else {
                            continue;
                        };
                        for target_key in targets {
                            let Some(target) = self.find_entity(
                                &rel.target_label,
                                &scope_id,
                                &[(rel.target_key.as_str(), target_key)],
                            ) else {
                                continue;
                            };
                            let (from, to) = oriented(rel.direction, source, target);
                            if self.merge_rel((rel.rel_type.clone(), from, to), tag) {
                                created += 1;
                            } else {
                                updated += 1;
                            }
                        }
                    }
                }
                let mut row = Row::new();
                row.insert("created".to_string(), PropertyValue::Int(created));
                row.insert("updated".to_string(), PropertyValue::Int(updated));
                vec![row]
            }

            Statement::DeleteStaleRelationships {
                schema,
                rel_index,
                anchor,
                tag,
                limit,
            } => {
                let mut doomed = Vec::new();
                if let Some(rel) = schema.relationships.get(rel_index) {
                    for source in self.scoped(anchor, schema) {
                        for (key, props) in &self.rels {
                            let (rel_type, from, to) = key;
                            if rel_type != &rel.rel_type || !stale(props, tag) {
                                continue;
                            }
                            let other = match rel.direction {
                                Direction::Outward if *from == source => *to,
                                Direction::Inward if *to == source => *from,
                                _ => continue,
                            };
                            let target_matches = self
                                .nodes
                                .get(&other)
                                .is_some_and(|n| n.labels.contains(&rel.target_label));
                            if target_matches && !doomed.contains(key) {
                                doomed.push(key.clone());
                            }
                        }
                    }
                }
                doomed.truncate(limit);
                for key in &doomed {
                    self.rels.remove(key);
                }
                vec![deleted_row(doomed.len())]
            }

            Statement::DeleteStaleNodes {
                schema,
                anchor,
                tag,
                limit,
            } => {
                let doomed: Vec<u64> = self
                    .scoped(anchor, schema)
                    .into_iter()
                    .filter(|id| self.nodes.get(id).is_some_and(|n| stale(&n.props, tag)))
                    .take(limit)
                    .collect();
                for id in &doomed {
                    self.nodes.remove(id);
                    self.rels.retain(|(_, from, to), _| from != id && to != id);
                }
                vec![deleted_row(doomed.len())]
            }

            Statement::Reachable(reach) => self.reachable(&reach),

            Statement::ListNodes {
                label,
                scope,
                properties,
            } => {
                let scope = scope.map(|a| PropertyValue::String(a.scope_id()));
                self.nodes
                    .iter()
                    .filter(|(_, n)| {
                        n.labels.contains(label)
                            && scope.as_ref().map_or(true, |s| n.props.get(SCOPE_ID) == Some(s))
                    })
                    .map(|(id, _)| self.project(*id, properties))
                    .collect()
            }

            Statement::ListRelationships {
                source_label,
                source_property,
                rel_type,
                direction,
                target_label,
                target_property,
            } => {
                let has = |id: &u64, label: &str| {
                    self.nodes.get(id).is_some_and(|n| n.labels.contains(label))
                };
                let value = |id: &u64, prop: &str| {
                    self.nodes
                        .get(id)
                        .and_then(|n| n.props.get(prop))
                        .cloned()
                        .unwrap_or_default()
                };
                self.rels
                    .keys()
                    .filter(|(t, _, _)| t == rel_type)
                    .filter_map(|(_, from, to)| {
                        let (s, t) = oriented(direction, *from, *to);
                        (has(&s, source_label) && has(&t, target_label)).then(|| {
                            let mut row = Row::new();
                            row.insert("source".to_string(), value(&s, source_property));
                            row.insert("target".to_string(), value(&t, target_property));
                            row
                        })
                    })
                    .collect()
            }

            Statement::AnchorTag { anchor } => self
                .find_anchor(anchor)
                .and_then(|id| self.nodes.get(&id))
                .map(|n| {
                    let mut row = Row::new();
                    row.insert(
                        "tag".to_string(),
                        n.props.get(LAST_SEEN_TAG).cloned().unwrap_or_default(),
                    );
                    vec![row]
                })
                .unwrap_or_default(),

            Statement::CreateIndex { label, property } => {
                self.indexes.insert((label.to_string(), property.to_string()));
                Vec::new()
            }
        }
    }

    fn reachable(&self, reach: &Reach<'_>) -> Vec<Row> {
        let mut seen: BTreeSet<u64> = BTreeSet::new();
        let mut order = Vec::new();
        let mut frontier: Vec<u64> = Vec::new();
        for id in self.scoped(reach.anchor, reach.start) {
            if seen.insert(id) {
                order.push(id);
                frontier.push(id);
            }
        }
        for _ in 0..reach.max_depth.max(1) {
            let mut next = Vec::new();
            for id in &frontier {
                for (rel_type, from, to) in self.rels.keys() {
                    if rel_type != reach.rel_type {
                        continue;
                    }
                    let neighbour = match reach.direction {
                        Direction::Outward if from == id => *to,
                        Direction::Inward if to == id => *from,
                        _ => continue,
                    };
                    if seen.insert(neighbour) {
                        order.push(neighbour);
                        next.push(neighbour);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        order
            .into_iter()
            .map(|id| self.project(id, reach.project))
            .collect()
    }
}

fn deleted_row(n: usize) -> Row {
    let mut row = Row::new();
    row.insert("deleted".to_string(), PropertyValue::Int(n as i64));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::int_column;
    use strata_core::{PropertyKind, PropertySpec, ScopeLink, ValidatedRecord};

    fn schema() -> NodeSchema {
        NodeSchema::new(
            "User",
            PropertySpec::new("id", PropertyKind::Int),
            ScopeLink::new("HAS_USER", Direction::Outward),
        )
        .with_property(PropertySpec::new("email", PropertyKind::String))
    }

    fn record(id: i64, email: &str) -> ValidatedRecord {
        ValidatedRecord {
            key: vec![("id".to_string(), PropertyValue::Int(id))],
            properties: BTreeMap::from([("email".to_string(), PropertyValue::from(email))]),
            links: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_failed_txn_leaves_no_trace() {
        let graph = MemoryGraph::new();
        let schema = schema();
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let batch = [record(1, "a@b.c"), record(2, "c@d.e")];
        graph.poison_key("User", "2");

        let result = graph
            .execute_in_txn(&[
                Statement::MergeAnchor {
                    anchor: &anchor,
                    tag: RunTag(10),
                },
                Statement::UpsertNodes {
                    schema: &schema,
                    anchor: &anchor,
                    tag: RunTag(10),
                    batch: &batch,
                },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
        assert_eq!(graph.node_count("Tenant"), 0);
        assert_eq!(graph.node_count("User"), 0);
    }

    #[tokio::test]
    async fn test_stamps_never_go_backwards() {
        let graph = MemoryGraph::new();
        let anchor = ScopeAnchor::new("Tenant", "t1");
        for tag in [20, 10] {
            graph
                .execute(&Statement::MergeAnchor {
                    anchor: &anchor,
                    tag: RunTag(tag),
                })
                .await
                .unwrap();
        }
        let rows = graph
            .execute(&Statement::AnchorTag { anchor: &anchor })
            .await
            .unwrap();
        assert_eq!(int_column(&rows[0], "tag"), 20);
        let node = graph.find_node("Tenant", "id", "t1").unwrap();
        assert_eq!(node[FIRST_SEEN_TAG], PropertyValue::Int(20));
    }

    #[tokio::test]
    async fn test_transient_faults_skip_reads() {
        let graph = MemoryGraph::new();
        let anchor = ScopeAnchor::new("Tenant", "t1");
        graph.inject_transient(1, "deadlock detected");

        let read = graph.execute(&Statement::AnchorTag { anchor: &anchor }).await;
        assert_eq!(read, Ok(Vec::new()));

        let write = graph
            .execute(&Statement::MergeAnchor {
                anchor: &anchor,
                tag: RunTag(1),
            })
            .await;
        assert!(matches!(write, Err(StoreError::Transient(_))));
        assert!(graph
            .execute(&Statement::MergeAnchor {
                anchor: &anchor,
                tag: RunTag(1),
            })
            .await
            .is_ok());
    }
}
