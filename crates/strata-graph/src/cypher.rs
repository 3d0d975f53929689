//! Cypher rendering for [`Statement`]s.
//!
//! All writes use MERGE (upsert) semantics and every stamp is monotonic, so
//! re-running a statement with the same run tag is a no-op. Labels,
//! relationship types and property names are interpolated into the query
//! text (Cypher cannot parameterize them), so every identifier is checked
//! before rendering; values always travel as parameters.

use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};

use strata_core::schema::{
    ensure_identifier, Direction, NodeSchema, ValidatedRecord, FIRST_SEEN_TAG, LAST_SEEN_TAG,
    SCOPE_ID,
};
use strata_core::{PropertyValue, RunTag, ScopeAnchor, SchemaError};

use crate::session::{Reach, Row, Statement};

/// How a result column is decoded from a Bolt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Int,
    Bool,
    Str,
    /// Whatever the store returns: int, float, bool, string or list.
    Any,
}

/// A statement rendered to Cypher text, parameters and expected columns.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub params: Vec<(String, BoltType)>,
    pub columns: Vec<(String, Column)>,
}

impl Rendered {
    fn new(text: String) -> Self {
        Self {
            text,
            params: Vec::new(),
            columns: Vec::new(),
        }
    }

    fn param(mut self, key: &str, value: impl Into<BoltType>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    fn column(mut self, name: &str, kind: Column) -> Self {
        self.columns.push((name.to_string(), kind));
        self
    }

    /// Build the neo4rs query.
    pub fn to_query(&self) -> Query {
        self.params
            .iter()
            .fold(query(&self.text), |q, (k, v)| q.param(k, v.clone()))
    }

    /// Decode a Bolt row into the declared columns. Missing or mistyped
    /// columns come back as `Null`.
    pub fn decode(&self, row: &neo4rs::Row) -> Row {
        self.columns
            .iter()
            .map(|(name, kind)| {
                let name_str = name.as_str();
                let value = match kind {
                    Column::Int => row
                        .get::<i64>(name_str)
                        .map(PropertyValue::Int)
                        .unwrap_or_default(),
                    Column::Bool => row
                        .get::<bool>(name_str)
                        .map(PropertyValue::Bool)
                        .unwrap_or_default(),
                    Column::Str => row
                        .get::<String>(name_str)
                        .map(PropertyValue::String)
                        .unwrap_or_default(),
                    Column::Any => decode_any(row, name_str),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

fn decode_any(row: &neo4rs::Row, name: &str) -> PropertyValue {
    if let Ok(v) = row.get::<i64>(name) {
        return PropertyValue::Int(v);
    }
    if let Ok(v) = row.get::<f64>(name) {
        return PropertyValue::Float(v);
    }
    if let Ok(v) = row.get::<bool>(name) {
        return PropertyValue::Bool(v);
    }
    if let Ok(v) = row.get::<String>(name) {
        return PropertyValue::String(v);
    }
    if let Ok(v) = row.get::<Vec<String>>(name) {
        return PropertyValue::List(v.into_iter().map(PropertyValue::String).collect());
    }
    if let Ok(v) = row.get::<Vec<i64>>(name) {
        return PropertyValue::List(v.into_iter().map(PropertyValue::Int).collect());
    }
    if let Ok(v) = row.get::<Vec<f64>>(name) {
        return PropertyValue::List(v.into_iter().map(PropertyValue::Float).collect());
    }
    PropertyValue::Null
}

/// Render a statement for Neo4j.
pub fn render(statement: &Statement<'_>) -> Result<Rendered, SchemaError> {
    let rendered = match *statement {
        Statement::MergeAnchor { anchor, tag } => merge_anchor(anchor, tag)?,
        Statement::UpsertNodes {
            schema,
            anchor,
            tag,
            batch,
        } => upsert_nodes(schema, anchor, tag, batch)?,
        Statement::UpsertRelationships {
            schema,
            rel_index,
            anchor,
            tag,
            batch,
        } => upsert_relationships(schema, rel_index, anchor, tag, batch)?,
        Statement::DeleteStaleRelationships {
            schema,
            rel_index,
            anchor,
            tag,
            limit,
        } => delete_stale_relationships(schema, rel_index, anchor, tag, limit)?,
        Statement::DeleteStaleNodes {
            schema,
            anchor,
            tag,
            limit,
        } => delete_stale_nodes(schema, anchor, tag, limit)?,
        Statement::Reachable(reach) => reachable(&reach)?,
        Statement::ListNodes {
            label,
            scope,
            properties,
        } => list_nodes(label, scope, properties)?,
        Statement::ListRelationships {
            source_label,
            source_property,
            rel_type,
            direction,
            target_label,
            target_property,
        } => {
            ensure_identifier("label", source_label)?;
            ensure_identifier("label", target_label)?;
            ensure_identifier("property", source_property)?;
            ensure_identifier("property", target_property)?;
            let pattern = format!(
                "(s:{source_label}){}(t:{target_label})",
                hop(None, rel_type, direction, None)?
            );
            Rendered::new(format!(
                "MATCH {pattern}
                 RETURN s.{source_property} AS source, t.{target_property} AS target"
            ))
            .column("source", Column::Any)
            .column("target", Column::Any)
        }
        Statement::AnchorTag { anchor } => Rendered::new(format!(
            "{}
             RETURN anchor.{LAST_SEEN_TAG} AS tag",
            match_anchor(anchor)?
        ))
        .param("anchor_id", anchor.id.as_str())
        .column("tag", Column::Int),
        Statement::CreateIndex { label, property } => {
            ensure_identifier("label", label)?;
            ensure_identifier("property", property)?;
            Rendered::new(format!(
                "CREATE INDEX IF NOT EXISTS FOR (n:{label}) ON (n.{property})"
            ))
        }
    };
    Ok(rendered)
}

// ── Pattern helpers ──────────────────────────────────────────────

/// The relationship part of a pattern, e.g. `-[r:HAS_USER]->` or
/// `<-[:PARENT*1..3]-`. Shared by loading, cleanup scoping and reads.
pub fn hop(
    var: Option<&str>,
    rel_type: &str,
    direction: Direction,
    depth: Option<(u32, u32)>,
) -> Result<String, SchemaError> {
    ensure_identifier("relationship type", rel_type)?;
    let var = var.unwrap_or("");
    let range = depth
        .map(|(min, max)| format!("*{min}..{max}"))
        .unwrap_or_default();
    Ok(match direction {
        Direction::Outward => format!("-[{var}:{rel_type}{range}]->"),
        Direction::Inward => format!("<-[{var}:{rel_type}{range}]-"),
    })
}

fn match_anchor(anchor: &ScopeAnchor) -> Result<String, SchemaError> {
    anchor.validate()?;
    Ok(format!(
        "MATCH (anchor:{} {{{}: $anchor_id}})",
        anchor.label, anchor.key_property
    ))
}

/// `MATCH` from the anchor to every entity of the schema in its scope.
fn match_scoped(anchor: &ScopeAnchor, schema: &NodeSchema, var: &str) -> Result<String, SchemaError> {
    schema.validate()?;
    Ok(format!(
        "{}{}({var}:{})
         WHERE {var}.{SCOPE_ID} = $scope_id",
        match_anchor(anchor)?,
        hop(
            None,
            &schema.scope_link.rel_type,
            schema.scope_link.direction,
            Some((1, 1))
        )?,
        schema.label
    ))
}

/// Property map identifying an entity: `{scope_id: $scope_id, id: item.key.id}`.
fn identity(schema: &NodeSchema, item: &str) -> String {
    let mut parts = vec![format!("{SCOPE_ID}: $scope_id")];
    parts.extend(schema.key_names().map(|k| format!("{k}: {item}.key.{k}")));
    parts.join(", ")
}

/// Monotonic `last_seen_tag` stamp.
fn stamp(var: &str) -> String {
    format!(
        "{var}.{LAST_SEEN_TAG} = CASE WHEN {var}.{LAST_SEEN_TAG} IS NULL OR {var}.{LAST_SEEN_TAG} < $tag THEN $tag ELSE {var}.{LAST_SEEN_TAG} END"
    )
}

fn scoped_params(rendered: Rendered, anchor: &ScopeAnchor, tag: RunTag) -> Rendered {
    rendered
        .param("anchor_id", anchor.id.as_str())
        .param("scope_id", anchor.scope_id())
        .param("tag", tag.0)
}

// ── Writes ───────────────────────────────────────────────────────

fn merge_anchor(anchor: &ScopeAnchor, tag: RunTag) -> Result<Rendered, SchemaError> {
    anchor.validate()?;
    let text = format!(
        "MERGE (anchor:{} {{{}: $anchor_id}})
         ON CREATE SET anchor.{FIRST_SEEN_TAG} = $tag
         SET {}",
        anchor.label,
        anchor.key_property,
        stamp("anchor")
    );
    Ok(Rendered::new(text)
        .param("anchor_id", anchor.id.as_str())
        .param("tag", tag.0))
}

fn upsert_nodes(
    schema: &NodeSchema,
    anchor: &ScopeAnchor,
    tag: RunTag,
    batch: &[ValidatedRecord],
) -> Result<Rendered, SchemaError> {
    schema.validate()?;
    let label = &schema.label;
    let id = identity(schema, "item");

    let mut sets = vec![stamp("n")];
    sets.extend(
        schema
            .properties
            .iter()
            .map(|p| format!("n.{0} = item.props.{0}", p.name)),
    );
    let extra_labels = if schema.extra_labels.is_empty() {
        String::new()
    } else {
        format!("\n         SET n:{}", schema.extra_labels.join(":"))
    };
    let scope_hop = hop(
        Some("r"),
        &schema.scope_link.rel_type,
        schema.scope_link.direction,
        None,
    )?;
    let old_hop = hop(
        Some("old"),
        &schema.scope_link.rel_type,
        schema.scope_link.direction,
        None,
    )?;

    let text = format!(
        "{anchor_match}
         UNWIND $batch AS item
         OPTIONAL MATCH (existing:{label} {{{id}}})
         WITH anchor, item, existing IS NULL AS created
         MERGE (n:{label} {{{id}}})
         ON CREATE SET n.{FIRST_SEEN_TAG} = $tag
         SET {sets}{extra_labels}
         WITH anchor, item, n, created
         OPTIONAL MATCH (anchor){old_hop}(n)
         WITH anchor, item, n, created, old IS NULL AS rel_created
         MERGE (anchor){scope_hop}(n)
         ON CREATE SET r.{FIRST_SEEN_TAG} = $tag
         SET {rel_stamp}
         RETURN item.key_text AS key, created, rel_created",
        anchor_match = match_anchor(anchor)?,
        sets = sets.join(", "),
        rel_stamp = stamp("r"),
    );

    let items = batch.iter().map(node_item).collect();
    Ok(scoped_params(Rendered::new(text), anchor, tag)
        .param("batch", BoltType::List(BoltList { value: items }))
        .column("key", Column::Str)
        .column("created", Column::Bool)
        .column("rel_created", Column::Bool))
}

fn upsert_relationships(
    schema: &NodeSchema,
    rel_index: usize,
    anchor: &ScopeAnchor,
    tag: RunTag,
    batch: &[ValidatedRecord],
) -> Result<Rendered, SchemaError> {
    schema.validate()?;
    let rel = rel_spec(schema, rel_index)?;
    let id = identity(schema, "item");
    let rel_hop = hop(Some("r"), &rel.rel_type, rel.direction, None)?;
    let old_hop = hop(Some("old"), &rel.rel_type, rel.direction, None)?;

    let text = format!(
        "UNWIND $batch AS item
         MATCH (n:{label} {{{id}}})
         UNWIND item.targets AS target_key
         MATCH (t:{target} {{{SCOPE_ID}: $scope_id, {target_key}: target_key}})
         OPTIONAL MATCH (n){old_hop}(t)
         WITH n, t, old IS NULL AS is_new
         MERGE (n){rel_hop}(t)
         ON CREATE SET r.{FIRST_SEEN_TAG} = $tag
         SET {rel_stamp}
         RETURN count(CASE WHEN is_new THEN 1 END) AS created,
                count(CASE WHEN is_new THEN null ELSE 1 END) AS updated",
        label = schema.label,
        target = rel.target_label,
        target_key = rel.target_key,
        rel_stamp = stamp("r"),
    );

    let items = batch
        .iter()
        .filter_map(|r| {
            let targets = r.links.get(rel_index).filter(|t| !t.is_empty())?;
            let mut map = BoltMap::new();
            map.put(BoltString::from("key"), key_map(r));
            map.put(
                BoltString::from("targets"),
                BoltType::List(BoltList {
                    value: targets.iter().map(bolt).collect(),
                }),
            );
            Some(BoltType::Map(map))
        })
        .collect();

    Ok(scoped_params(Rendered::new(text), anchor, tag)
        .param("batch", BoltType::List(BoltList { value: items }))
        .column("created", Column::Int)
        .column("updated", Column::Int))
}

// ── Cleanup ──────────────────────────────────────────────────────

fn delete_stale_relationships(
    schema: &NodeSchema,
    rel_index: usize,
    anchor: &ScopeAnchor,
    tag: RunTag,
    limit: usize,
) -> Result<Rendered, SchemaError> {
    let rel = rel_spec(schema, rel_index)?;
    ensure_identifier("label", &rel.target_label)?;
    let text = format!(
        "{scoped}
         MATCH (n){rel_hop}(:{target})
         WHERE r.{LAST_SEEN_TAG} < $tag
         WITH DISTINCT r LIMIT $limit
         DELETE r
         RETURN count(r) AS deleted",
        scoped = match_scoped(anchor, schema, "n")?,
        rel_hop = hop(Some("r"), &rel.rel_type, rel.direction, None)?,
        target = rel.target_label,
    );
    Ok(scoped_params(Rendered::new(text), anchor, tag)
        .param("limit", limit as i64)
        .column("deleted", Column::Int))
}

fn delete_stale_nodes(
    schema: &NodeSchema,
    anchor: &ScopeAnchor,
    tag: RunTag,
    limit: usize,
) -> Result<Rendered, SchemaError> {
    let text = format!(
        "{scoped}
           AND n.{LAST_SEEN_TAG} < $tag
         WITH DISTINCT n LIMIT $limit
         DETACH DELETE n
         RETURN count(n) AS deleted",
        scoped = match_scoped(anchor, schema, "n")?,
    );
    Ok(scoped_params(Rendered::new(text), anchor, tag)
        .param("limit", limit as i64)
        .column("deleted", Column::Int))
}

// ── Reads ────────────────────────────────────────────────────────

fn reachable(reach: &Reach<'_>) -> Result<Rendered, SchemaError> {
    let projection = projection("n", reach.project)?;
    let text = format!(
        "{scoped}
         OPTIONAL MATCH path = (start){walk}(reached)
         WITH start, CASE WHEN path IS NULL THEN [start] ELSE nodes(path) END AS chain
         UNWIND chain AS n
         WITH DISTINCT n
         RETURN {projection}",
        scoped = match_scoped(reach.anchor, reach.start, "start")?,
        walk = hop(
            None,
            reach.rel_type,
            reach.direction,
            Some((1, reach.max_depth.max(1)))
        )?,
    );
    let mut rendered = Rendered::new(text)
        .param("anchor_id", reach.anchor.id.as_str())
        .param("scope_id", reach.anchor.scope_id());
    for p in reach.project {
        rendered = rendered.column(p, Column::Any);
    }
    Ok(rendered)
}

fn list_nodes(
    label: &str,
    scope: Option<&ScopeAnchor>,
    properties: &[String],
) -> Result<Rendered, SchemaError> {
    ensure_identifier("label", label)?;
    let filter = if scope.is_some() {
        format!("\n         WHERE n.{SCOPE_ID} = $scope_id")
    } else {
        String::new()
    };
    let text = format!(
        "MATCH (n:{label}){filter}
         RETURN {}",
        projection("n", properties)?
    );
    let mut rendered = Rendered::new(text);
    if let Some(anchor) = scope {
        rendered = rendered.param("scope_id", anchor.scope_id());
    }
    for p in properties {
        rendered = rendered.column(p, Column::Any);
    }
    Ok(rendered)
}

fn projection(var: &str, properties: &[String]) -> Result<String, SchemaError> {
    if properties.is_empty() {
        return Ok(format!("id({var}) AS node_id"));
    }
    let mut parts = Vec::with_capacity(properties.len());
    for p in properties {
        ensure_identifier("property", p)?;
        parts.push(format!("{var}.{p} AS {p}"));
    }
    Ok(parts.join(", "))
}

// ── Parameter conversion ─────────────────────────────────────────

fn rel_spec(schema: &NodeSchema, index: usize) -> Result<&strata_core::RelSpec, SchemaError> {
    schema
        .relationships
        .get(index)
        .ok_or_else(|| SchemaError::UnknownLabel(format!("{}#rel{index}", schema.label)))
}

/// Convert a property value to its Bolt representation.
pub fn bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Null => BoltType::Null(BoltNull),
        PropertyValue::Bool(b) => BoltType::from(*b),
        PropertyValue::Int(i) => BoltType::from(*i),
        PropertyValue::Float(f) => BoltType::from(*f),
        PropertyValue::String(s) => BoltType::from(s.as_str()),
        PropertyValue::List(items) => BoltType::List(BoltList {
            value: items.iter().map(bolt).collect(),
        }),
    }
}

fn key_map(record: &ValidatedRecord) -> BoltType {
    let mut map = BoltMap::new();
    for (name, value) in &record.key {
        map.put(BoltString::from(name.as_str()), bolt(value));
    }
    BoltType::Map(map)
}

fn node_item(record: &ValidatedRecord) -> BoltType {
    let mut props_map = BoltMap::new();
    for (k, v) in &record.properties {
        props_map.put(BoltString::from(k.as_str()), bolt(v));
    }

    let mut item = BoltMap::new();
    item.put(BoltString::from("key"), key_map(record));
    item.put(BoltString::from("key_text"), BoltType::from(record.key_text()));
    item.put(BoltString::from("props"), BoltType::Map(props_map));
    BoltType::Map(item)
}
