//! Batch loader: validate, coalesce, chunk and upsert records for one schema
//! under one scope anchor.

use std::collections::HashMap;

use strata_core::schema::{NodeSchema, ValidatedRecord};
use strata_core::{
    BatchFailure, LoadResult, LoadSettings, PropertyValue, Record, RecordFailure, RunTag,
    ScopeAnchor, StoreError, StrataError,
};

use crate::retry::with_retry;
use crate::session::{bool_column, int_column, GraphSession, Row, Statement};

/// Writes records into the graph through a [`GraphSession`].
pub struct BatchLoader<'a, S: GraphSession + ?Sized> {
    session: &'a S,
    settings: LoadSettings,
}

impl<'a, S: GraphSession + ?Sized> BatchLoader<'a, S> {
    pub fn new(session: &'a S, settings: LoadSettings) -> Self {
        Self { session, settings }
    }

    /// Upsert `records` as `schema` entities under `scope`, stamped with `tag`.
    ///
    /// Invalid records are skipped and reported. Chunks that fail after
    /// retries are reported and do not stop later chunks. Only a store that
    /// is unreachable aborts the load.
    pub async fn load(
        &self,
        schema: &NodeSchema,
        records: &[Record],
        scope: &ScopeAnchor,
        tag: RunTag,
    ) -> Result<LoadResult, StrataError> {
        schema.validate()?;
        scope.validate()?;

        let mut result = LoadResult::default();
        let valid = self.prepare(schema, records, &mut result);
        if valid.is_empty() {
            tracing::debug!(label = %schema.label, scope = %scope, "Nothing to load");
            return Ok(result);
        }

        let chunk_size = self.settings.chunk_size();
        let mut written: Vec<&ValidatedRecord> = Vec::with_capacity(valid.len());
        for (batch_index, chunk) in valid.chunks(chunk_size).enumerate() {
            let statements = [
                Statement::MergeAnchor { anchor: scope, tag },
                Statement::UpsertNodes {
                    schema,
                    anchor: scope,
                    tag,
                    batch: chunk,
                },
            ];
            let operation = format!("load {} batch {batch_index}", schema.label);
            match self.write(&operation, &statements).await? {
                Ok(rows) => {
                    tally_nodes(&rows, &mut result);
                    written.extend(chunk);
                }
                Err(failure) => {
                    result
                        .batch_failures
                        .push(failure.into_batch(schema, scope, batch_index, chunk.iter()));
                }
            }
        }

        // Targets may sit in any node chunk, so relationships wait for all of them.
        let linked: Vec<ValidatedRecord> = written
            .into_iter()
            .filter(|r| r.links.iter().any(|t| !t.is_empty()))
            .cloned()
            .collect();
        let node_batches = valid.len().div_ceil(chunk_size);
        for (i, chunk) in linked.chunks(chunk_size).enumerate() {
            let batch_index = node_batches + i;
            let statements: Vec<Statement<'_>> = schema
                .relationships
                .iter()
                .enumerate()
                .filter(|(rel_index, _)| {
                    chunk
                        .iter()
                        .any(|r| r.links.get(*rel_index).is_some_and(|t| !t.is_empty()))
                })
                .map(|(rel_index, _)| Statement::UpsertRelationships {
                    schema,
                    rel_index,
                    anchor: scope,
                    tag,
                    batch: chunk,
                })
                .collect();
            let operation = format!("link {} batch {batch_index}", schema.label);
            match self.write(&operation, &statements).await? {
                Ok(rows) => tally_relationships(&rows, &mut result),
                Err(failure) => {
                    result
                        .batch_failures
                        .push(failure.into_batch(schema, scope, batch_index, chunk.iter()));
                }
            }
        }

        tracing::info!(
            label = %schema.label,
            scope = %scope,
            tag = %tag,
            nodes_created = result.nodes_created,
            nodes_updated = result.nodes_updated,
            relationships_created = result.relationships_created,
            relationships_updated = result.relationships_updated,
            duplicates = result.duplicates_coalesced,
            record_failures = result.record_failures.len(),
            batch_failures = result.batch_failures.len(),
            "Load complete"
        );
        Ok(result)
    }

    /// Run one chunk transaction with retries. The outer error is an
    /// unreachable store; the inner one a chunk that gave up.
    async fn write(
        &self,
        operation: &str,
        statements: &[Statement<'_>],
    ) -> Result<Result<Vec<Vec<Row>>, ChunkFailure>, StrataError> {
        match with_retry(&self.settings.retry, operation, || {
            self.session.execute_in_txn(statements)
        })
        .await
        {
            Ok(rows) => Ok(Ok(rows)),
            Err(exhausted) if matches!(exhausted.error, StoreError::Unavailable(_)) => {
                Err(exhausted.error.into())
            }
            Err(exhausted) => Ok(Err(ChunkFailure {
                attempts: exhausted.attempts,
                reason: exhausted.error.to_string(),
            })),
        }
    }

    /// Validate every record and coalesce duplicate keys. The last occurrence
    /// of a key wins but keeps the position of the first.
    fn prepare(
        &self,
        schema: &NodeSchema,
        records: &[Record],
        result: &mut LoadResult,
    ) -> Vec<ValidatedRecord> {
        let mut valid: Vec<ValidatedRecord> = Vec::with_capacity(records.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for record in records {
            match schema.validate_record(record) {
                Ok(mut v) => {
                    for targets in &mut v.links {
                        dedup(targets);
                    }
                    match positions.get(&v.key_text()) {
                        Some(&pos) => {
                            valid[pos] = v;
                            result.duplicates_coalesced += 1;
                        }
                        None => {
                            positions.insert(v.key_text(), valid.len());
                            valid.push(v);
                        }
                    }
                }
                Err(e) => {
                    let key = schema.key_hint(record);
                    tracing::warn!(
                        label = %schema.label,
                        key = key.as_deref().unwrap_or("<missing>"),
                        error = %e,
                        "Skipping invalid record"
                    );
                    result.record_failures.push(RecordFailure {
                        label: schema.label.clone(),
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        valid
    }
}

fn dedup(values: &mut Vec<PropertyValue>) {
    let mut kept: Vec<PropertyValue> = Vec::with_capacity(values.len());
    for v in values.drain(..) {
        if !kept.contains(&v) {
            kept.push(v);
        }
    }
    *values = kept;
}

struct ChunkFailure {
    attempts: u32,
    reason: String,
}

impl ChunkFailure {
    fn into_batch<'r>(
        self,
        schema: &NodeSchema,
        scope: &ScopeAnchor,
        batch_index: usize,
        chunk: impl Iterator<Item = &'r ValidatedRecord>,
    ) -> BatchFailure {
        tracing::error!(
            label = %schema.label,
            scope = %scope,
            batch_index,
            attempts = self.attempts,
            error = %self.reason,
            "Batch failed"
        );
        BatchFailure {
            label: schema.label.clone(),
            batch_index,
            keys: chunk.map(ValidatedRecord::key_text).collect(),
            attempts: self.attempts,
            reason: self.reason,
        }
    }
}

fn tally_nodes(results: &[Vec<Row>], out: &mut LoadResult) {
    // [MergeAnchor, UpsertNodes]
    for row in results.get(1).into_iter().flatten() {
        if bool_column(row, "created") {
            out.nodes_created += 1;
        } else {
            out.nodes_updated += 1;
        }
        if bool_column(row, "rel_created") {
            out.relationships_created += 1;
        } else {
            out.relationships_updated += 1;
        }
    }
}

fn tally_relationships(results: &[Vec<Row>], out: &mut LoadResult) {
    for row in results.iter().flatten() {
        out.relationships_created += int_column(row, "created").max(0) as u64;
        out.relationships_updated += int_column(row, "updated").max(0) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;
    use serde_json::json;
    use strata_core::{Direction, PropertyKind, PropertySpec, RetryPolicy, ScopeLink};

    fn schema() -> NodeSchema {
        NodeSchema::new(
            "User",
            PropertySpec::new("id", PropertyKind::Int),
            ScopeLink::new("HAS_USER", Direction::Outward),
        )
        .with_property(PropertySpec::new("email", PropertyKind::String).required())
    }

    fn managed_schema() -> NodeSchema {
        schema().with_relationship(
            strata_core::RelSpec::new("REPORTS_TO", Direction::Outward, "User", "manager")
                .with_target_key("id", PropertyKind::Int),
        )
    }

    fn settings(batch_size: usize) -> LoadSettings {
        LoadSettings {
            batch_size,
            retry: RetryPolicy::immediate(3),
        }
    }

    fn records(values: serde_json::Value) -> Vec<Record> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_duplicates_coalesce_last_wins() {
        let graph = MemoryGraph::new();
        let loader = BatchLoader::new(&graph, settings(10));
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let input = records(json!([
            {"id": 1, "email": "old@x.y"},
            {"id": 2, "email": "b@x.y"},
            {"id": 1, "email": "new@x.y"}
        ]));

        let result = loader.load(&schema(), &input, &anchor, RunTag(5)).await.unwrap();
        assert_eq!(result.nodes_created, 2);
        assert_eq!(result.duplicates_coalesced, 1);
        assert_eq!(graph.node_count("User"), 2);
        let user = graph.find_node("User", "id", 1i64).unwrap();
        assert_eq!(user["email"], PropertyValue::from("new@x.y"));
    }

    #[tokio::test]
    async fn test_invalid_records_are_reported_not_fatal() {
        let graph = MemoryGraph::new();
        let loader = BatchLoader::new(&graph, settings(10));
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let input = records(json!([
            {"id": 1, "email": "a@x.y"},
            {"id": 2},
            {"email": "nokey@x.y"}
        ]));

        let result = loader.load(&schema(), &input, &anchor, RunTag(5)).await.unwrap();
        assert_eq!(result.nodes_created, 1);
        assert_eq!(result.record_failures.len(), 2);
        assert_eq!(result.record_failures[0].key.as_deref(), Some("2"));
        assert_eq!(result.record_failures[1].key, None);
    }

    #[tokio::test]
    async fn test_empty_input_writes_nothing() {
        let graph = MemoryGraph::new();
        let loader = BatchLoader::new(&graph, settings(10));
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let result = loader.load(&schema(), &[], &anchor, RunTag(5)).await.unwrap();
        assert_eq!(result, LoadResult::default());
        assert!(graph.statement_log().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts() {
        let graph = MemoryGraph::new();
        graph.set_unavailable(true);
        let loader = BatchLoader::new(&graph, settings(10));
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let input = records(json!([{"id": 1, "email": "a@x.y"}]));
        let err = loader.load(&schema(), &input, &anchor, RunTag(5)).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_links_written_after_every_node_chunk() {
        let graph = MemoryGraph::new();
        let loader = BatchLoader::new(&graph, settings(1));
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let input = records(json!([
            {"id": 1, "email": "a@x.y", "manager": 3},
            {"id": 2, "email": "b@x.y", "manager": 3},
            {"id": 3, "email": "c@x.y"}
        ]));

        let result = loader
            .load(&managed_schema(), &input, &anchor, RunTag(5))
            .await
            .unwrap();

        assert!(result.batch_failures.is_empty());
        // two reporting lines plus three scope links
        assert_eq!(result.relationships_created, 5);
        assert_eq!(graph.relationship_count("REPORTS_TO"), 2);
        let log = graph.statement_log();
        let last_node = log.iter().rposition(|s| s.starts_with("upsert_nodes")).unwrap();
        let first_link = log
            .iter()
            .position(|s| s.starts_with("upsert_relationships"))
            .unwrap();
        assert!(last_node < first_link);
    }

    #[tokio::test]
    async fn test_failed_node_chunk_is_not_linked() {
        let graph = MemoryGraph::new();
        graph.poison_key("User", "1");
        let loader = BatchLoader::new(&graph, settings(1));
        let anchor = ScopeAnchor::new("Tenant", "t1");
        let input = records(json!([
            {"id": 1, "email": "a@x.y", "manager": 2},
            {"id": 2, "email": "b@x.y"}
        ]));

        let result = loader
            .load(&managed_schema(), &input, &anchor, RunTag(5))
            .await
            .unwrap();

        assert_eq!(result.batch_failures.len(), 1);
        assert_eq!(result.batch_failures[0].keys, vec!["1".to_string()]);
        assert!(graph
            .statement_log()
            .iter()
            .all(|s| !s.starts_with("upsert_relationships")));
    }
}
