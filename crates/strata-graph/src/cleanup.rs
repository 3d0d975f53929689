//! Cleanup engine: retire whatever a scope did not see in the current run.
//!
//! Every delete starts from the scope anchor, so entities of other scopes
//! and nodes the engine does not manage are never candidates. Per schema,
//! declared relationships are drained first, then the nodes themselves
//! (detached, which takes their scope relationships with them). Each stage
//! runs in bounded batches until a batch comes back short.

use strata_core::schema::NodeSchema;
use strata_core::{
    CleanupFailure, CleanupResult, CleanupSettings, CleanupStage, RunTag, ScopeAnchor, StoreError,
    StrataError,
};

use crate::retry::with_retry;
use crate::session::{int_column, GraphSession, Statement};

pub struct CleanupEngine<'a, S: GraphSession + ?Sized> {
    session: &'a S,
    settings: CleanupSettings,
}

impl<'a, S: GraphSession + ?Sized> CleanupEngine<'a, S> {
    pub fn new(session: &'a S, settings: CleanupSettings) -> Self {
        Self { session, settings }
    }

    /// Delete stale relationships and nodes of each schema under `scope`.
    ///
    /// `schemas` must already be in cleanup order (see
    /// [`SchemaRegistry::cleanup_order_for`](strata_core::SchemaRegistry::cleanup_order_for)).
    /// A schema whose cleanup fails is recorded and skipped; the remaining
    /// schemas are still cleaned.
    pub async fn cleanup(
        &self,
        schemas: &[&NodeSchema],
        scope: &ScopeAnchor,
        tag: RunTag,
    ) -> Result<CleanupResult, StrataError> {
        scope.validate()?;
        let mut result = CleanupResult::default();

        for schema in schemas {
            schema.validate()?;
            if let Err(failure) = self.clean_schema(schema, scope, tag, &mut result).await? {
                tracing::error!(
                    label = %failure.label,
                    scope = %scope,
                    stage = %failure.stage,
                    attempts = failure.attempts,
                    reason = %failure.reason,
                    "Cleanup failed"
                );
                result.failures.push(failure);
            }
        }

        tracing::info!(
            scope = %scope,
            tag = %tag,
            nodes = result.total_nodes(),
            relationships = result.total_relationships(),
            failures = result.failures.len(),
            "Cleanup complete"
        );
        Ok(result)
    }

    /// The outer error aborts the whole cleanup; the inner one only this schema.
    async fn clean_schema(
        &self,
        schema: &NodeSchema,
        scope: &ScopeAnchor,
        tag: RunTag,
        result: &mut CleanupResult,
    ) -> Result<Result<(), CleanupFailure>, StrataError> {
        let limit = self.settings.chunk_size();

        for (rel_index, rel) in schema.relationships.iter().enumerate() {
            let statement = Statement::DeleteStaleRelationships {
                schema,
                rel_index,
                anchor: scope,
                tag,
                limit,
            };
            let stage = CleanupStage::Relationships(rel.rel_type.clone());
            let drained = self.drain(&statement, schema, stage).await?;
            let counter = result
                .deleted_relationships
                .entry(rel.rel_type.clone())
                .or_default();
            match drained {
                Ok(n) => *counter += n,
                Err((n, failure)) => {
                    *counter += n;
                    return Ok(Err(failure));
                }
            }
        }

        let statement = Statement::DeleteStaleNodes {
            schema,
            anchor: scope,
            tag,
            limit,
        };
        let drained = self.drain(&statement, schema, CleanupStage::Nodes).await?;
        let counter = result
            .deleted_nodes
            .entry(schema.label.clone())
            .or_default();
        match drained {
            Ok(n) => {
                *counter += n;
                Ok(Ok(()))
            }
            Err((n, failure)) => {
                *counter += n;
                Ok(Err(failure))
            }
        }
    }

    /// Repeat a delete until it removes fewer than `limit` items. Returns the
    /// total removed; on failure, what was removed before it.
    async fn drain(
        &self,
        statement: &Statement<'_>,
        schema: &NodeSchema,
        stage: CleanupStage,
    ) -> Result<Result<u64, (u64, CleanupFailure)>, StrataError> {
        let limit = self.settings.chunk_size() as i64;
        let operation = format!("cleanup {} {stage}", schema.label);
        let mut total = 0u64;

        loop {
            let outcome = with_retry(&self.settings.retry, &operation, || {
                self.session.execute(statement)
            })
            .await;

            let rows = match outcome {
                Ok(rows) => rows,
                Err(exhausted) => {
                    if let StoreError::Unavailable(_) = exhausted.error {
                        return Err(exhausted.error.into());
                    }
                    return Ok(Err((
                        total,
                        CleanupFailure {
                            label: schema.label.clone(),
                            stage,
                            attempts: exhausted.attempts,
                            reason: exhausted.error.to_string(),
                        },
                    )));
                }
            };

            let deleted = rows.first().map(|r| int_column(r, "deleted")).unwrap_or(0);
            total += deleted.max(0) as u64;
            tracing::debug!(label = %schema.label, stage = %stage, deleted, "Cleanup batch");
            if deleted < limit {
                return Ok(Ok(total));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;
    use strata_core::{Direction, PropertyKind, PropertySpec, RetryPolicy, ScopeLink};

    fn schema() -> NodeSchema {
        NodeSchema::new(
            "User",
            PropertySpec::new("id", PropertyKind::Int),
            ScopeLink::new("HAS_USER", Direction::Outward),
        )
    }

    #[tokio::test]
    async fn test_cleanup_of_unknown_scope_is_noop() {
        let graph = MemoryGraph::new();
        let engine = CleanupEngine::new(
            &graph,
            CleanupSettings {
                batch_size: 10,
                retry: RetryPolicy::immediate(1),
            },
        );
        let schema = schema();
        let result = engine
            .cleanup(&[&schema], &ScopeAnchor::new("Tenant", "ghost"), RunTag(9))
            .await
            .unwrap();
        assert_eq!(result.total_nodes(), 0);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_failed_schema_is_recorded() {
        let graph = MemoryGraph::new();
        graph.fail_cleanup_for("User");
        let engine = CleanupEngine::new(
            &graph,
            CleanupSettings {
                batch_size: 10,
                retry: RetryPolicy::immediate(2),
            },
        );
        let schema = schema();
        let result = engine
            .cleanup(&[&schema], &ScopeAnchor::new("Tenant", "t1"), RunTag(9))
            .await
            .unwrap();
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, CleanupStage::Nodes);
        assert_eq!(result.failures[0].attempts, 2);
    }
}
