//! Neo4j connection management and the Bolt-backed graph session.

use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query, Txn};
use serde::{Deserialize, Serialize};

use strata_core::StoreError;

use crate::cypher::{self, Rendered};
use crate::session::{GraphSession, Row, Statement};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Invalid statement: {0}")]
    Statement(String),

    #[error("Statement timed out after {0}s")]
    Timeout(u64),
}

impl From<GraphError> for StoreError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Connection(msg) => StoreError::Unavailable(msg),
            GraphError::Timeout(secs) => StoreError::Timeout { secs },
            GraphError::Statement(msg) => StoreError::Query(msg),
            GraphError::Query(e) => classify(&e.to_string()),
        }
    }
}

/// Sort a driver error message into the store taxonomy. An unreachable
/// server or a pool that cannot connect is `Unavailable`.
fn classify(message: &str) -> StoreError {
    let lower = message.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    if any(&["constraintvalidationfailed", "neo.clienterror.schema"]) {
        StoreError::ConstraintViolation(message.to_string())
    } else if any(&[
        "connection refused",
        "connection error",
        "connectionerror",
        "serviceunavailable",
        "databaseunavailable",
        "no route to host",
        "failed to connect",
    ]) {
        StoreError::Unavailable(message.to_string())
    } else if any(&[
        "neo.transienterror",
        "deadlock",
        "broken pipe",
        "reset by peer",
        "io error",
        "timed out",
    ]) {
        StoreError::Transient(message.to_string())
    } else {
        StoreError::Query(message.to_string())
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Upper bound on one transaction, in seconds.
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "strata-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_statement_timeout_secs() -> u64 {
    120
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
    timeout: Duration,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self {
            graph,
            timeout: Duration::from_secs(config.statement_timeout_secs.max(1)),
        })
    }

    /// Execute a write-only query outside the statement model.
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Begin a transaction.
    pub async fn start_txn(&self) -> Result<Txn, GraphError> {
        Ok(self.graph.start_txn().await?)
    }

    async fn run_txn(&self, rendered: &[Rendered]) -> Result<Vec<Vec<Row>>, GraphError> {
        let mut txn = self.start_txn().await?;
        let mut results = Vec::with_capacity(rendered.len());
        for statement in rendered {
            match collect(&mut txn, statement).await {
                Ok(rows) => results.push(rows),
                Err(e) => {
                    if let Err(rollback) = txn.rollback().await {
                        tracing::warn!(error = %rollback, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        txn.commit().await?;
        Ok(results)
    }
}

async fn collect(txn: &mut Txn, statement: &Rendered) -> Result<Vec<Row>, GraphError> {
    let mut stream = txn.execute(statement.to_query()).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        rows.push(statement.decode(&row));
    }
    Ok(rows)
}

#[async_trait]
impl GraphSession for GraphClient {
    async fn execute_in_txn(
        &self,
        statements: &[Statement<'_>],
    ) -> Result<Vec<Vec<Row>>, StoreError> {
        let rendered = statements
            .iter()
            .map(cypher::render)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GraphError::Statement(e.to_string()))?;

        tracing::debug!(
            statements = statements.len(),
            first = %statements.first().map(|s| s.to_string()).unwrap_or_default(),
            "Executing transaction"
        );

        match tokio::time::timeout(self.timeout, self.run_txn(&rendered)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(GraphError::Timeout(self.timeout.as_secs()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            classify("Neo.ClientError.Schema.ConstraintValidationFailed: Node(12) already exists"),
            StoreError::ConstraintViolation(_)
        ));
        assert!(matches!(
            classify("Neo.TransientError.Transaction.DeadlockDetected"),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            classify("Neo.ClientError.Statement.SyntaxError: Invalid input"),
            StoreError::Query(_)
        ));
        assert!(StoreError::from(GraphError::Timeout(5)).is_transient());
        assert!(matches!(
            StoreError::from(GraphError::Connection("refused".into())),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_outages_are_unavailable() {
        for message in [
            "an IO error occurred: Connection refused (os error 111)",
            "connection error",
            "Neo.TransientError.General.DatabaseUnavailable: database is unavailable",
            "ServiceUnavailable: no servers available",
        ] {
            let err = classify(message);
            assert!(matches!(err, StoreError::Unavailable(_)), "{message} -> {err:?}");
            assert!(!err.is_transient());
        }
        assert!(classify("an IO error occurred: Broken pipe (os error 32)").is_transient());
    }

    #[test]
    fn test_config_defaults() {
        let config: GraphConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.uri, "bolt://localhost:7687");
        assert_eq!(config.statement_timeout_secs, 120);
        assert_eq!(config.max_connections, 16);
    }
}
