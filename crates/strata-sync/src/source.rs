//! Source modules: where observed records come from.
//!
//! A source is fetched once per run and scope, then transformed into
//! per-label record batches. The engine never talks to the outside world
//! itself; anything with I/O lives behind this trait.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

use strata_core::{Record, RunTag, ScopeAnchor};

/// What a source is being asked to observe.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub scope: ScopeAnchor,
    pub run_tag: RunTag,
}

/// Records for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub label: String,
    pub records: Vec<Record>,
}

#[async_trait]
pub trait SourceModule: Send + Sync {
    fn name(&self) -> &str;

    /// Labels whose stale entities this source may retire. Empty means every
    /// registered label.
    fn labels(&self) -> Vec<String>;

    /// Pull a raw snapshot.
    async fn fetch(&self, ctx: &FetchContext) -> anyhow::Result<Value>;

    /// Turn a raw snapshot into record batches.
    fn transform(&self, raw: Value) -> anyhow::Result<Vec<SourceBatch>>;
}

/// Reads a JSON file of the form `{"<Label>": [ {record}, ... ], ...}`.
///
/// Useful for fixtures, replays and inventories exported by other tools.
#[derive(Debug, Clone)]
pub struct JsonSnapshotSource {
    name: String,
    path: PathBuf,
    labels: Vec<String>,
}

impl JsonSnapshotSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            labels,
        }
    }
}

#[async_trait]
impl SourceModule for JsonSnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    async fn fetch(&self, ctx: &FetchContext) -> anyhow::Result<Value> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading snapshot {}", self.path.display()))?;
        let raw: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing snapshot {}", self.path.display()))?;
        tracing::debug!(
            source = %self.name,
            scope = %ctx.scope,
            path = %self.path.display(),
            "Snapshot fetched"
        );
        Ok(raw)
    }

    fn transform(&self, raw: Value) -> anyhow::Result<Vec<SourceBatch>> {
        let Value::Object(by_label) = raw else {
            anyhow::bail!("snapshot must be an object mapping label to records");
        };

        let mut batches = Vec::with_capacity(by_label.len());
        for (label, value) in by_label {
            if !self.labels.is_empty() && !self.labels.contains(&label) {
                anyhow::bail!("label {label} is not owned by source {}", self.name);
            }
            let Value::Array(items) = value else {
                anyhow::bail!("records for {label} must be an array");
            };
            let records = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(record) => Ok(record),
                    _ => Err(anyhow::anyhow!("{label}[{i}] is not an object")),
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            batches.push(SourceBatch { label, records });
        }
        Ok(batches)
    }
}
