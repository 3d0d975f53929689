//! Configuration for the strata-sync orchestrator.

use serde::Deserialize;

use strata_core::config::default_batch_size;
use strata_core::{CleanupSettings, LoadSettings, RetryPolicy, ScopeAnchor};

/// Top-level sync configuration.
///
/// Loaded from `strata.toml` `[sync]` section or
/// `STRATA_SYNC__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// JSON file with the node schema definitions, in load order.
    #[serde(default = "default_schema_path")]
    pub schema_path: String,

    /// Records per load transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Deletions per cleanup transaction.
    #[serde(default = "default_batch_size")]
    pub cleanup_batch_size: usize,

    /// Scopes processed at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_scopes: usize,

    /// Upper bound on one store transaction, in seconds.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,

    /// Seconds between runs in daemon mode.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SyncConfig {
    pub fn load_settings(&self) -> LoadSettings {
        LoadSettings {
            batch_size: self.batch_size,
            retry: self.retry.clone(),
        }
    }

    pub fn cleanup_settings(&self) -> CleanupSettings {
        CleanupSettings {
            batch_size: self.cleanup_batch_size,
            retry: self.retry.clone(),
        }
    }

    /// Enabled sources, optionally restricted to one anchor.
    pub fn active_sources<'a>(
        &'a self,
        only: Option<&'a ScopeAnchor>,
    ) -> impl Iterator<Item = &'a SourceConfig> + 'a {
        self.sources.iter().filter(move |s| {
            if !s.enabled {
                tracing::info!(source = %s.name, "Source disabled, skipping");
                return false;
            }
            only.map_or(true, |a| *a == s.anchor())
        })
    }
}

/// A configured source module and the anchor it reports for.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    #[serde(default)]
    pub kind: SourceKind,

    /// Snapshot file for `kind = "json"`.
    pub path: String,

    pub anchor_label: String,

    #[serde(default = "default_anchor_key")]
    pub anchor_key: String,

    pub anchor_id: String,

    /// Labels this source owns. Empty means every registered label.
    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn anchor(&self) -> ScopeAnchor {
        ScopeAnchor::new(&self.anchor_label, &self.anchor_id).with_key_property(&self.anchor_key)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A JSON file mapping label to an array of records.
    #[default]
    Json,
}

fn default_schema_path() -> String {
    "schema.json".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_statement_timeout() -> u64 {
    120
}

fn default_interval() -> u64 {
    86_400
}

fn default_anchor_key() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema_path: default_schema_path(),
            batch_size: default_batch_size(),
            cleanup_batch_size: default_batch_size(),
            max_concurrent_scopes: default_max_concurrent(),
            statement_timeout_secs: default_statement_timeout(),
            interval_secs: default_interval(),
            retry: RetryPolicy::default(),
            sources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.schema_path, "schema.json");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.cleanup_batch_size, 1000);
        assert_eq!(config.max_concurrent_scopes, 4);
        assert_eq!(config.interval_secs, 86_400);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_source_defaults_and_filter() {
        let config: SyncConfig = serde_json::from_value(serde_json::json!({
            "batch_size": 50,
            "sources": [
                {"name": "simpson", "path": "simpson.json",
                 "anchor_label": "Tenant", "anchor_id": "SimpsonCorp"},
                {"name": "south", "path": "south.json",
                 "anchor_label": "Tenant", "anchor_id": "SouthPark", "enabled": false}
            ]
        }))
        .unwrap();

        assert_eq!(config.load_settings().batch_size, 50);
        assert_eq!(config.cleanup_settings().batch_size, 1000);
        let source = &config.sources[0];
        assert_eq!(source.kind, SourceKind::Json);
        assert_eq!(source.anchor().scope_id(), "Tenant/SimpsonCorp");
        assert_eq!(source.anchor().key_property, "id");

        assert_eq!(config.active_sources(None).count(), 1);
        let south = ScopeAnchor::new("Tenant", "SouthPark");
        assert_eq!(config.active_sources(Some(&south)).count(), 0);
    }
}
