//! End-to-end runs over the files in `demos/`, against the in-memory graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use strata_core::{RunTag, SchemaRegistry, ScopeAnchor};
use strata_graph::MemoryGraph;
use strata_sync::config::SyncConfig;
use strata_sync::orchestrator::{CancellationToken, RunStatus, ScopeJob, SyncOrchestrator};
use strata_sync::source::JsonSnapshotSource;

fn demos() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

fn load_config() -> SyncConfig {
    config::Config::builder()
        .add_source(config::File::from(demos().join("strata.toml")))
        .build()
        .unwrap()
        .get::<SyncConfig>("sync")
        .unwrap()
}

fn registry(config: &SyncConfig) -> Arc<SchemaRegistry> {
    let text = std::fs::read_to_string(demos().join(&config.schema_path)).unwrap();
    Arc::new(SchemaRegistry::from_json(&text).unwrap())
}

fn jobs(config: &SyncConfig, snapshot_dir: &Path) -> Vec<ScopeJob> {
    config
        .active_sources(None)
        .map(|s| {
            let source = JsonSnapshotSource::new(&s.name, snapshot_dir.join(&s.path), s.labels.clone());
            ScopeJob::new(s.anchor(), Arc::new(source))
        })
        .collect()
}

#[test]
fn test_demo_config_parses() {
    let config = load_config();
    assert_eq!(config.batch_size, 500);
    assert_eq!(config.max_concurrent_scopes, 2);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.sources.len(), 2);
    assert_eq!(config.sources[1].anchor(), ScopeAnchor::new("Tenant", "SouthPark"));
    assert_eq!(registry(&config).len(), 2);
}

#[tokio::test]
async fn test_demo_snapshots_reconcile() {
    let config = load_config();
    let graph = Arc::new(MemoryGraph::new());
    let sync = SyncOrchestrator::new(graph.clone(), registry(&config))
        .with_load_settings(config.load_settings())
        .with_cleanup_settings(config.cleanup_settings())
        .with_max_concurrent(config.max_concurrent_scopes);
    let cancel = CancellationToken::new();

    let first = sync.run(jobs(&config, &demos()), RunTag(1234), &cancel).await;
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(graph.node_count("TenantGroup"), 2);
    assert_eq!(graph.node_count("TenantUser"), 4);
    assert_eq!(graph.relationship_count("MEMBER_OF"), 3);

    // Homer leaves SimpsonCorp; South Park is unchanged.
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("snapshots")).unwrap();
    std::fs::write(
        dir.path().join("snapshots/simpson.json"),
        json!({
            "TenantGroup": [{"id": 10, "name": "Nuclear Plant"}],
            "TenantUser": [{"id": 1, "email": "mbsimpson@simpson.corp", "group_ids": []}]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::copy(
        demos().join("snapshots/southpark.json"),
        dir.path().join("snapshots/southpark.json"),
    )
    .unwrap();

    let second = sync.run(jobs(&config, dir.path()), RunTag(2468), &cancel).await;
    assert_eq!(second.status, RunStatus::Succeeded);
    let simpson = second.scope(&ScopeAnchor::new("Tenant", "SimpsonCorp")).unwrap();
    assert_eq!(simpson.nodes_deleted, 1);
    assert_eq!(graph.node_count("TenantUser"), 3);
    assert_eq!(graph.node_count("TenantGroup"), 2);
    assert_eq!(graph.relationship_count("MEMBER_OF"), 2);
    assert!(graph
        .nodes("TenantUser")
        .iter()
        .all(|n| n.get("email").and_then(|v| v.as_str()) != Some("hjsimpson@simpson.corp")));
}
