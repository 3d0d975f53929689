//! CLI entry point for the strata-sync orchestrator.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use strata_core::{RunTag, RunTagMinter, SchemaRegistry, ScopeAnchor};
use strata_graph::queries::ensure_indexes;
use strata_graph::{GraphClient, GraphConfig};

use strata_sync::config::{SourceKind, SyncConfig};
use strata_sync::orchestrator::{CancellationToken, ScopeJob, SyncOrchestrator};
use strata_sync::scheduler::{run_once, SyncScheduler};
use strata_sync::source::JsonSnapshotSource;

#[derive(Parser)]
#[command(name = "strata-sync")]
#[command(about = "Reconcile source snapshots into the Strata graph")]
struct Cli {
    /// Config file prefix (default: strata).
    #[arg(short, long, default_value = "strata")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync pass and print the report.
    Run {
        /// Use this run tag instead of minting one.
        #[arg(long)]
        run_tag: Option<i64>,

        /// Only sync sources for this anchor (`Label/id` or `Label/key=id`).
        #[arg(long)]
        scope: Option<String>,
    },
    /// Sync on the configured interval until interrupted.
    Daemon,
    /// Create the indexes the schema registry asks for.
    Indexes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let sync_config = load_sync_config(&cli.config)?;
    let registry = load_registry(&sync_config.schema_path)?;

    let mut graph_config = load_graph_config(&cli.config);
    graph_config.statement_timeout_secs = sync_config.statement_timeout_secs;
    let graph = Arc::new(GraphClient::connect(&graph_config).await?);

    match cli.command {
        Command::Indexes => {
            let count = ensure_indexes(graph.as_ref(), &registry).await?;
            println!("{count} indexes ensured");
        }
        Command::Run { run_tag, scope } => {
            let only = scope
                .as_deref()
                .map(|s| {
                    ScopeAnchor::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("Invalid scope {s}, expected Label/id or Label/key=id"))
                })
                .transpose()?;
            let jobs = build_jobs(&sync_config, only.as_ref());
            if jobs.is_empty() {
                anyhow::bail!("No enabled sources configured under [sync.sources]");
            }

            let orchestrator = orchestrator(graph, registry, &sync_config);
            let report = run_once(
                &orchestrator,
                &RunTagMinter::new(),
                jobs,
                run_tag.map(RunTag),
                &CancellationToken::new(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.scopes.iter().all(|s| s.error.is_none()) {
                std::process::exit(1);
            }
        }
        Command::Daemon => {
            let jobs = build_jobs(&sync_config, None);
            if jobs.is_empty() {
                anyhow::bail!("No enabled sources configured under [sync.sources]");
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, stopping after the current scope step");
                    on_signal.cancel();
                }
            });

            let interval = sync_config.interval_secs;
            let sched = SyncScheduler::new(orchestrator(graph, registry, &sync_config), jobs, interval);
            sched.run(&cancel).await?;
        }
    }

    Ok(())
}

fn orchestrator(
    graph: Arc<GraphClient>,
    registry: SchemaRegistry,
    config: &SyncConfig,
) -> SyncOrchestrator<GraphClient> {
    SyncOrchestrator::new(graph, Arc::new(registry))
        .with_load_settings(config.load_settings())
        .with_cleanup_settings(config.cleanup_settings())
        .with_max_concurrent(config.max_concurrent_scopes)
}

fn build_jobs(config: &SyncConfig, only: Option<&ScopeAnchor>) -> Vec<ScopeJob> {
    config
        .active_sources(only)
        .map(|source| {
            let module = match source.kind {
                SourceKind::Json => {
                    JsonSnapshotSource::new(&source.name, &source.path, source.labels.clone())
                }
            };
            ScopeJob::new(source.anchor(), Arc::new(module))
        })
        .collect()
}

fn load_registry(path: &str) -> anyhow::Result<SchemaRegistry> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Reading schema file {path}: {e}"))?;
    let registry = SchemaRegistry::from_json(&text)?;
    tracing::info!(path = %path, schemas = registry.len(), "Schema registry loaded");
    Ok(registry)
}

fn load_sync_config(file_prefix: &str) -> anyhow::Result<SyncConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("STRATA_SYNC")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<SyncConfig>("sync") {
        Ok(c) => Ok(c),
        Err(_) => Ok(SyncConfig::default()),
    }
}

fn load_graph_config(file_prefix: &str) -> GraphConfig {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("STRATA")
                .separator("__")
                .try_parsing(true),
        )
        .build();

    match cfg.and_then(|c| c.get::<GraphConfig>("neo4j")) {
        Ok(c) => c,
        Err(_) => GraphConfig::default(),
    }
}
