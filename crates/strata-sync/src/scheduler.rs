//! Run scheduling.
//!
//! Runs every configured job on a fixed interval. A run always finishes
//! before the next one starts, so two runs never reconcile the same scope
//! at once; ticks missed while a run is in progress are skipped.

use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};

use strata_core::{RunTag, RunTagMinter};
use strata_graph::GraphSession;

use crate::error::Result;
use crate::orchestrator::{CancellationToken, RunReport, ScopeJob, SyncOrchestrator};

/// Periodically reconciles a fixed set of scope jobs.
pub struct SyncScheduler<S: GraphSession + ?Sized + 'static> {
    orchestrator: SyncOrchestrator<S>,
    jobs: Vec<ScopeJob>,
    interval: Duration,
    minter: Arc<RunTagMinter>,
}

impl<S: GraphSession + ?Sized + 'static> SyncScheduler<S> {
    pub fn new(orchestrator: SyncOrchestrator<S>, jobs: Vec<ScopeJob>, interval_secs: u64) -> Self {
        Self {
            orchestrator,
            jobs,
            interval: Duration::from_secs(interval_secs.max(1)),
            minter: Arc::new(RunTagMinter::new()),
        }
    }

    /// Loop until `cancel` fires. The first run starts immediately.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            jobs = self.jobs.len(),
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tracing::info!("Scheduled run triggered");
            match run_once(&self.orchestrator, &self.minter, self.jobs.clone(), None, cancel).await {
                Ok(report) if report.is_success() => {}
                Ok(report) => tracing::warn!(
                    run_id = %report.run_id,
                    status = ?report.status,
                    "Scheduled run finished with errors"
                ),
                Err(e) => tracing::error!(error = %e, "Scheduled run failed"),
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

/// Execute one run: mint (or accept) a tag, then load and clean every scope.
pub async fn run_once<S: GraphSession + ?Sized + 'static>(
    orchestrator: &SyncOrchestrator<S>,
    minter: &RunTagMinter,
    jobs: Vec<ScopeJob>,
    tag: Option<RunTag>,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let tag = match tag {
        Some(tag) => tag,
        None => orchestrator.next_run_tag(minter, &jobs).await?,
    };
    Ok(orchestrator.run(jobs, tag, cancel).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use strata_core::{Direction, NodeSchema, PropertyKind, PropertySpec, SchemaRegistry, ScopeAnchor, ScopeLink};
    use strata_graph::MemoryGraph;

    use crate::source::{FetchContext, SourceBatch, SourceModule};

    struct Hosts;

    #[async_trait]
    impl SourceModule for Hosts {
        fn name(&self) -> &str {
            "hosts"
        }

        fn labels(&self) -> Vec<String> {
            Vec::new()
        }

        async fn fetch(&self, _ctx: &FetchContext) -> anyhow::Result<Value> {
            Ok(json!([{"name": "web-1"}, {"name": "web-2"}]))
        }

        fn transform(&self, raw: Value) -> anyhow::Result<Vec<SourceBatch>> {
            let records = raw
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect();
            Ok(vec![SourceBatch {
                label: "Host".into(),
                records,
            }])
        }
    }

    fn setup() -> (Arc<MemoryGraph>, SyncOrchestrator<MemoryGraph>, Vec<ScopeJob>) {
        let graph = Arc::new(MemoryGraph::new());
        let registry = SchemaRegistry::from_definitions(vec![NodeSchema::new(
            "Host",
            PropertySpec::new("name", PropertyKind::String),
            ScopeLink::new("RESOURCE", Direction::Outward),
        )])
        .unwrap();
        let orchestrator = SyncOrchestrator::new(graph.clone(), Arc::new(registry));
        let jobs = vec![ScopeJob::new(ScopeAnchor::new("Account", "1234"), Arc::new(Hosts))];
        (graph, orchestrator, jobs)
    }

    #[tokio::test]
    async fn test_run_once_mints_increasing_tags() {
        let (graph, orchestrator, jobs) = setup();
        let minter = RunTagMinter::new();
        let cancel = CancellationToken::new();

        let first = run_once(&orchestrator, &minter, jobs.clone(), None, &cancel)
            .await
            .unwrap();
        let second = run_once(&orchestrator, &minter, jobs, None, &cancel)
            .await
            .unwrap();

        assert!(first.is_success() && second.is_success());
        assert!(second.run_tag > first.run_tag);
        assert_eq!(graph.node_count("Host"), 2);
    }

    #[tokio::test]
    async fn test_explicit_tag_is_used() {
        let (_graph, orchestrator, jobs) = setup();
        let report = run_once(
            &orchestrator,
            &RunTagMinter::new(),
            jobs,
            Some(RunTag(42)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.run_tag, RunTag(42));
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let (graph, orchestrator, jobs) = setup();
        let scheduler = SyncScheduler::new(orchestrator, jobs, 3600);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        let watcher = graph.clone();
        tokio::spawn(async move {
            while watcher.node_count("Host") < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), scheduler.run(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(graph.node_count("Host"), 2);
    }
}
