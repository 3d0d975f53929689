//! Sync orchestration: one run tag threaded through load and cleanup for
//! every scope, with scopes processed concurrently and independently.
//!
//! Each scope moves through `Pending → Loading → Cleaning → Done`, or ends
//! in `Failed` from `Loading` or `Cleaning`. A scope only reaches
//! `Cleaning` after every load for the run has been attempted, and never
//! when a source could not be observed or the run was cancelled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use strata_core::{
    BatchFailure, CleanupFailure, CleanupResult, CleanupSettings, LoadResult, LoadSettings,
    RecordFailure, RunTag, RunTagMinter, SchemaRegistry, ScopeAnchor, StoreError, StrataError,
};
use strata_graph::queries::anchor_tag;
use strata_graph::{BatchLoader, CleanupEngine, GraphSession};

use crate::error::{Result, SyncError};
use crate::source::{FetchContext, SourceBatch, SourceModule};

// ── State machine ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    Pending,
    Loading,
    Cleaning,
    Done,
    Failed,
}

impl ScopeState {
    pub fn can_transition_to(self, next: ScopeState) -> bool {
        use ScopeState::*;
        matches!(
            (self, next),
            (Pending, Loading)
                | (Loading, Cleaning)
                | (Cleaning, Done)
                | (Loading, Failed)
                | (Cleaning, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Cleaning => "cleaning",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Cancellation ─────────────────────────────────────────────────

/// A cooperative cancellation token shared by a run and its scopes.
///
/// Scopes check it before loading each source and before cleaning. Work
/// already committed stays; it carries the abandoned run tag and converges
/// on the next run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolve once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ── Jobs and reports ─────────────────────────────────────────────

/// One source module reporting for one scope.
#[derive(Clone)]
pub struct ScopeJob {
    pub scope: ScopeAnchor,
    pub source: Arc<dyn SourceModule>,
}

impl ScopeJob {
    pub fn new(scope: ScopeAnchor, source: Arc<dyn SourceModule>) -> Self {
        Self { scope, source }
    }
}

/// What happened to one scope during a run.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    pub scope: String,
    pub state: ScopeState,
    pub sources: Vec<String>,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
    pub relationships_deleted: u64,
    pub duplicates_coalesced: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub record_failures: Vec<RecordFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batch_failures: Vec<BatchFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_failures: Vec<CleanupFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the store could not be reached at all.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub store_unavailable: bool,
}

impl ScopeSummary {
    fn new(scope: &ScopeAnchor, sources: Vec<String>) -> Self {
        Self {
            scope: scope.to_string(),
            state: ScopeState::Pending,
            sources,
            nodes_created: 0,
            nodes_updated: 0,
            nodes_deleted: 0,
            relationships_created: 0,
            relationships_updated: 0,
            relationships_deleted: 0,
            duplicates_coalesced: 0,
            record_failures: Vec::new(),
            batch_failures: Vec::new(),
            cleanup_failures: Vec::new(),
            error: None,
            store_unavailable: false,
        }
    }

    /// Done, with record, batch or cleanup failures along the way.
    pub fn has_partial_failures(&self) -> bool {
        !self.record_failures.is_empty()
            || !self.batch_failures.is_empty()
            || !self.cleanup_failures.is_empty()
    }

    fn transition(&mut self, next: ScopeState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(scope = %self.scope, from = %self.state, to = %next, "Scope transition");
        self.state = next;
        Ok(())
    }

    fn absorb_load(&mut self, result: LoadResult) {
        self.nodes_created += result.nodes_created;
        self.nodes_updated += result.nodes_updated;
        self.relationships_created += result.relationships_created;
        self.relationships_updated += result.relationships_updated;
        self.duplicates_coalesced += result.duplicates_coalesced;
        self.record_failures.extend(result.record_failures);
        self.batch_failures.extend(result.batch_failures);
    }

    fn absorb_cleanup(&mut self, result: CleanupResult) {
        self.nodes_deleted += result.total_nodes();
        self.relationships_deleted += result.total_relationships();
        self.cleanup_failures.extend(result.failures);
    }

    fn fail(mut self, error: impl fmt::Display, store_unavailable: bool) -> Self {
        let reason = error.to_string();
        if let Err(e) = self.transition(ScopeState::Failed) {
            tracing::error!(scope = %self.scope, error = %e, "Forcing scope into failed state");
            self.state = ScopeState::Failed;
        }
        tracing::error!(scope = %self.scope, error = %reason, "Scope failed");
        self.error = Some(reason);
        self.store_unavailable = store_unavailable;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every scope is done without failures.
    Succeeded,
    /// Every scope is done; some records, batches or cleanups failed.
    CompletedWithErrors,
    /// At least one scope failed.
    Failed,
}

/// Summary of one orchestrated run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub run_tag: RunTag,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scopes: Vec<ScopeSummary>,
}

impl RunReport {
    pub fn scope(&self, scope: &ScopeAnchor) -> Option<&ScopeSummary> {
        let key = scope.to_string();
        self.scopes.iter().find(|s| s.scope == key)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

fn status_of(scopes: &[ScopeSummary]) -> RunStatus {
    if scopes.iter().any(|s| s.state != ScopeState::Done) {
        RunStatus::Failed
    } else if scopes.iter().any(ScopeSummary::has_partial_failures) {
        RunStatus::CompletedWithErrors
    } else {
        RunStatus::Succeeded
    }
}

// ── Orchestrator ─────────────────────────────────────────────────

/// Runs scope jobs against a graph session.
pub struct SyncOrchestrator<S: GraphSession + ?Sized + 'static> {
    session: Arc<S>,
    registry: Arc<SchemaRegistry>,
    load: LoadSettings,
    cleanup: CleanupSettings,
    max_concurrent: usize,
}

impl<S: GraphSession + ?Sized + 'static> Clone for SyncOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            registry: self.registry.clone(),
            load: self.load.clone(),
            cleanup: self.cleanup.clone(),
            max_concurrent: self.max_concurrent,
        }
    }
}

impl<S: GraphSession + ?Sized + 'static> SyncOrchestrator<S> {
    pub fn new(session: Arc<S>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            session,
            registry,
            load: LoadSettings::default(),
            cleanup: CleanupSettings::default(),
            max_concurrent: 4,
        }
    }

    pub fn with_load_settings(mut self, settings: LoadSettings) -> Self {
        self.load = settings;
        self
    }

    pub fn with_cleanup_settings(mut self, settings: CleanupSettings) -> Self {
        self.cleanup = settings;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Mint a tag newer than anything already recorded on the jobs' anchors.
    pub async fn next_run_tag(
        &self,
        minter: &RunTagMinter,
        jobs: &[ScopeJob],
    ) -> std::result::Result<RunTag, StoreError> {
        let mut floor = RunTag(0);
        for job in jobs {
            if let Some(tag) = anchor_tag(self.session.as_ref(), &job.scope).await? {
                floor = floor.max(tag);
            }
        }
        Ok(minter.mint_after(floor))
    }

    /// Run every job under `tag`. Jobs sharing an anchor are processed by
    /// the same task, in the order given.
    pub async fn run(&self, jobs: Vec<ScopeJob>, tag: RunTag, cancel: &CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let groups = group_by_scope(jobs);
        tracing::info!(
            run_id = %run_id,
            run_tag = %tag,
            scopes = groups.len(),
            max_concurrent = self.max_concurrent,
            "Run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(groups.len());
        for (scope, sources) in groups {
            let worker = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let task_scope = scope.clone();
            let names = sources.iter().map(|s| s.name().to_string()).collect::<Vec<_>>();
            let handle = tokio::spawn(async move {
                let summary = ScopeSummary::new(&task_scope, names);
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return summary.fail("scheduler closed", false);
                };
                worker.run_scope(task_scope, sources, tag, &cancel, summary).await
            });
            handles.push((scope, handle));
        }

        let mut scopes = Vec::with_capacity(handles.len());
        for (scope, handle) in handles {
            match handle.await {
                Ok(summary) => scopes.push(summary),
                Err(e) => {
                    tracing::error!(scope = %scope, error = %e, "Scope task panicked");
                    let mut summary = ScopeSummary::new(&scope, Vec::new());
                    summary.state = ScopeState::Failed;
                    summary.error = Some(format!("task panicked: {e}"));
                    scopes.push(summary);
                }
            }
        }

        let status = status_of(&scopes);
        let report = RunReport {
            run_id,
            run_tag: tag,
            status,
            started_at,
            finished_at: Utc::now(),
            scopes,
        };
        tracing::info!(
            run_id = %run_id,
            run_tag = %tag,
            status = ?report.status,
            failed = report.scopes.iter().filter(|s| s.state == ScopeState::Failed).count(),
            duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Run complete"
        );
        report
    }

    async fn run_scope(
        &self,
        scope: ScopeAnchor,
        sources: Vec<Arc<dyn SourceModule>>,
        tag: RunTag,
        cancel: &CancellationToken,
        mut summary: ScopeSummary,
    ) -> ScopeSummary {
        if let Err(e) = summary.transition(ScopeState::Loading) {
            return summary.fail(e, false);
        }

        match anchor_tag(self.session.as_ref(), &scope).await {
            Ok(Some(recorded)) if recorded >= tag => {
                return summary.fail(
                    format!("run tag {tag} is not newer than {recorded} recorded on {scope}"),
                    false,
                );
            }
            Ok(_) => {}
            Err(e) => {
                let unavailable = matches!(e, StoreError::Unavailable(_));
                return summary.fail(e, unavailable);
            }
        }

        let loader = BatchLoader::new(self.session.as_ref(), self.load.clone());
        let mut managed: Vec<String> = Vec::new();

        for source in &sources {
            if cancel.is_cancelled() {
                return summary.fail("cancelled", false);
            }
            let batches = match self.observe(source.as_ref(), &scope, tag).await {
                Ok(b) => b,
                Err(e) => return summary.fail(format!("{} ({})", e, source.name()), false),
            };

            let owned = source.labels();
            if owned.is_empty() {
                managed.extend(self.registry.load_order().map(|s| s.label.clone()));
            } else {
                managed.extend(owned);
            }

            for batch in &batches {
                if let Err(e) = self.registry.require(&batch.label) {
                    return summary.fail(e, false);
                }
            }
            for schema in self.registry.load_order() {
                for batch in batches.iter().filter(|b| b.label == schema.label) {
                    match loader.load(schema, &batch.records, &scope, tag).await {
                        Ok(result) => summary.absorb_load(result),
                        Err(e) => {
                            let unavailable = e.is_store_unavailable();
                            return summary.fail(e, unavailable);
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return summary.fail("cancelled", false);
        }
        if let Err(e) = summary.transition(ScopeState::Cleaning) {
            return summary.fail(e, false);
        }

        managed.sort();
        managed.dedup();
        let order = self.registry.cleanup_order_for(&managed[..]);
        let engine = CleanupEngine::new(self.session.as_ref(), self.cleanup.clone());
        match engine.cleanup(&order, &scope, tag).await {
            Ok(result) => summary.absorb_cleanup(result),
            Err(e) => {
                let unavailable = e.is_store_unavailable();
                return summary.fail(e, unavailable);
            }
        }

        if let Err(e) = summary.transition(ScopeState::Done) {
            return summary.fail(e, false);
        }
        tracing::info!(
            scope = %scope,
            run_tag = %tag,
            created = summary.nodes_created,
            updated = summary.nodes_updated,
            deleted = summary.nodes_deleted,
            partial_failures = summary.has_partial_failures(),
            "Scope reconciled"
        );
        summary
    }

    /// Fetch and transform one source.
    async fn observe(
        &self,
        source: &dyn SourceModule,
        scope: &ScopeAnchor,
        tag: RunTag,
    ) -> std::result::Result<Vec<SourceBatch>, StrataError> {
        let ctx = FetchContext {
            scope: scope.clone(),
            run_tag: tag,
        };
        let wrap = |source_error: anyhow::Error| StrataError::Source {
            source_name: source.name().to_string(),
            source: source_error,
        };
        let raw = source.fetch(&ctx).await.map_err(wrap)?;
        let batches = source.transform(raw).map_err(wrap)?;
        tracing::info!(
            source = %source.name(),
            scope = %scope,
            batches = batches.len(),
            records = batches.iter().map(|b| b.records.len()).sum::<usize>(),
            "Source observed"
        );
        Ok(batches)
    }
}

fn group_by_scope(jobs: Vec<ScopeJob>) -> Vec<(ScopeAnchor, Vec<Arc<dyn SourceModule>>)> {
    let mut groups: Vec<(ScopeAnchor, Vec<Arc<dyn SourceModule>>)> = Vec::new();
    for job in jobs {
        match groups.iter_mut().find(|(scope, _)| *scope == job.scope) {
            Some((_, sources)) => sources.push(job.source),
            None => groups.push((job.scope, vec![job.source])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use strata_core::{Direction, NodeSchema, PropertyKind, PropertySpec, RetryPolicy, ScopeLink};
    use strata_graph::MemoryGraph;

    /// Serves a fixed payload, or fails to fetch when there is none.
    struct StaticSource {
        name: &'static str,
        payload: Option<Value>,
    }

    #[async_trait]
    impl SourceModule for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        fn labels(&self) -> Vec<String> {
            vec!["TenantUser".to_string()]
        }

        async fn fetch(&self, _ctx: &FetchContext) -> anyhow::Result<Value> {
            self.payload
                .clone()
                .ok_or_else(|| anyhow::anyhow!("upstream returned 503"))
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
                label: "TenantUser".to_string(),
                records,
            }])
        }
    }

    fn job(tenant: &str, payload: Option<Value>) -> ScopeJob {
        ScopeJob::new(
            ScopeAnchor::new("Tenant", tenant),
            Arc::new(StaticSource {
                name: "static",
                payload,
            }),
        )
    }

    fn orchestrator(graph: Arc<MemoryGraph>) -> SyncOrchestrator<MemoryGraph> {
        let registry = SchemaRegistry::from_definitions(vec![NodeSchema::new(
            "TenantUser",
            PropertySpec::new("id", PropertyKind::Int),
            ScopeLink::new("HAS_USER", Direction::Outward),
        )
        .with_property(PropertySpec::new("email", PropertyKind::String))])
        .unwrap();
        SyncOrchestrator::new(graph, Arc::new(registry))
            .with_load_settings(LoadSettings {
                batch_size: 10,
                retry: RetryPolicy::immediate(2),
            })
            .with_cleanup_settings(CleanupSettings {
                batch_size: 10,
                retry: RetryPolicy::immediate(2),
            })
            .with_max_concurrent(2)
    }

    #[test]
    fn test_state_transitions() {
        use ScopeState::*;
        assert!(Pending.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Cleaning));
        assert!(Cleaning.can_transition_to(Done));
        assert!(Loading.can_transition_to(Failed));
        assert!(Cleaning.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Cleaning));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Loading));
        assert!(Done.is_terminal() && Failed.is_terminal());

        let mut summary = ScopeSummary::new(&ScopeAnchor::new("Tenant", "t1"), Vec::new());
        let err = summary.transition(Cleaning).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidTransition { from: Pending, to: Cleaning }
        ));
        assert_eq!(summary.state, Pending);
    }

    #[test]
    fn test_cloned_token_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_reconciles_each_scope() {
        let graph = Arc::new(MemoryGraph::new());
        let sync = orchestrator(graph.clone());
        let cancel = CancellationToken::new();

        let first = sync
            .run(
                vec![
                    job("SimpsonCorp", Some(json!([
                        {"id": 1, "email": "mbsimpson@simpson.corp"},
                        {"id": 2, "email": "hjsimpson@simpson.corp"}
                    ]))),
                    job("SouthPark", Some(json!([
                        {"id": 3, "email": "kbroflovski@south.park"},
                        {"id": 4, "email": "ecartman@south.park"}
                    ]))),
                ],
                RunTag(1234),
                &cancel,
            )
            .await;
        assert!(first.is_success());
        assert_eq!(first.scopes.len(), 2);

        let second = sync
            .run(
                vec![job("SimpsonCorp", Some(json!([{"id": 1, "email": "mbsimpson@simpson.corp"}])))],
                RunTag(2468),
                &cancel,
            )
            .await;
        let simpson = second.scope(&ScopeAnchor::new("Tenant", "SimpsonCorp")).unwrap();
        assert_eq!(simpson.state, ScopeState::Done);
        assert_eq!(simpson.nodes_updated, 1);
        assert_eq!(simpson.nodes_deleted, 1);
        assert_eq!(graph.node_count("TenantUser"), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_cleanup() {
        let graph = Arc::new(MemoryGraph::new());
        let sync = orchestrator(graph.clone());
        let cancel = CancellationToken::new();
        sync.run(
            vec![job("SimpsonCorp", Some(json!([{"id": 1, "email": "a@simpson.corp"}])))],
            RunTag(10),
            &cancel,
        )
        .await;

        let report = sync
            .run(vec![job("SimpsonCorp", None)], RunTag(20), &cancel)
            .await;
        let summary = &report.scopes[0];
        assert_eq!(summary.state, ScopeState::Failed);
        let error = summary.error.as_deref().unwrap_or_default();
        assert!(error.contains("503") && error.contains("static"));
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(graph.node_count("TenantUser"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_clean() {
        let graph = Arc::new(MemoryGraph::new());
        let sync = orchestrator(graph.clone());
        sync.run(
            vec![job("SimpsonCorp", Some(json!([{"id": 1, "email": "a@simpson.corp"}])))],
            RunTag(10),
            &CancellationToken::new(),
        )
        .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = sync
            .run(vec![job("SimpsonCorp", Some(json!([])))], RunTag(20), &cancel)
            .await;
        assert_eq!(report.scopes[0].state, ScopeState::Failed);
        assert_eq!(report.scopes[0].error.as_deref(), Some("cancelled"));
        assert_eq!(graph.node_count("TenantUser"), 1);
    }

    #[tokio::test]
    async fn test_stale_run_tag_is_refused() {
        let graph = Arc::new(MemoryGraph::new());
        let sync = orchestrator(graph.clone());
        let cancel = CancellationToken::new();
        let payload = Some(json!([{"id": 1, "email": "a@simpson.corp"}]));
        sync.run(vec![job("SimpsonCorp", payload.clone())], RunTag(50), &cancel)
            .await;

        let report = sync
            .run(vec![job("SimpsonCorp", Some(json!([])))], RunTag(40), &cancel)
            .await;
        assert_eq!(report.scopes[0].state, ScopeState::Failed);
        assert_eq!(graph.node_count("TenantUser"), 1);

        let minter = RunTagMinter::new();
        let jobs = vec![job("SimpsonCorp", payload)];
        let next = sync.next_run_tag(&minter, &jobs).await.unwrap();
        assert!(next > RunTag(50));
    }

    #[tokio::test]
    async fn test_jobs_sharing_an_anchor_form_one_scope() {
        let graph = Arc::new(MemoryGraph::new());
        let sync = orchestrator(graph.clone());
        let report = sync
            .run(
                vec![
                    job("SimpsonCorp", Some(json!([{"id": 1, "email": "a@simpson.corp"}]))),
                    job("SimpsonCorp", Some(json!([{"id": 2, "email": "b@simpson.corp"}]))),
                ],
                RunTag(5),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.scopes.len(), 1);
        assert_eq!(report.scopes[0].sources, vec!["static", "static"]);
        assert_eq!(report.scopes[0].nodes_created, 2);
        assert_eq!(report.scopes[0].nodes_deleted, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_scope() {
        let graph = Arc::new(MemoryGraph::new());
        graph.set_unavailable(true);
        let sync = orchestrator(graph.clone());
        let report = sync
            .run(
                vec![job("SimpsonCorp", Some(json!([]))), job("SouthPark", Some(json!([])))],
                RunTag(5),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.scopes.iter().all(|s| s.store_unavailable));
    }
}
