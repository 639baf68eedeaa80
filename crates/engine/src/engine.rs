//! The `Engine` value: owns the stores, the orchestrator, the scheduler
//! and the progress bus, and exposes exactly the contract the boundary
//! HTTP layer consumes. Handlers get an `Arc<Engine>` injected; there are
//! no module singletons.

use crate::config::{DispatchMode, EngineConfig};
use crate::feeds::FeedFactory;
use crate::orchestrator::{Orchestrator, SyncError};
use crate::progress::ProgressBus;
use crate::recovery::reconcile_stale_syncs;
use crate::scheduler::{Dispatch, Scheduler};
use chrono::Utc;
use feed::ScratchDir;
use models::{
    Integration, IntegrationDraft, IntegrationId, IntegrationStats, IntegrationStatus, LastSync,
    SearchRequest, SearchResponse, SearchSource, SyncOutcome, SyncProgress, TestOutcome,
};
use search::PartIndex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::PrimaryStore;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] models::ConfigError),

    #[error("integration {0} was not found")]
    NotFound(IntegrationId),

    #[error("a sync is already running or queued for integration {0}")]
    AlreadyRunning(IntegrationId),

    #[error(transparent)]
    Store(#[from] store::StoreError),

    #[error(transparent)]
    Search(#[from] search::SearchError),

    #[error("failed to prepare engine directories: {0}")]
    Io(#[from] std::io::Error),
}

/// What `GET /integrations/:id/status` serves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatusView {
    pub is_syncing: bool,
    pub status: IntegrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<LastSync>,
    pub stats: IntegrationStats,
}

pub struct Engine {
    config: EngineConfig,
    store: PrimaryStore,
    index: Arc<PartIndex>,
    progress: Arc<ProgressBus>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Scheduler,
    feeds: Arc<dyn FeedFactory>,
}

impl Engine {
    /// Builds the engine over its backing stores. Call `start` (from
    /// within a runtime) to run recovery and register schedules.
    pub fn open(config: EngineConfig, feeds: Arc<dyn FeedFactory>) -> Result<Arc<Self>, EngineError> {
        let scratch = ScratchDir::create(&config.scratch_dir)?;
        scratch.sweep();
        let store = PrimaryStore::open(&config.db_path)?;
        let index = Arc::new(PartIndex::open(&config.index_dir)?);
        let progress = Arc::new(ProgressBus::new());

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            store.clone(),
            index.clone(),
            progress.clone(),
            feeds.clone(),
            scratch,
        ));

        let dispatch: Arc<dyn Dispatch> = match config.dispatch {
            DispatchMode::Direct => {
                let orchestrator = orchestrator.clone();
                Arc::new(move |id: IntegrationId| {
                    let orchestrator = orchestrator.clone();
                    tokio::spawn(async move {
                        match orchestrator.sync_integration(id).await {
                            Ok(_) => {}
                            Err(SyncError::AlreadyRunning) => {
                                tracing::debug!(integration = %id, "tick skipped, already running");
                            }
                            Err(err) => {
                                tracing::error!(integration = %id, %err, "scheduled sync failed to start");
                            }
                        }
                    });
                })
            }
            DispatchMode::Worker => {
                let store = store.clone();
                Arc::new(move |id: IntegrationId| {
                    match store.enqueue_sync_request(id, "schedule") {
                        Ok(Some(request)) => {
                            tracing::info!(integration = %id, request, "enqueued sync request");
                        }
                        Ok(None) => {
                            tracing::debug!(integration = %id, "tick skipped, request already queued");
                        }
                        Err(err) => {
                            tracing::error!(integration = %id, %err, "failed to enqueue sync request");
                        }
                    }
                })
            }
        };
        let scheduler = Scheduler::new(dispatch);

        Ok(Arc::new(Self {
            config,
            store,
            index,
            progress,
            orchestrator,
            scheduler,
            feeds,
        }))
    }

    /// Boot sequence: repair stale state, then register every enabled
    /// schedule. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let repaired = reconcile_stale_syncs(&self.store)?;
        if !repaired.is_empty() {
            tracing::info!(count = repaired.len(), "repaired stale syncing integrations");
        }
        let integrations = self.store.list_integrations()?;
        self.scheduler.schedule_all(&integrations);
        tracing::info!(
            integrations = integrations.len(),
            scheduled = self.scheduler.scheduled_count(),
            "engine started"
        );
        Ok(())
    }

    // --- control plane ---

    pub fn create_integration(&self, draft: IntegrationDraft) -> Result<Integration, EngineError> {
        draft.validate()?;
        let integration = draft.into_integration(Utc::now());
        self.store.put_integration(&integration)?;
        if integration.schedule.enabled {
            self.scheduler.schedule(&integration);
        }
        if integration.options.auto_sync {
            if let Err(err) = self.request_sync(integration.id, "create") {
                tracing::warn!(integration = %integration.id, %err, "auto-sync did not start");
            }
        }
        tracing::info!(integration = %integration.id, name = %integration.name, "integration created");
        Ok(integration)
    }

    pub fn update_integration(
        &self,
        id: IntegrationId,
        draft: IntegrationDraft,
    ) -> Result<Integration, EngineError> {
        draft.validate()?;
        let Some(existing) = self.store.get_integration(id)? else {
            return Err(EngineError::NotFound(id));
        };
        let mut updated = existing.clone();
        updated.name = draft.name;
        updated.kind = draft.kind;
        updated.schedule = draft.schedule;
        updated.options = draft.options;
        updated.updated_by = draft.created_by;
        updated.updated_at = Utc::now();
        self.store.put_integration(&updated)?;
        self.scheduler.reschedule(&updated);
        Ok(updated)
    }

    /// Deletes the integration and purges everything derived from it in
    /// both stores.
    pub fn delete_integration(&self, id: IntegrationId) -> Result<(), EngineError> {
        self.scheduler.stop(id);
        if !self.store.delete_integration(id)? {
            return Err(EngineError::NotFound(id));
        }
        let purged = self.store.delete_parts_by_integration(id)?;
        if let Err(err) = self.index.delete_by_integration(id) {
            tracing::warn!(integration = %id, %err, "failed to purge search documents");
        }
        tracing::info!(integration = %id, purged, "integration deleted and purged");
        Ok(())
    }

    /// `POST /integrations/:id/sync`: returns as soon as the run is
    /// started (direct mode) or durably queued (worker mode).
    pub fn request_sync(&self, id: IntegrationId, source: &str) -> Result<(), EngineError> {
        if self.store.get_integration(id)?.is_none() {
            return Err(EngineError::NotFound(id));
        }
        match self.config.dispatch {
            DispatchMode::Direct => {
                let guard = self
                    .orchestrator
                    .try_begin(id)
                    .map_err(|_| EngineError::AlreadyRunning(id))?;
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move {
                    if let Err(err) = orchestrator.run(guard).await {
                        tracing::error!(integration = %id, %err, "sync run failed");
                    }
                });
            }
            DispatchMode::Worker => {
                if self.orchestrator.is_running(id)
                    || self.store.enqueue_sync_request(id, source)?.is_none()
                {
                    return Err(EngineError::AlreadyRunning(id));
                }
            }
        }
        Ok(())
    }

    /// Runs a sync to completion in the caller's task. The programmatic
    /// variant of `request_sync`, used by tests and the CLI.
    pub async fn run_sync(&self, id: IntegrationId) -> Result<SyncOutcome, SyncError> {
        self.orchestrator.sync_integration(id).await
    }

    pub fn progress(&self, id: IntegrationId) -> Option<SyncProgress> {
        self.progress.get(id)
    }

    pub fn status(&self, id: IntegrationId) -> Result<IntegrationStatusView, EngineError> {
        let Some(integration) = self.store.get_integration(id)? else {
            return Err(EngineError::NotFound(id));
        };
        Ok(IntegrationStatusView {
            is_syncing: self.orchestrator.is_running(id)
                || integration.status == IntegrationStatus::Syncing,
            status: integration.status,
            last_sync: integration.last_sync,
            stats: integration.stats,
        })
    }

    pub fn get_integration(&self, id: IntegrationId) -> Result<Integration, EngineError> {
        let Some(integration) = self.store.get_integration(id)? else {
            return Err(EngineError::NotFound(id));
        };
        Ok(integration.safe_view())
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>, EngineError> {
        Ok(self
            .store
            .list_integrations()?
            .into_iter()
            .map(|i| i.safe_view())
            .collect())
    }

    /// `POST /integrations/test`: probes the submitted configuration
    /// without persisting anything.
    pub async fn test_config(&self, draft: IntegrationDraft) -> TestOutcome {
        if let Err(err) = draft.validate() {
            return TestOutcome {
                ok: false,
                message: err.to_string(),
                sample_count: None,
            };
        }
        let probe = draft.into_integration(Utc::now());
        match self.feeds.make(&probe) {
            Ok(handle) => handle.test().await,
            Err(err) => TestOutcome {
                ok: false,
                message: err.to_string(),
                sample_count: None,
            },
        }
    }

    /// The search-read contract. Served from the search store when it has
    /// documents, otherwise degraded to a primary-store scan.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        let timer = Instant::now();
        let (page, limit) = request.clamped();
        let (results, total, source) = if self.index.has_documents() {
            let (results, total) = self.index.search(request)?;
            (results, total, SearchSource::SearchStore)
        } else {
            let (results, total) = self.store.search_parts(request)?;
            (results, total, SearchSource::PrimaryStore)
        };
        let total_pages = total.div_ceil(limit as u64);
        Ok(SearchResponse {
            has_more: (page as u64) < total_pages,
            results,
            total,
            total_pages,
            search_time_ms: timer.elapsed().as_millis() as u64,
            source,
        })
    }

    // --- shutdown ---

    /// Stop accepting scheduled work and wait for in-flight runs to
    /// finish, up to `timeout`. Returns whether everything drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.scheduler.stop_all();
        let deadline = Instant::now() + timeout;
        while self.orchestrator.active_runs() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    active = self.orchestrator.active_runs(),
                    "drain timed out with runs still active"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }

    // --- accessors for the daemon and tests ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &PrimaryStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<PartIndex> {
        &self.index
    }

    pub fn progress_bus(&self) -> &Arc<ProgressBus> {
        &self.progress
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
