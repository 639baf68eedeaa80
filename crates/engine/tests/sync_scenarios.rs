//! End-to-end sync scenarios over a fixture feed: no network, real
//! stores (SQLite file + tantivy directory) under a tempdir.

use engine::{DispatchMode, Engine, EngineConfig, EngineError, FeedFactory, FeedHandle};
use feed::{Artifact, FeedError, FileFeed, ScratchDir, ScratchFile};
use models::{
    FailurePolicy, FileStatus, Frequency, FtpConfig, FtpProtocol, Integration, IntegrationDraft,
    IntegrationId, IntegrationKind, IntegrationStatus, LastSync, LastSyncStatus, SearchRequest,
    SearchSource, Schedule, SyncOptions, TestOutcome,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// An in-memory file feed whose contents tests mutate between runs.
#[derive(Default)]
struct FixtureFiles {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_downloads: Mutex<HashSet<String>>,
}

impl FixtureFiles {
    fn put(&self, name: &str, content: &[u8]) {
        self.files.lock().insert(name.to_string(), content.to_vec());
    }

    fn remove(&self, name: &str) {
        self.files.lock().remove(name);
    }

    fn fail_download_of(&self, name: &str) {
        self.fail_downloads.lock().insert(name.to_string());
    }
}

struct FixtureFeed(Arc<FixtureFiles>);

#[async_trait::async_trait]
impl FileFeed for FixtureFeed {
    async fn test(&self) -> TestOutcome {
        TestOutcome {
            ok: true,
            message: "fixture".to_string(),
            sample_count: Some(self.0.files.lock().len() as u64),
        }
    }

    async fn list(&self) -> Result<Vec<Artifact>, FeedError> {
        Ok(self
            .0
            .files
            .lock()
            .iter()
            .map(|(name, content)| Artifact {
                name: name.clone(),
                size: Some(content.len() as u64),
                modified_at: None,
            })
            .collect())
    }

    async fn download(&self, name: &str, scratch: &ScratchDir) -> Result<ScratchFile, FeedError> {
        if self.0.fail_downloads.lock().contains(name) {
            return Err(FeedError::Unreachable(
                "connection reset by peer".to_string(),
            ));
        }
        let content = self
            .0
            .files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(name.to_string()))?;
        let path = scratch.unique_path(name);
        std::fs::write(&path, content)?;
        Ok(ScratchFile::new(path))
    }
}

struct FixtureFactory(Arc<FixtureFiles>);

impl FeedFactory for FixtureFactory {
    fn make(&self, _integration: &Integration) -> Result<FeedHandle, models::ConfigError> {
        Ok(FeedHandle::Files(Arc::new(FixtureFeed(self.0.clone()))))
    }
}

struct Harness {
    engine: Arc<Engine>,
    files: Arc<FixtureFiles>,
    _dir: tempfile::TempDir,
}

fn harness(mutate: impl FnOnce(&mut EngineConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig {
        db_path: dir.path().join("partsync.db"),
        index_dir: dir.path().join("index"),
        scratch_dir: dir.path().join("scratch"),
        ..EngineConfig::default()
    };
    mutate(&mut config);

    let files = Arc::new(FixtureFiles::default());
    let engine = Engine::open(config, Arc::new(FixtureFactory(files.clone())))
        .expect("engine should open");
    Harness {
        engine,
        files,
        _dir: dir,
    }
}

fn draft(schedule_enabled: bool) -> IntegrationDraft {
    IntegrationDraft {
        name: "Acme Parts".to_string(),
        kind: IntegrationKind::Ftp(FtpConfig {
            host: "ftp.acme.test".to_string(),
            port: 21,
            username: "parts".to_string(),
            password: "secret".to_string(),
            remote_path: "/exports".to_string(),
            file_pattern: "*.csv".to_string(),
            secure: false,
            protocol: FtpProtocol::Ftp,
            timeout_secs: 30,
        }),
        schedule: Schedule {
            enabled: schedule_enabled,
            frequency: Frequency::Hourly,
            timezone: "UTC".to_string(),
        },
        options: SyncOptions::default(),
        created_by: Some("tests".to_string()),
    }
}

const S1_CSV: &[u8] = b"partNumber,description,brand,supplier,price,quantity\n\
8471474,HYDRAULIC PUMP,BOSCH,ACME,2450.00,15\n\
8471474,HYDRAULIC PUMP HD,SKF,NORDIC,3250.00,5\n\
3461928,FUEL INJECTOR,DENSO,ACME,875.00,25\n";

#[tokio::test]
async fn s1_clean_ftp_sync_of_one_file() {
    let h = harness(|_| {});
    h.files.put("parts-2025-01.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    let outcome = h.engine.run_sync(integration.id).await.unwrap();
    assert!(outcome.ok, "outcome: {outcome:?}");
    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.inserted, 3);
    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.files.len(), 1);
    assert_eq!(outcome.files[0].status, FileStatus::Success);
    assert_eq!(outcome.files[0].record_count, Some(3));
    assert_eq!(outcome.indexed, Some(3));

    // Exactly three parts in the primary store.
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 3);
    let pump = h
        .engine
        .store()
        .get_part(integration.id, "8471474", "ACME")
        .unwrap()
        .expect("pump should exist");
    assert_eq!(pump.brand, "BOSCH");
    assert_eq!(pump.quantity, 15);

    // Three documents in the search mirror after the deferred reindex.
    assert_eq!(
        h.engine.index().count_for_integration(integration.id).unwrap(),
        3
    );

    // Outcome recorded on the integration.
    let status = h.engine.status(integration.id).unwrap();
    assert!(!status.is_syncing);
    assert_eq!(status.status, IntegrationStatus::Active);
    let last_sync = status.last_sync.expect("last sync recorded");
    assert_eq!(last_sync.status, LastSyncStatus::Success);
    assert_eq!(last_sync.processed, 3);
    assert_eq!(status.stats.total_syncs, 1);
    assert_eq!(status.stats.successful_syncs, 1);
    assert_eq!(status.stats.total_records, 3);
}

#[tokio::test]
async fn s2_resync_purges_removed_rows() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();
    h.engine.run_sync(integration.id).await.unwrap();
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 3);

    // Same file, next tick, with the last row gone.
    h.files.put(
        "parts.csv",
        b"partNumber,description,brand,supplier,price,quantity\n\
          8471474,HYDRAULIC PUMP,BOSCH,ACME,2450.00,15\n\
          8471474,HYDRAULIC PUMP HD,SKF,NORDIC,3250.00,5\n",
    );
    let outcome = h.engine.run_sync(integration.id).await.unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.processed, 2);

    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 2);
    // Clean-sync purity: the removed part is gone, not orphaned.
    assert_eq!(
        h.engine
            .store()
            .get_part(integration.id, "3461928", "ACME")
            .unwrap(),
        None
    );
    assert_eq!(
        h.engine.index().count_for_integration(integration.id).unwrap(),
        2
    );
}

#[tokio::test]
async fn s3_parallel_download_isolation() {
    let h = harness(|c| c.parallelism = 5);
    for n in 1..=5 {
        let content = format!(
            "partNumber,supplier,price,quantity\nF{n}A,ACME,10.00,{n}\nF{n}B,ACME,20.00,{n}\n"
        );
        h.files.put(&format!("file-{n}.csv"), content.as_bytes());
    }
    h.files.fail_download_of("file-3.csv");

    let integration = h.engine.create_integration(draft(false)).unwrap();
    let outcome = h.engine.run_sync(integration.id).await.unwrap();

    // The run succeeds because four files made it.
    assert!(outcome.ok);
    assert_eq!(outcome.files.len(), 5);
    let failed: Vec<_> = outcome
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "file-3.csv");
    assert!(failed[0].error.as_deref().unwrap().contains("connection reset"));
    assert!(!outcome.errors.is_empty());

    // Four files of two rows each landed untouched by the sibling failure.
    assert_eq!(outcome.processed, 8);
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 8);
}

#[tokio::test]
async fn s3b_fail_on_any_file_policy_fails_the_run() {
    let h = harness(|_| {});
    h.files.put("good.csv", b"partNumber\nA1\n");
    h.files.put("bad.csv", b"partNumber\nB1\n");
    h.files.fail_download_of("bad.csv");

    let mut draft = draft(false);
    draft.options.failure_policy = FailurePolicy::FailOnAnyFile;
    let integration = h.engine.create_integration(draft).unwrap();

    let outcome = h.engine.run_sync(integration.id).await.unwrap();
    assert!(!outcome.ok);
    let status = h.engine.status(integration.id).unwrap();
    assert_eq!(status.status, IntegrationStatus::Error);
    assert_eq!(
        status.last_sync.unwrap().status,
        LastSyncStatus::Failed
    );
}

#[tokio::test]
async fn s4_reentrant_sync_short_circuits() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    let (first, second) = tokio::join!(
        h.engine.run_sync(integration.id),
        h.engine.run_sync(integration.id),
    );
    let outcomes = [first, second];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    let already_running = outcomes
        .iter()
        .filter(|r| matches!(r, Err(engine::SyncError::AlreadyRunning)))
        .count();
    assert_eq!((ok, already_running), (1, 1), "outcomes: {outcomes:?}");

    // The winning run completed normally.
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 3);
}

#[tokio::test]
async fn s5_restart_recovery_repairs_stale_syncing() {
    let h = harness(|_| {});
    let integration = h.engine.create_integration(draft(true)).unwrap();

    // Simulate a crash mid-processing: the stored record says syncing
    // with progress.
    let mut crashed = h.engine.store().get_integration(integration.id).unwrap().unwrap();
    crashed.status = IntegrationStatus::Syncing;
    crashed.last_sync = Some(LastSync {
        date: chrono::Utc::now(),
        status: LastSyncStatus::Failed,
        duration_ms: 123,
        processed: 500,
        inserted: 500,
        updated: 0,
        skipped: 0,
        error: None,
        files: Vec::new(),
    });
    h.engine.store().put_integration(&crashed).unwrap();

    // Boot.
    h.engine.start().unwrap();

    let status = h.engine.status(integration.id).unwrap();
    assert!(!status.is_syncing);
    assert_eq!(status.status, IntegrationStatus::Active);
    let last_sync = status.last_sync.unwrap();
    assert_eq!(last_sync.status, LastSyncStatus::Interrupted);
    assert_eq!(
        last_sync.error.as_deref(),
        Some("Sync interrupted by server restart")
    );
    // The schedule is registered, so the next tick re-runs it.
    assert_eq!(h.engine.scheduler().scheduled_count(), 1);
}

#[tokio::test]
async fn s6_search_serves_fallback_until_indexed() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    // Empty index: the read contract degrades to the primary store.
    let empty = h.engine.search(&SearchRequest::default()).unwrap();
    assert_eq!(empty.source, SearchSource::PrimaryStore);
    assert_eq!(empty.total, 0);

    h.engine.run_sync(integration.id).await.unwrap();

    let after = h
        .engine
        .search(&SearchRequest {
            query: "hydraulic".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(after.source, SearchSource::SearchStore);
    assert_eq!(after.total, 2);
    assert_eq!(after.total_pages, 1);
    assert!(!after.has_more);
}

#[tokio::test]
async fn progress_counters_are_monotonic_and_terminal() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    let mut rx = h.engine.progress_bus().subscribe();
    h.engine.run_sync(integration.id).await.unwrap();

    let mut last = (0u64, 0u64, 0u64, 0u64);
    let mut terminal_seen = 0;
    while let Ok(snapshot) = rx.try_recv() {
        let current = (
            snapshot.files_processed,
            snapshot.records_processed,
            snapshot.records_inserted,
            snapshot.records_updated,
        );
        assert!(
            current.0 >= last.0
                && current.1 >= last.1
                && current.2 >= last.2
                && current.3 >= last.3,
            "progress regressed: {last:?} -> {current:?}"
        );
        last = current;
        if snapshot.status.is_terminal() {
            terminal_seen += 1;
        }
    }
    assert_eq!(terminal_seen, 1, "exactly one terminal snapshot per run");

    // The terminal snapshot stays pollable within the retention window.
    let progress = h.engine.progress(integration.id).expect("still retained");
    assert!(progress.status.is_terminal());
    assert_eq!(progress.records_processed, 3);
}

#[tokio::test]
async fn delta_sync_skips_cleaning_and_upserts() {
    let h = harness(|_| {});
    h.files.put("a.csv", b"partNumber,supplier,price\nA1,ACME,10.00\n");
    let mut delta_draft = draft(false);
    delta_draft.options.delta_sync = true;
    let integration = h.engine.create_integration(delta_draft).unwrap();

    h.engine.run_sync(integration.id).await.unwrap();
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 1);

    // Replace the feed with a different part; the old one must survive a
    // delta sync.
    h.files.remove("a.csv");
    h.files.put("b.csv", b"partNumber,supplier,price\nB2,ACME,20.00\n");
    let outcome = h.engine.run_sync(integration.id).await.unwrap();
    assert!(outcome.ok);
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 2);

    // And updates count as updates under delta.
    let outcome = h.engine.run_sync(integration.id).await.unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.inserted, 0);
}

#[tokio::test]
async fn inline_indexing_mirrors_during_processing() {
    let h = harness(|c| c.deferred_indexing = false);
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    let outcome = h.engine.run_sync(integration.id).await.unwrap();
    assert!(outcome.ok);
    // No deferred indexing phase ran.
    assert_eq!(outcome.indexed, None);
    // The mirror was still populated, batch by batch.
    assert_eq!(
        h.engine.index().count_for_integration(integration.id).unwrap(),
        3
    );
}

#[tokio::test]
async fn deleting_an_integration_purges_both_stores() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(true)).unwrap();
    h.engine.run_sync(integration.id).await.unwrap();
    assert_eq!(h.engine.scheduler().scheduled_count(), 1);

    h.engine.delete_integration(integration.id).unwrap();
    assert_eq!(h.engine.scheduler().scheduled_count(), 0);
    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 0);
    assert_eq!(
        h.engine.index().count_for_integration(integration.id).unwrap(),
        0
    );
    assert!(matches!(
        h.engine.status(integration.id),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn clean_sync_reproduces_the_same_part_set() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    h.engine.run_sync(integration.id).await.unwrap();
    let first: BTreeSet<(String, String)> = part_keys(&h, integration.id);

    // Purge and sync the same file set again: the part set reproduces.
    h.engine
        .store()
        .delete_parts_by_integration(integration.id)
        .unwrap();
    h.engine.run_sync(integration.id).await.unwrap();
    let second: BTreeSet<(String, String)> = part_keys(&h, integration.id);
    assert_eq!(first, second);
}

fn part_keys(h: &Harness, id: IntegrationId) -> BTreeSet<(String, String)> {
    h.engine
        .store()
        .parts_for_integration(id, 0, 1000)
        .unwrap()
        .into_iter()
        .map(|p| (p.part_number, p.supplier))
        .collect()
}

#[tokio::test]
async fn worker_mode_queues_and_drains() {
    let h = harness(|c| c.dispatch = DispatchMode::Worker);
    h.files.put("parts.csv", S1_CSV);
    let integration = h.engine.create_integration(draft(false)).unwrap();

    // 202-style: request returns once the durable request exists.
    h.engine.request_sync(integration.id, "manual").unwrap();
    // 409-style: a second request while one is queued.
    assert!(matches!(
        h.engine.request_sync(integration.id, "manual"),
        Err(EngineError::AlreadyRunning(_))
    ));

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let worker = tokio::spawn(engine::run_worker(
        h.engine.store().clone(),
        h.engine.orchestrator().clone(),
        Duration::from_millis(10),
        async move {
            let _ = stop_rx.await;
        },
    ));

    // Wait for the worker to finish the claimed request.
    for _ in 0..100 {
        if h.engine.store().count_parts(integration.id).unwrap() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let _ = stop_tx.send(());
    worker.await.unwrap();

    assert_eq!(h.engine.store().count_parts(integration.id).unwrap(), 3);
    let status = h.engine.status(integration.id).unwrap();
    assert_eq!(status.status, IntegrationStatus::Active);
}

#[tokio::test]
async fn test_config_probes_without_persisting() {
    let h = harness(|_| {});
    h.files.put("parts.csv", S1_CSV);

    let outcome = h.engine.test_config(draft(false)).await;
    assert!(outcome.ok);
    assert_eq!(outcome.sample_count, Some(1));
    // Nothing was persisted by the probe.
    assert!(h.engine.list_integrations().unwrap().is_empty());
}
