//! In-memory registry of live sync progress, with pub/sub so pollers and
//! push consumers both work. Writes are cheap map merges under a lock;
//! counters never regress within a run.

use chrono::Utc;
use models::{IntegrationId, SyncProgress};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long a terminal entry stays readable for pollers.
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(60);

pub struct ProgressBus {
    entries: RwLock<HashMap<IntegrationId, SyncProgress>>,
    tx: broadcast::Sender<SyncProgress>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            entries: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Registers a fresh entry for a starting run, replacing any stale
    /// terminal entry for the integration.
    pub fn start(&self, id: IntegrationId) {
        self.evict_expired();
        let progress = SyncProgress::starting(id, Utc::now());
        self.entries.write().insert(id, progress.clone());
        let _ = self.tx.send(progress);
    }

    /// Merges an update into the entry and publishes the new snapshot.
    /// Counter fields are clamped so they never go backwards, keeping the
    /// monotonicity contract even against a misbehaving caller.
    pub fn update(&self, id: IntegrationId, apply: impl FnOnce(&mut SyncProgress)) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&id) else {
            return;
        };
        let before = (
            entry.files_processed,
            entry.records_processed,
            entry.records_inserted,
            entry.records_updated,
        );
        apply(entry);
        entry.files_processed = entry.files_processed.max(before.0);
        entry.records_processed = entry.records_processed.max(before.1);
        entry.records_inserted = entry.records_inserted.max(before.2);
        entry.records_updated = entry.records_updated.max(before.3);

        let now = Utc::now();
        entry.updated_at = now;
        entry.elapsed_ms = (now - entry.started_at).num_milliseconds().max(0) as u64;
        let snapshot = entry.clone();
        drop(entries);
        let _ = self.tx.send(snapshot);
    }

    /// Current snapshot, including recently finished runs within the
    /// retention window.
    pub fn get(&self, id: IntegrationId) -> Option<SyncProgress> {
        self.evict_expired();
        self.entries.read().get(&id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgress> {
        self.tx.subscribe()
    }

    pub fn is_live(&self, id: IntegrationId) -> bool {
        self.entries
            .read()
            .get(&id)
            .map(|p| !p.status.is_terminal())
            .unwrap_or(false)
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.retain(|_, progress| {
            if !progress.status.is_terminal() {
                return true;
            }
            let age = now - progress.updated_at;
            age.to_std().unwrap_or_default() < TERMINAL_RETENTION
        });
    }
}
