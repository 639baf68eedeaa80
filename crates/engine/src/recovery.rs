//! Boot-time repair of state a crashed process left behind. A stored
//! `syncing` status cannot be true at startup; the run it described died
//! with the process.

use models::{IntegrationId, IntegrationStatus, LastSyncStatus};
use store::{PrimaryStore, StoreError};

pub const INTERRUPTED_MESSAGE: &str = "Sync interrupted by server restart";

/// Flips every stale `syncing` integration back to `active`. Runs that had
/// made progress keep it, marked `interrupted`; runs that hadn't are
/// cleared. Returns the ids that were repaired.
pub fn reconcile_stale_syncs(store: &PrimaryStore) -> Result<Vec<IntegrationId>, StoreError> {
    let stale = store.list_integrations_by_status(IntegrationStatus::Syncing)?;
    let mut repaired = Vec::with_capacity(stale.len());
    for mut integration in stale {
        integration.status = IntegrationStatus::Active;
        match integration.last_sync.as_mut() {
            Some(last_sync) if last_sync.processed > 0 => {
                last_sync.status = LastSyncStatus::Interrupted;
                last_sync.error = Some(INTERRUPTED_MESSAGE.to_string());
            }
            Some(last_sync) => {
                last_sync.error = None;
            }
            None => {}
        }
        store.put_integration(&integration)?;
        tracing::warn!(
            integration = %integration.id,
            name = %integration.name,
            "repaired integration left in syncing state"
        );
        repaired.push(integration.id);
    }
    Ok(repaired)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use models::{
        Frequency, FtpConfig, FtpProtocol, Integration, IntegrationDraft, IntegrationKind,
        LastSync, Schedule, SyncOptions,
    };
    use pretty_assertions::assert_eq;

    fn syncing_integration(processed: u64) -> Integration {
        let mut integration = IntegrationDraft {
            name: "Acme".to_string(),
            kind: IntegrationKind::Ftp(FtpConfig {
                host: "ftp.test".to_string(),
                port: 21,
                username: "u".to_string(),
                password: "p".to_string(),
                remote_path: String::new(),
                file_pattern: "*.csv".to_string(),
                secure: false,
                protocol: FtpProtocol::Ftp,
                timeout_secs: 30,
            }),
            schedule: Schedule {
                enabled: false,
                frequency: Frequency::Hourly,
                timezone: "UTC".to_string(),
            },
            options: SyncOptions::default(),
            created_by: None,
        }
        .into_integration(Utc::now());
        integration.status = IntegrationStatus::Syncing;
        integration.last_sync = Some(LastSync {
            date: Utc::now(),
            status: LastSyncStatus::Failed,
            duration_ms: 1000,
            processed,
            inserted: processed,
            updated: 0,
            skipped: 0,
            error: Some("stale".to_string()),
            files: Vec::new(),
        });
        integration
    }

    #[test]
    fn interrupted_runs_with_progress_are_marked() {
        let store = PrimaryStore::open_in_memory().unwrap();
        let integration = syncing_integration(500);
        store.put_integration(&integration).unwrap();

        let repaired = reconcile_stale_syncs(&store).unwrap();
        assert_eq!(repaired, vec![integration.id]);

        let fixed = store.get_integration(integration.id).unwrap().unwrap();
        assert_eq!(fixed.status, IntegrationStatus::Active);
        let last_sync = fixed.last_sync.unwrap();
        assert_eq!(last_sync.status, LastSyncStatus::Interrupted);
        assert_eq!(last_sync.error.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(last_sync.processed, 500);
    }

    #[test]
    fn interrupted_runs_without_progress_are_cleared() {
        let store = PrimaryStore::open_in_memory().unwrap();
        let integration = syncing_integration(0);
        store.put_integration(&integration).unwrap();

        reconcile_stale_syncs(&store).unwrap();
        let fixed = store.get_integration(integration.id).unwrap().unwrap();
        assert_eq!(fixed.status, IntegrationStatus::Active);
        assert_eq!(fixed.last_sync.unwrap().error, None);
    }

    #[test]
    fn healthy_integrations_are_untouched() {
        let store = PrimaryStore::open_in_memory().unwrap();
        let mut integration = syncing_integration(10);
        integration.status = IntegrationStatus::Active;
        store.put_integration(&integration).unwrap();

        assert!(reconcile_stale_syncs(&store).unwrap().is_empty());
    }
}
