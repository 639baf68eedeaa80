//! Worker-mode execution: drain the durable sync-request queue. Multiple
//! worker processes can share the queue safely, the claim is an atomic
//! `pending → processing` transition in the primary store.

use crate::orchestrator::{Orchestrator, SyncError};
use models::RequestStatus;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use store::PrimaryStore;

/// Polls the queue until `shutdown` resolves, claiming one request at a
/// time and running it to completion. In-flight runs finish before the
/// worker returns.
pub async fn run_worker(
    store: PrimaryStore,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        // Notice shutdown even while the queue is busy.
        if tokio::time::timeout(Duration::ZERO, &mut shutdown)
            .await
            .is_ok()
        {
            break;
        }

        let claimed = match store.claim_sync_request() {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::error!(%err, "failed to poll the sync queue (will retry)");
                None
            }
        };

        match claimed {
            Some(request) => {
                tracing::info!(
                    request = request.id,
                    integration = %request.integration_id,
                    source = %request.source,
                    "claimed sync request"
                );
                let (status, error) =
                    match orchestrator.sync_integration(request.integration_id).await {
                        Ok(outcome) if outcome.ok => (RequestStatus::Done, None),
                        Ok(outcome) => (RequestStatus::Failed, outcome.error),
                        Err(SyncError::AlreadyRunning) => (
                            RequestStatus::Done,
                            Some("a sync was already running".to_string()),
                        ),
                        Err(err) => (RequestStatus::Failed, Some(err.to_string())),
                    };
                if let Err(err) =
                    store.finish_sync_request(request.id, status, error.as_deref())
                {
                    tracing::error!(request = request.id, %err, "failed to finish sync request");
                }
            }
            None => {
                // Jitter the idle poll so multiple workers spread out.
                let jitter = 0.9 + rand::thread_rng().gen::<f64>() * 0.2;
                tokio::select! {
                    () = tokio::time::sleep(poll_interval.mul_f64(jitter)) => {}
                    () = &mut shutdown => break,
                }
            }
        }
    }
    tracing::info!("worker loop stopped");
}
