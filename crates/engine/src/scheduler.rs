//! Per-integration cron tasks. Each enabled schedule gets one tokio task
//! that sleeps until the next fire instant and then hands the integration
//! id to the dispatcher. Rescheduling aborts the old task before spawning
//! the replacement, so a schedule can never double-fire.

use chrono::Utc;
use models::{Integration, IntegrationId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Receives integration ids when their schedule fires. Implemented by the
/// engine: either a direct orchestrator call or a durable queue insert.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, id: IntegrationId);
}

impl<F: Fn(IntegrationId) + Send + Sync + 'static> Dispatch for F {
    fn dispatch(&self, id: IntegrationId) {
        self(id)
    }
}

pub struct Scheduler {
    dispatch: Arc<dyn Dispatch>,
    tasks: Mutex<HashMap<IntegrationId, tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            dispatch,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the cron task for one integration. Invalid
    /// schedules and disabled ones just unregister.
    pub fn schedule(&self, integration: &Integration) {
        let id = integration.id;
        if !integration.schedule.enabled {
            self.stop(id);
            return;
        }
        let expr = match integration.schedule.validate() {
            Ok(expr) => expr,
            Err(err) => {
                tracing::error!(
                    integration = %id,
                    name = %integration.name,
                    %err,
                    "invalid schedule, not registering"
                );
                self.stop(id);
                return;
            }
        };

        let schedule = integration.schedule.clone();
        let dispatch = self.dispatch.clone();
        let name = integration.name.clone();
        let task = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = schedule.next_fire(now) else {
                    tracing::warn!(integration = %id, "schedule has no future fire, stopping");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::debug!(integration = %id, %next, "sleeping until next fire");
                tokio::time::sleep(wait).await;
                tracing::info!(integration = %id, name = %name, "schedule fired");
                dispatch.dispatch(id);
            }
        });

        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.insert(id, task) {
            previous.abort();
        }
        tracing::info!(integration = %id, cron = %expr, tz = %integration.schedule.timezone, "scheduled");
    }

    /// Re-reads the integration and replaces its task atomically.
    pub fn reschedule(&self, integration: &Integration) {
        self.schedule(integration);
    }

    pub fn stop(&self, id: IntegrationId) {
        if let Some(task) = self.tasks.lock().remove(&id) {
            task.abort();
            tracing::info!(integration = %id, "schedule stopped");
        }
    }

    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock();
        for (_, task) in tasks.drain() {
            task.abort();
        }
        tracing::info!("all schedules stopped");
    }

    pub fn scheduled_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Registers every enabled schedule from the store. Called at boot,
    /// after stale-sync reconciliation.
    pub fn schedule_all(&self, integrations: &[Integration]) {
        for integration in integrations {
            if integration.schedule.enabled {
                self.schedule(integration);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}
