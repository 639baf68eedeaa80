//! The sync engine proper: the per-integration orchestrator, the cron
//! scheduler, the in-memory progress bus, and the `Engine` facade the
//! boundary HTTP layer is handed. Everything stateful is owned by the
//! `Engine` value; nothing in here is a process singleton.

mod config;
mod engine;
mod feeds;
mod orchestrator;
mod progress;
mod recovery;
mod scheduler;
mod worker;

pub use config::{DispatchMode, EngineConfig, SyncPriority};
pub use engine::{Engine, EngineError, IntegrationStatusView};
pub use feeds::{FeedFactory, FeedHandle, ProductionFeeds};
pub use orchestrator::{Orchestrator, SyncError};
pub use progress::ProgressBus;
pub use recovery::reconcile_stale_syncs;
pub use scheduler::{Dispatch, Scheduler};
pub use worker::run_worker;
