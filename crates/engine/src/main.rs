use anyhow::Context;
use clap::Parser;
use engine::{DispatchMode, Engine, EngineConfig, ProductionFeeds, SyncPriority};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// partsyncd runs the integration sync engine: scheduled and queued
/// catalog pulls from supplier feeds into the primary store and the
/// search mirror.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the primary store SQLite database.
    #[clap(long, env = "PARTSYNC_DB", default_value = "partsync.db")]
    db: PathBuf,
    /// Directory holding the search index.
    #[clap(long, env = "PARTSYNC_INDEX_DIR", default_value = "partsync-index")]
    index_dir: PathBuf,
    /// Directory downloads are staged into.
    #[clap(long, env = "PARTSYNC_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
    /// Currency assumed for prices that arrive untagged.
    #[clap(long, env = "PARTSYNC_CURRENCY", default_value = "USD")]
    currency: String,
    /// Concurrent files per sync at high priority (2..=30).
    #[clap(long, env = "PARTSYNC_PARALLELISM", default_value = "20")]
    parallelism: usize,
    /// Sync priority; `low` keeps the engine polite in a shared process.
    #[clap(long, env = "PARTSYNC_PRIORITY", value_enum, default_value = "high")]
    priority: SyncPriority,
    /// Rebuild the search mirror once after import instead of per batch.
    #[clap(
        long,
        env = "PARTSYNC_DEFERRED_INDEXING",
        action = clap::ArgAction::Set,
        default_value = "true"
    )]
    deferred_indexing: bool,
    /// Use the unacknowledged bulk write path.
    #[clap(
        long,
        env = "PARTSYNC_FAST_WRITES",
        action = clap::ArgAction::Set,
        default_value = "true"
    )]
    fast_writes: bool,
    /// How cron fires are executed.
    #[clap(long, env = "PARTSYNC_DISPATCH", value_enum, default_value = "direct")]
    dispatch: DispatchMode,
    /// Also drain the sync-request queue in this process (worker mode).
    #[clap(long, env = "PARTSYNC_SERVE_QUEUE")]
    serve_queue: bool,
    /// Queue poll interval in seconds.
    #[clap(long, env = "PARTSYNC_POLL_SECS", default_value = "5")]
    poll_secs: u64,
    /// Grace period for in-flight runs on shutdown, in seconds.
    #[clap(long, env = "PARTSYNC_DRAIN_SECS", default_value = "600")]
    drain_secs: u64,
}

fn main() -> anyhow::Result<()> {
    // Reasonable defaults for structured logs on stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main(args));
    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let config = EngineConfig {
        db_path: args.db,
        index_dir: args.index_dir,
        scratch_dir: args
            .scratch_dir
            .unwrap_or_else(|| std::env::temp_dir().join("partsync-scratch")),
        default_currency: args.currency,
        parallelism: args.parallelism,
        priority: args.priority,
        deferred_indexing: args.deferred_indexing,
        fast_writes: args.fast_writes,
        dispatch: args.dispatch,
        batch_size: parser::DEFAULT_BATCH_SIZE,
    };

    let engine = Engine::open(config, Arc::new(ProductionFeeds)).context("failed to open engine")?;
    engine.start().context("failed to start engine")?;

    let queue_worker = if args.serve_queue || args.dispatch == DispatchMode::Worker {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let store = engine.store().clone();
        let orchestrator = engine.orchestrator().clone();
        let poll = Duration::from_secs(args.poll_secs.max(1));
        let handle = tokio::spawn(engine::run_worker(store, orchestrator, poll, async move {
            let _ = stop_rx.await;
        }));
        Some((stop_tx, handle))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested, draining");

    if let Some((stop_tx, handle)) = queue_worker {
        let _ = stop_tx.send(());
        let _ = handle.await;
    }
    let drained = engine.drain(Duration::from_secs(args.drain_secs)).await;
    tracing::info!(drained, "bye");
    Ok(())
}
