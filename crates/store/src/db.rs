use models::Part;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{mpsc, Arc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode or decode a stored document: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("the background writer is gone")]
    WriterGone,

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Whether a batch write waits for the store to acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Applied synchronously; counts are exact.
    Ack,
    /// Queued to a background writer and acknowledged immediately; counts
    /// are provisional and a deferred reindex reconciles reality.
    Async,
}

/// What a batch upsert reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: u64,
    pub updated: u64,
    /// False when the write was queued rather than applied.
    pub acknowledged: bool,
}

pub(crate) enum WriteJob {
    Batch(Vec<Part>),
    /// Reply once every job queued before this one has been applied.
    Flush(mpsc::Sender<()>),
}

pub(crate) struct Inner {
    pub(crate) connection: Connection,
}

/// Handle to the primary store. Cheap to clone; all clones share one
/// SQLite connection behind a mutex, in addition to the background writer
/// used for unacknowledged batches.
#[derive(Clone)]
pub struct PrimaryStore {
    pub(crate) inner: Arc<Mutex<Inner>>,
    writer_tx: mpsc::Sender<WriteJob>,
}

const SCHEMA_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS integrations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    document TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parts (
    integration_id TEXT NOT NULL,
    part_number TEXT NOT NULL,
    supplier TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    brand TEXT NOT NULL DEFAULT '',
    price REAL,
    quantity INTEGER NOT NULL DEFAULT 0,
    imported_at TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    document TEXT NOT NULL,
    PRIMARY KEY (integration_id, part_number, supplier)
);
CREATE INDEX IF NOT EXISTS parts_by_number ON parts (part_number);
CREATE INDEX IF NOT EXISTS parts_by_brand ON parts (brand);

CREATE TABLE IF NOT EXISTS sync_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    integration_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    source TEXT NOT NULL,
    error TEXT
);
CREATE INDEX IF NOT EXISTS sync_requests_by_status ON sync_requests (status, integration_id);

CREATE TABLE IF NOT EXISTS sync_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    integration_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    outcome TEXT NOT NULL
);
"#;

impl PrimaryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// An isolated in-memory store, used by tests and `test_config` probes.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self, StoreError> {
        connection.execute_batch(SCHEMA_INIT)?;
        let inner = Arc::new(Mutex::new(Inner { connection }));

        let (writer_tx, writer_rx) = mpsc::channel::<WriteJob>();
        let writer_inner = inner.clone();
        std::thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || writer_loop(writer_inner, writer_rx))
            .expect("failed to spawn store writer thread");

        Ok(Self { inner, writer_tx })
    }

    /// Upserts a batch of parts keyed by
    /// `(integration_id, part_number, supplier)`. Row order within the
    /// batch is preserved, so a later duplicate of a key wins.
    pub fn upsert_parts(
        &self,
        parts: Vec<Part>,
        mode: WriteMode,
    ) -> Result<WriteSummary, StoreError> {
        match mode {
            WriteMode::Ack => {
                let mut inner = self.inner.lock();
                crate::parts::apply_batch(&mut inner.connection, parts)
            }
            WriteMode::Async => {
                let estimated = parts.len() as u64;
                self.writer_tx
                    .send(WriteJob::Batch(parts))
                    .map_err(|_| StoreError::WriterGone)?;
                Ok(WriteSummary {
                    inserted: estimated,
                    updated: 0,
                    acknowledged: false,
                })
            }
        }
    }

    /// Blocks until every previously queued async batch has been applied.
    pub fn flush_async_writes(&self) -> Result<(), StoreError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.writer_tx
            .send(WriteJob::Flush(reply_tx))
            .map_err(|_| StoreError::WriterGone)?;
        reply_rx.recv().map_err(|_| StoreError::WriterGone)
    }
}

fn writer_loop(inner: Arc<Mutex<Inner>>, rx: mpsc::Receiver<WriteJob>) {
    while let Ok(job) = rx.recv() {
        match job {
            WriteJob::Batch(parts) => {
                let mut guard = inner.lock();
                if let Err(err) = crate::parts::apply_batch(&mut guard.connection, parts) {
                    // Fire-and-forget by contract: the loss is bounded and
                    // surfaced by the deferred reindex.
                    tracing::error!(%err, "async part batch failed");
                }
            }
            WriteJob::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
}
