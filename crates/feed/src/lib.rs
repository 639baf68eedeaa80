//! Clients for the remote sources that deliver parts data: FTP/FTPS/SFTP
//! servers dropping files, REST APIs serving record pages, and local upload
//! directories. Each download runs on its own connection; nothing here is
//! shared between in-flight transfers.

mod ftp;
mod http;
mod local;
mod pattern;
mod scratch;

pub use ftp::FtpFeed;
pub use http::ApiFeed;
pub use local::LocalDirFeed;
pub use pattern::FilePattern;
pub use scratch::{ScratchDir, ScratchFile};

use chrono::{DateTime, Utc};
use models::TestOutcome;
use std::time::Duration;

/// One remote file a feed can deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Typed failure of a feed operation. Whether the orchestrator retries is
/// a property of the kind, not the call site.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),

    #[error("feed authentication failed: {0}")]
    Auth(String),

    #[error("feed operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found on feed: {0}")]
    NotFound(String),

    #[error("feed protocol error: {0}")]
    Protocol(String),

    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Transient failures worth another attempt. Auth is included: feeds
    /// routinely reject logins while their export job holds a lock.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Unreachable(_)
                | FeedError::Auth(_)
                | FeedError::Timeout(_)
                | FeedError::Io(_)
        )
    }
}

/// A feed that delivers whole files: FTP, SFTP, or an upload directory.
#[async_trait::async_trait]
pub trait FileFeed: Send + Sync {
    /// Probe connectivity and credentials without mutating anything.
    async fn test(&self) -> TestOutcome;

    /// List artifacts matching the configured pattern.
    async fn list(&self) -> Result<Vec<Artifact>, FeedError>;

    /// Stream one artifact into a fresh scratch file over a dedicated
    /// connection.
    async fn download(&self, name: &str, scratch: &ScratchDir) -> Result<ScratchFile, FeedError>;
}

/// A feed that delivers records directly: a paginated REST API.
#[async_trait::async_trait]
pub trait RecordFeed: Send + Sync {
    async fn test(&self) -> TestOutcome;

    /// The endpoints to pull, each an independent unit of work.
    fn endpoints(&self) -> Vec<String>;

    /// Fetch every record of one endpoint, honoring pagination and the
    /// configured rate limit. Pages are handed to `on_page` as they land.
    /// Returns the total record count.
    async fn fetch_records(
        &self,
        endpoint: &str,
        on_page: &mut (dyn FnMut(Vec<serde_json::Value>) + Send),
    ) -> Result<u64, FeedError>;
}
