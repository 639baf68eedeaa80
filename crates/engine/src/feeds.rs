use feed::{ApiFeed, FileFeed, FtpFeed, LocalDirFeed, RecordFeed};
use models::{ConfigError, Integration, IntegrationKind, TestOutcome};
use std::sync::Arc;

/// A constructed client for one integration's feed.
#[derive(Clone)]
pub enum FeedHandle {
    Files(Arc<dyn FileFeed>),
    Records(Arc<dyn RecordFeed>),
}

impl FeedHandle {
    pub async fn test(&self) -> TestOutcome {
        match self {
            FeedHandle::Files(feed) => feed.test().await,
            FeedHandle::Records(feed) => feed.test().await,
        }
    }
}

/// Builds feed clients from integration configuration. The orchestrator
/// only ever sees this trait, so tests substitute fixture feeds without
/// touching a network.
pub trait FeedFactory: Send + Sync {
    fn make(&self, integration: &Integration) -> Result<FeedHandle, ConfigError>;
}

/// The real clients: FTP/FTPS/SFTP, REST APIs, upload directories.
#[derive(Debug, Default)]
pub struct ProductionFeeds;

impl FeedFactory for ProductionFeeds {
    fn make(&self, integration: &Integration) -> Result<FeedHandle, ConfigError> {
        match &integration.kind {
            IntegrationKind::Ftp(cfg) => Ok(FeedHandle::Files(Arc::new(FtpFeed::new(cfg)?))),
            IntegrationKind::Spreadsheet(cfg) => {
                Ok(FeedHandle::Files(Arc::new(LocalDirFeed::new(cfg)?)))
            }
            IntegrationKind::HttpApi(cfg) => Ok(FeedHandle::Records(Arc::new(ApiFeed::new(
                cfg,
                integration.options.max_retries,
            )?))),
        }
    }
}
