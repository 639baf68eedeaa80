mod errors;
mod id;
mod integration;
mod part;
mod schedule;
mod search;
mod sync;

pub use errors::ConfigError;
pub use id::IntegrationId;
pub use integration::{
    ApiAuth, FailurePolicy, FtpConfig, FtpProtocol, HttpApiConfig, Integration, IntegrationDraft,
    IntegrationKind, IntegrationStats, IntegrationStatus, Pagination, SpreadsheetConfig,
    SyncOptions, SECRET_MASK,
};
pub use part::{Part, PartKey, Price};
pub use schedule::{Frequency, Schedule, TimeOfDay, Weekday};
pub use search::{
    SearchRequest, SearchResponse, SearchSort, SearchSource, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use sync::{
    FileOutcome, FileStatus, LastSync, LastSyncStatus, ProgressStatus, RequestStatus, SyncOutcome,
    SyncPhase, SyncProgress, SyncRequest, TestOutcome,
};
